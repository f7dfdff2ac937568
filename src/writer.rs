//! 分片写入：按精确偏移追加字节，先落盘再推进 offset。

use bytes::Bytes;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use std::io;
use std::pin::pin;
use tracing::{debug, info, warn};

use crate::backend::StoreError;
use crate::checksum::Checksum;
use crate::error::{UploadError, UploadResult};
use crate::info::{UploadInfo, UploadState};
use crate::locking::UploadLock;
use crate::store::UploadStore;

impl UploadStore {
    /// 在 `offset` 处追加 `data`，返回写入的字节数。
    pub async fn write_chunk<S>(
        &self,
        lock: &UploadLock,
        offset: u64,
        data: S,
        checksum: Option<&Checksum>,
    ) -> UploadResult<u64>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let info = self
            .write_chunk_with_length(lock, offset, None, data, checksum)
            .await?;
        Ok(info.offset - offset)
    }

    /// 写入分片，可同时确定延迟长度，返回更新后的记录。
    ///
    /// 所有校验在持久化之前完成，长度与新 offset 在同一次记录更新中写入。
    /// 字节先落盘再推进 offset；任何失败都保持记录不变。
    pub async fn write_chunk_with_length<S>(
        &self,
        lock: &UploadLock,
        offset: u64,
        declared_length: Option<u64>,
        data: S,
        checksum: Option<&Checksum>,
    ) -> UploadResult<UploadInfo>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let mut info = self.load(lock).await?;
        if info.state() == UploadState::ConcatenatedFinal {
            return Err(UploadError::InvalidState(format!(
                "upload {} is a concatenated final upload",
                info.id
            )));
        }
        if offset != info.offset {
            return Err(UploadError::OffsetMismatch {
                expected: info.offset,
                actual: offset,
            });
        }

        let was_complete = info.is_complete();
        let mut length_fixed = false;
        if let Some(length) = declared_length {
            if info.size_is_deferred {
                self.settle_length(&mut info, length)?;
                length_fixed = true;
            } else if info.size != Some(length) {
                return Err(UploadError::LengthAlreadyFixed(info.id));
            }
        }
        let limit = info
            .remaining()
            .or_else(|| self.config().max_size().map(|max| max.saturating_sub(offset)));

        let mut sink = self.content.open_writer(&info.id, offset).await?;
        let mut hasher = checksum.map(|checksum| checksum.algorithm.hasher());
        let mut written: u64 = 0;
        let mut data = pin!(data);
        let streamed: UploadResult<()> = async {
            while let Some(chunk) = data.next().await {
                let chunk = chunk.map_err(|err| UploadError::Storage(StoreError::Io(err)))?;
                if chunk.is_empty() {
                    continue;
                }
                let attempted = written + chunk.len() as u64;
                if let Some(limit) = limit
                    && attempted > limit
                {
                    return Err(UploadError::SizeExceeded {
                        limit: offset + limit,
                        attempted: offset + attempted,
                    });
                }
                if let Some(hasher) = hasher.as_mut() {
                    hasher.update(&chunk);
                }
                sink.write(chunk).await?;
                written = attempted;
            }
            Ok(())
        }
        .await;

        let verified = match (streamed, checksum, hasher) {
            (Ok(()), Some(checksum), Some(hasher)) => checksum.verify(hasher),
            (result, _, _) => result,
        };
        if let Err(err) = verified {
            if let Err(abort_err) = sink.abort().await {
                warn!(upload_id = info.id, error = %abort_err, "failed to discard rejected chunk");
            }
            debug!(upload_id = info.id, offset, error = %err, "chunk rejected");
            return Err(err);
        }

        let committed = sink.commit().await?;
        if committed == 0 && !length_fixed {
            return Ok(info);
        }

        info.offset += committed;
        info.update_time = Utc::now();
        if let Err(err) = self.infos.put(&info).await {
            if committed > 0
                && let Err(truncate_err) = self.content.truncate(&info.id, offset).await
            {
                warn!(upload_id = info.id, error = %truncate_err, "failed to roll back chunk");
            }
            return Err(err.into());
        }

        if length_fixed {
            info!(upload_id = info.id, size = ?info.size, "upload length fixed");
        }
        debug!(
            upload_id = info.id,
            offset = info.offset,
            bytes = committed,
            "chunk written"
        );
        if !was_complete && info.is_complete() {
            self.complete(&info);
        }
        Ok(info)
    }
}
