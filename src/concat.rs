//! 合并已完成的 partial 上传为 final 上传。

use chrono::Utc;
use futures_util::StreamExt;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::backend::StoreError;
use crate::error::{UploadError, UploadResult};
use crate::info::{NewUpload, UploadInfo};
use crate::locking::UploadLock;
use crate::store::UploadStore;

impl UploadStore {
    /// 按声明顺序把 partial 上传的内容写入 final 上传。
    ///
    /// 输出与记录全部持久化前，读取方只会看到空内容。
    pub async fn concat(
        &self,
        lock: &UploadLock,
        partial_ids: &[String],
    ) -> UploadResult<UploadInfo> {
        let mut target = self.load(lock).await?;
        if !target.is_final || target.partial_ids.is_empty() {
            return Err(UploadError::InvalidState(format!(
                "upload {} was not declared as a final upload",
                target.id
            )));
        }
        if target.partial_ids.as_slice() != partial_ids {
            return Err(UploadError::InvalidState(format!(
                "partial uploads differ from those declared for {}",
                target.id
            )));
        }
        if target.size.is_some() {
            return Err(UploadError::PartialAlreadyFinal(target.id));
        }

        let partials = self.complete_partials(partial_ids).await?;
        let total: u64 = partials.iter().map(|partial| partial.offset).sum();
        if let Some(limit) = self.config().max_size()
            && total > limit
        {
            return Err(UploadError::SizeExceeded {
                limit,
                attempted: total,
            });
        }

        let mut sink = self.content.open_writer(&target.id, 0).await?;
        let copied: UploadResult<()> = async {
            for partial in &partials {
                let mut stream = self
                    .content
                    .read_range(&partial.id, 0, partial.offset)
                    .await
                    .map_err(|err| match err {
                        StoreError::NotFound(id) => UploadError::PartialNotFound(id),
                        other => UploadError::Storage(other),
                    })?;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|err| UploadError::Storage(StoreError::Io(err)))?;
                    sink.write(chunk).await?;
                }
            }
            Ok(())
        }
        .await;
        if let Err(err) = copied {
            if let Err(abort_err) = sink.abort().await {
                warn!(upload_id = target.id, error = %abort_err, "failed to discard partial concatenation");
            }
            return Err(err);
        }

        let written = sink.commit().await?;
        if written != total {
            self.discard_output(&target.id).await;
            return Err(UploadError::Storage(StoreError::Corrupt {
                id: target.id,
                reason: format!("concatenated {written} bytes, partials hold {total}"),
            }));
        }

        target.size = Some(total);
        target.offset = total;
        target.update_time = Utc::now();
        if let Err(err) = self.infos.put(&target).await {
            self.discard_output(&target.id).await;
            return Err(err.into());
        }

        info!(
            upload_id = target.id,
            partials = partials.len(),
            size = total,
            "uploads concatenated"
        );
        self.complete(&target);
        Ok(target)
    }

    /// 创建 final 上传并立即合并；失败时删除该上传。
    pub async fn create_final(
        &self,
        partial_ids: Vec<String>,
        metadata: BTreeMap<String, String>,
    ) -> UploadResult<UploadInfo> {
        let created = self
            .create(NewUpload::final_of(partial_ids.clone()).with_metadata(metadata))
            .await?;
        let lock = self.lock(&created.id).await?;
        match self.concat(&lock, &partial_ids).await {
            Ok(info) => Ok(info),
            Err(err) => {
                if let Err(cleanup) = self.terminate(lock).await {
                    warn!(upload_id = created.id, error = %cleanup, "failed to remove failed final upload");
                }
                Err(err)
            }
        }
    }

    async fn complete_partials(&self, partial_ids: &[String]) -> UploadResult<Vec<UploadInfo>> {
        let mut partials = Vec::with_capacity(partial_ids.len());
        for id in partial_ids {
            let partial = match self.get_info(id).await {
                Ok(partial) => partial,
                Err(UploadError::NotFound(_)) => {
                    return Err(UploadError::PartialNotFound(id.clone()));
                }
                Err(err) => return Err(err),
            };
            if !partial.is_partial {
                return Err(UploadError::PartialAlreadyFinal(id.clone()));
            }
            if !partial.is_complete() {
                return Err(UploadError::PartialIncomplete(id.clone()));
            }
            let stored = self
                .content
                .stored_len(id)
                .await
                .map_err(|err| match err {
                    StoreError::NotFound(_) => UploadError::PartialNotFound(id.clone()),
                    other => UploadError::Storage(other),
                })?;
            if stored < partial.offset {
                return Err(UploadError::Storage(StoreError::Corrupt {
                    id: id.clone(),
                    reason: format!("content holds {stored} bytes, record claims {}", partial.offset),
                }));
            }
            partials.push(partial);
        }
        Ok(partials)
    }

    async fn discard_output(&self, id: &str) {
        if let Err(err) = self.content.truncate(id, 0).await {
            warn!(upload_id = id, error = %err, "failed to discard concatenated output");
        }
    }
}
