//! 文件系统后端：`<id>.info` 记录与 `<id>.bin` 内容。

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::warn;

use super::{ByteStream, ChunkSink, ContentStore, InfoStore, StoreError, StoreResult};
use crate::atomic::{sync_dir, write_atomic};
use crate::info::{UploadInfo, is_valid_id};

const INFO_EXT: &str = "info";
const CONTENT_EXT: &str = "bin";

/// 每个上传在同一目录下存为记录与内容两个文件。
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// 创建后端并确保目录存在。
    pub async fn new(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str, ext: &str) -> StoreResult<PathBuf> {
        if !is_valid_id(id) {
            return Err(StoreError::InvalidKey(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.{ext}")))
    }
}

fn not_found(id: &str, err: std::io::Error) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        StoreError::NotFound(id.to_string())
    } else {
        StoreError::Io(err)
    }
}

#[async_trait]
impl InfoStore for FileStore {
    async fn get(&self, id: &str) -> StoreResult<UploadInfo> {
        let path = self.path_for(id, INFO_EXT)?;
        let bytes = fs::read(&path).await.map_err(|err| not_found(id, err))?;
        serde_json::from_slice(&bytes).map_err(|err| StoreError::Corrupt {
            id: id.to_string(),
            reason: err.to_string(),
        })
    }

    async fn put(&self, info: &UploadInfo) -> StoreResult<()> {
        let path = self.path_for(&info.id, INFO_EXT)?;
        let contents = serde_json::to_vec(info).map_err(|err| StoreError::Corrupt {
            id: info.id.clone(),
            reason: err.to_string(),
        })?;
        write_atomic(&path, &contents).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let path = self.path_for(id, INFO_EXT)?;
        fs::remove_file(&path)
            .await
            .map_err(|err| not_found(id, err))?;
        if let Err(err) = sync_dir(&self.dir).await {
            warn!(upload_id = id, error = %err, "failed to sync upload directory after delete");
        }
        Ok(())
    }

    async fn list_ids(&self) -> StoreResult<Vec<String>> {
        let mut dir = fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(INFO_EXT) {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|stem| stem.to_str())
                && is_valid_id(id)
            {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl ContentStore for FileStore {
    async fn create(&self, id: &str) -> StoreResult<()> {
        let path = self.path_for(id, CONTENT_EXT)?;
        let file = File::create(&path).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn open_writer(&self, id: &str, offset: u64) -> StoreResult<Box<dyn ChunkSink>> {
        let path = self.path_for(id, CONTENT_EXT)?;
        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|err| not_found(id, err))?;
        let stored = file.metadata().await?.len();
        if stored < offset {
            return Err(StoreError::Corrupt {
                id: id.to_string(),
                reason: format!("content holds {stored} bytes, record claims {offset}"),
            });
        }
        // 丢弃中断写入留下的尾部字节
        file.set_len(offset).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(Box::new(FileSink {
            file,
            start: offset,
            written: 0,
        }))
    }

    async fn stored_len(&self, id: &str) -> StoreResult<u64> {
        let path = self.path_for(id, CONTENT_EXT)?;
        let metadata = fs::metadata(&path).await.map_err(|err| not_found(id, err))?;
        Ok(metadata.len())
    }

    async fn read_range(&self, id: &str, start: u64, end: u64) -> StoreResult<ByteStream> {
        if end < start {
            return Err(StoreError::InvalidRange(format!(
                "end ({end}) < start ({start})"
            )));
        }
        let path = self.path_for(id, CONTENT_EXT)?;
        let mut file = File::open(&path).await.map_err(|err| not_found(id, err))?;
        let stored = file.metadata().await?.len();
        if stored < end {
            return Err(StoreError::InvalidRange(format!(
                "range ends at {end}, content holds {stored} bytes"
            )));
        }
        file.seek(SeekFrom::Start(start)).await?;
        Ok(ReaderStream::new(file.take(end - start)).boxed())
    }

    async fn truncate(&self, id: &str, len: u64) -> StoreResult<()> {
        let path = self.path_for(id, CONTENT_EXT)?;
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|err| not_found(id, err))?;
        file.set_len(len).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let path = self.path_for(id, CONTENT_EXT)?;
        fs::remove_file(&path)
            .await
            .map_err(|err| not_found(id, err))?;
        if let Err(err) = sync_dir(&self.dir).await {
            warn!(upload_id = id, error = %err, "failed to sync upload directory after delete");
        }
        Ok(())
    }
}

struct FileSink {
    file: File,
    start: u64,
    written: u64,
}

#[async_trait]
impl ChunkSink for FileSink {
    async fn write(&mut self, data: Bytes) -> StoreResult<()> {
        self.file.write_all(&data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<u64> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.written)
    }

    async fn abort(mut self: Box<Self>) -> StoreResult<()> {
        self.file.flush().await?;
        self.file.set_len(self.start).await?;
        Ok(())
    }
}
