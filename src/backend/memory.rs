//! 内存后端：用于测试与嵌入。

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{ByteStream, ChunkSink, ContentStore, InfoStore, StoreError, StoreResult};
use crate::info::UploadInfo;

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    infos: Arc<Mutex<HashMap<String, UploadInfo>>>,
    contents: Arc<Mutex<HashMap<String, BytesMut>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InfoStore for MemoryStore {
    async fn get(&self, id: &str) -> StoreResult<UploadInfo> {
        self.infos
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn put(&self, info: &UploadInfo) -> StoreResult<()> {
        self.infos
            .lock()
            .await
            .insert(info.id.clone(), info.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.infos
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_ids(&self) -> StoreResult<Vec<String>> {
        let mut ids: Vec<_> = self.infos.lock().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn create(&self, id: &str) -> StoreResult<()> {
        self.contents
            .lock()
            .await
            .insert(id.to_string(), BytesMut::new());
        Ok(())
    }

    async fn open_writer(&self, id: &str, offset: u64) -> StoreResult<Box<dyn ChunkSink>> {
        let mut contents = self.contents.lock().await;
        let content = contents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if (content.len() as u64) < offset {
            return Err(StoreError::Corrupt {
                id: id.to_string(),
                reason: format!(
                    "content holds {} bytes, record claims {offset}",
                    content.len()
                ),
            });
        }
        content.truncate(offset as usize);
        Ok(Box::new(MemorySink {
            contents: self.contents.clone(),
            id: id.to_string(),
            start: offset,
            buffer: BytesMut::new(),
        }))
    }

    async fn stored_len(&self, id: &str) -> StoreResult<u64> {
        self.contents
            .lock()
            .await
            .get(id)
            .map(|content| content.len() as u64)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn read_range(&self, id: &str, start: u64, end: u64) -> StoreResult<ByteStream> {
        let contents = self.contents.lock().await;
        let content = contents
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if end < start || end > content.len() as u64 {
            return Err(StoreError::InvalidRange(format!(
                "[{start}, {end}) outside {} stored bytes",
                content.len()
            )));
        }
        let slice = Bytes::copy_from_slice(&content[start as usize..end as usize]);
        Ok(Box::pin(stream::iter([Ok(slice)])))
    }

    async fn truncate(&self, id: &str, len: u64) -> StoreResult<()> {
        let mut contents = self.contents.lock().await;
        let content = contents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        content.truncate(len as usize);
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.contents
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

/// 缓冲分片，提交时才可见。
struct MemorySink {
    contents: Arc<Mutex<HashMap<String, BytesMut>>>,
    id: String,
    start: u64,
    buffer: BytesMut,
}

#[async_trait]
impl ChunkSink for MemorySink {
    async fn write(&mut self, data: Bytes) -> StoreResult<()> {
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<u64> {
        let mut contents = self.contents.lock().await;
        let content = contents
            .get_mut(&self.id)
            .ok_or_else(|| StoreError::NotFound(self.id.clone()))?;
        content.truncate(self.start as usize);
        content.extend_from_slice(&self.buffer);
        Ok(self.buffer.len() as u64)
    }

    async fn abort(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
