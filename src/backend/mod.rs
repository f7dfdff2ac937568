//! 存储后端接口：按上传 ID 存取记录（[`InfoStore`]）与内容（[`ContentStore`]）。
//!
//! 同一类型可以同时实现两者。

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use thiserror::Error;

use crate::info::UploadInfo;

pub use fs::FileStore;
pub use memory::MemoryStore;

/// 流式读取使用的字节流。
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// 后端操作错误。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("upload not found: {0}")]
    NotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 后端操作结果类型。
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 按上传 ID 持久化的记录存储。
#[async_trait]
pub trait InfoStore: Send + Sync + 'static {
    async fn get(&self, id: &str) -> StoreResult<UploadInfo>;

    /// 原子替换记录，读取方只会看到旧记录或新记录。
    async fn put(&self, info: &UploadInfo) -> StoreResult<()>;

    async fn delete(&self, id: &str) -> StoreResult<()>;

    async fn list_ids(&self) -> StoreResult<Vec<String>>;
}

/// 按上传 ID 寻址的内容存储。
#[async_trait]
pub trait ContentStore: Send + Sync + 'static {
    /// 为新上传创建空内容。
    async fn create(&self, id: &str) -> StoreResult<()>;

    /// 从 `offset` 开始写入，丢弃 `offset` 之后的旧字节。
    async fn open_writer(&self, id: &str, offset: u64) -> StoreResult<Box<dyn ChunkSink>>;

    /// 已存内容的实际长度。
    async fn stored_len(&self, id: &str) -> StoreResult<u64>;

    /// 读取 `[start, end)`。
    async fn read_range(&self, id: &str, start: u64, end: u64) -> StoreResult<ByteStream>;

    /// 截断到 `len` 字节。
    async fn truncate(&self, id: &str, len: u64) -> StoreResult<()>;

    async fn delete(&self, id: &str) -> StoreResult<()>;
}

/// 由 [`ContentStore::open_writer`] 开启的写入。
#[async_trait]
pub trait ChunkSink: Send {
    async fn write(&mut self, data: Bytes) -> StoreResult<()>;

    /// 落盘并返回写入的字节数。
    async fn commit(self: Box<Self>) -> StoreResult<u64>;

    /// 丢弃本次写入的全部字节。
    async fn abort(self: Box<Self>) -> StoreResult<()>;
}
