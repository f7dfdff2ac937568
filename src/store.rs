//! 上传存储引擎：记录管理、长度确定与终止。
//!
//! 修改操作需要 [`UploadStore::lock`] 返回的 [`UploadLock`]；读取不等待写锁。

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::{ContentStore, FileStore, InfoStore, MemoryStore, StoreError};
use crate::error::{UploadError, UploadResult};
use crate::info::{NewUpload, UploadInfo, UploadState, is_valid_id};
use crate::locking::{LockPolicy, UploadLock, UploadLocker};
use crate::notify::{BoxError, CompletionEvent, CompletionNotifier};

#[derive(Clone, Debug, Default)]
pub struct UploadConfig {
    /// 最大上传字节数，0 表示不限制。
    pub max_size: u64,
    pub lock_policy: LockPolicy,
}

impl UploadConfig {
    pub fn max_size(&self) -> Option<u64> {
        (self.max_size > 0).then_some(self.max_size)
    }
}

pub struct UploadStore {
    pub(crate) infos: Arc<dyn InfoStore>,
    pub(crate) content: Arc<dyn ContentStore>,
    pub(crate) locker: UploadLocker,
    notifier: CompletionNotifier,
    config: UploadConfig,
}

impl std::fmt::Debug for UploadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadStore")
            .field("config", &self.config)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

impl UploadStore {
    pub fn new(
        infos: Arc<dyn InfoStore>,
        content: Arc<dyn ContentStore>,
        config: UploadConfig,
    ) -> Self {
        Self {
            infos,
            content,
            locker: UploadLocker::new(config.lock_policy),
            notifier: CompletionNotifier::new(),
            config,
        }
    }

    pub fn in_memory(config: UploadConfig) -> Self {
        let backend = Arc::new(MemoryStore::new());
        Self::new(backend.clone(), backend, config)
    }

    /// 基于目录的文件系统后端。
    pub async fn on_disk(dir: impl AsRef<Path>, config: UploadConfig) -> UploadResult<Self> {
        let backend = Arc::new(FileStore::new(dir).await?);
        Ok(Self::new(backend.clone(), backend, config))
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// 注册上传完成订阅者。
    pub fn subscribe<F, Fut>(&self, callback: F)
    where
        F: Fn(CompletionEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.notifier.subscribe(callback);
    }

    /// 按配置策略获取上传锁；记录不存在时返回 `NotFound` 且不留锁条目。
    pub async fn lock(&self, id: &str) -> UploadResult<UploadLock> {
        if !is_valid_id(id) {
            return Err(UploadError::NotFound(id.to_string()));
        }
        let lock = self.locker.acquire(id).await?;
        if let Err(err) = self.infos.get(id).await {
            self.locker.release_and_evict(lock).await;
            return Err(err.into());
        }
        Ok(lock)
    }

    /// 创建上传记录与空内容。
    pub async fn create(&self, request: NewUpload) -> UploadResult<UploadInfo> {
        let info = request.into_info()?;
        if let (Some(limit), Some(size)) = (self.config.max_size(), info.size)
            && size > limit
        {
            return Err(UploadError::SizeExceeded {
                limit,
                attempted: size,
            });
        }

        let lock = self.locker.try_acquire(&info.id).await?;
        self.content.create(&info.id).await?;
        if let Err(err) = self.infos.put(&info).await {
            if let Err(cleanup) = self.content.delete(&info.id).await {
                warn!(upload_id = info.id, error = %cleanup, "failed to remove content of unrecorded upload");
            }
            self.locker.release_and_evict(lock).await;
            return Err(err.into());
        }
        self.locker.release_and_evict(lock).await;

        info!(
            upload_id = info.id,
            size = ?info.size,
            deferred = info.size_is_deferred,
            partial = info.is_partial,
            is_final = info.is_final,
            "upload created"
        );
        if info.is_complete() {
            self.complete(&info);
        }
        Ok(info)
    }

    pub async fn get_info(&self, id: &str) -> UploadResult<UploadInfo> {
        if !is_valid_id(id) {
            return Err(UploadError::NotFound(id.to_string()));
        }
        Ok(self.infos.get(id).await?)
    }

    /// 查询上传状态，已删除的 ID 返回 `Terminated`。
    pub async fn upload_state(&self, id: &str) -> UploadResult<UploadState> {
        match self.get_info(id).await {
            Ok(info) => Ok(info.state()),
            Err(UploadError::NotFound(_)) => Ok(UploadState::Terminated),
            Err(err) => Err(err),
        }
    }

    /// 为延迟长度的上传确定最终大小（仅一次）。
    pub async fn fix_length(&self, lock: &UploadLock, size: u64) -> UploadResult<UploadInfo> {
        let mut info = self.load(lock).await?;
        self.settle_length(&mut info, size)?;
        info.update_time = Utc::now();
        self.infos.put(&info).await?;
        info!(upload_id = info.id, size, "upload length fixed");
        if info.is_complete() {
            self.complete(&info);
        }
        Ok(info)
    }

    /// 校验并在内存中确定延迟长度，由调用方持久化。
    pub(crate) fn settle_length(&self, info: &mut UploadInfo, size: u64) -> UploadResult<()> {
        if info.state() == UploadState::ConcatenatedFinal {
            return Err(UploadError::InvalidState(format!(
                "upload {} is a concatenated final upload",
                info.id
            )));
        }
        if !info.size_is_deferred {
            return Err(UploadError::LengthAlreadyFixed(info.id.clone()));
        }
        if size < info.offset {
            return Err(UploadError::SizeExceeded {
                limit: size,
                attempted: info.offset,
            });
        }
        if let Some(limit) = self.config.max_size()
            && size > limit
        {
            return Err(UploadError::SizeExceeded {
                limit,
                attempted: size,
            });
        }
        info.size = Some(size);
        info.size_is_deferred = false;
        Ok(())
    }

    /// 终止上传：删除记录与内容，并清理锁条目。
    pub async fn terminate(&self, lock: UploadLock) -> UploadResult<()> {
        let result = self.remove(&lock).await;
        self.locker.release_and_evict(lock).await;
        result
    }

    async fn remove(&self, lock: &UploadLock) -> UploadResult<()> {
        let info = self.load(lock).await?;
        // 先删内容：失败时记录仍在，可重试或由清理任务再次处理
        match self.content.delete(&info.id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
        self.infos.delete(&info.id).await?;
        info!(
            upload_id = info.id,
            offset = info.offset,
            size = ?info.size,
            "upload terminated"
        );
        Ok(())
    }

    /// 读取已加锁上传的当前记录。
    pub(crate) async fn load(&self, lock: &UploadLock) -> UploadResult<UploadInfo> {
        Ok(self.infos.get(lock.id()).await?)
    }

    /// 完成状态持久化后调用，仅一次。
    pub(crate) fn complete(&self, info: &UploadInfo) {
        info!(
            upload_id = info.id,
            size = info.offset,
            "upload complete"
        );
        self.notifier.notify(CompletionEvent::from_info(info));
    }
}
