//! 按上传 ID 划分的互斥锁：串行化同一上传的变更操作。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time;

use crate::error::{UploadError, UploadResult};

/// 锁被占用时的处理策略。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LockPolicy {
    /// 立即返回 `LockBusy`。
    #[default]
    FailFast,
    /// 最多等待指定时长，超时返回 `LockBusy`。
    Wait(Duration),
}

impl LockPolicy {
    pub fn from_wait_millis(millis: u64) -> Self {
        if millis == 0 {
            LockPolicy::FailFast
        } else {
            LockPolicy::Wait(Duration::from_millis(millis))
        }
    }
}

/// Manages asynchronous mutexes keyed by upload ID.
#[derive(Debug, Default)]
pub struct UploadLocker {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    policy: LockPolicy,
}

/// 上传独占访问凭证，drop 时释放。
#[derive(Debug)]
pub struct UploadLock {
    id: String,
    _guard: OwnedMutexGuard<()>,
}

impl UploadLock {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl UploadLocker {
    pub fn new(policy: LockPolicy) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// 按配置策略获取上传锁。
    pub async fn acquire(&self, id: &str) -> UploadResult<UploadLock> {
        match self.policy {
            LockPolicy::FailFast => self.try_acquire(id).await,
            LockPolicy::Wait(timeout) => {
                let lock = self.handle(id).await;
                let guard = time::timeout(timeout, lock.lock_owned())
                    .await
                    .map_err(|_| UploadError::LockBusy(id.to_string()))?;
                Ok(UploadLock {
                    id: id.to_string(),
                    _guard: guard,
                })
            }
        }
    }

    /// 立即尝试获取上传锁，不等待。
    pub async fn try_acquire(&self, id: &str) -> UploadResult<UploadLock> {
        let lock = self.handle(id).await;
        let guard = lock
            .try_lock_owned()
            .map_err(|_| UploadError::LockBusy(id.to_string()))?;
        Ok(UploadLock {
            id: id.to_string(),
            _guard: guard,
        })
    }

    /// 释放锁；无其他引用时移除锁条目。
    pub async fn release_and_evict(&self, lock: UploadLock) {
        let mut locks = self.locks.lock().await;
        // 映射条目与正在释放的锁各持有一份引用
        if locks
            .get(&lock.id)
            .is_some_and(|handle| Arc::strong_count(handle) <= 2)
        {
            locks.remove(&lock.id);
        }
        drop(lock);
    }

    /// 移除无人持有或等待的锁条目，返回移除数量。
    pub async fn prune_idle(&self) -> usize {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, handle| Arc::strong_count(handle) > 1);
        before - locks.len()
    }

    pub async fn entry_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn handle(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
