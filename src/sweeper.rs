//! 过期上传清理：定期终止长时间无活动的上传。

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{UploadError, UploadResult};
use crate::info::UploadInfo;
use crate::store::UploadStore;

/// 单次清理的统计。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub terminated: usize,
    /// 已过期但被请求占用，下个周期重试。
    pub skipped_locked: usize,
    pub failed: usize,
}

impl UploadStore {
    /// 终止所有超过 `max_age` 未活动的上传。
    ///
    /// 单个上传失败只记录并计数，只有列举记录失败才会中止本次清理。
    pub async fn sweep_expired(&self, max_age: Duration) -> UploadResult<SweepReport> {
        let ids = self.infos.list_ids().await?;
        let mut report = SweepReport {
            scanned: ids.len(),
            ..SweepReport::default()
        };

        for id in ids {
            match self.expire_one(&id, max_age).await {
                Ok(true) => report.terminated += 1,
                Ok(false) => {}
                Err(UploadError::LockBusy(_)) => {
                    debug!(upload_id = id, "expired upload is busy, skipping");
                    report.skipped_locked += 1;
                }
                Err(err) => {
                    warn!(upload_id = id, error = %err, "failed to expire upload");
                    report.failed += 1;
                }
            }
        }

        let pruned = self.locker.prune_idle().await;
        info!(
            scanned = report.scanned,
            terminated = report.terminated,
            skipped_locked = report.skipped_locked,
            failed = report.failed,
            pruned_locks = pruned,
            "expiry sweep finished"
        );
        Ok(report)
    }

    async fn expire_one(&self, id: &str, max_age: Duration) -> UploadResult<bool> {
        match self.get_info(id).await {
            Ok(info) if is_expired(&info, max_age) => {}
            Ok(_) | Err(UploadError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        }
        let lock = self.locker.try_acquire(id).await?;
        // 扫描与加锁之间可能有新的写入
        let info = match self.load(&lock).await {
            Ok(info) => info,
            Err(UploadError::NotFound(_)) => {
                self.locker.release_and_evict(lock).await;
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        if !is_expired(&info, max_age) {
            return Ok(false);
        }
        self.terminate(lock).await?;
        info!(upload_id = id, last_activity = %info.last_activity(), "upload expired");
        Ok(true)
    }
}

fn is_expired(info: &UploadInfo, max_age: Duration) -> bool {
    // 时钟回拨视为刚有活动
    let age = Utc::now()
        .signed_duration_since(info.last_activity())
        .to_std()
        .unwrap_or(Duration::ZERO);
    age >= max_age
}

/// 启动周期性过期清理任务。
pub fn spawn_sweeper(
    store: Arc<UploadStore>,
    every: Duration,
    max_age: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(err) = store.sweep_expired(max_age).await {
                warn!(error = %err, "expiry sweep failed");
            }
        }
    })
}
