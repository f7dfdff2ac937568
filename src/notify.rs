//! 上传完成通知：异步调用订阅者，失败只记录日志。

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::info::UploadInfo;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type SubscriberFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;
type Subscriber = Arc<dyn Fn(CompletionEvent) -> SubscriberFuture + Send + Sync>;

/// 上传完成事件，每个上传只触发一次。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionEvent {
    pub id: String,
    pub size: u64,
    pub offset: u64,
    pub metadata: BTreeMap<String, String>,
    pub upload: UploadInfo,
}

impl CompletionEvent {
    pub fn from_info(info: &UploadInfo) -> Self {
        Self {
            id: info.id.clone(),
            size: info.size.unwrap_or(info.offset),
            offset: info.offset,
            metadata: info.metadata.clone(),
            upload: info.clone(),
        }
    }
}

#[derive(Default)]
pub struct CompletionNotifier {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl std::fmt::Debug for CompletionNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionNotifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl CompletionNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册完成事件订阅者。
    pub fn subscribe<F, Fut>(&self, callback: F)
    where
        F: Fn(CompletionEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let subscriber: Subscriber =
            Arc::new(move |event| -> SubscriberFuture { Box::pin(callback(event)) });
        self.subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// 为每个订阅者单独启动任务并立即返回。
    pub fn notify(&self, event: CompletionEvent) {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        debug!(
            upload_id = event.id,
            subscribers = subscribers.len(),
            "dispatch completion event"
        );
        for subscriber in subscribers {
            let event = event.clone();
            tokio::spawn(async move {
                let upload_id = event.id.clone();
                if let Err(err) = subscriber(event).await {
                    warn!(upload_id, error = %err, "completion subscriber failed");
                }
            });
        }
    }
}
