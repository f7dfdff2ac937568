//! 日志初始化：支持环境变量覆盖与默认值。

use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::notify::{BoxError, CompletionEvent};

/// 初始化 tracing 日志订阅与默认过滤规则。
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// 上传完成订阅者：记录完成的上传。
pub async fn log_completion(event: CompletionEvent) -> Result<(), BoxError> {
    info!(
        upload_id = event.id,
        size = event.size,
        offset = event.offset,
        metadata = ?event.metadata,
        "upload finished"
    );
    Ok(())
}
