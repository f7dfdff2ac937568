//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;
use std::time::Duration;

use crate::build;
use crate::locking::LockPolicy;
use crate::store::UploadConfig;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_UPLOAD_DIR: &str = "./uploads";
pub const DEFAULT_BASE_PATH: &str = "/api/v1/files";
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 0;
pub const DEFAULT_LOCK_WAIT_MILLIS: u64 = 0;
pub const DEFAULT_EXPIRE_SECS: u64 = 60 * 60;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "axo-tus", version = VERSION_INFO, about = "Resumable upload server (tus 1.0.0)")]
pub struct Args {
    #[arg(
        short = 'd',
        long,
        env = "AXO_UPLOAD_DIR",
        default_value = DEFAULT_UPLOAD_DIR,
        help = "Directory holding upload records and content"
    )]
    pub upload_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "AXO_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "AXO_HTTP_PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "AXO_BASE_PATH",
        default_value = DEFAULT_BASE_PATH,
        help = "URL path the upload endpoints are mounted at"
    )]
    pub base_path: String,
    #[arg(long, env = "AXO_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "AXO_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload size in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
    #[arg(
        long,
        env = "AXO_LOCK_WAIT_MS",
        default_value_t = DEFAULT_LOCK_WAIT_MILLIS,
        help = "How long a request waits for a busy upload in milliseconds (0 fails fast)"
    )]
    pub lock_wait_ms: u64,
    #[arg(
        long,
        env = "AXO_EXPIRE_SECS",
        default_value_t = DEFAULT_EXPIRE_SECS,
        help = "Terminate uploads idle for this many seconds (0 to disable)"
    )]
    pub expire_secs: u64,
    #[arg(
        long,
        env = "AXO_SWEEP_INTERVAL_SECS",
        default_value_t = DEFAULT_SWEEP_INTERVAL_SECS,
        help = "Seconds between expiry sweeps"
    )]
    pub sweep_interval_secs: u64,
}

impl Args {
    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            max_size: self.upload_max_size,
            lock_policy: LockPolicy::from_wait_millis(self.lock_wait_ms),
        }
    }

    /// 过期时间；0 表示不清理。
    pub fn expire_after(&self) -> Option<Duration> {
        (self.expire_secs > 0).then(|| Duration::from_secs(self.expire_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let args = Args::parse_from(["axo-tus"]);
        assert_eq!(args.port, DEFAULT_PORT);
        assert_eq!(args.upload_dir, DEFAULT_UPLOAD_DIR);
        assert_eq!(args.base_path, DEFAULT_BASE_PATH);
        assert_eq!(args.expire_after(), Some(Duration::from_secs(3600)));
        assert_eq!(args.sweep_interval(), Duration::from_secs(3600));
        assert_eq!(args.upload_config().lock_policy, LockPolicy::FailFast);
        assert_eq!(args.upload_config().max_size(), None);
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "axo-tus",
            "--upload-max-size",
            "1024",
            "--lock-wait-ms",
            "250",
            "--expire-secs",
            "0",
        ]);
        let config = args.upload_config();
        assert_eq!(config.max_size(), Some(1024));
        assert_eq!(
            config.lock_policy,
            LockPolicy::Wait(Duration::from_millis(250))
        );
        assert_eq!(args.expire_after(), None);
    }
}
