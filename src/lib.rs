//! Resumable upload engine and tus 1.0.0 server.
//!
//! [`UploadStore`] tracks upload records, accepts chunk writes at exact
//! offsets under a per-upload lock, concatenates partial uploads, serves
//! stored bytes and reclaims expired uploads. [`handler::tus_router`] exposes
//! it over HTTP.

pub mod atomic;
pub mod backend;
pub mod checksum;
mod concat;
pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod info;
pub mod locking;
pub mod logging;
pub mod notify;
pub mod reader;
pub mod store;
pub mod sweeper;
mod writer;

use shadow_rs::shadow;

shadow!(build);

pub use backend::{ContentStore, FileStore, InfoStore, MemoryStore};
pub use checksum::{Checksum, ChecksumAlgorithm};
pub use error::{ApiError, ErrorCode, UploadError, UploadResult};
pub use info::{ConcatKind, NewUpload, UploadInfo, UploadLength, UploadState};
pub use locking::{LockPolicy, UploadLock};
pub use notify::{BoxError, CompletionEvent};
pub use reader::Served;
pub use store::{UploadConfig, UploadStore};
pub use sweeper::{SweepReport, spawn_sweeper};
