//! Error taxonomy shared across the engine.
//!
//! One variant per failure mode a caller needs to distinguish. Transient
//! vs. permanent is a property of *which* variant is returned, not of the
//! type itself — callers match on the variant to decide whether to retry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of memory allocating {what}")]
    OutOfMemory { what: &'static str },

    #[error("no queues available on port {port} ({kind})")]
    OutOfQueues { port: u16, kind: &'static str },

    #[error("no lcore available for scheduler")]
    NoLcoreAvailable,

    #[error("failed to install flow rule: {0}")]
    FlowInstallFailed(String),

    #[error("failed to install shaper: {0}")]
    ShaperInstallFailed(String),

    #[error("port {port} configuration failed: {reason}")]
    PortConfigFailed { port: u16, reason: String },

    #[error("port {port} start failed: {reason}")]
    PortStartFailed { port: u16, reason: String },

    #[error("port {port} has no link")]
    NoLink { port: u16 },

    #[error("port {port} reset failed: {reason}")]
    PortResetFailed { port: u16, reason: String },

    #[error("shared memory operation failed: {0}")]
    ShmFailed(String),

    #[error("failed to acquire lock: {0}")]
    LockFailed(String),

    #[error("invalid offset {offset} for frame of size {frame_size}")]
    InvalidOffset { offset: usize, frame_size: usize },

    #[error("resource busy")]
    Busy,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
