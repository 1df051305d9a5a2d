//! Error types shared across the loader, engine, and CLI.

use thiserror::Error;

/// Errors produced while loading or analyzing a heap snapshot.
#[derive(Error, Debug)]
pub enum HeapError {
    /// The snapshot bytes violate the container grammar.
    #[error("malformed snapshot: {0}")]
    Malformed(String),

    /// The container was written by a newer producer than this reader supports.
    #[error("unsupported snapshot version {found} (max supported {max})")]
    UnsupportedVersion { found: u8, max: u8 },

    /// The reachable object graph exceeds the configured node cap.
    #[error("reachable graph has {nodes} nodes, exceeding the cap of {cap}")]
    GraphTooLarge { nodes: usize, cap: usize },

    /// The caller cancelled via the cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HeapError {
    /// Shorthand for grammar violations, used throughout the codec.
    pub fn malformed(msg: impl Into<String>) -> Self {
        HeapError::Malformed(msg.into())
    }

    /// Process exit code for the CLI: 2 for snapshots we cannot read,
    /// 3 for I/O failures, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            HeapError::Malformed(_) | HeapError::UnsupportedVersion { .. } => 2,
            HeapError::Io(_) => 3,
            _ => 1,
        }
    }
}

pub type Result<T, E = HeapError> = std::result::Result<T, E>;
