//! Cooperative cancellation for long-running operations.
//!
//! Load and dominator computation poll the token at coarse granularity
//! (per section, per outer iteration). Cancelled operations release their
//! scratch state and fail with `HeapError::Cancelled`; partial results are
//! never exposed.

use crate::error::{HeapError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable cancellation flag. Cheap to share across threads.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Bail out with `HeapError::Cancelled` if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(HeapError::Cancelled)
        } else {
            Ok(())
        }
    }
}
