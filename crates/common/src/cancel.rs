//! Cancellation token for long-running watch loops

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cancellation token
///
/// Cloned freely; call [`CancelToken::cancel`] from any clone to stop every
/// loop polling [`CancelToken::is_cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
