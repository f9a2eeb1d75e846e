// Cancellation for blocking channel operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::error::{ChannelError, Result};

/// Shared cancellation flag observed by every blocking wait of the handles it
/// is attached to. Stays tripped until [`CancelToken::reset`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

lazy_static! {
    // ctrlc accepts a single handler per process, so the token is created once.
    static ref SIGINT_TOKEN: std::result::Result<CancelToken, String> = {
        let token = CancelToken::new();
        let tripped = token.clone();
        ctrlc::set_handler(move || {
            log::warn!("kzimp: SIGINT received, interrupting blocked channel operations");
            tripped.cancel();
        })
        .map(|()| token)
        .map_err(|e| e.to_string())
    };
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide token tripped by Ctrl+C / SIGINT.
    ///
    /// The handler is installed on first call. Fails if another handler was
    /// already registered through `ctrlc` outside this crate.
    pub fn ctrlc() -> Result<Self> {
        SIGINT_TOKEN
            .as_ref()
            .map(Clone::clone)
            .map_err(|e| ChannelError::Signal(e.clone()))
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// True if both tokens share the same flag.
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }
}
