/// CPU/GPU synchronization primitives

use crate::error::Result;

/// GPU → CPU fence
pub trait Fence: Send + Sync {
    /// Wait until signaled
    ///
    /// # Returns
    ///
    /// `false` when the timeout elapsed before the fence was signaled.
    fn wait(&self, timeout_ns: u64) -> Result<bool>;

    /// Return to the unsignaled state
    fn reset(&self) -> Result<()>;

    /// Non-blocking status query
    fn is_signaled(&self) -> Result<bool>;
}

/// GPU → GPU semaphore (queue-side ordering only)
pub trait Semaphore: Send + Sync {}
