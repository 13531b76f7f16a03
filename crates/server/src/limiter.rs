//! Bound on concurrently running client sessions.
//!
//! The accept loop takes a permit before accepting, so once the limit is
//! reached new connections wait in the kernel backlog instead of being
//! refused. A session's permit is released when its task ends.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        let max = max.clamp(1, Semaphore::MAX_PERMITS);
        Self { semaphore: Arc::new(Semaphore::new(max)), max }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        Arc::clone(&self.semaphore).acquire_owned().await
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Sessions currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max - self.semaphore.available_permits()
    }

    /// Wait up to `grace` for every session to finish.
    ///
    /// Returns `true` if the limiter drained in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        let all = u32::try_from(self.max).unwrap_or(u32::MAX);
        matches!(
            tokio::time::timeout(grace, self.semaphore.acquire_many(all)).await,
            Ok(Ok(_))
        )
    }
}
