use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::AdapterError;

/// Bounds concurrent requests against one exchange account.
///
/// Every adapter call holds a [`SessionGuard`] for its whole duration. The
/// permit is returned when the guard drops, so it is released on success,
/// on error and when the calling future is cancelled.
#[derive(Clone)]
pub struct SessionPool {
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
}

pub struct SessionGuard {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl SessionPool {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_sessions.max(1))),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn acquire(&self) -> Result<SessionGuard, AdapterError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| AdapterError::Network("session pool closed".into()))?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        Ok(SessionGuard {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Sessions currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
