use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Inter-batch pause abstraction.
///
/// The executor never touches the timer directly; injecting this lets tests
/// drive batch boundaries deterministically instead of waiting on real
/// timers.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn pause(&self, duration: Duration);
}

/// Production scheduler backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Test scheduler that yields to the runtime without waiting and counts how
/// often it was asked to pause.
#[derive(Debug, Default)]
pub struct NoDelayScheduler {
    pauses: AtomicUsize,
}

impl NoDelayScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of inter-batch pauses requested so far.
    pub fn pause_count(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scheduler for NoDelayScheduler {
    async fn pause(&self, _duration: Duration) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}
