use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as ParkingMutex;

/// Time source and sleep facility.
///
/// Rate-limited dispatch and retry backoff go through this trait so tests
/// can run with a virtual clock.
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> u64;
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now_millis(&self) -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock for tests: `sleep` returns immediately, advances virtual
/// time, and records the requested duration.
#[derive(Debug, Default)]
pub struct TestClock {
    now: AtomicU64,
    sleeps: ParkingMutex<Vec<Duration>>,
}

impl TestClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn advance(&self, millis: u64) {
        let _ = self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Clock for TestClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let _ = self.now.fetch_add(millis, Ordering::SeqCst);
        // Yield so concurrent tasks interleave the way they would under a
        // real timer.
        tokio::task::yield_now().await;
    }
}
