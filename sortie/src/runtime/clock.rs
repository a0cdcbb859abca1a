use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

/// Time source for the fixed-delay retry loops.
///
/// The launcher never calls `tokio::time::sleep` directly while resolving
/// identifiers, so tests can swap in a clock that returns immediately.
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by `tokio::time`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
