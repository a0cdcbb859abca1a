use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sortie::Clock;

/// Clock that records every requested sleep and returns immediately.
#[derive(Clone, Debug, Default)]
pub struct RecordingClock {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    pub fn total(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }

    pub fn assert_sleep_count_eq(&self, expected: usize) {
        let actual = self.sleeps.lock().len();
        assert_eq!(actual, expected, "Expected {expected} sleeps, got {actual}");
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}
