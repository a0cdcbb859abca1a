use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::launcher::StepIdentifier;
use crate::runtime::TaskId;
use crate::status::Status;

/// Step lifecycle event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepEvent {
    pub timestamp: DateTime<Utc>,
    pub payload: StepEventPayload,
}

impl StepEvent {
    pub fn new(payload: StepEventPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// What happened.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum StepEventPayload {
    /// `run` registered the step.
    Launched {
        name: String,
        backend: String,
        identifier: StepIdentifier,
    },
    /// `stop` finished for the step.
    Cancelled { name: String, managed: bool },
    /// The monitoring loop saw a supervised process exit.
    TaskExited {
        task_id: TaskId,
        status: Status,
        returncode: Option<i32>,
    },
}

/// In-process step event bus using a tokio broadcast channel.
///
/// Publishing never waits: events with no subscriber are dropped, and a
/// subscriber that falls more than `capacity` events behind receives
/// `RecvError::Lagged` instead of stalling the publisher.
pub struct EventBus {
    sender: broadcast::Sender<StepEvent>,
    capacity: usize,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish without waiting.
    pub fn emit(&self, payload: StepEventPayload) {
        let _ = self.sender.send(StepEvent::new(payload));
    }

    pub fn subscribe_steps(&self) -> broadcast::Receiver<StepEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn cancelled(name: &str) -> StepEventPayload {
        StepEventPayload::Cancelled {
            name: name.to_string(),
            managed: true,
        }
    }

    #[tokio::test]
    async fn broadcast_to_multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe_steps();
        let mut rx2 = bus.subscribe_steps();

        for i in 0..3 {
            bus.emit(cancelled(&format!("job_{i}")));
        }

        for i in 0..3 {
            let first = timeout(Duration::from_millis(100), rx1.recv())
                .await
                .unwrap()
                .unwrap();
            let second = timeout(Duration::from_millis(100), rx2.recv())
                .await
                .unwrap()
                .unwrap();
            for event in [first, second] {
                match event.payload {
                    StepEventPayload::Cancelled { name, .. } => {
                        assert_eq!(name, format!("job_{i}"))
                    }
                    other => panic!("unexpected event {other:?}"),
                }
            }
        }
    }

    #[tokio::test]
    async fn lagged_subscriber_does_not_block_publisher() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe_steps();

        for i in 0..5 {
            bus.emit(cancelled(&format!("job_{i}")));
        }

        let result = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(matches!(
            result,
            Ok(Err(broadcast::error::RecvError::Lagged(_)))
        ));
    }

    #[test]
    fn debug_shows_subscribers() {
        let bus = EventBus::new(8);
        let _rx = bus.subscribe_steps();
        let debug = format!("{bus:?}");
        assert!(debug.contains("capacity: 8"));
        assert!(debug.contains("subscribers: 1"));
    }
}
