use serde_json::Value;
use tokio::sync::broadcast;

/// Topics published over the event bus. One event per lifecycle transition.
pub mod topics {
    pub const SESSION_STARTED: &str = "session.started";
    pub const SESSION_COMPLETED: &str = "session.completed";
    pub const ACCOUNT_STARTED: &str = "session.account.started";
    pub const ACCOUNT_DONE: &str = "session.account.done";
    pub const ACCOUNT_ERROR: &str = "session.account.error";
    pub const OTP_REQUIRED: &str = "session.otp.required";
    pub const MANUAL_REQUIRED: &str = "session.manual.required";
}

/// A single event as carried on the bus, prior to transport encoding.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub topic: String,
    pub params: Option<Value>,
}

impl BusEvent {
    pub fn new(topic: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            topic: topic.into(),
            params,
        }
    }
}

/// Fan-out of lifecycle events to every live subscriber.
///
/// Delivery is best-effort: a publish with no subscribers is dropped, and a
/// receiver that lags past the channel capacity misses events. Terminal
/// state is always recoverable from the store, so nothing here is durable.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, topic: &str, params: Value) {
        let _ = self.tx.send(BusEvent::new(topic, Some(params)));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(topics::SESSION_STARTED, json!({"session_id": "s1"}));
        bus.publish(topics::ACCOUNT_STARTED, json!({"account_id": "a1"}));
        bus.publish(topics::SESSION_COMPLETED, json!({"session_id": "s1"}));

        assert_eq!(rx.recv().await.unwrap().topic, topics::SESSION_STARTED);
        assert_eq!(rx.recv().await.unwrap().topic, topics::ACCOUNT_STARTED);
        assert_eq!(rx.recv().await.unwrap().topic, topics::SESSION_COMPLETED);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::new(4);
        // No receiver; must not panic or block.
        bus.publish(topics::SESSION_STARTED, json!({}));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
