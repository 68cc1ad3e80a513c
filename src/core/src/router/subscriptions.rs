use std::collections::HashMap;

use uuid::Uuid;

/// Per-connection event subscriptions with wildcard topic patterns.
///
/// Patterns: `*` matches everything, `session.*` matches any topic under
/// that prefix, anything else matches exactly.
#[derive(Default)]
pub struct SubscriptionManager {
    subscriptions: HashMap<Uuid, String>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, pattern: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.subscriptions.insert(id, pattern.to_string());
        id
    }

    pub fn unsubscribe(&mut self, id: Uuid) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.subscriptions
            .values()
            .any(|pattern| pattern_matches(pattern, topic))
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

fn pattern_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix(".*") {
        Some(prefix) => topic
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.')),
        None => pattern == topic,
    }
}
