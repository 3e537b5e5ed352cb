//! The `row-added` signal (§6, §9 "Global signal subscription"): a
//! synchronous, in-process observer list owned by the coordinator,
//! populated once at startup. No cross-thread concerns since the engine is
//! single-threaded (§5).

use crate::row::Row;
use crate::schema::types::DatabaseType;

/// Payload delivered to every subscriber when a row is committed to the
/// target (propagator step 3).
#[derive(Debug, Clone)]
pub struct RowAdded<'a> {
    pub source_driver: DatabaseType,
    pub target_driver: DatabaseType,
    pub source_row: &'a Row,
    pub target_table: &'a str,
    pub prioritized: bool,
}

/// A `row-added` subscriber. Errors are logged and swallowed (§6, §7) —
/// a misbehaving subscriber never aborts the copy.
pub trait RowAddedSubscriber: Send + Sync {
    fn on_row_added(&self, event: &RowAdded<'_>);
}

/// The coordinator's subscriber list. Populated once at startup
/// (`--import`, see [`WebhookSubscriber`]) and never mutated after.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Box<dyn RowAddedSubscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn RowAddedSubscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver synchronously to every subscriber, in registration order.
    pub fn emit(&self, event: &RowAdded<'_>) {
        for sub in &self.subscribers {
            sub.on_row_added(event);
        }
    }
}

/// Rust has no dynamic-module-loading equivalent of a scripting language's
/// `--import=MODULE`; this crate's equivalent (documented in DESIGN.md) is
/// `--import=PATH` pointing at a JSON descriptor `{"webhook_url": "..."}`
/// that registers this subscriber, which POSTs the event as JSON.
pub struct WebhookSubscriber {
    url: String,
    client: reqwest::Client,
    runtime: tokio::runtime::Handle,
}

impl WebhookSubscriber {
    pub fn new(url: String, runtime: tokio::runtime::Handle) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            runtime,
        }
    }
}

#[derive(serde::Serialize)]
struct WebhookPayload {
    source_driver: String,
    target_driver: String,
    source_row: serde_json::Value,
    target_table: String,
    prioritized: bool,
}

impl RowAddedSubscriber for WebhookSubscriber {
    fn on_row_added(&self, event: &RowAdded<'_>) {
        let row_json: serde_json::Map<String, serde_json::Value> = event
            .source_row
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or(serde_json::Value::Null)))
            .collect();
        let payload = WebhookPayload {
            source_driver: event.source_driver.to_string(),
            target_driver: event.target_driver.to_string(),
            source_row: serde_json::Value::Object(row_json),
            target_table: event.target_table.to_string(),
            prioritized: event.prioritized,
        };
        let client = self.client.clone();
        let url = self.url.clone();
        // Fire-and-forget: a blocked/failing webhook must not stall the
        // single-threaded copy loop.
        self.runtime.spawn(async move {
            if let Err(e) = client.post(&url).json(&payload).send().await {
                tracing::warn!(url = %url, error = %e, "row-added webhook delivery failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSubscriber(Arc<AtomicUsize>);
    impl RowAddedSubscriber for CountingSubscriber {
        fn on_row_added(&self, _event: &RowAdded<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn emits_to_all_subscribers_in_order() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut bus = EventBus::new();
        bus.subscribe(Box::new(CountingSubscriber(count.clone())));
        bus.subscribe(Box::new(CountingSubscriber(count.clone())));

        let row: Row = IndexMap::new();
        let event = RowAdded {
            source_driver: DatabaseType::SQLite,
            target_driver: DatabaseType::SQLite,
            source_row: &row,
            target_table: "t",
            prioritized: false,
        };
        bus.emit(&event);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
