//! Notification bus types and the in-process broker.
//!
//! The ledger publishes change events keyed by topic strings such as
//! `donation:<id>` or `donator:<id>`. Delivery is live pub/sub: ordered
//! per topic by publish order, at-least-once for current subscribers, no
//! replay for late ones.
//!
//! [`NotificationBroker`] is the subscriber registry shared by both
//! backends. `PgLedger` feeds it from a dedicated LISTEN/NOTIFY connection;
//! `MemoryLedger` publishes into it directly. Subscribe and unsubscribe are
//! serialized by a single mutex so the registration state of the underlying
//! channel cannot be corrupted by concurrent calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use zapfund_core::Satoshi;

/// Payload of a change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// The changed object's ID.
    pub id: Uuid,

    /// Status of the change; currently always `OK`.
    pub status: String,

    /// New lifetime donated amount, for video notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_donated: Option<Satoshi>,

    /// External video ID, for video notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<String>,
}

impl Notification {
    /// A plain "object changed" notification.
    #[must_use]
    pub fn ok(id: Uuid) -> Self {
        Self {
            id,
            status: "OK".to_string(),
            total_donated: None,
            vid: None,
        }
    }

    /// A YouTube video donation notification.
    #[must_use]
    pub fn youtube_video(id: Uuid, vid: String, total_donated: Satoshi) -> Self {
        Self {
            id,
            status: "OK".to_string(),
            total_donated: Some(total_donated),
            vid: Some(vid),
        }
    }
}

/// Build the topic string for an object-changed event.
#[must_use]
pub fn object_topic(kind: &str, id: Uuid) -> String {
    format!("{kind}:{id}")
}

type Subscribers = HashMap<String, Vec<(u64, mpsc::UnboundedSender<Notification>)>>;

/// Request to the backend listener connection to start or stop listening on
/// a topic. Ignored by the in-memory backend.
#[derive(Debug)]
pub(crate) enum ListenControl {
    /// Begin listening on a topic.
    Listen(String),
    /// Stop listening on a topic (no subscribers remain).
    Unlisten(String),
}

struct BrokerInner {
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
    control: Option<mpsc::UnboundedSender<ListenControl>>,
}

/// Shared subscriber registry for ledger notifications.
#[derive(Clone)]
pub struct NotificationBroker {
    inner: Arc<BrokerInner>,
}

impl NotificationBroker {
    /// Create a broker without a backend listener (in-memory bus).
    #[must_use]
    pub fn in_process() -> Self {
        Self::new(None)
    }

    pub(crate) fn new(control: Option<mpsc::UnboundedSender<ListenControl>>) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                control,
            }),
        }
    }

    /// Subscribe to a topic. Events published after this call are delivered
    /// in order; events published before it are missed.
    #[must_use]
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut subscribers = self
                .inner
                .subscribers
                .lock()
                .expect("broker mutex poisoned");
            let entries = subscribers.entry(topic.to_string()).or_default();
            if entries.is_empty() {
                if let Some(control) = &self.inner.control {
                    let _ = control.send(ListenControl::Listen(topic.to_string()));
                }
            }
            entries.push((id, tx));
        }
        tracing::debug!(topic, "subscribed");
        Subscription {
            topic: topic.to_string(),
            id,
            rx,
            broker: Arc::clone(&self.inner),
        }
    }

    /// Deliver a notification to all current subscribers of `topic`.
    pub fn publish(&self, topic: &str, notification: &Notification) {
        let subscribers = self
            .inner
            .subscribers
            .lock()
            .expect("broker mutex poisoned");
        if let Some(entries) = subscribers.get(topic) {
            for (_, tx) in entries {
                // A closed receiver is cleaned up on Subscription drop.
                let _ = tx.send(notification.clone());
            }
        }
    }
}

/// A live subscription to one topic. Dropping it unsubscribes.
pub struct Subscription {
    topic: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Notification>,
    broker: Arc<BrokerInner>,
}

impl Subscription {
    /// Receive the next notification, or `None` if the broker shut down.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }

    /// The subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut subscribers = self.broker.subscribers.lock().expect("broker mutex poisoned");
        if let Some(entries) = subscribers.get_mut(&self.topic) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                subscribers.remove(&self.topic);
                if let Some(control) = &self.broker.control {
                    let _ = control.send(ListenControl::Unlisten(self.topic.clone()));
                }
            }
        }
        tracing::debug!(topic = %self.topic, "unsubscribed");
    }
}
