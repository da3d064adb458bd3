//! Event routing for HTTP callback notifications.
//!
//! The [`EventRouter`] keeps the set of subscription ids the process owns and
//! forwards notifications for those ids to a single channel. Notifications
//! for unknown ids are refused so the server can answer `412`.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

/// A raw event notification received over HTTP.
///
/// Carries no device context; mapping the subscription id back to a
/// service is the consumer's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    /// The subscription ID from the `SID` header
    pub subscription_id: String,
    /// Event sequence number from the `SEQ` header, when present and numeric
    pub seq: Option<u32>,
    /// The raw XML property set
    pub event_xml: String,
}

/// Routes events from HTTP callbacks to a channel.
#[derive(Clone)]
pub struct EventRouter {
    subscriptions: Arc<RwLock<HashSet<String>>>,
    event_sender: mpsc::UnboundedSender<NotificationPayload>,
}

impl EventRouter {
    /// Create a router delivering to `event_sender`.
    ///
    /// ```
    /// use tokio::sync::mpsc;
    /// use callback_server::router::{EventRouter, NotificationPayload};
    ///
    /// let (tx, _rx) = mpsc::unbounded_channel::<NotificationPayload>();
    /// let router = EventRouter::new(tx);
    /// ```
    pub fn new(event_sender: mpsc::UnboundedSender<NotificationPayload>) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
            event_sender,
        }
    }

    /// Start accepting notifications for `subscription_id`.
    pub async fn register(&self, subscription_id: String) {
        debug!(sid = %subscription_id, "Registered subscription for routing");
        self.subscriptions.write().await.insert(subscription_id);
    }

    /// Stop accepting notifications for `subscription_id`.
    pub async fn unregister(&self, subscription_id: &str) {
        if self.subscriptions.write().await.remove(subscription_id) {
            debug!(sid = subscription_id, "Unregistered subscription");
        }
    }

    /// True if events for `subscription_id` are routed.
    pub async fn is_registered(&self, subscription_id: &str) -> bool {
        self.subscriptions.read().await.contains(subscription_id)
    }

    /// Number of routed subscriptions.
    pub async fn registered_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Forward a notification if its subscription is registered.
    ///
    /// Returns `false` (and drops the event) for unknown subscription ids.
    ///
    /// ```
    /// # use tokio::sync::mpsc;
    /// # use callback_server::router::{EventRouter, NotificationPayload};
    /// # #[tokio::main]
    /// # async fn main() {
    /// # let (tx, mut rx) = mpsc::unbounded_channel::<NotificationPayload>();
    /// # let router = EventRouter::new(tx);
    /// router.register("uuid:sub-1".to_string()).await;
    /// let routed = router.route_event(
    ///     "uuid:sub-1".to_string(),
    ///     Some(0),
    ///     "<e:propertyset/>".to_string(),
    /// ).await;
    /// assert!(routed);
    /// # }
    /// ```
    pub async fn route_event(
        &self,
        subscription_id: String,
        seq: Option<u32>,
        event_xml: String,
    ) -> bool {
        if !self.subscriptions.read().await.contains(&subscription_id) {
            trace!(sid = %subscription_id, "Dropping event for unknown subscription");
            return false;
        }

        let payload = NotificationPayload {
            subscription_id,
            seq,
            event_xml,
        };

        // Receiver gone means the consumer is shutting down.
        if self.event_sender.send(payload).is_err() {
            debug!("Notification receiver dropped");
        }
        true
    }
}
