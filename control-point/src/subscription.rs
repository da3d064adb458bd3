//! GENA subscription lifecycle.
//!
//! A subscription moves through `none -> subscribing -> active`, then loops
//! `active -> renewing -> active` until a renewal fails, at which point it is
//! dropped from the manager and the owner receives
//! [`ServiceEvent::SubscriptionLost`]. Failed renewals are never retried;
//! the owner decides whether to subscribe again.
//!
//! Each subscription owns one timer task that sleeps until `granted lease -
//! renewal margin` and then renews with the existing SID. Inbound NOTIFY
//! bodies arrive from the callback server as [`NotificationPayload`]s and are
//! demultiplexed by SID onto the owning service's channel.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use callback_server::{EventRouter, NotificationPayload};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::ControlPointConfig;
use crate::error::{Result, SubscriptionError};
use crate::propertyset;
use crate::transport::UpnpTransport;

/// Notification delivered to the owner of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// Evented state variables changed.
    StateChange {
        /// GENA `SEQ` header, when the device sent one
        seq: Option<u32>,
        /// `(variable, value)` pairs in document order
        properties: Vec<(String, String)>,
    },
    /// The subscription ended without being unsubscribed; no further events
    /// will arrive on this channel.
    SubscriptionLost(SubscriptionError),
}

/// Bookkeeping for one live subscription.
struct ActiveSubscription {
    udn: String,
    service_id: String,
    event_url: String,
    events: mpsc::Sender<ServiceEvent>,
    renewal: JoinHandle<()>,
}

impl ActiveSubscription {
    fn notify(&self, sid: &str, event: ServiceEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(sid, service_id = %self.service_id, "Service event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(sid, "Service event receiver dropped");
            }
        }
    }
}

struct Inner {
    transport: Arc<dyn UpnpTransport>,
    router: Arc<EventRouter>,
    callback_url: String,
    config: ControlPointConfig,
    active: Mutex<HashMap<String, ActiveSubscription>>,
}

/// Owns every subscription opened by one control point.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("callback_url", &self.inner.callback_url)
            .field("active", &self.active_count())
            .finish()
    }
}

impl SubscriptionManager {
    /// Create a manager that advertises `callback_url` in SUBSCRIBE requests
    /// and registers accepted SIDs with `router`.
    pub fn new(
        transport: Arc<dyn UpnpTransport>,
        router: Arc<EventRouter>,
        callback_url: impl Into<String>,
        config: ControlPointConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                router,
                callback_url: callback_url.into(),
                config,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// URL devices deliver NOTIFY requests to.
    pub fn callback_url(&self) -> &str {
        &self.inner.callback_url
    }

    /// Subscribe to `event_url` on behalf of a service.
    ///
    /// On success the returned SID is registered for routing and a renewal
    /// timer is armed at `granted lease - renewal margin`.
    pub async fn subscribe(
        &self,
        udn: &str,
        service_id: &str,
        event_url: &str,
    ) -> Result<(String, mpsc::Receiver<ServiceEvent>)> {
        let inner = &self.inner;
        let response = inner
            .transport
            .subscribe(event_url, &inner.callback_url, inner.config.subscription_timeout)
            .await?;

        let sid = response.sid;
        let lease = match response.timeout_seconds {
            0 => inner.config.subscription_timeout,
            secs => Duration::from_secs(u64::from(secs)),
        };

        let (events, receiver) = mpsc::channel(inner.config.event_buffer_size);
        let renewal = tokio::spawn(renewal_loop(
            Arc::downgrade(&self.inner),
            sid.clone(),
            event_url.to_string(),
            lease,
        ));

        inner.active.lock().insert(
            sid.clone(),
            ActiveSubscription {
                udn: udn.to_string(),
                service_id: service_id.to_string(),
                event_url: event_url.to_string(),
                events,
                renewal,
            },
        );
        inner.router.register(sid.clone()).await;

        info!(
            sid = %sid,
            udn,
            service_id,
            lease_secs = lease.as_secs(),
            "Subscription active"
        );
        Ok((sid, receiver))
    }

    /// Tear down `sid`: cancel its timer and send UNSUBSCRIBE.
    ///
    /// Best effort: a failed UNSUBSCRIBE is logged, not returned. Returns
    /// whether the SID was known.
    pub async fn unsubscribe(&self, sid: &str) -> bool {
        self.end(sid, None).await
    }

    /// Like [`unsubscribe`](Self::unsubscribe), but tells the owner why the
    /// subscription went away.
    pub async fn close(&self, sid: &str, reason: &str) -> bool {
        let notice = SubscriptionError::Closed {
            sid: sid.to_string(),
            reason: reason.to_string(),
        };
        self.end(sid, Some(notice)).await
    }

    async fn end(&self, sid: &str, notice: Option<SubscriptionError>) -> bool {
        let Some(subscription) = self.inner.active.lock().remove(sid) else {
            return false;
        };
        subscription.renewal.abort();
        self.inner.router.unregister(sid).await;

        if let Some(notice) = notice {
            subscription.notify(sid, ServiceEvent::SubscriptionLost(notice));
        }

        match self.inner.transport.unsubscribe(&subscription.event_url, sid).await {
            Ok(()) => debug!(sid, service_id = %subscription.service_id, "Unsubscribed"),
            Err(e) => warn!(sid, error = %e, "UNSUBSCRIBE failed"),
        }
        true
    }

    /// Close every subscription held for the device `udn`.
    pub async fn close_device(&self, udn: &str, reason: &str) -> usize {
        let sids: Vec<String> = self
            .inner
            .active
            .lock()
            .iter()
            .filter(|(_, subscription)| subscription.udn == udn)
            .map(|(sid, _)| sid.clone())
            .collect();

        let mut closed = 0;
        for sid in sids {
            if self.close(&sid, reason).await {
                closed += 1;
            }
        }
        closed
    }

    /// Close every subscription.
    pub async fn shutdown(&self) {
        let sids = self.sids();
        for sid in &sids {
            self.close(sid, "control point shut down").await;
        }
        debug!(count = sids.len(), "Subscription manager stopped");
    }

    /// Deliver one notification to the owner of its SID.
    pub fn dispatch(&self, payload: NotificationPayload) {
        let NotificationPayload {
            subscription_id: sid,
            seq,
            event_xml,
        } = payload;

        let active = self.inner.active.lock();
        let Some(subscription) = active.get(&sid) else {
            debug!(sid = %sid, "Notification for unknown subscription");
            return;
        };

        match propertyset::decode(&event_xml) {
            Ok(properties) => {
                trace!(sid = %sid, ?seq, count = properties.len(), "State change");
                subscription.notify(&sid, ServiceEvent::StateChange { seq, properties });
            }
            Err(e) => warn!(sid = %sid, error = %e, "Dropping undecodable event"),
        }
    }

    /// Spawn the task that drains the callback server's notifications.
    pub fn spawn_dispatcher(
        &self,
        mut notifications: mpsc::UnboundedReceiver<NotificationPayload>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(payload) = notifications.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                SubscriptionManager { inner }.dispatch(payload);
            }
            debug!("Notification dispatcher stopped");
        })
    }

    /// True while `sid` is held and not yet expired or cancelled.
    pub fn is_active(&self, sid: &str) -> bool {
        self.inner.active.lock().contains_key(sid)
    }

    /// Number of live subscriptions.
    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// SIDs of every live subscription.
    pub fn sids(&self) -> Vec<String> {
        self.inner.active.lock().keys().cloned().collect()
    }
}

/// Renew `sid` shortly before each lease runs out, until a renewal fails or
/// the manager goes away.
async fn renewal_loop(manager: Weak<Inner>, sid: String, event_url: String, mut lease: Duration) {
    loop {
        let delay = match manager.upgrade() {
            Some(inner) => inner.config.renewal_delay(lease),
            None => return,
        };
        trace!(sid = %sid, delay_secs = delay.as_secs(), "Renewal armed");
        tokio::time::sleep(delay).await;

        let Some(inner) = manager.upgrade() else { return };
        match inner
            .transport
            .renew(&event_url, &sid, inner.config.subscription_timeout)
            .await
        {
            Ok(granted) => {
                debug!(sid = %sid, lease_secs = granted.as_secs(), "Subscription renewed");
                lease = if granted.is_zero() {
                    inner.config.subscription_timeout
                } else {
                    granted
                };
            }
            Err(e) => {
                warn!(sid = %sid, error = %e, "Subscription renewal failed, dropping subscription");
                let removed = inner.active.lock().remove(&sid);
                inner.router.unregister(&sid).await;
                if let Some(subscription) = removed {
                    subscription.notify(
                        &sid,
                        ServiceEvent::SubscriptionLost(SubscriptionError::RenewalFailed {
                            sid: sid.clone(),
                            reason: e.to_string(),
                        }),
                    );
                }
                return;
            }
        }
    }
}
