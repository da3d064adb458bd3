//! In-memory transport and helpers shared by the control point tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use callback_server::EventRouter;
use control_point::{
    ControlPoint, ControlPointConfig, ControlPointError, DeviceInfo, Result, SsdpKind,
    SsdpNotification, SubscriptionResponse, UpnpTransport,
};
use parking_lot::Mutex;
use soap_client::SoapError;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use upnp_discovery::DiscoveryError;

/// Scriptable transport that records every call.
pub struct FakeTransport {
    /// Each fetch takes one permit; tests hold fetches by starting at zero.
    pub fetch_gate: Semaphore,
    fetch_failures: Mutex<HashMap<String, usize>>,
    pub fetches: AtomicUsize,
    pub lease: Duration,
    renew_script: Mutex<VecDeque<Result<Duration>>>,
    pub renewals: Mutex<Vec<(String, Instant)>>,
    pub unsubscribed: Mutex<Vec<String>>,
    next_sid: AtomicUsize,
    pub search_responses: Mutex<Vec<SsdpNotification>>,
    served: Mutex<HashMap<String, DeviceInfo>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            fetch_gate: Semaphore::new(Semaphore::MAX_PERMITS),
            fetch_failures: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
            lease: Duration::from_secs(300),
            renew_script: Mutex::new(VecDeque::new()),
            renewals: Mutex::new(Vec::new()),
            unsubscribed: Mutex::new(Vec::new()),
            next_sid: AtomicUsize::new(1),
            search_responses: Mutex::new(Vec::new()),
            served: Mutex::new(HashMap::new()),
        }
    }

    /// Start with every description fetch blocked.
    pub fn gated() -> Self {
        Self {
            fetch_gate: Semaphore::new(0),
            ..Self::new()
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Fail the next `count` fetches of `location`.
    pub fn fail_fetches(&self, location: &str, count: usize) {
        self.fetch_failures.lock().insert(location.to_string(), count);
    }

    /// Queue the outcome of the next renewal. Unscripted renewals grant the
    /// configured lease.
    pub fn script_renewal(&self, outcome: Result<Duration>) {
        self.renew_script.lock().push_back(outcome);
    }

    /// Answer fetches of `info.location` with `info` instead of a
    /// single-device description.
    pub fn serve(&self, info: DeviceInfo) {
        self.served.lock().insert(info.location.clone(), info);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn renewal_count(&self) -> usize {
        self.renewals.lock().len()
    }
}

#[async_trait]
impl UpnpTransport for FakeTransport {
    async fn search(&self, _target: &str, _timeout: Duration) -> Result<Vec<SsdpNotification>> {
        Ok(self.search_responses.lock().clone())
    }

    async fn fetch_description(&self, location: &str) -> Result<DeviceInfo> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Ok(permit) = self.fetch_gate.acquire().await {
            permit.forget();
        }

        {
            let mut failures = self.fetch_failures.lock();
            if let Some(remaining) = failures.get_mut(location) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(DiscoveryError::NetworkError("connection reset".to_string()).into());
                }
            }
        }

        if let Some(info) = self.served.lock().get(location) {
            return Ok(info.clone());
        }

        let udn = location
            .rsplit('/')
            .next()
            .and_then(|file| file.strip_suffix(".xml"))
            .unwrap_or_default();
        Ok(device_info(udn))
    }

    async fn subscribe(
        &self,
        _event_url: &str,
        _callback_url: &str,
        _timeout: Duration,
    ) -> Result<SubscriptionResponse> {
        // Give concurrent callers a chance to interleave, as a real request would.
        tokio::task::yield_now().await;
        let n = self.next_sid.fetch_add(1, Ordering::SeqCst);
        Ok(SubscriptionResponse {
            sid: format!("uuid:sub-{n}"),
            timeout_seconds: self.lease.as_secs() as u32,
        })
    }

    async fn renew(&self, _event_url: &str, sid: &str, _timeout: Duration) -> Result<Duration> {
        self.renewals.lock().push((sid.to_string(), Instant::now()));
        self.renew_script
            .lock()
            .pop_front()
            .unwrap_or(Ok(self.lease))
    }

    async fn unsubscribe(&self, _event_url: &str, sid: &str) -> Result<()> {
        self.unsubscribed.lock().push(sid.to_string());
        Ok(())
    }

    async fn call_action(
        &self,
        _control_url: &str,
        _service_type: &str,
        action: &str,
        args: &[(String, String)],
    ) -> Result<Vec<(String, String)>> {
        let mut output = vec![("Action".to_string(), action.to_string())];
        output.extend(args.iter().cloned());
        Ok(output)
    }
}

/// Description location served by the fake for `udn`.
pub fn location(udn: &str) -> String {
    format!("http://192.168.1.20:1400/{udn}.xml")
}

pub fn device_info(udn: &str) -> DeviceInfo {
    let xml = format!(
        r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Speaker {udn}</friendlyName>
    <manufacturer>Example Audio</manufacturer>
    <modelName>Speaker One</modelName>
    <UDN>{udn}</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
        <SCPDURL>/xml/RenderingControl1.xml</SCPDURL>
        <controlURL>/MediaRenderer/RenderingControl/Control</controlURL>
        <eventSubURL>/MediaRenderer/RenderingControl/Event</eventSubURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
        <SCPDURL>/xml/AVTransport1.xml</SCPDURL>
        <controlURL>/MediaRenderer/AVTransport/Control</controlURL>
        <eventSubURL>/MediaRenderer/AVTransport/Event</eventSubURL>
      </service>
    </serviceList>
  </device>
</root>"#
    );
    upnp_discovery::parse_description(&location(udn), &xml).expect("valid description")
}

/// Description of root device `udn` listing `children` as embedded devices.
pub fn bridge_info(udn: &str, children: &[&str]) -> DeviceInfo {
    let embedded: String = children
        .iter()
        .map(|child| {
            format!(
                r#"<device>
        <deviceType>urn:schemas-upnp-org:device:DimmableLight:1</deviceType>
        <friendlyName>Lamp {child}</friendlyName>
        <UDN>{child}</UDN>
      </device>"#
            )
        })
        .collect();
    let xml = format!(
        r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:Bridge:1</deviceType>
    <friendlyName>Bridge {udn}</friendlyName>
    <UDN>{udn}</UDN>
    <deviceList>{embedded}</deviceList>
  </device>
</root>"#
    );
    upnp_discovery::parse_description(&location(udn), &xml).expect("valid description")
}

/// Announcement of `udn` pointing at the description served at `at`.
pub fn alive_at(udn: &str, at: &str) -> SsdpNotification {
    SsdpNotification {
        location: Some(at.to_string()),
        ..alive(udn)
    }
}

pub fn alive(udn: &str) -> SsdpNotification {
    SsdpNotification {
        kind: SsdpKind::Alive,
        usn: format!("{udn}::urn:schemas-upnp-org:device:MediaRenderer:1"),
        target: "urn:schemas-upnp-org:device:MediaRenderer:1".to_string(),
        location: Some(location(udn)),
        server: Some("Linux UPnP/1.0 Example/1.0".to_string()),
        max_age: Some(1800),
    }
}

pub fn byebye(udn: &str) -> SsdpNotification {
    SsdpNotification {
        kind: SsdpKind::ByeBye,
        location: None,
        max_age: None,
        ..alive(udn)
    }
}

pub fn renewal_error() -> ControlPointError {
    SoapError::Http {
        method: "SUBSCRIBE",
        status: 412,
    }
    .into()
}

/// Control point over `transport` with an in-process router.
pub fn fake_control_point(transport: Arc<FakeTransport>) -> (ControlPoint, Arc<EventRouter>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let router = Arc::new(EventRouter::new(tx));
    let control_point = ControlPoint::with_parts(
        ControlPointConfig::default().with_announcement_listener(false),
        transport,
        Arc::clone(&router),
        rx,
        "http://127.0.0.1:3400/notify",
    );
    (control_point, router)
}

/// Announce `udn` and wait for its description to load.
pub async fn discover(control_point: &ControlPoint, udn: &str) -> Arc<control_point::Device> {
    if let Some(fetch) = control_point.handle_notification(alive(udn)) {
        fetch.await.expect("fetch task");
    }
    control_point.device(udn).expect("device is live")
}
