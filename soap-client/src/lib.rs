//! Blocking SOAP client for UPnP device communication
//!
//! Provides the three HTTP conversations a control point has with a device:
//! fetching description documents, invoking SOAP actions on a service's
//! control URL, and managing GENA event subscriptions with
//! SUBSCRIBE/UNSUBSCRIBE. All URLs are absolute; resolving them against a
//! device's description location is the caller's job.

mod envelope;
mod error;

pub use error::SoapError;

use std::time::Duration;

use tracing::{debug, trace};
use xmltree::Element;

/// Response from a GENA subscription request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionResponse {
    /// Subscription ID returned by the device
    pub sid: String,
    /// Actual timeout granted by the device (in seconds)
    pub timeout_seconds: u32,
}

/// A minimal SOAP client for UPnP device communication
#[derive(Debug, Clone)]
pub struct SoapClient {
    agent: ureq::Agent,
}

impl SoapClient {
    /// Create a new client with the default timeouts (5s connect, 10s read)
    pub fn new() -> Self {
        Self::with_timeouts(Duration::from_secs(5), Duration::from_secs(10))
    }

    pub fn with_timeouts(connect: Duration, read: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(connect)
                .timeout_read(read)
                .build(),
        }
    }

    /// Send a SOAP request and return the parsed response element
    pub fn call(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        payload: &str,
    ) -> Result<Element, SoapError> {
        let body = envelope::build(service_type, action, payload);
        let soap_action = format!("\"{service_type}#{action}\"");
        trace!(control_url, action, "SOAP request");

        let response = self
            .agent
            .post(control_url)
            .set("Content-Type", "text/xml; charset=\"utf-8\"")
            .set("SOAPACTION", &soap_action)
            .send_string(&body);

        let xml_text = match response {
            Ok(response) => response
                .into_string()
                .map_err(|e| SoapError::Network(e.to_string()))?,
            Err(ureq::Error::Status(status, response)) => {
                // Faults come back as HTTP 500 with an envelope body.
                let text = response.into_string().unwrap_or_default();
                return Err(envelope::fault_from_body(&text).unwrap_or(SoapError::Http {
                    method: "POST",
                    status,
                }));
            }
            Err(e) => return Err(SoapError::Network(e.to_string())),
        };

        let xml = Element::parse(xml_text.as_bytes())
            .map_err(|e| SoapError::Parse(e.to_string()))?;

        envelope::extract_response(&xml, action)
    }

    /// Invoke an action with named string arguments and return its output
    /// arguments in document order.
    pub fn call_action(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<Vec<(String, String)>, SoapError> {
        let payload = envelope::render_args(args);
        let response = self.call(control_url, service_type, action, &payload)?;
        Ok(envelope::output_args(&response))
    }

    /// Subscribe to events published at `event_url`
    ///
    /// `callback_url` is where the device will send NOTIFY requests.
    pub fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse, SoapError> {
        debug!(event_url, callback_url, timeout_seconds, "SUBSCRIBE");
        let response = self
            .agent
            .request("SUBSCRIBE", event_url)
            .set("CALLBACK", &format!("<{callback_url}>"))
            .set("NT", "upnp:event")
            .set("TIMEOUT", &format!("Second-{timeout_seconds}"))
            .call()
            .map_err(|e| transport_error("SUBSCRIBE", e))?;

        let sid = response
            .header("SID")
            .ok_or_else(|| SoapError::Parse("Missing SID header in SUBSCRIBE response".to_string()))?
            .trim()
            .to_string();

        let timeout_seconds = response
            .header("TIMEOUT")
            .and_then(parse_timeout)
            .unwrap_or(timeout_seconds);

        Ok(SubscriptionResponse {
            sid,
            timeout_seconds,
        })
    }

    /// Renew an existing subscription; returns the granted timeout
    pub fn renew_subscription(
        &self,
        event_url: &str,
        sid: &str,
        timeout_seconds: u32,
    ) -> Result<u32, SoapError> {
        debug!(event_url, sid, timeout_seconds, "SUBSCRIBE renewal");
        let response = self
            .agent
            .request("SUBSCRIBE", event_url)
            .set("SID", sid)
            .set("TIMEOUT", &format!("Second-{timeout_seconds}"))
            .call()
            .map_err(|e| transport_error("SUBSCRIBE", e))?;

        Ok(response
            .header("TIMEOUT")
            .and_then(parse_timeout)
            .unwrap_or(timeout_seconds))
    }

    /// Cancel a subscription
    pub fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<(), SoapError> {
        debug!(event_url, sid, "UNSUBSCRIBE");
        self.agent
            .request("UNSUBSCRIBE", event_url)
            .set("SID", sid)
            .call()
            .map_err(|e| transport_error("UNSUBSCRIBE", e))?;
        Ok(())
    }
}

impl Default for SoapClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a GENA `TIMEOUT` header value such as `Second-1800`.
///
/// `Second-infinite` and malformed values yield `None`.
pub fn parse_timeout(value: &str) -> Option<u32> {
    value
        .trim()
        .strip_prefix("Second-")
        .and_then(|secs| secs.parse::<u32>().ok())
}

fn transport_error(method: &'static str, error: ureq::Error) -> SoapError {
    match error {
        ureq::Error::Status(status, _) => SoapError::Http { method, status },
        other => SoapError::Network(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("Second-1800"), Some(1800));
        assert_eq!(parse_timeout(" Second-300 "), Some(300));
        assert_eq!(parse_timeout("Second-infinite"), None);
        assert_eq!(parse_timeout("1800"), None);
    }

    #[test]
    fn test_subscribe_sends_gena_headers() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("SUBSCRIBE", "/upnp/event/power")
            .match_header("CALLBACK", "<http://10.0.0.2:3400/notify>")
            .match_header("NT", "upnp:event")
            .match_header("TIMEOUT", "Second-300")
            .with_status(200)
            .with_header("SID", "uuid:sub-1")
            .with_header("TIMEOUT", "Second-120")
            .create();

        let client = SoapClient::new();
        let url = format!("{}/upnp/event/power", server.url());
        let response = client
            .subscribe(&url, "http://10.0.0.2:3400/notify", 300)
            .unwrap();

        mock.assert();
        assert_eq!(response.sid, "uuid:sub-1");
        assert_eq!(response.timeout_seconds, 120);
    }

    #[test]
    fn test_subscribe_without_sid_is_parse_error() {
        let mut server = mockito::Server::new();
        server
            .mock("SUBSCRIBE", "/evt")
            .with_status(200)
            .create();

        let client = SoapClient::new();
        let result = client.subscribe(&format!("{}/evt", server.url()), "http://cb", 300);
        assert!(matches!(result, Err(SoapError::Parse(_))));
    }

    #[test]
    fn test_renew_falls_back_to_requested_timeout() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("SUBSCRIBE", "/evt")
            .match_header("SID", "uuid:sub-1")
            .with_status(200)
            .create();

        let client = SoapClient::new();
        let granted = client
            .renew_subscription(&format!("{}/evt", server.url()), "uuid:sub-1", 600)
            .unwrap();

        mock.assert();
        assert_eq!(granted, 600);
    }

    #[test]
    fn test_renew_rejected_reports_status() {
        let mut server = mockito::Server::new();
        server.mock("SUBSCRIBE", "/evt").with_status(412).create();

        let client = SoapClient::new();
        let result = client.renew_subscription(&format!("{}/evt", server.url()), "uuid:gone", 300);
        assert_eq!(
            result,
            Err(SoapError::Http {
                method: "SUBSCRIBE",
                status: 412
            })
        );
    }

    #[test]
    fn test_unsubscribe() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("UNSUBSCRIBE", "/evt")
            .match_header("SID", "uuid:sub-1")
            .with_status(200)
            .create();

        let client = SoapClient::new();
        client
            .unsubscribe(&format!("{}/evt", server.url()), "uuid:sub-1")
            .unwrap();
        mock.assert();
    }

    #[test]
    fn test_call_action_returns_output_args() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/upnp/control/power")
            .match_header(
                "SOAPACTION",
                "\"urn:schemas-upnp-org:service:SwitchPower:1#GetStatus\"",
            )
            .with_status(200)
            .with_body(
                r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><u:GetStatusResponse xmlns:u="urn:schemas-upnp-org:service:SwitchPower:1"><ResultStatus>1</ResultStatus></u:GetStatusResponse></s:Body></s:Envelope>"#,
            )
            .create();

        let client = SoapClient::new();
        let outputs = client
            .call_action(
                &format!("{}/upnp/control/power", server.url()),
                "urn:schemas-upnp-org:service:SwitchPower:1",
                "GetStatus",
                &[],
            )
            .unwrap();

        mock.assert();
        assert_eq!(outputs, vec![("ResultStatus".to_string(), "1".to_string())]);
    }

    #[test]
    fn test_call_action_fault_on_http_500() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/ctl")
            .with_status(500)
            .with_body(
                r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring><detail><UPnPError xmlns="urn:schemas-upnp-org:control-1-0"><errorCode>402</errorCode><errorDescription>Invalid Args</errorDescription></UPnPError></detail></s:Fault></s:Body></s:Envelope>"#,
            )
            .create();

        let client = SoapClient::new();
        let err = client
            .call_action(
                &format!("{}/ctl", server.url()),
                "urn:schemas-upnp-org:service:SwitchPower:1",
                "SetTarget",
                &[("newTargetValue", "maybe")],
            )
            .unwrap_err();
        assert_eq!(err.fault_code(), Some(402));
    }

    #[test]
    fn test_network_error_on_unreachable_host() {
        let client = SoapClient::with_timeouts(Duration::from_millis(200), Duration::from_millis(200));
        let result = client.call_action(
            "http://127.0.0.1:1/ctl",
            "urn:schemas-upnp-org:service:SwitchPower:1",
            "GetStatus",
            &[],
        );
        assert!(matches!(result, Err(SoapError::Network(_))));
    }
}
