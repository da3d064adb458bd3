//! UPnP device description parsing and endpoint resolution.
//!
//! A description document names the device and lists its services with
//! URLs that are usually relative. [`parse_description`] decodes the XML and
//! resolves every service URL against `URLBase` or the document location,
//! producing a [`DeviceInfo`] a control point can use directly.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{DiscoveryError, Result};

/// UPnP description root element.
#[derive(Debug, Clone, Deserialize)]
pub struct Root {
    #[serde(rename = "URLBase", default)]
    pub url_base: Option<String>,
    pub device: DeviceDescription,
}

/// The `<device>` element of a description document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescription {
    pub device_type: String,
    pub friendly_name: String,
    #[serde(default)]
    pub manufacturer: String,
    pub manufacturer_url: Option<String>,
    pub model_description: Option<String>,
    #[serde(default)]
    pub model_name: String,
    pub model_number: Option<String>,
    pub model_url: Option<String>,
    pub serial_number: Option<String>,
    #[serde(rename = "UDN")]
    pub udn: String,
    #[serde(rename = "presentationURL")]
    pub presentation_url: Option<String>,
    #[serde(default)]
    pub service_list: ServiceList,
    #[serde(default)]
    pub device_list: DeviceList,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceList {
    #[serde(rename = "service", default)]
    pub services: Vec<ServiceDescription>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeviceList {
    #[serde(rename = "device", default)]
    pub devices: Vec<DeviceDescription>,
}

/// One `<service>` entry, URLs as written in the document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceDescription {
    #[serde(rename = "serviceType")]
    pub service_type: String,
    #[serde(rename = "serviceId")]
    pub service_id: String,
    #[serde(rename = "SCPDURL", default)]
    pub scpd_url: String,
    #[serde(rename = "controlURL", default)]
    pub control_url: String,
    #[serde(rename = "eventSubURL", default)]
    pub event_sub_url: String,
}

/// A service with absolute endpoint URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub service_type: String,
    pub service_id: String,
    pub scpd_url: String,
    pub control_url: String,
    /// Empty when the service publishes no events
    pub event_sub_url: String,
}

/// Everything a control point needs about one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub location: String,
    pub host: String,
    pub port: u16,
    pub description: DeviceDescription,
    /// Services of the root device followed by those of embedded devices
    pub services: Vec<ServiceEndpoint>,
}

impl DeviceInfo {
    /// UDN of the root device.
    pub fn udn(&self) -> &str {
        &self.description.udn
    }

    /// Whether `udn` names the root device or one of its embedded devices.
    pub fn describes(&self, udn: &str) -> bool {
        self.udn() == udn || self.description.embedded_udns().iter().any(|embedded| embedded == udn)
    }
}

impl DeviceDescription {
    /// Decode the `<device>` element out of a description document.
    pub fn from_xml(xml: &str) -> Result<Self> {
        Ok(Root::from_xml(xml)?.device)
    }

    /// UDNs of every embedded device, depth first, without this device's own.
    pub fn embedded_udns(&self) -> Vec<String> {
        let mut udns = Vec::new();
        for embedded in &self.device_list.devices {
            udns.push(embedded.udn.clone());
            udns.extend(embedded.embedded_udns());
        }
        udns
    }

    fn trim_udns(&mut self) {
        self.udn = self.udn.trim().to_string();
        for embedded in &mut self.device_list.devices {
            embedded.trim_udns();
        }
    }

    /// Services of this device and every embedded device, depth first.
    pub fn all_services(&self) -> Vec<&ServiceDescription> {
        let mut services: Vec<&ServiceDescription> = self.service_list.services.iter().collect();
        for embedded in &self.device_list.devices {
            services.extend(embedded.all_services());
        }
        services
    }
}

impl Root {
    pub fn from_xml(xml: &str) -> Result<Self> {
        quick_xml::de::from_str(xml)
            .map_err(|e| DiscoveryError::ParseError(format!("Failed to parse device XML: {e}")))
    }
}

/// Decode a description document fetched from `location`.
pub fn parse_description(location: &str, xml: &str) -> Result<DeviceInfo> {
    let location_url = parse_url(location)?;
    let mut root = Root::from_xml(xml)?;
    root.device.trim_udns();

    if root.device.udn.is_empty() {
        return Err(DiscoveryError::InvalidDevice("description has an empty UDN".to_string()));
    }

    let base = match root.url_base.as_deref().map(str::trim) {
        Some(base) if !base.is_empty() => parse_url(base)?,
        _ => location_url.clone(),
    };

    let services = root
        .device
        .all_services()
        .into_iter()
        .map(|service| resolve_service(&base, service))
        .collect::<Result<Vec<_>>>()?;

    let (host, port) = host_port(&location_url)?;

    Ok(DeviceInfo {
        location: location.to_string(),
        host,
        port,
        description: root.device,
        services,
    })
}

/// GET and decode a description document.
pub fn fetch_description(location: &str, timeout: Duration) -> Result<DeviceInfo> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DiscoveryError::NetworkError(format!("Failed to create HTTP client: {e}")))?;

    debug!(location, "Fetching device description");
    let xml = client
        .get(location)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.text())
        .map_err(|e| DiscoveryError::NetworkError(format!("Failed to fetch {location}: {e}")))?;

    parse_description(location, &xml)
}

/// Resolve `reference` against `base`; empty references stay empty.
pub fn resolve_url(base: &Url, reference: &str) -> Result<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Ok(String::new());
    }
    base.join(reference)
        .map(String::from)
        .map_err(|e| DiscoveryError::InvalidUrl {
            url: reference.to_string(),
            reason: e.to_string(),
        })
}

/// Host and port of an HTTP URL, using the scheme default when the port
/// is omitted.
pub fn host_port(url: &Url) -> Result<(String, u16)> {
    let host = url.host_str().ok_or_else(|| DiscoveryError::InvalidUrl {
        url: url.to_string(),
        reason: "no host".to_string(),
    })?;
    let port = url.port_or_known_default().ok_or_else(|| DiscoveryError::InvalidUrl {
        url: url.to_string(),
        reason: "no port".to_string(),
    })?;
    Ok((host.to_string(), port))
}

fn parse_url(text: &str) -> Result<Url> {
    Url::parse(text.trim()).map_err(|e| DiscoveryError::InvalidUrl {
        url: text.to_string(),
        reason: e.to_string(),
    })
}

fn resolve_service(base: &Url, service: &ServiceDescription) -> Result<ServiceEndpoint> {
    Ok(ServiceEndpoint {
        service_type: service.service_type.trim().to_string(),
        service_id: service.service_id.trim().to_string(),
        scpd_url: resolve_url(base, &service.scpd_url)?,
        control_url: resolve_url(base, &service.control_url)?,
        event_sub_url: resolve_url(base, &service.event_sub_url)?,
    })
}
