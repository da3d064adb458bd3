//! SSDP (Simple Service Discovery Protocol) messages and search client
//!
//! Parses both unicast M-SEARCH responses and multicast NOTIFY announcements
//! into a single [`SsdpNotification`] shape, and sends M-SEARCH requests on a
//! blocking UDP socket.

use std::net::UdpSocket;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{DiscoveryError, Result};

/// SSDP multicast group address
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";
/// SSDP port
pub const SSDP_PORT: u16 = 1900;

/// What an SSDP message says about a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SsdpKind {
    /// Unicast reply to an M-SEARCH
    SearchResponse,
    /// `NOTIFY` with `NTS: ssdp:alive`
    Alive,
    /// `NOTIFY` with `NTS: ssdp:byebye`
    ByeBye,
    /// `NOTIFY` with `NTS: ssdp:update`
    Update,
}

impl SsdpKind {
    /// Whether the message announces presence (as opposed to departure).
    pub fn is_presence(&self) -> bool {
        !matches!(self, Self::ByeBye)
    }
}

/// A parsed SSDP search response or announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpNotification {
    pub kind: SsdpKind,
    /// Unique service name, e.g. `uuid:abc::urn:schemas-upnp-org:device:Basic:1`
    pub usn: String,
    /// `ST` of a search response or `NT` of an announcement
    pub target: String,
    /// Description URL; absent on byebye
    pub location: Option<String>,
    pub server: Option<String>,
    /// `CACHE-CONTROL: max-age` in seconds
    pub max_age: Option<u32>,
}

impl SsdpNotification {
    /// Device UDN carried in the USN.
    pub fn udn(&self) -> &str {
        udn_from_usn(&self.usn)
    }
}

/// Strip the `::type` suffix from a USN, leaving the UDN.
///
/// ```
/// use upnp_discovery::udn_from_usn;
///
/// assert_eq!(udn_from_usn("uuid:1234::upnp:rootdevice"), "uuid:1234");
/// assert_eq!(udn_from_usn("uuid:1234"), "uuid:1234");
/// ```
pub fn udn_from_usn(usn: &str) -> &str {
    usn.split_once("::").map_or(usn, |(udn, _)| udn).trim()
}

/// Parse one SSDP datagram.
///
/// Returns `None` for M-SEARCH requests, unknown `NTS` values and messages
/// missing the headers their kind requires.
pub fn parse_message(text: &str) -> Option<SsdpNotification> {
    let mut lines = text.lines();
    let start_line = lines.next()?.trim();

    let mut location = None;
    let mut st = None;
    let mut nt = None;
    let mut nts = None;
    let mut usn = None;
    let mut server = None;
    let mut max_age = None;

    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_uppercase().as_str() {
            "LOCATION" => location = Some(value.to_string()),
            "ST" => st = Some(value.to_string()),
            "NT" => nt = Some(value.to_string()),
            "NTS" => nts = Some(value.to_ascii_lowercase()),
            "USN" => usn = Some(value.to_string()),
            "SERVER" => server = Some(value.to_string()),
            "CACHE-CONTROL" => max_age = parse_max_age(value),
            _ => {}
        }
    }

    let upper_start = start_line.to_ascii_uppercase();
    let (kind, target) = if upper_start.starts_with("HTTP/") {
        if !upper_start.contains(" 200") {
            return None;
        }
        (SsdpKind::SearchResponse, st?)
    } else if upper_start.starts_with("NOTIFY") {
        let kind = match nts?.as_str() {
            "ssdp:alive" => SsdpKind::Alive,
            "ssdp:byebye" => SsdpKind::ByeBye,
            "ssdp:update" => SsdpKind::Update,
            _ => return None,
        };
        (kind, nt?)
    } else {
        return None;
    };

    let usn = usn.filter(|u| !u.is_empty())?;
    if kind.is_presence() && location.is_none() {
        return None;
    }

    Some(SsdpNotification {
        kind,
        usn,
        target,
        location,
        server,
        max_age,
    })
}

fn parse_max_age(value: &str) -> Option<u32> {
    value.split(',').find_map(|directive| {
        let (key, secs) = directive.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("max-age") {
            secs.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Build an M-SEARCH request for `search_target`.
pub fn search_request(search_target: &str, mx: u8) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {SSDP_MULTICAST_ADDR}:{SSDP_PORT}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {mx}\r\n\
         ST: {search_target}\r\n\
         USER-AGENT: devgate/1.0 UPnP/1.1\r\n\
         \r\n"
    )
}

/// Blocking SSDP search client
pub struct SsdpClient {
    socket: UdpSocket,
}

impl SsdpClient {
    /// Bind an ephemeral socket whose reads give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to bind UDP socket: {e}")))?;

        socket
            .set_read_timeout(Some(timeout))
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to set read timeout: {e}")))?;

        socket
            .set_multicast_loop_v4(true)
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to set multicast loop: {e}")))?;

        Ok(Self { socket })
    }

    /// Send an M-SEARCH and iterate over the responses until the read timeout
    pub fn search(&self, search_target: &str, mx: u8) -> Result<SsdpResponses<'_>> {
        let request = search_request(search_target, mx);
        self.socket
            .send_to(request.as_bytes(), (SSDP_MULTICAST_ADDR, SSDP_PORT))
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to send M-SEARCH: {e}")))?;
        debug!(search_target, "Sent M-SEARCH");

        Ok(SsdpResponses {
            socket: &self.socket,
            buffer: [0; 2048],
            finished: false,
        })
    }
}

/// Search and collect every response that arrives within `timeout`.
pub fn search(search_target: &str, timeout: Duration) -> Result<Vec<SsdpNotification>> {
    let client = SsdpClient::new(timeout)?;
    let mx = timeout.as_secs().clamp(1, 5) as u8;
    let responses = client.search(search_target, mx)?;
    responses.collect()
}

/// Responses to one M-SEARCH
pub struct SsdpResponses<'a> {
    socket: &'a UdpSocket,
    buffer: [u8; 2048],
    finished: bool,
}

impl Iterator for SsdpResponses<'_> {
    type Item = Result<SsdpNotification>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            match self.socket.recv_from(&mut self.buffer) {
                Ok((size, from)) => {
                    let Ok(text) = std::str::from_utf8(&self.buffer[..size]) else {
                        trace!(%from, "Skipping non-UTF-8 datagram");
                        continue;
                    };
                    match parse_message(text) {
                        Some(message) => return Some(Ok(message)),
                        None => trace!(%from, "Skipping unrecognised SSDP datagram"),
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    self.finished = true;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(DiscoveryError::NetworkError(format!("Socket error: {e}"))));
                }
            }
        }
        None
    }
}
