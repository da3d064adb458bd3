//! SSDP multicast listener.
//!
//! Joins `239.255.255.250:1900` and feeds every NOTIFY announcement into the
//! control point. Port 1900 is often shared with other UPnP software, so the
//! socket is bound with `SO_REUSEADDR`; if it still cannot be bound the
//! listener logs and exits, and discovery falls back to periodic search.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use upnp_discovery::{parse_message, SsdpKind, SSDP_MULTICAST_ADDR, SSDP_PORT};

use crate::control_point::ControlPoint;

const MAX_DATAGRAM: usize = 2048;

const MIN_RECEIVE_BACKOFF: Duration = Duration::from_millis(50);
const MAX_RECEIVE_BACKOFF: Duration = Duration::from_secs(5);

/// Delay between failed receives, doubling up to a ceiling and reset by the
/// next datagram.
#[derive(Debug)]
struct ReceiveBackoff {
    next: Duration,
    failures: u32,
}

impl ReceiveBackoff {
    fn new() -> Self {
        Self {
            next: MIN_RECEIVE_BACKOFF,
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before receiving again.
    fn failed(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(MAX_RECEIVE_BACKOFF);
        self.failures += 1;
        delay
    }

    fn succeeded(&mut self) {
        *self = Self::new();
    }
}

fn bind_multicast() -> io::Result<UdpSocket> {
    let group: Ipv4Addr = SSDP_MULTICAST_ADDR
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, SSDP_PORT)).into())?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;

    UdpSocket::from_std(socket.into())
}

/// Start listening for announcements on behalf of `control_point`.
///
/// The task holds only a weak reference and ends once the control point is
/// dropped.
pub(crate) fn spawn(control_point: &ControlPoint) -> JoinHandle<()> {
    let weak = control_point.downgrade();

    tokio::spawn(async move {
        let socket = match bind_multicast() {
            Ok(socket) => socket,
            Err(e) => {
                warn!(error = %e, "Cannot listen for SSDP announcements, relying on search");
                return;
            }
        };
        info!(group = SSDP_MULTICAST_ADDR, port = SSDP_PORT, "Listening for SSDP announcements");

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut backoff = ReceiveBackoff::new();
        loop {
            let (len, from) = match socket.recv_from(&mut buf).await {
                Ok(received) => {
                    backoff.succeeded();
                    received
                }
                Err(e) => {
                    let delay = backoff.failed();
                    if backoff.failures == 1 {
                        debug!(error = %e, "SSDP receive failed");
                    } else {
                        warn!(error = %e, failures = backoff.failures, ?delay, "SSDP receive keeps failing");
                    }
                    if weak.upgrade().is_none() {
                        break;
                    }
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let text = String::from_utf8_lossy(&buf[..len]);
            let Some(notification) = parse_message(&text) else {
                continue;
            };
            // Replies to other control points' searches are not announcements.
            if notification.kind == SsdpKind::SearchResponse {
                continue;
            }

            let Some(control_point) = weak.upgrade() else { break };
            trace!(%from, usn = %notification.usn, kind = ?notification.kind, "SSDP announcement");
            control_point.handle_notification(notification);
        }
        debug!("SSDP listener stopped");
    })
}
