//! HTTP server for receiving UPnP event notifications.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use warp::Filter;

use crate::error::CallbackError;
use crate::router::{EventRouter, NotificationPayload};

/// Path advertised in `CALLBACK` headers. Any path is accepted on receipt.
pub const CALLBACK_PATH: &str = "/notify";

/// HTTP callback server for receiving UPnP event notifications.
///
/// Binds the first free port in a range, accepts `NOTIFY` on any path, and
/// routes each event through an [`EventRouter`] to a channel.
///
/// ```no_run
/// use tokio::sync::mpsc;
/// use callback_server::{CallbackServer, NotificationPayload};
///
/// # async fn example() -> Result<(), callback_server::CallbackError> {
/// let (tx, mut rx) = mpsc::unbounded_channel::<NotificationPayload>();
/// let server = CallbackServer::new((3400, 3500), tx).await?;
/// tracing::info!(url = server.callback_url(), "listening");
///
/// while let Some(notification) = rx.recv().await {
///     tracing::debug!(sid = %notification.subscription_id, "event");
/// }
/// # Ok(())
/// # }
/// ```
pub struct CallbackServer {
    port: u16,
    base_url: String,
    event_router: Arc<EventRouter>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl CallbackServer {
    /// Start a server advertising the detected LAN address.
    pub async fn new(
        port_range: (u16, u16),
        event_sender: mpsc::UnboundedSender<NotificationPayload>,
    ) -> Result<Self, CallbackError> {
        let local_ip = detect_local_ip().ok_or(CallbackError::LocalIpUnavailable)?;
        Self::with_advertised_ip(port_range, local_ip, event_sender).await
    }

    /// Start a server advertising `advertised_ip` in its callback URL.
    pub async fn with_advertised_ip(
        port_range: (u16, u16),
        advertised_ip: IpAddr,
        event_sender: mpsc::UnboundedSender<NotificationPayload>,
    ) -> Result<Self, CallbackError> {
        let (start, end) = port_range;
        let event_router = Arc::new(EventRouter::new(event_sender));
        let mut next = start;

        // A free port can be taken by another process before warp binds it;
        // on a failed bind move on to the next candidate.
        loop {
            let port = find_available_port(next, end)
                .ok_or(CallbackError::NoAvailablePort { start, end })?;

            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let (ready_tx, ready_rx) = oneshot::channel();
            let server_handle = start_server(port, event_router.clone(), shutdown_rx, ready_tx);

            match ready_rx.await {
                Ok(Ok(bound)) => {
                    info!(%bound, %advertised_ip, "Callback server listening");
                    return Ok(Self {
                        port,
                        base_url: format!("http://{advertised_ip}:{port}"),
                        event_router,
                        shutdown_tx: Some(shutdown_tx),
                        server_handle: Some(server_handle),
                    });
                }
                Ok(Err(e)) if port < end => {
                    debug!(port, error = %e, "Free port was taken before bind");
                    next = port + 1;
                }
                Ok(Err(e)) => return Err(CallbackError::StartupFailed(e)),
                Err(_) => {
                    return Err(CallbackError::StartupFailed("server task exited".to_string()))
                }
            }
        }
    }

    /// `http://<ip>:<port>` of this server.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL to hand to devices in SUBSCRIBE `CALLBACK` headers.
    pub fn callback_url(&self) -> String {
        format!("{}{}", self.base_url, CALLBACK_PATH)
    }

    /// Port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Router used to register and unregister subscription ids.
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.event_router
    }

    /// Stop accepting requests and wait for the server task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
        debug!(port = self.port, "Callback server stopped");
    }
}

/// Find an available port in the given range.
fn find_available_port(start: u16, end: u16) -> Option<u16> {
    (start..=end).find(|&port| is_port_available(port))
}

fn is_port_available(port: u16) -> bool {
    TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)).is_ok()
}

/// Local address used for outbound traffic.
///
/// Connecting a UDP socket sends nothing; it only asks the OS which
/// interface would route to the target.
pub fn detect_local_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip())
}

fn start_server(
    port: u16,
    event_router: Arc<EventRouter>,
    shutdown_rx: oneshot::Receiver<()>,
    ready_tx: oneshot::Sender<Result<SocketAddr, String>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let routes = notify_route(event_router).recover(handle_rejection);
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);

        let bound = warp::serve(routes).try_bind_with_graceful_shutdown(addr, async move {
            let _ = shutdown_rx.await;
        });

        match bound {
            Ok((addr, server)) => {
                let _ = ready_tx.send(Ok(addr));
                server.await;
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e.to_string()));
            }
        }
    })
}

/// `NOTIFY` on any path.
fn notify_route(
    router: Arc<EventRouter>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::method()
        .and(warp::path::full())
        .and(warp::header::optional::<String>("sid"))
        .and(warp::header::optional::<String>("nt"))
        .and(warp::header::optional::<String>("nts"))
        .and(warp::header::optional::<String>("seq"))
        .and(warp::body::bytes())
        .and_then(
            move |method: warp::http::Method,
                  path: warp::path::FullPath,
                  sid: Option<String>,
                  nt: Option<String>,
                  nts: Option<String>,
                  seq: Option<String>,
                  body: bytes::Bytes| {
                let router = router.clone();
                async move {
                    if method.as_str() != "NOTIFY" {
                        return Err(warp::reject::not_found());
                    }

                    debug!(path = path.as_str(), sid = ?sid, seq = ?seq, bytes = body.len(), "Incoming NOTIFY");

                    if !validate_upnp_headers(sid.as_deref(), nt.as_deref(), nts.as_deref()) {
                        warn!(sid = ?sid, nt = ?nt, nts = ?nts, "Rejecting NOTIFY with invalid headers");
                        return Err(warp::reject::custom(InvalidUpnpHeaders));
                    }
                    let sid = sid.ok_or_else(|| warp::reject::custom(InvalidUpnpHeaders))?;

                    let seq = seq.and_then(|s| s.trim().parse::<u32>().ok());
                    let event_xml = String::from_utf8_lossy(&body).into_owned();

                    if router.route_event(sid.trim().to_string(), seq, event_xml).await {
                        Ok(warp::reply::with_status("", warp::http::StatusCode::OK))
                    } else {
                        Err(warp::reject::custom(UnknownSubscription))
                    }
                }
            },
        )
}

/// Check GENA headers: `SID` is required; `NT`/`NTS`, when both present,
/// must be `upnp:event` and `upnp:propchange`.
pub(crate) fn validate_upnp_headers(sid: Option<&str>, nt: Option<&str>, nts: Option<&str>) -> bool {
    match sid {
        Some(sid) if !sid.trim().is_empty() => {}
        _ => return false,
    }

    if let (Some(nt), Some(nts)) = (nt, nts) {
        if nt.trim() != "upnp:event" || nts.trim() != "upnp:propchange" {
            return false;
        }
    }

    true
}

#[derive(Debug)]
struct InvalidUpnpHeaders;

impl warp::reject::Reject for InvalidUpnpHeaders {}

#[derive(Debug)]
struct UnknownSubscription;

impl warp::reject::Reject for UnknownSubscription {}

async fn handle_rejection(
    err: warp::Rejection,
) -> Result<impl warp::Reply, std::convert::Infallible> {
    let (code, message) = if err.find::<UnknownSubscription>().is_some() {
        (warp::http::StatusCode::PRECONDITION_FAILED, "Unknown subscription")
    } else if err.find::<InvalidUpnpHeaders>().is_some() {
        (warp::http::StatusCode::BAD_REQUEST, "Invalid UPnP headers")
    } else if err.is_not_found() {
        (warp::http::StatusCode::NOT_FOUND, "Not found")
    } else {
        (warp::http::StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(warp::reply::with_status(message, code))
}
