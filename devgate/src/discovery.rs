//! Periodic search-and-scrub loop keeping the device registry fresh.

use std::time::Duration;

use control_point::ControlPoint;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};

/// Background task that searches every `search_interval` and forgets
/// devices silent for longer than `scrub_max_age`.
///
/// Each search makes live devices answer, which refreshes their last-seen
/// time, so only devices that miss several consecutive searches are
/// scrubbed. The first search runs immediately.
pub struct DiscoveryLoop {
    background_task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl DiscoveryLoop {
    pub fn spawn(control_point: ControlPoint, search_interval: Duration, scrub_max_age: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let background_task = tokio::spawn(Self::run(
            control_point,
            search_interval,
            scrub_max_age,
            shutdown_rx,
        ));

        Self {
            background_task: Some(background_task),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    async fn run(
        control_point: ControlPoint,
        search_interval: Duration,
        scrub_max_age: Duration,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut ticker = interval(search_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            search_interval_secs = search_interval.as_secs(),
            scrub_max_age_secs = scrub_max_age.as_secs(),
            "Discovery loop started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    match control_point.search().await {
                        Ok(responses) => debug!(responses, "Discovery search sent"),
                        Err(e) => warn!(error = %e, "Discovery search failed"),
                    }

                    let dropped = control_point.scrub(scrub_max_age).await;
                    if !dropped.is_empty() {
                        info!(count = dropped.len(), udns = ?dropped, "Scrubbed stale devices");
                    }
                }
            }
        }
        debug!("Discovery loop stopped");
    }

    /// Stop the loop, waiting up to five seconds for an in-flight search.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        let Some(task) = self.background_task.take() else {
            return Ok(());
        };
        match timeout(Duration::from_secs(5), task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(GatewayError::Shutdown(format!("Discovery loop panicked: {e}"))),
            Err(_) => Err(GatewayError::Shutdown(
                "Discovery loop shutdown timed out after 5 seconds".to_string(),
            )),
        }
    }
}

impl Drop for DiscoveryLoop {
    fn drop(&mut self) {
        if let Some(task) = self.background_task.take() {
            task.abort();
        }
    }
}
