//! Background task that drives an [`EventScheduler`] with a single wake timer.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Result, ScheduleError};
use crate::request::{local_now, ScheduleRequest};
use crate::scheduler::{EventScheduler, FiredEvent, ScheduledEvent};

/// Source of wall-clock time for the service.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// The local system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        local_now()
    }
}

/// Wall time derived from tokio's monotonic clock.
///
/// Starts at a fixed instant and advances with `tokio::time`, so it follows
/// paused and advanced time in tests.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin_wall: DateTime<FixedOffset>,
    origin: Instant,
}

impl TokioClock {
    pub fn starting_at(origin_wall: DateTime<FixedOffset>) -> Self {
        Self {
            origin_wall,
            origin: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<FixedOffset> {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        let elapsed = chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero());
        self.origin_wall + elapsed
    }
}

enum Command {
    Schedule(ScheduleRequest, oneshot::Sender<Result<DateTime<FixedOffset>>>),
    Cancel(String, oneshot::Sender<bool>),
    Active(oneshot::Sender<Vec<ScheduledEvent>>),
}

/// Entry point for running the scheduler as a tokio task.
pub struct SchedulerService;

impl SchedulerService {
    /// Spawn the scheduler on the system clock.
    pub fn spawn<F>(on_fire: F) -> SchedulerHandle
    where
        F: FnMut(FiredEvent) + Send + 'static,
    {
        Self::spawn_with_clock(Arc::new(SystemClock), on_fire)
    }

    /// Spawn the scheduler on a custom clock.
    ///
    /// At most one wake timer exists at any time: every command and every
    /// wake recomputes the deadline from the earliest active event.
    pub fn spawn_with_clock<F>(clock: Arc<dyn Clock>, mut on_fire: F) -> SchedulerHandle
    where
        F: FnMut(FiredEvent) + Send + 'static,
    {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<Command>();

        let task = tokio::spawn(async move {
            let mut scheduler = EventScheduler::new();
            let mut deadline: Option<Instant> = None;

            loop {
                tokio::select! {
                    command = command_rx.recv() => {
                        let Some(command) = command else {
                            debug!("Scheduler handle dropped, stopping");
                            break;
                        };
                        match command {
                            Command::Schedule(request, reply) => {
                                let result = scheduler.schedule_at(request, clock.now());
                                let _ = reply.send(result);
                            }
                            Command::Cancel(id, reply) => {
                                let _ = reply.send(scheduler.cancel(&id));
                            }
                            Command::Active(reply) => {
                                let _ = reply.send(scheduler.active().to_vec());
                                continue;
                            }
                        }
                    }
                    _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
                }

                deadline = scheduler
                    .tick_at(clock.now(), &mut on_fire)
                    .map(|delay| Instant::now() + delay);
                if let Some(at) = deadline {
                    debug!(wake_in = ?at.saturating_duration_since(Instant::now()), "Armed wake timer");
                }
            }

            info!("Scheduler service stopped");
        });

        SchedulerHandle { command_tx, task }
    }
}

/// Handle to a running scheduler service.
///
/// Dropping every handle stops the service.
pub struct SchedulerHandle {
    command_tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Schedule an event; resolves to the accepted fire time.
    pub async fn schedule(&self, request: ScheduleRequest) -> Result<DateTime<FixedOffset>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Schedule(request, reply_tx))
            .map_err(|_| ScheduleError::ServiceStopped)?;
        reply_rx.await.map_err(|_| ScheduleError::ServiceStopped)?
    }

    /// Cancel the active event with `id`.
    pub async fn cancel(&self, id: impl Into<String>) -> Result<bool> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Cancel(id.into(), reply_tx))
            .map_err(|_| ScheduleError::ServiceStopped)?;
        reply_rx.await.map_err(|_| ScheduleError::ServiceStopped)
    }

    /// Snapshot of active events in fire order.
    pub async fn active(&self) -> Result<Vec<ScheduledEvent>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Active(reply_tx))
            .map_err(|_| ScheduleError::ServiceStopped)?;
        reply_rx.await.map_err(|_| ScheduleError::ServiceStopped)
    }

    /// Stop the service and wait for its task to exit.
    pub async fn shutdown(self) {
        let Self { command_tx, task } = self;
        drop(command_tx);
        let _ = task.await;
    }
}
