//! The work queue itself.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::QueueConfig;
use crate::error::Result;
use crate::item::{Completion, RunFn, Ticket, WorkItem};

/// What the watchdog does with an item that has run for too long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogPolicy {
    /// Only log the stalled item
    Log,
    /// Log and release the slot as if the item had finished
    Release,
}

/// A current item that has been running longer than a threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledItem {
    pub ticket: Ticket,
    pub id: Option<String>,
    pub running_for: Duration,
}

struct PendingItem {
    ticket: Ticket,
    id: Option<String>,
    run: RunFn,
}

struct RunningItem {
    ticket: Ticket,
    id: Option<String>,
    started_at: Instant,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingItem>,
    current: Vec<RunningItem>,
    paused: bool,
    next_ticket: u64,
    /// Set while some call is inside the promotion loop.
    promoting: bool,
}

/// Clears `promoting` if an item body unwinds out of the promotion loop.
struct PromotionGuard<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl Drop for PromotionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.state.lock().promoting = false;
        }
    }
}

struct Shared {
    name: String,
    config: QueueConfig,
    state: Mutex<QueueState>,
}

/// Bounded-concurrency FIFO executor.
///
/// Items are promoted from `pending` to `current` in enqueue order while fewer
/// than `concurrency` items are current. Promotion invokes the item's body
/// synchronously, so `enqueue`, `resume` and `finish` may run item bodies
/// before they return. The state lock is never held while a body runs, which
/// lets bodies enqueue or finish re-entrantly.
///
/// An item that never finishes its [`Completion`] keeps its slot forever. Use
/// [`WorkQueue::spawn_watchdog`] to detect or release such slots.
///
/// # Example
///
/// ```
/// use work_queue::{WorkItem, WorkQueue};
///
/// let queue = WorkQueue::serial("hue");
/// queue.enqueue(WorkItem::new(|_queue, done| {
///     // talk to the device, then release the slot
///     done.finish();
/// }));
/// assert_eq!(queue.current_len(), 0);
/// ```
#[derive(Clone)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

impl WorkQueue {
    /// Create a queue with the given configuration.
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config,
                state: Mutex::new(QueueState::default()),
            }),
        })
    }

    /// Create a queue running one item at a time.
    pub fn serial(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config: QueueConfig::default(),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Name given at construction, used in log lines.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Maximum number of items current at once.
    pub fn concurrency(&self) -> usize {
        self.shared.config.concurrency
    }

    /// Add an item to the queue and promote what fits.
    ///
    /// If the item carries an id and a pending item with the same id exists,
    /// the new item takes its place in line instead of being appended. Items
    /// that are already current are never replaced.
    pub fn enqueue(&self, item: WorkItem) -> Ticket {
        let WorkItem { id, run } = item;
        let ticket = {
            let mut state = self.shared.state.lock();
            let ticket = Ticket(state.next_ticket);
            state.next_ticket += 1;

            let replaced = id.as_ref().and_then(|id| {
                state
                    .pending
                    .iter()
                    .position(|p| p.id.as_deref() == Some(id.as_str()))
            });

            match replaced {
                Some(index) => {
                    let old = std::mem::replace(
                        &mut state.pending[index],
                        PendingItem { ticket, id, run },
                    );
                    debug!(
                        "Queue {}: item {} replaces pending {} ({:?})",
                        self.shared.name, ticket, old.ticket, old.id
                    );
                }
                None => {
                    state.pending.push_back(PendingItem { ticket, id, run });
                }
            }

            if state.pending.len() > self.shared.config.depth_warning {
                warn!(
                    "Queue {} is backing up: {} pending, {} current",
                    self.shared.name,
                    state.pending.len(),
                    state.current.len()
                );
            }

            ticket
        };

        self.promote();
        ticket
    }

    /// Release the slot held by `ticket`.
    ///
    /// Unknown tickets (never promoted, already finished, or released by the
    /// watchdog) are ignored apart from a warning.
    pub fn finish(&self, ticket: Ticket) {
        let removed = {
            let mut state = self.shared.state.lock();
            match state.current.iter().position(|r| r.ticket == ticket) {
                Some(index) => {
                    state.current.remove(index);
                    true
                }
                None => false,
            }
        };

        if !removed {
            warn!(
                "Queue {}: finish called for {} which is not current",
                self.shared.name, ticket
            );
            return;
        }

        trace!("Queue {}: finished {}", self.shared.name, ticket);
        self.promote();
    }

    /// Stop promoting pending items. Current items keep running.
    pub fn pause(&self) {
        self.shared.state.lock().paused = true;
        debug!("Queue {} paused", self.shared.name);
    }

    /// Resume promotion and immediately fill free slots.
    pub fn resume(&self) {
        self.shared.state.lock().paused = false;
        debug!("Queue {} resumed", self.shared.name);
        self.promote();
    }

    /// Whether promotion is currently held back.
    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// Number of items waiting for a slot.
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Number of items holding a slot.
    pub fn current_len(&self) -> usize {
        self.shared.state.lock().current.len()
    }

    /// Ids of the pending items in queue order (`None` for anonymous items).
    pub fn pending_ids(&self) -> Vec<Option<String>> {
        self.shared
            .state
            .lock()
            .pending
            .iter()
            .map(|p| p.id.clone())
            .collect()
    }

    /// Tickets of the current items in promotion order.
    pub fn current_tickets(&self) -> Vec<Ticket> {
        self.shared
            .state
            .lock()
            .current
            .iter()
            .map(|r| r.ticket)
            .collect()
    }

    /// Current items that have been running for at least `older_than`.
    pub fn stalled(&self, older_than: Duration) -> Vec<StalledItem> {
        let now = Instant::now();
        self.shared
            .state
            .lock()
            .current
            .iter()
            .filter_map(|r| {
                let running_for = now.saturating_duration_since(r.started_at);
                (running_for >= older_than).then(|| StalledItem {
                    ticket: r.ticket,
                    id: r.id.clone(),
                    running_for,
                })
            })
            .collect()
    }

    /// Periodically look for items that have been current for `timeout` or longer.
    ///
    /// The task holds only a weak reference and exits once every clone of the
    /// queue has been dropped. Must be called from within a tokio runtime.
    pub fn spawn_watchdog(
        &self,
        period: Duration,
        timeout: Duration,
        policy: WatchdogPolicy,
    ) -> JoinHandle<()> {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let queue = WorkQueue { shared };

                for stalled in queue.stalled(timeout) {
                    warn!(
                        "Queue {}: item {} ({:?}) has been running for {:?}",
                        queue.name(),
                        stalled.ticket,
                        stalled.id,
                        stalled.running_for
                    );
                    if policy == WatchdogPolicy::Release {
                        queue.finish(stalled.ticket);
                    }
                }
            }
        })
    }

    /// Move pending items into free slots, running each as it is promoted.
    ///
    /// Only the outermost call loops. A `finish` or `enqueue` issued from a
    /// body while the loop is running just updates the state, and the loop
    /// picks the change up on its next pass, so a long backlog of items that
    /// finish synchronously drains without growing the stack.
    fn promote(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.promoting {
                return;
            }
            state.promoting = true;
        }
        let mut guard = PromotionGuard {
            shared: &self.shared,
            armed: true,
        };

        loop {
            let next = {
                let mut state = self.shared.state.lock();
                let next = if state.paused || state.current.len() >= self.shared.config.concurrency {
                    None
                } else {
                    state.pending.pop_front()
                };
                let Some(item) = next else {
                    state.promoting = false;
                    guard.armed = false;
                    return;
                };
                state.current.push(RunningItem {
                    ticket: item.ticket,
                    id: item.id.clone(),
                    started_at: Instant::now(),
                });
                item
            };

            trace!(
                "Queue {}: running {} ({:?})",
                self.shared.name, next.ticket, next.id
            );
            let completion = Completion::new(self.clone(), next.ticket, next.id);
            (next.run)(self, completion);
        }
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("WorkQueue")
            .field("name", &self.shared.name)
            .field("concurrency", &self.shared.config.concurrency)
            .field("pending", &state.pending.len())
            .field("current", &state.current.len())
            .field("paused", &state.paused)
            .finish()
    }
}
