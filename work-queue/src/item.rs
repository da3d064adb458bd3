//! Work items and the completion handles handed to running items.

use std::fmt;

use tracing::warn;

use crate::queue::WorkQueue;

/// Body of a work item.
///
/// Invoked exactly once, synchronously, at the moment the item is promoted
/// into a free slot. It receives the owning queue and a [`Completion`] that
/// must be finished once the item's (possibly asynchronous) work is done.
pub type RunFn = Box<dyn FnOnce(&WorkQueue, Completion) + Send + 'static>;

/// Internal sequence number identifying one enqueued item.
///
/// Tickets are assigned by the queue and never reused, so they stay unique
/// even when caller-supplied ids collide or are absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub(crate) u64);

impl Ticket {
    /// Raw sequence number.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One unit of outbound work.
pub struct WorkItem {
    pub(crate) id: Option<String>,
    pub(crate) run: RunFn,
}

impl WorkItem {
    /// Create an anonymous work item.
    pub fn new<F>(run: F) -> Self
    where
        F: FnOnce(&WorkQueue, Completion) + Send + 'static,
    {
        Self {
            id: None,
            run: Box::new(run),
        }
    }

    /// Create a work item that replaces any still-pending item with the same id.
    pub fn with_id<F>(id: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(&WorkQueue, Completion) + Send + 'static,
    {
        Self {
            id: Some(id.into()),
            run: Box::new(run),
        }
    }

    /// Caller-supplied id, if any.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Handle proving that an item is running.
///
/// `finish` consumes the handle, so an item can only release its slot once.
/// Dropping the handle without finishing leaves the slot occupied; the queue
/// cannot tell a slow item from an abandoned one.
#[must_use = "a running item keeps its slot until the completion is finished"]
pub struct Completion {
    queue: WorkQueue,
    ticket: Ticket,
    id: Option<String>,
    finished: bool,
}

impl Completion {
    pub(crate) fn new(queue: WorkQueue, ticket: Ticket, id: Option<String>) -> Self {
        Self {
            queue,
            ticket,
            id,
            finished: false,
        }
    }

    /// Ticket of the running item.
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Caller-supplied id of the running item.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Release the slot and let the queue promote the next pending item.
    pub fn finish(mut self) {
        self.finished = true;
        self.queue.finish(self.ticket);
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("queue", &self.queue.name())
            .field("ticket", &self.ticket)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                queue = %self.queue.name(),
                ticket = %self.ticket,
                id = ?self.id,
                "completion dropped without finish, slot stays occupied"
            );
        }
    }
}
