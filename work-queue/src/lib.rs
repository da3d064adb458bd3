//! # work-queue
//!
//! A small FIFO executor that drivers use to keep outbound requests to one
//! device (or one API) from overlapping.
//!
//! Every outbound call is wrapped in a [`WorkItem`] and enqueued. At most
//! `concurrency` items are *current* at any moment; the rest wait in *pending*
//! order. A current item keeps its slot until its [`Completion`] is finished,
//! which usually happens from the async task that talks to the device.
//!
//! ```
//! use work_queue::{QueueConfig, WorkItem, WorkQueue};
//!
//! let queue = WorkQueue::new("rest", QueueConfig::new().with_concurrency(2)).unwrap();
//!
//! // Items with the same id replace each other while still pending, so only
//! // the latest "set brightness" request for a lamp is sent.
//! queue.enqueue(WorkItem::with_id("lamp-1/brightness", |_queue, done| {
//!     done.finish();
//! }));
//! ```
//!
//! ## Sharp edge
//!
//! An item whose completion is never finished holds its slot forever. With a
//! concurrency of one this stalls the whole queue. This is deliberate: the
//! queue cannot distinguish a slow device from a lost completion. Spawn a
//! watchdog ([`WorkQueue::spawn_watchdog`]) to log or release such slots.

mod config;
mod error;
mod item;
mod queue;
mod registry;

pub use config::{QueueConfig, DEFAULT_DEPTH_WARNING};
pub use error::{QueueError, Result};
pub use item::{Completion, RunFn, Ticket, WorkItem};
pub use queue::{StalledItem, WatchdogPolicy, WorkQueue};
pub use registry::QueueRegistry;
