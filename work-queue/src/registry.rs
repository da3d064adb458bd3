//! Named queues shared between drivers of the same family.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::QueueConfig;
use crate::error::Result;
use crate::queue::WorkQueue;

/// Process-wide lookup of queues by name.
///
/// Cloning the registry shares the underlying map.
#[derive(Clone, Default)]
pub struct QueueRegistry {
    queues: Arc<Mutex<HashMap<String, WorkQueue>>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the queue called `name`, creating it with `config` if needed.
    ///
    /// The configuration of an existing queue is kept; a differing `config`
    /// is ignored.
    pub fn get_or_create(&self, name: &str, config: QueueConfig) -> Result<WorkQueue> {
        let mut queues = self.queues.lock();
        if let Some(existing) = queues.get(name) {
            if existing.concurrency() != config.concurrency {
                debug!(
                    "Queue {} already exists with concurrency {}, ignoring requested {}",
                    name,
                    existing.concurrency(),
                    config.concurrency
                );
            }
            return Ok(existing.clone());
        }

        let queue = WorkQueue::new(name, config)?;
        queues.insert(name.to_string(), queue.clone());
        debug!("Created queue {}", name);
        Ok(queue)
    }

    /// Look up a queue by name.
    pub fn get(&self, name: &str) -> Option<WorkQueue> {
        self.queues.lock().get(name).cloned()
    }

    /// Forget a queue. Clones held elsewhere keep working.
    pub fn remove(&self, name: &str) -> Option<WorkQueue> {
        self.queues.lock().remove(name)
    }

    /// Names of every registered queue.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.lock().keys().cloned().collect();
        names.sort();
        names
    }
}
