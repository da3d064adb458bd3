//! UDN-keyed registry of known devices.
//!
//! Each UDN moves through `unknown -> holding -> live`. A `holding` entry
//! marks a description fetch in flight, so a second announcement for the same
//! UDN does not start another one. UDNs of embedded devices point at the
//! root device whose description lists them, so their announcements refresh
//! the root instead of fetching it again.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::device::Device;

#[derive(Debug)]
enum Entry {
    Holding,
    Live(Arc<Device>),
    /// An embedded device of the root device with this UDN
    Embedded(String),
}

/// Result of [`DeviceRegistry::observe`].
#[derive(Debug, Clone)]
pub enum Observation {
    /// The device (or the root device embedding it) is already live; the
    /// caller should mark it seen.
    Live(Arc<Device>),
    /// A fetch for this UDN is already running.
    Holding,
    /// The UDN was unknown and is now held by the caller, who must
    /// [`complete`](DeviceRegistry::complete) or
    /// [`release`](DeviceRegistry::release) it.
    Claimed,
}

/// Result of [`DeviceRegistry::complete`].
#[derive(Debug, Clone)]
pub enum Settled {
    /// The fetched device is now live.
    Added,
    /// The announced UDN is embedded in a device that was already live;
    /// the fetched copy was discarded.
    Joined(Arc<Device>),
    /// The announced UDN is embedded in a root device whose own fetch is
    /// still running; that fetch will make it live.
    Deferred,
    /// The announced UDN is no longer held (byebye while loading).
    Departed,
}

/// Devices keyed by UDN.
///
/// Every check-then-act runs under one lock, so concurrent announcements
/// for the same UDN claim it exactly once.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an announcement for `udn`.
    pub fn observe(&self, udn: &str) -> Observation {
        let mut entries = self.entries.lock();
        match entries.get(udn) {
            Some(Entry::Live(device)) => return Observation::Live(Arc::clone(device)),
            Some(Entry::Holding) => return Observation::Holding,
            Some(Entry::Embedded(root)) => match entries.get(root.as_str()) {
                Some(Entry::Live(device)) => return Observation::Live(Arc::clone(device)),
                Some(Entry::Holding) => return Observation::Holding,
                // The root is gone; treat the embedded UDN as unknown.
                _ => {}
            },
            None => {}
        }

        entries.insert(udn.to_string(), Entry::Holding);
        debug!(udn, "Holding UDN while fetching description");
        Observation::Claimed
    }

    /// Settle the `holding` entry for `announced` with a fetched device.
    ///
    /// `announced` is either the device's own UDN or the UDN of one of its
    /// embedded devices. The registry is left untouched when the entry is
    /// no longer held.
    pub fn complete(&self, announced: &str, device: Arc<Device>) -> Settled {
        let mut entries = self.entries.lock();
        if !matches!(entries.get(announced), Some(Entry::Holding)) {
            return Settled::Departed;
        }

        let root = device.udn().to_string();
        if announced != root {
            match entries.get(&root) {
                Some(Entry::Live(existing)) => {
                    let existing = Arc::clone(existing);
                    entries.insert(announced.to_string(), Entry::Embedded(root));
                    return Settled::Joined(existing);
                }
                Some(Entry::Holding) => {
                    entries.insert(announced.to_string(), Entry::Embedded(root));
                    return Settled::Deferred;
                }
                _ => {}
            }
        }

        for embedded in device.description().embedded_udns() {
            let vacant = match entries.get(&embedded) {
                None | Some(Entry::Embedded(_)) => true,
                Some(_) => embedded == announced,
            };
            if vacant {
                entries.insert(embedded, Entry::Embedded(root.clone()));
            }
        }
        entries.insert(root, Entry::Live(device));
        Settled::Added
    }

    /// Drop a `holding` entry after a failed fetch.
    pub fn release(&self, udn: &str) {
        let mut entries = self.entries.lock();
        if matches!(entries.get(udn), Some(Entry::Holding)) {
            entries.remove(udn);
        }
    }

    /// Remove `udn` in whatever state it is in.
    ///
    /// Returns the device when the entry was live; its embedded UDNs go with
    /// it. Removing an embedded UDN leaves the root device in place.
    pub fn remove(&self, udn: &str) -> Option<Arc<Device>> {
        let mut entries = self.entries.lock();
        match entries.remove(udn)? {
            Entry::Live(device) => {
                Self::drop_embedded(&mut entries, udn);
                Some(device)
            }
            Entry::Holding | Entry::Embedded(_) => None,
        }
    }

    /// Remove `device` only if it is still the live entry for its UDN.
    pub fn remove_device(&self, device: &Arc<Device>) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(device.udn()) {
            Some(Entry::Live(current)) if Arc::ptr_eq(current, device) => {
                entries.remove(device.udn());
                Self::drop_embedded(&mut entries, device.udn());
                true
            }
            _ => false,
        }
    }

    fn drop_embedded(entries: &mut HashMap<String, Entry>, root: &str) {
        entries.retain(|_, entry| !matches!(entry, Entry::Embedded(owner) if owner == root));
    }

    /// Live device for `udn`, resolving embedded UDNs to their root device.
    pub fn get(&self, udn: &str) -> Option<Arc<Device>> {
        let entries = self.entries.lock();
        let entry = match entries.get(udn)? {
            Entry::Embedded(root) => entries.get(root.as_str())?,
            entry => entry,
        };
        match entry {
            Entry::Live(device) => Some(Arc::clone(device)),
            _ => None,
        }
    }

    /// Snapshot of all live devices.
    pub fn live_devices(&self) -> Vec<Arc<Device>> {
        self.entries
            .lock()
            .values()
            .filter_map(|entry| match entry {
                Entry::Live(device) => Some(Arc::clone(device)),
                _ => None,
            })
            .collect()
    }

    /// Whether a description fetch for `udn` is in flight.
    pub fn is_holding(&self, udn: &str) -> bool {
        matches!(self.entries.lock().get(udn), Some(Entry::Holding))
    }

    /// Number of entries, held and embedded ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when no device is live or being fetched.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::{test_bridge, test_device};

    #[test]
    fn test_observe_claims_once() {
        let registry = DeviceRegistry::new();

        assert!(matches!(registry.observe("uuid:a"), Observation::Claimed));
        assert!(matches!(registry.observe("uuid:a"), Observation::Holding));
        assert!(registry.is_holding("uuid:a"));
        assert_eq!(registry.len(), 1);
        assert!(registry.live_devices().is_empty());
    }

    #[test]
    fn test_complete_makes_device_live() {
        let registry = DeviceRegistry::new();
        registry.observe("uuid:a");

        let device = test_device("uuid:a");
        assert!(matches!(registry.complete("uuid:a", Arc::clone(&device)), Settled::Added));

        match registry.observe("uuid:a") {
            Observation::Live(found) => assert!(Arc::ptr_eq(&found, &device)),
            other => panic!("expected live device, got {other:?}"),
        }
        assert_eq!(registry.live_devices().len(), 1);
    }

    #[test]
    fn test_complete_without_hold_is_refused() {
        let registry = DeviceRegistry::new();
        assert!(matches!(registry.complete("uuid:a", test_device("uuid:a")), Settled::Departed));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_release_only_drops_holding() {
        let registry = DeviceRegistry::new();
        registry.observe("uuid:a");
        registry.release("uuid:a");
        assert!(matches!(registry.observe("uuid:a"), Observation::Claimed));

        registry.complete("uuid:a", test_device("uuid:a"));
        registry.release("uuid:a");
        assert!(registry.get("uuid:a").is_some());
    }

    #[test]
    fn test_remove_device_checks_identity() {
        let registry = DeviceRegistry::new();
        registry.observe("uuid:a");
        let first = test_device("uuid:a");
        registry.complete("uuid:a", Arc::clone(&first));

        let stale = test_device("uuid:a");
        assert!(!registry.remove_device(&stale));
        assert!(registry.remove_device(&first));
        assert!(registry.get("uuid:a").is_none());
    }

    #[test]
    fn test_remove_reports_live_device_only() {
        let registry = DeviceRegistry::new();
        registry.observe("uuid:held");
        assert!(registry.remove("uuid:held").is_none());
        assert!(registry.is_empty());

        registry.observe("uuid:a");
        registry.complete("uuid:a", test_device("uuid:a"));
        assert!(registry.remove("uuid:a").is_some());
        assert!(registry.remove("uuid:a").is_none());
    }

    #[test]
    fn test_embedded_announcement_makes_root_live() {
        let registry = DeviceRegistry::new();
        registry.observe("uuid:child");

        let bridge = test_bridge("uuid:bridge", "uuid:child");
        assert!(matches!(registry.complete("uuid:child", Arc::clone(&bridge)), Settled::Added));

        assert!(Arc::ptr_eq(&registry.get("uuid:bridge").unwrap(), &bridge));
        assert!(Arc::ptr_eq(&registry.get("uuid:child").unwrap(), &bridge));
        assert!(matches!(registry.observe("uuid:child"), Observation::Live(d) if Arc::ptr_eq(&d, &bridge)));
        assert_eq!(registry.live_devices().len(), 1);
    }

    #[test]
    fn test_embedded_announcement_joins_live_root() {
        let registry = DeviceRegistry::new();
        registry.observe("uuid:bridge");
        let bridge = test_bridge("uuid:bridge", "uuid:other");
        registry.complete("uuid:bridge", Arc::clone(&bridge));

        // A child the first description did not list.
        registry.observe("uuid:late");
        let copy = test_bridge("uuid:bridge", "uuid:late");
        match registry.complete("uuid:late", copy) {
            Settled::Joined(existing) => assert!(Arc::ptr_eq(&existing, &bridge)),
            other => panic!("expected Joined, got {other:?}"),
        }
        assert!(Arc::ptr_eq(&registry.get("uuid:late").unwrap(), &bridge));
        assert_eq!(registry.live_devices().len(), 1);
    }

    #[test]
    fn test_embedded_waits_for_root_fetch() {
        let registry = DeviceRegistry::new();
        registry.observe("uuid:bridge");
        registry.observe("uuid:child");

        let early = test_bridge("uuid:bridge", "uuid:child");
        assert!(matches!(registry.complete("uuid:child", early), Settled::Deferred));
        assert!(matches!(registry.observe("uuid:child"), Observation::Holding));

        let bridge = test_bridge("uuid:bridge", "uuid:child");
        assert!(matches!(registry.complete("uuid:bridge", Arc::clone(&bridge)), Settled::Added));
        assert!(Arc::ptr_eq(&registry.get("uuid:child").unwrap(), &bridge));
    }

    #[test]
    fn test_removing_root_drops_embedded_udns() {
        let registry = DeviceRegistry::new();
        registry.observe("uuid:bridge");
        let bridge = test_bridge("uuid:bridge", "uuid:child");
        registry.complete("uuid:bridge", Arc::clone(&bridge));
        assert_eq!(registry.len(), 2);

        // Losing only the child leaves the root alone.
        assert!(registry.remove("uuid:child").is_none());
        assert!(registry.get("uuid:bridge").is_some());

        registry.observe("uuid:child");
        assert!(registry.remove_device(&bridge));
        assert!(matches!(registry.observe("uuid:child"), Observation::Holding));
        registry.release("uuid:child");
        assert!(registry.is_empty());
    }
}
