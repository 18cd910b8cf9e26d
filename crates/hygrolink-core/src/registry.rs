//! Deduplicated, indexed set of discovered devices.
//!
//! The registry turns an unbounded, unordered stream of advertisements into a
//! stable numbered list the operator can pick from. The first advertisement
//! for an address assigns the next index and fixes the display name; later
//! advertisements for the same address change nothing.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

use hygrolink_types::BleAddress;

/// Name used when an advertisement carries no (or a blank) local name.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// A device as first seen during scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    /// Operator-facing index, starting at 1 in discovery order.
    pub index: u32,
    /// Display name fixed at first sighting.
    pub name: String,
    /// Bluetooth address.
    pub address: BleAddress,
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_address: HashMap<BleAddress, DeviceRecord>,
    by_index: BTreeMap<u32, BleAddress>,
    next_index: u32,
}

/// Thread-safe registry of discovered devices.
///
/// Mutation happens from a single writer (the scan session's event task);
/// lookups may happen concurrently from the orchestration side.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    inner: RwLock<RegistryInner>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an advertisement.
    ///
    /// Returns the new record if `address` has not been seen before, or
    /// `None` (without touching anything) if it has.
    pub fn record_advertisement(
        &self,
        address: BleAddress,
        name: Option<&str>,
    ) -> Option<DeviceRecord> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.by_address.contains_key(&address) {
            return None;
        }

        inner.next_index += 1;
        let record = DeviceRecord {
            index: inner.next_index,
            name: normalize_name(name),
            address,
        };
        inner.by_index.insert(record.index, address);
        inner.by_address.insert(address, record.clone());
        Some(record)
    }

    /// Look up the address assigned to `index`.
    pub fn resolve(&self, index: u32) -> Option<BleAddress> {
        self.read().by_index.get(&index).copied()
    }

    /// Look up the record for `address`.
    pub fn get(&self, address: BleAddress) -> Option<DeviceRecord> {
        self.read().by_address.get(&address).cloned()
    }

    /// Look up the record assigned to `index`.
    pub fn record(&self, index: u32) -> Option<DeviceRecord> {
        let inner = self.read();
        inner
            .by_index
            .get(&index)
            .and_then(|address| inner.by_address.get(address))
            .cloned()
    }

    /// All records, ordered by index.
    pub fn devices(&self) -> Vec<DeviceRecord> {
        let inner = self.read();
        inner
            .by_index
            .values()
            .filter_map(|address| inner.by_address.get(address))
            .cloned()
            .collect()
    }

    /// Number of distinct devices seen.
    pub fn len(&self) -> usize {
        self.read().by_address.len()
    }

    /// Whether no device has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn normalize_name(name: Option<&str>) -> String {
    match name.map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => UNKNOWN_DEVICE_NAME.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(raw: u64) -> BleAddress {
        BleAddress::new(raw)
    }

    #[test]
    fn test_indices_start_at_one() {
        let registry = DeviceRegistry::new();
        let first = registry.record_advertisement(addr(0xA1), Some("Thermo")).unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(first.name, "Thermo");
        let second = registry.record_advertisement(addr(0xB2), None).unwrap();
        assert_eq!(second.index, 2);
    }

    #[test]
    fn test_duplicate_advertisement_is_ignored() {
        let registry = DeviceRegistry::new();
        registry.record_advertisement(addr(0xA1), Some("Thermo"));
        assert!(registry.record_advertisement(addr(0xA1), Some("Thermo")).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_name_fixed_at_first_sighting() {
        let registry = DeviceRegistry::new();
        registry.record_advertisement(addr(0xA1), None);
        registry.record_advertisement(addr(0xA1), Some("Late Name"));
        let record = registry.get(addr(0xA1)).unwrap();
        assert_eq!(record.name, UNKNOWN_DEVICE_NAME);
        assert_eq!(record.index, 1);
    }

    #[test]
    fn test_blank_names_normalized() {
        let registry = DeviceRegistry::new();
        let record = registry.record_advertisement(addr(1), Some("   ")).unwrap();
        assert_eq!(record.name, UNKNOWN_DEVICE_NAME);
        let record = registry.record_advertisement(addr(2), Some("")).unwrap();
        assert_eq!(record.name, UNKNOWN_DEVICE_NAME);
        let record = registry.record_advertisement(addr(3), Some(" Probe ")).unwrap();
        assert_eq!(record.name, "Probe");
    }

    #[test]
    fn test_reappearing_device_keeps_index() {
        let registry = DeviceRegistry::new();
        registry.record_advertisement(addr(1), Some("a"));
        registry.record_advertisement(addr(2), Some("b"));
        registry.record_advertisement(addr(1), Some("a"));
        let third = registry.record_advertisement(addr(3), Some("c")).unwrap();
        assert_eq!(third.index, 3);
        assert_eq!(registry.resolve(1), Some(addr(1)));
    }

    #[test]
    fn test_resolve_unknown_index() {
        let registry = DeviceRegistry::new();
        assert_eq!(registry.resolve(0), None);
        assert_eq!(registry.resolve(1), None);
        registry.record_advertisement(addr(1), None);
        assert_eq!(registry.resolve(2), None);
        assert!(registry.record(2).is_none());
    }

    #[test]
    fn test_devices_sorted_by_index() {
        let registry = DeviceRegistry::new();
        for raw in [0xF0, 0x01, 0x80] {
            registry.record_advertisement(addr(raw), None);
        }
        let indices: Vec<u32> = registry.devices().iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(registry.devices()[0].address, addr(0xF0));
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(DeviceRegistry::new());
        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for raw in 0..500u64 {
                    registry.record_advertisement(addr(raw % 100), None);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for index in 1..=100 {
                        if let Some(address) = registry.resolve(index) {
                            assert_eq!(registry.get(address).map(|r| r.index), Some(index));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(registry.len(), 100);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Indices are consecutive from 1, one per distinct address, in first-seen order.
        #[test]
        fn indices_are_consecutive(raw_addresses in proptest::collection::vec(0u64..32, 0..200)) {
            let registry = DeviceRegistry::new();
            let mut first_seen: Vec<u64> = Vec::new();
            let mut assigned = Vec::new();

            for raw in &raw_addresses {
                let result = registry.record_advertisement(BleAddress::new(*raw), None);
                if first_seen.contains(raw) {
                    prop_assert!(result.is_none());
                } else {
                    first_seen.push(*raw);
                    assigned.push(result.unwrap().index);
                }
            }

            let expected: Vec<u32> = (1..=first_seen.len() as u32).collect();
            prop_assert_eq!(assigned, expected);

            for (i, raw) in first_seen.iter().enumerate() {
                prop_assert_eq!(registry.resolve(i as u32 + 1), Some(BleAddress::new(*raw)));
            }
            prop_assert_eq!(registry.resolve(first_seen.len() as u32 + 1), None);
        }

        /// Later advertisements never change a stored name or index.
        #[test]
        fn first_sighting_wins(names in proptest::collection::vec(proptest::option::of("[a-z]{0,6}"), 1..20)) {
            let registry = DeviceRegistry::new();
            let address = BleAddress::new(42);
            let first = registry.record_advertisement(address, names[0].as_deref()).unwrap();
            for name in &names[1..] {
                prop_assert!(registry.record_advertisement(address, name.as_deref()).is_none());
            }
            prop_assert_eq!(registry.get(address), Some(first));
        }
    }
}
