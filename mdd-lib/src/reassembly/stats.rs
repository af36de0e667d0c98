use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Section;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStats {
    /// Total payload bytes committed.
    pub bytes: u64,
    /// Most recent transfer file open time, UTC seconds.
    pub last: i64,
}

/// Per node, per device byte and time statistics.
///
/// # Example
/// ```
/// use mdd::reassembly::{Section, Stats};
///
/// let mut stats = Stats::default();
/// stats.update(&Section::new(58, 1, 0, 99, "unit_364", 1_374_773_264));
/// assert_eq!(stats.get(58, "unit_364").unwrap().bytes, 100);
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    nodes: BTreeMap<u32, BTreeMap<String, DeviceStats>>,
}

impl Stats {
    /// Accumulate the byte count and keep the latest timestamp for the section's
    /// `(node, device_id)`.
    pub fn update(&mut self, section: &Section) {
        let entry = self
            .nodes
            .entry(section.node)
            .or_default()
            .entry(section.device_id.clone())
            .or_default();
        entry.bytes = entry.bytes.saturating_add(section.num_bytes());
        entry.last = entry.last.max(section.timestamp);
    }

    #[must_use]
    pub fn get(&self, node: u32, device_id: &str) -> Option<&DeviceStats> {
        self.nodes.get(&node)?.get(device_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = u32> + '_ {
        self.nodes.keys().copied()
    }

    /// All `(node, device_id, stats)` entries ordered by node then device.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str, &DeviceStats)> + '_ {
        self.nodes.iter().flat_map(|(node, devices)| {
            devices
                .iter()
                .map(move |(device, stats)| (*node, device.as_str(), stats))
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_per_node_and_device() {
        let mut stats = Stats::default();
        stats.update(&Section::new(58, 1, 0, 99, "unit_364", 20));
        stats.update(&Section::new(58, 2, 0, 9, "unit_364", 10));
        stats.update(&Section::new(58, 1, 100, 199, "unit_363", 5));
        stats.update(&Section::new(59, 1, 0, 0, "unit_363", 5));

        let got = stats.get(58, "unit_364").unwrap();
        assert_eq!(got.bytes, 110);
        assert_eq!(got.last, 20, "should keep the max timestamp");
        assert_eq!(stats.get(58, "unit_363").unwrap().bytes, 100);
        assert_eq!(stats.get(59, "unit_363").unwrap().bytes, 1);
        assert!(stats.get(60, "unit_363").is_none());
        assert_eq!(stats.nodes().collect::<Vec<_>>(), vec![58, 59]);
        assert_eq!(stats.iter().count(), 3);
    }

    #[test]
    fn byte_count_saturates() {
        let mut stats = Stats::default();
        stats.update(&Section::new(58, 1, 0, u64::MAX - 1, "unit_364", 0));
        stats.update(&Section::new(58, 1, 0, 99, "unit_364", 0));

        assert_eq!(stats.get(58, "unit_364").unwrap().bytes, u64::MAX);
    }

    #[test]
    fn json_round_trip_keeps_integer_node_keys() {
        let mut stats = Stats::default();
        stats.update(&Section::new(58, 1, 0, 99, "unit_364", 20));

        let dat = serde_json::to_string(&stats).unwrap();
        let got: Stats = serde_json::from_str(&dat).unwrap();

        assert_eq!(got, stats);
    }
}
