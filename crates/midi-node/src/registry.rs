//! Receiver-side bookkeeping: discovered remote devices, RTT samples,
//! outstanding Hello beacons, and the active routing table.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Cap on the RTT ring per remote IP.
pub const RTT_RING_CAPACITY: usize = 100;

/// How long a pending-hello entry survives without a matching reply.
pub const PENDING_HELLO_TTL: Duration = Duration::from_secs(300);

/// Hostname (or IP, when the remote's hostname is "unknown") -> device names
/// it has advertised. Grows monotonically within a session until explicitly
/// cleared.
#[derive(Debug, Default)]
pub struct RemoteDeviceRegistry {
    devices: HashMap<String, HashSet<String>>,
}

impl RemoteDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `device_names` under `host`. Returns true if anything new was
    /// added, so the caller knows whether to re-publish the registry.
    pub fn merge(&mut self, host: &str, device_names: &[String]) -> bool {
        let entry = self.devices.entry(host.to_string()).or_default();
        let mut changed = false;
        for name in device_names {
            changed |= entry.insert(name.clone());
        }
        changed
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn snapshot(&self) -> HashMap<String, HashSet<String>> {
        self.devices.clone()
    }
}

/// Remote IP -> ring of the last [`RTT_RING_CAPACITY`] round-trip samples,
/// in seconds.
#[derive(Debug, Default)]
pub struct RttRegistry {
    samples: HashMap<Ipv4Addr, VecDeque<f64>>,
}

impl RttRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, ip: Ipv4Addr, rtt_seconds: f64) {
        let ring = self.samples.entry(ip).or_default();
        ring.push_back(rtt_seconds);
        while ring.len() > RTT_RING_CAPACITY {
            ring.pop_front();
        }
    }

    pub fn snapshot(&self) -> HashMap<Ipv4Addr, VecDeque<f64>> {
        self.samples.clone()
    }
}

/// Hello id -> the instant the sender handed that beacon off for
/// transmission. Used to compute RTT once the matching reply arrives, and
/// evicted after [`PENDING_HELLO_TTL`].
#[derive(Debug, Default)]
pub struct PendingHelloLedger {
    sent_at: HashMap<u32, Instant>,
}

impl PendingHelloLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u32, sent_at: Instant) {
        self.sent_at.insert(id, sent_at);
    }

    /// Remove and return the send timestamp for `id`, if still present.
    pub fn take(&mut self, id: u32) -> Option<Instant> {
        self.sent_at.remove(&id)
    }

    pub fn evict_expired(&mut self, now: Instant) {
        self.sent_at
            .retain(|_, sent_at| now.duration_since(*sent_at) < PENDING_HELLO_TTL);
    }
}

/// Remote network name -> set of local output port names it should be
/// dispatched to. Replaced wholesale on update; never merged incrementally.
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: HashMap<String, HashSet<String>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, routes: HashMap<String, HashSet<String>>) {
        self.routes = routes;
    }

    pub fn outputs_for(&self, network_name: &str) -> Option<&HashSet<String>> {
        self.routes.get(network_name)
    }

    pub fn snapshot(&self) -> HashMap<String, HashSet<String>> {
        self.routes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_device_registry_merge_reports_new_entries() {
        let mut registry = RemoteDeviceRegistry::new();
        assert!(registry.merge("alpha", &["kbd".to_string()]));
        assert!(!registry.merge("alpha", &["kbd".to_string()]));
        assert!(registry.merge("alpha", &["pads".to_string()]));
        assert_eq!(registry.snapshot()["alpha"].len(), 2);
    }

    #[test]
    fn rtt_registry_caps_ring_at_capacity() {
        let mut registry = RttRegistry::new();
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        for i in 0..(RTT_RING_CAPACITY + 10) {
            registry.record(ip, i as f64);
        }
        let ring = &registry.snapshot()[&ip];
        assert_eq!(ring.len(), RTT_RING_CAPACITY);
        // Oldest samples (0..10) should have been evicted.
        assert_eq!(*ring.front().unwrap(), 10.0);
    }

    #[test]
    fn pending_hello_ledger_round_trip() {
        let mut ledger = PendingHelloLedger::new();
        let now = Instant::now();
        ledger.insert(7, now);
        assert_eq!(ledger.take(7), Some(now));
        assert_eq!(ledger.take(7), None);
    }

    #[test]
    fn pending_hello_ledger_evicts_stale_entries() {
        let mut ledger = PendingHelloLedger::new();
        let old = Instant::now() - Duration::from_secs(301);
        ledger.insert(1, old);
        ledger.insert(2, Instant::now());
        ledger.evict_expired(Instant::now());
        assert_eq!(ledger.take(1), None);
        assert!(ledger.take(2).is_some());
    }

    #[test]
    fn routing_table_dispatches_to_every_mapped_output() {
        let mut table = RoutingTable::new();
        let mut routes = HashMap::new();
        routes.insert(
            "kbd".to_string(),
            HashSet::from(["out-1".to_string(), "out-2".to_string()]),
        );
        table.replace(routes);
        let outputs = table.outputs_for("kbd").unwrap();
        assert_eq!(outputs.len(), 2);
        assert!(table.outputs_for("missing").is_none());
    }
}
