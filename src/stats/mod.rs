//! Protocol statistics.
//!
//! Counters are plain atomics so the interrupt side can bump them without
//! locking; the main loop or the [`StatsServer`] thread reads them. All of
//! them serialize to JSON through serde.
//!
//! # Example Response
//!
//! ```json
//! {
//!   "uptime_secs": 42,
//!   "node": "host-a",
//!   "link": { "frames_sent": 12, "frames_received": 11, "crc_failures": 0, ... },
//!   "queue": { ... },
//!   "network": { ... }
//! }
//! ```

mod server;

pub use server::{StatsServer, DEFAULT_STATS_PORT};

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// A monotonically increasing event counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicUsize);

impl Counter {
    /// Add one.
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n`.
    pub fn add(&self, n: usize) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    /// Overwrite the value (gauges such as table sizes).
    pub fn set(&self, value: usize) {
        self.0.store(value, Ordering::Relaxed);
    }
}

impl Serialize for Counter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.get() as u64)
    }
}

/// Radio Link counters.
#[derive(Debug, Default, Serialize)]
pub struct LinkStats {
    /// Data frames put on the air, retransmissions included.
    pub frames_sent: Counter,
    /// Data frames put on the air again while awaiting an ACK.
    pub retransmissions: Counter,
    /// Frames received with a good CRC.
    pub frames_received: Counter,
    /// Frames received with a bad CRC or no header.
    pub crc_failures: Counter,
    /// ACK responses owed to the peer.
    pub acks_sent: Counter,
    /// NAK responses owed to the peer (receive ring full).
    pub naks_sent: Counter,
    /// Standalone response frames sent.
    pub standalone_responses: Counter,
    /// Retransmitted data frames recognised and not delivered again.
    pub duplicates: Counter,
    /// Data frames handed to the consumer.
    pub delivered: Counter,
    /// ACKs received that freed a transmit buffer.
    pub acked: Counter,
    /// RESET frames accepted from the peer.
    pub resets: Counter,
}

impl LinkStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Radio Queue counters.
#[derive(Debug, Default, Serialize)]
pub struct QueueStats {
    /// Frames put on the air.
    pub frames_sent: Counter,
    /// Frames handed to the consumer.
    pub frames_received: Counter,
    /// Frames received with a bad CRC (delivered only when tolerated).
    pub crc_failures: Counter,
    /// Frames dropped because every receive slot was held.
    pub dropped: Counter,
}

impl QueueStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Radio Network counters.
#[derive(Debug, Default, Serialize)]
pub struct NetworkStats {
    /// Packets originated by this node.
    pub sent: Counter,
    /// Packets addressed to this node.
    pub delivered: Counter,
    /// Packets relayed towards their destination.
    pub forwarded: Counter,
    /// Packets dropped for lack of a route or a transmit buffer.
    pub dropped: Counter,
    /// Route advertisement frames sent.
    pub adverts_sent: Counter,
    /// Route advertisement frames processed.
    pub adverts_received: Counter,
    /// Routes evicted by aging.
    pub routes_expired: Counter,
    /// Current routing table size.
    pub routes: Counter,
}

impl NetworkStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }
}

/// All counters of one node.
///
/// Shared across the application; each layer is handed an `Arc` of its own
/// section (or of the whole struct).
#[derive(Debug)]
pub struct NodeStats {
    start_time: Instant,
    /// Human-readable node name.
    pub name: String,
    /// Link layer counters.
    pub link: LinkStats,
    /// Queue layer counters.
    pub queue: QueueStats,
    /// Network layer counters.
    pub network: NetworkStats,
}

impl NodeStats {
    /// Create statistics for the node called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            start_time: Instant::now(),
            name: name.into(),
            link: LinkStats::new(),
            queue: QueueStats::new(),
            network: NetworkStats::new(),
        }
    }

    /// Seconds since creation.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Serialize everything to JSON.
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "node": self.name,
            "link": self.link,
            "queue": self.queue,
            "network": self.network,
        })
        .to_string()
    }
}

impl Default for NodeStats {
    fn default() -> Self {
        Self::new("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::default();
        counter.incr();
        counter.incr();
        assert_eq!(counter.get(), 2);
        counter.set(7);
        assert_eq!(counter.get(), 7);
    }

    #[test]
    fn test_link_stats_json() {
        let stats = LinkStats::new();
        stats.acks_sent.incr();
        stats.duplicates.incr();
        stats.duplicates.incr();

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"acks_sent\":1"));
        assert!(json.contains("\"duplicates\":2"));
        assert!(json.contains("\"naks_sent\":0"));
    }

    #[test]
    fn test_node_stats_json() {
        let stats = NodeStats::new("abc");
        stats.network.routes.set(4);
        let json = stats.to_json();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["node"], "abc");
        assert_eq!(value["network"]["routes"], 4);
        assert_eq!(value["queue"]["dropped"], 0);
        assert!(value["uptime_secs"].is_u64());
        assert!(value["link"].is_object());
    }
}
