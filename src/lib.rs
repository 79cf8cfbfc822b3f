//! Link-layer protocol stack for low-power packet radios.
//!
//! The stack is split between an interrupt domain, where the [`radio::Mac`]
//! drives the transceiver and calls a protocol handler on every radio event,
//! and a polled main loop, where consumers exchange packets through
//! fixed-size rings that never block.
//!
//! - [`link`]: reliable, ordered delivery between two peers (ACK/NAK,
//!   one-bit sequence numbers, retransmission).
//! - [`queue`]: unacknowledged, unordered packets for sniffing and
//!   best-effort broadcast.
//! - [`com`]: a byte stream with control signals over either of them.
//! - [`network`]: multi-hop delivery with a distance-vector routing table.
//!
//! [`sim`] runs any number of nodes on a simulated channel so the whole
//! stack can be exercised on the host.

pub mod com;
pub mod config;
pub mod link;
pub mod network;
pub mod queue;
pub mod radio;
pub mod ring;
pub mod sim;
pub mod stats;
pub mod transport;

// Re-export commonly used items
pub use com::{ComError, RadioCom};
pub use config::{ConfigError, NodeConfig, NodeMode};
pub use link::{Link, LinkError, LinkRadio};
pub use network::{NetworkConfig, NetworkError, RadioNetwork};
pub use queue::{QueueError, QueueRadio, RadioQueue};
pub use radio::{Mac, MacHandle, RadioSettings};
pub use sim::{SimNetwork, SimTransceiver};
pub use stats::{NodeStats, StatsServer};
pub use transport::PacketTransport;
