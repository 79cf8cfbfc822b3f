//! Radio Network: multi-hop delivery on top of the Radio Queue.
//!
//! Every frame starts with a 3-byte header:
//!
//! ```text
//! [next hop][destination][source][payload (up to 17 bytes)]
//! ```
//!
//! The next-hop byte is the first frame byte, which is what the transceiver's
//! hardware address filter matches on, so a node only receives frames meant
//! for it to consume or relay (plus broadcasts). Frames are not acknowledged.
//!
//! Every [`ADVERT_INTERVAL`] the node ages its [`RoutingTable`] and
//! broadcasts it as route advertisements: frames with destination
//! [`BROADCAST`] whose payload is a list of `(address, hops)` pairs.
//! Neighbors learn a 1-hop route to the sender and a `hops + 1` route to
//! every listed address.
//!
//! Frames for another node are relayed to the next hop in the table, or
//! dropped if there is none. A frame addressed to this node stays at the
//! head of the receive queue until the consumer releases it, which also
//! holds back relaying of later frames.
//!
//! # Example
//!
//! ```ignore
//! let (queue, radio) = RadioQueue::new(mac.handle().clone(), seed);
//! let mut network = RadioNetwork::new(queue, &NetworkConfig { address: 7 })?;
//! loop {
//!     network.service(Instant::now());
//!     if let Some(packet) = network.rx_current_packet() {
//!         println!("{} says {:?}", packet.source(), packet.payload());
//!         network.rx_done_with_packet();
//!     }
//! }
//! ```

mod routing;

pub use routing::{is_unicast, Route, RoutingTable, BROADCAST, MAX_HOPS, RESERVED, ROUTE_TTL};

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::queue::{QueueError, RadioQueue};
use crate::radio::{AddressFilter, RadioSettings, RxStatus, FRAME_CAPACITY};
use crate::stats::{NetworkStats, NodeStats};

/// Header bytes in front of every network payload.
pub const NETWORK_HEADER_LEN: usize = 3;

/// Payload bytes per network frame.
pub const NETWORK_PAYLOAD_CAPACITY: usize = FRAME_CAPACITY - NETWORK_HEADER_LEN;

/// Length of a routing epoch.
pub const ADVERT_INTERVAL: Duration = Duration::from_secs(20);

/// `(address, hops)` pairs per advertisement frame.
pub const ROUTES_PER_ADVERT: usize = NETWORK_PAYLOAD_CAPACITY / 2;

/// Errors returned to the Network consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Every transmit buffer is queued.
    NoBuffer,
    /// Payload longer than [`NETWORK_PAYLOAD_CAPACITY`].
    PayloadTooLarge,
    /// No route to the destination.
    Unreachable,
    /// Broadcast, reserved or own address where a peer address is needed.
    InvalidAddress,
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoBuffer => write!(f, "no free transmit buffer"),
            Self::PayloadTooLarge => {
                write!(f, "payload exceeds {} bytes", NETWORK_PAYLOAD_CAPACITY)
            }
            Self::Unreachable => write!(f, "no route to destination"),
            Self::InvalidAddress => write!(f, "invalid network address"),
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<QueueError> for NetworkError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::NoBuffer => Self::NoBuffer,
            QueueError::PayloadTooLarge => Self::PayloadTooLarge,
            // Network frames always carry the address header
            QueueError::EmptyFrame => Self::NoBuffer,
        }
    }
}

/// Network layer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    /// This node's address (1-254).
    pub address: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { address: 1 }
    }
}

impl NetworkConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), NetworkError> {
        if !is_unicast(self.address) {
            return Err(NetworkError::InvalidAddress);
        }
        Ok(())
    }

    /// Radio settings for `channel` with the address filter set to this
    /// node's address.
    pub fn radio_settings(&self, channel: u8) -> RadioSettings {
        RadioSettings {
            channel,
            address_filter: AddressFilter::Address(self.address),
        }
    }
}

/// A received network packet addressed to this node.
#[derive(Debug)]
pub struct NetPacket<'a> {
    source: u8,
    payload: &'a [u8],
    status: RxStatus,
}

impl<'a> NetPacket<'a> {
    /// Address of the originating node.
    pub fn source(&self) -> u8 {
        self.source
    }

    /// Payload bytes.
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Receive status of the last hop.
    pub fn status(&self) -> RxStatus {
        self.status
    }
}

/// Main-loop side of a network node.
pub struct RadioNetwork {
    queue: RadioQueue,
    table: RoutingTable,
    next_epoch: Option<Instant>,
    stats: Arc<NodeStats>,
}

impl RadioNetwork {
    /// Run the network layer over `queue`.
    pub fn new(queue: RadioQueue, config: &NetworkConfig) -> Result<Self, NetworkError> {
        config.validate()?;
        let stats = queue.node_stats().clone();
        Ok(Self {
            queue,
            table: RoutingTable::new(config.address),
            next_epoch: None,
            stats,
        })
    }

    /// This node's address.
    pub fn address(&self) -> u8 {
        self.table.own_address()
    }

    /// Current routing table.
    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    /// Route to `destination`, if known.
    pub fn route(&self, destination: u8) -> Option<Route> {
        self.table.route(destination)
    }

    /// The underlying queue.
    pub fn queue(&self) -> &RadioQueue {
        &self.queue
    }

    /// Network counters.
    pub fn stats(&self) -> &NetworkStats {
        &self.stats.network
    }

    /// Free transmit buffers (shared with relaying and advertisements).
    pub fn tx_available(&self) -> usize {
        self.queue.tx_available()
    }

    /// Send `payload` to `destination` through its next hop.
    pub fn tx_send_packet(&mut self, destination: u8, payload: &[u8]) -> Result<(), NetworkError> {
        if !is_unicast(destination) || destination == self.address() {
            return Err(NetworkError::InvalidAddress);
        }
        if payload.len() > NETWORK_PAYLOAD_CAPACITY {
            return Err(NetworkError::PayloadTooLarge);
        }
        let next_hop = self
            .table
            .next_hop(destination)
            .ok_or(NetworkError::Unreachable)?;

        let len = NETWORK_HEADER_LEN + payload.len();
        let mut frame = [0u8; FRAME_CAPACITY];
        frame[0] = next_hop;
        frame[1] = destination;
        frame[2] = self.address();
        frame[NETWORK_HEADER_LEN..len].copy_from_slice(payload);
        self.queue.send(&frame[..len])?;
        self.stats.network.sent.incr();
        Ok(())
    }

    /// The oldest received packet, if it is addressed to this node.
    ///
    /// Relayed and routing frames are only consumed by
    /// [`service`](Self::service).
    pub fn rx_current_packet(&self) -> Option<NetPacket<'_>> {
        let packet = self.queue.rx_current_packet()?;
        let data = packet.data();
        if data.len() < NETWORK_HEADER_LEN || data[1] != self.address() {
            return None;
        }
        Some(NetPacket {
            source: data[2],
            payload: &data[NETWORK_HEADER_LEN..],
            status: packet.status(),
        })
    }

    /// Release the packet returned by [`rx_current_packet`](Self::rx_current_packet).
    pub fn rx_done_with_packet(&mut self) {
        if self.rx_current_packet().is_some() {
            self.queue.rx_done_with_packet();
            self.stats.network.delivered.incr();
        }
    }

    /// Main-loop housekeeping: run the routing epoch when due, then
    /// process route advertisements and relay frames for other nodes.
    pub fn service(&mut self, now: Instant) {
        if self.next_epoch.map_or(true, |epoch| now >= epoch) {
            self.next_epoch = Some(now + ADVERT_INTERVAL);
            let expired = self.table.age();
            self.stats.network.routes_expired.add(expired);
            self.advertise();
        }
        self.process_received();
        self.stats.network.routes.set(self.table.len());
    }

    fn advertise(&mut self) {
        let own = self.address();
        let mut routes = [(0u8, 0u8); ROUTES_PER_ADVERT];
        let mut count = 0;
        for (address, route) in self.table.iter() {
            routes[count] = (address, route.hops);
            count += 1;
            if count == ROUTES_PER_ADVERT {
                if !send_advert(&mut self.queue, &self.stats.network, own, &routes) {
                    return;
                }
                count = 0;
            }
        }
        // An empty table still announces us to the neighbors
        if count > 0 || self.table.is_empty() {
            send_advert(&mut self.queue, &self.stats.network, own, &routes[..count]);
        }
    }

    fn process_received(&mut self) {
        let own = self.address();
        while let Some(packet) = self.queue.rx_current_packet() {
            let data = packet.data();
            if data.len() < NETWORK_HEADER_LEN {
                trace!("network: runt frame dropped");
                self.queue.rx_done_with_packet();
                continue;
            }
            let (next_hop, destination, source) = (data[0], data[1], data[2]);

            if destination == own {
                break;
            }

            let len = data.len();
            let mut frame = [0u8; FRAME_CAPACITY];
            frame[..len].copy_from_slice(data);
            self.queue.rx_done_with_packet();

            if destination == BROADCAST {
                self.learn(source, &frame[NETWORK_HEADER_LEN..len]);
            } else if next_hop == own {
                self.forward(&mut frame[..len]);
            } else {
                trace!("network: overheard frame for {}", next_hop);
            }
        }
    }

    fn learn(&mut self, neighbor: u8, routes: &[u8]) {
        self.stats.network.adverts_received.incr();
        self.table.learn_neighbor(neighbor);
        for pair in routes.chunks_exact(2) {
            self.table.learn_advert(neighbor, pair[0], pair[1]);
        }
    }

    fn forward(&mut self, frame: &mut [u8]) {
        let destination = frame[1];
        let Some(next_hop) = self.table.next_hop(destination) else {
            debug!("network: no route to {}, dropping", destination);
            self.stats.network.dropped.incr();
            return;
        };
        frame[0] = next_hop;
        match self.queue.send(frame) {
            Ok(()) => {
                trace!("network: relaying to {} via {}", destination, next_hop);
                self.stats.network.forwarded.incr();
            }
            Err(e) => {
                debug!("network: cannot relay to {}: {}", destination, e);
                self.stats.network.dropped.incr();
            }
        }
    }
}

/// Broadcast one advertisement frame carrying `routes`.
fn send_advert(
    queue: &mut RadioQueue,
    stats: &NetworkStats,
    own: u8,
    routes: &[(u8, u8)],
) -> bool {
    let mut frame = [0u8; FRAME_CAPACITY];
    frame[0] = BROADCAST;
    frame[1] = BROADCAST;
    frame[2] = own;
    for (i, &(address, hops)) in routes.iter().enumerate() {
        frame[NETWORK_HEADER_LEN + 2 * i] = address;
        frame[NETWORK_HEADER_LEN + 2 * i + 1] = hops;
    }
    match queue.send(&frame[..NETWORK_HEADER_LEN + 2 * routes.len()]) {
        Ok(()) => {
            trace!("network: advertised {} routes", routes.len());
            stats.adverts_sent.incr();
            true
        }
        Err(e) => {
            warn!("network: advertisement not sent: {}", e);
            false
        }
    }
}
