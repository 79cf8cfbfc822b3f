//! Deterministic radio simulator.
//!
//! A discrete-event model of a shared radio channel with a virtual
//! microsecond clock, used as the host stand-in for the transceiver and its
//! interrupt. Each node is a [`Mac`] over a [`SimTransceiver`]; the
//! [`SimNetwork`] delivers the MAC's interrupts (TX done, RX done, RX timeout)
//! in time order and serves strobes after every event.
//!
//! The air model:
//!
//! - a transmission starts [`TX_TURNAROUND_US`] after the MAC asks for it
//!   and lasts [`frame_airtime_us`] of its length,
//! - a listening node on the same channel locks onto a transmission when it
//!   starts; while locked, its receive timeout does not fire,
//! - transmissions that overlap in time on one channel all collide, and
//!   receivers locked onto them get a frame with a failed CRC,
//! - a radio is half duplex: it hears nothing while transmitting,
//! - frames rejected by the receiver's address filter are dropped silently
//!   and the receiver goes on listening.
//!
//! A [`Delivery`] filter can drop or corrupt individual frames per
//! receiver, which is how tests lose ACKs on purpose.
//!
//! # Example
//!
//! ```
//! use radiolink::link::Link;
//! use radiolink::radio::{Mac, MacHandle, RadioSettings};
//! use radiolink::sim::{SimNetwork, SimTransceiver};
//!
//! let mut net = SimNetwork::new();
//! let settings = RadioSettings::with_channel(5);
//!
//! let (handle_a, handle_b) = (MacHandle::new(), MacHandle::new());
//! let (mut a, radio_a) = Link::new(handle_a.clone(), 1);
//! let (b, radio_b) = Link::new(handle_b.clone(), 2);
//! net.add_node(Mac::new(SimTransceiver::new(), radio_a, handle_a), &settings);
//! net.add_node(Mac::new(SimTransceiver::new(), radio_b, handle_b), &settings);
//!
//! a.send(0, b"hi").unwrap();
//! net.run_for(10_000);
//! assert_eq!(b.rx_current_packet().unwrap().payload(), b"hi");
//! ```

mod transceiver;

#[cfg(test)]
mod scenarios;

pub use transceiver::{RadioMode, SimTransceiver, TIMEOUT_GUARD_US, TX_TURNAROUND_US};

use log::trace;

use crate::radio::{
    frame_airtime_us, AirParams, Mac, MacEventHandler, RadioSettings, RxStatus,
};
use transceiver::Lock;

/// Signal strength reported for every received frame.
pub const SIM_RSSI_DBM: i16 = -60;

/// Link quality reported for every received frame.
pub const SIM_LQI: u8 = 12;

/// A node the simulator can drive: a MAC over a [`SimTransceiver`].
pub trait SimNode: Send {
    /// Configure the radio and run the first handler call.
    fn start(&mut self, settings: &RadioSettings);

    /// The node's transceiver.
    fn transceiver(&self) -> &SimTransceiver;

    /// The node's transceiver, mutably.
    fn transceiver_mut(&mut self) -> &mut SimTransceiver;

    /// Transmission finished interrupt.
    fn tx_done(&mut self);

    /// Frame received interrupt.
    fn rx_done(&mut self);

    /// Receive timeout interrupt.
    fn rx_timeout(&mut self);

    /// Serve a pending strobe if possible.
    fn poll_strobe(&mut self) -> bool;
}

impl<H> SimNode for Mac<SimTransceiver, H>
where
    H: MacEventHandler + Send,
    H::Buffer: Send,
{
    fn start(&mut self, settings: &RadioSettings) {
        Mac::start(self, settings);
    }

    fn transceiver(&self) -> &SimTransceiver {
        Mac::transceiver(self)
    }

    fn transceiver_mut(&mut self) -> &mut SimTransceiver {
        Mac::transceiver_mut(self)
    }

    fn tx_done(&mut self) {
        self.on_tx_done();
    }

    fn rx_done(&mut self) {
        self.on_rx_done();
    }

    fn rx_timeout(&mut self) {
        self.on_rx_timeout();
    }

    fn poll_strobe(&mut self) -> bool {
        Mac::poll_strobe(self)
    }
}

/// Fate of one frame at one receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Received as sent.
    Deliver,
    /// Not heard at all.
    Drop,
    /// Received with a failed CRC.
    Corrupt,
}

/// A frame about to reach a receiver, as shown to the delivery filter.
#[derive(Debug)]
pub struct FrameInfo<'a> {
    /// Sending node index.
    pub from: usize,
    /// Receiving node index.
    pub to: usize,
    /// Length byte and frame.
    pub frame: &'a [u8],
}

type DeliveryFilter = Box<dyn FnMut(&FrameInfo<'_>) -> Delivery + Send>;

/// One transmission as seen on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirRecord {
    /// Sending node index.
    pub from: usize,
    /// Start time in microseconds.
    pub start: u64,
    /// Length byte and frame.
    pub frame: Vec<u8>,
    /// Whether it overlapped another transmission.
    pub collided: bool,
}

#[derive(Debug)]
struct Transmission {
    id: u64,
    from: usize,
    channel: u8,
    start: u64,
    end: u64,
    frame: Vec<u8>,
    collided: bool,
    log_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Event {
    // Ordered: at equal times a frame ends before another starts, and a
    // frame starting wins over a receive timeout.
    TxEnd(u64),
    TxStart(usize),
    RxTimeout(usize),
}

/// A set of simulated nodes sharing the air.
pub struct SimNetwork {
    now: u64,
    params: AirParams,
    nodes: Vec<Box<dyn SimNode>>,
    on_air: Vec<Transmission>,
    next_id: u64,
    filter: Option<DeliveryFilter>,
    air_log: Option<Vec<AirRecord>>,
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl SimNetwork {
    /// Empty network at time zero with the default air parameters.
    pub fn new() -> Self {
        Self::with_params(AirParams::default())
    }

    /// Empty network using `params` for airtime.
    pub fn with_params(params: AirParams) -> Self {
        Self {
            now: 0,
            params,
            nodes: Vec::new(),
            on_air: Vec::new(),
            next_id: 0,
            filter: None,
            air_log: None,
        }
    }

    /// Current virtual time in microseconds.
    pub fn now_us(&self) -> u64 {
        self.now
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node was added.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add and start a node; returns its index.
    pub fn add_node<N: SimNode + 'static>(&mut self, node: N, settings: &RadioSettings) -> usize {
        let index = self.nodes.len();
        self.nodes.push(Box::new(node));
        let node = &mut self.nodes[index];
        node.transceiver_mut().now = self.now;
        node.start(settings);
        index
    }

    /// Transceiver of node `index`.
    pub fn transceiver(&self, index: usize) -> &SimTransceiver {
        self.nodes[index].transceiver()
    }

    /// Decide the fate of every frame at every receiver with `filter`.
    pub fn set_delivery_filter<F>(&mut self, filter: F)
    where
        F: FnMut(&FrameInfo<'_>) -> Delivery + Send + 'static,
    {
        self.filter = Some(Box::new(filter));
    }

    /// Deliver every frame again.
    pub fn clear_delivery_filter(&mut self) {
        self.filter = None;
    }

    /// Start keeping a log of every transmission.
    pub fn record_air(&mut self) {
        self.air_log.get_or_insert_with(Vec::new);
    }

    /// Transmissions logged since [`record_air`](Self::record_air).
    pub fn air_log(&self) -> &[AirRecord] {
        self.air_log.as_deref().unwrap_or(&[])
    }

    /// Process the next event. Returns `false` if nothing is scheduled.
    pub fn step(&mut self) -> bool {
        self.poll_strobes();
        let Some((time, event)) = self.next_event() else {
            return false;
        };
        self.advance_to(time);
        match event {
            Event::TxEnd(id) => self.end_transmission(id),
            Event::TxStart(node) => self.start_transmission(node),
            Event::RxTimeout(node) => {
                trace!("sim: {} us: node {} rx timeout", self.now, node);
                self.nodes[node].rx_timeout();
            }
        }
        self.poll_strobes();
        true
    }

    /// Run every event up to `duration_us` from now, then move the clock
    /// there.
    pub fn run_for(&mut self, duration_us: u64) {
        let end = self.now + duration_us;
        loop {
            self.poll_strobes();
            match self.next_event() {
                Some((time, _)) if time <= end => {
                    self.step();
                }
                _ => break,
            }
        }
        self.advance_to(end);
    }

    /// Step until `done` returns `true` or `limit_us` of virtual time have
    /// passed. Returns whether `done` was reached.
    pub fn run_until(&mut self, limit_us: u64, mut done: impl FnMut() -> bool) -> bool {
        let end = self.now + limit_us;
        while !done() {
            self.poll_strobes();
            match self.next_event() {
                Some((time, _)) if time <= end => {
                    self.step();
                }
                _ => {
                    self.advance_to(end);
                    return done();
                }
            }
        }
        true
    }

    fn advance_to(&mut self, time: u64) {
        self.now = self.now.max(time);
        for node in &mut self.nodes {
            node.transceiver_mut().now = self.now;
        }
    }

    fn poll_strobes(&mut self) {
        loop {
            let mut served = false;
            for node in &mut self.nodes {
                served |= node.poll_strobe();
            }
            if !served {
                return;
            }
        }
    }

    fn next_event(&self) -> Option<(u64, Event)> {
        let ends = self
            .on_air
            .iter()
            .map(|tx| (tx.end, Event::TxEnd(tx.id)));
        let nodes = self.nodes.iter().enumerate().flat_map(|(index, node)| {
            let radio = node.transceiver();
            let start = radio
                .pending_tx_start()
                .map(|time| (time, Event::TxStart(index)));
            let timeout = radio
                .pending_timeout()
                .map(|time| (time.max(self.now), Event::RxTimeout(index)));
            start.into_iter().chain(timeout)
        });
        ends.chain(nodes).min()
    }

    fn start_transmission(&mut self, from: usize) {
        let radio = self.nodes[from].transceiver_mut();
        let RadioMode::TxPending { frame, .. } = std::mem::replace(&mut radio.mode, RadioMode::Idle)
        else {
            return;
        };
        let Some(channel) = radio.channel() else {
            return;
        };
        let id = self.next_id;
        self.next_id += 1;
        radio.mode = RadioMode::Tx { id };

        let airtime = frame_airtime_us(frame.len().saturating_sub(1), &self.params);
        let mut collided = false;
        for other in self.on_air.iter_mut().filter(|tx| tx.channel == channel) {
            other.collided = true;
            collided = true;
            if let (Some(log), Some(index)) = (self.air_log.as_mut(), other.log_index) {
                log[index].collided = true;
            }
        }
        if collided {
            trace!("sim: {} us: node {} collides", self.now, from);
        }

        // Listening nodes lock onto the frame now
        for (to, node) in self.nodes.iter_mut().enumerate() {
            let radio = node.transceiver_mut();
            if to == from
                || radio.channel() != Some(channel)
                || !radio.is_receiving()
                || radio.lock.is_some()
            {
                continue;
            }
            let delivery = match self.filter.as_mut() {
                Some(filter) => filter(&FrameInfo {
                    from,
                    to,
                    frame: &frame,
                }),
                None => Delivery::Deliver,
            };
            if delivery != Delivery::Drop {
                radio.lock = Some(Lock {
                    id,
                    corrupt: delivery == Delivery::Corrupt,
                });
            }
        }

        trace!(
            "sim: {} us: node {} sends {} bytes for {} us",
            self.now,
            from,
            frame.len(),
            airtime
        );
        let log_index = self.air_log.as_mut().map(|log| {
            log.push(AirRecord {
                from,
                start: self.now,
                frame: frame.clone(),
                collided,
            });
            log.len() - 1
        });
        self.on_air.push(Transmission {
            id,
            from,
            channel,
            start: self.now,
            end: self.now + airtime,
            frame,
            collided,
            log_index,
        });
    }

    fn end_transmission(&mut self, id: u64) {
        let Some(position) = self.on_air.iter().position(|tx| tx.id == id) else {
            return;
        };
        let tx = self.on_air.swap_remove(position);
        trace!(
            "sim: {} us: node {} done ({} us on air)",
            self.now,
            tx.from,
            tx.end - tx.start
        );

        for to in 0..self.nodes.len() {
            let radio = self.nodes[to].transceiver_mut();
            let Some(lock) = radio.lock.filter(|lock| lock.id == id) else {
                continue;
            };
            radio.lock = None;

            let accepted = match tx.frame.get(1) {
                Some(&first) => radio.address_filter().accepts(first),
                None => true,
            };
            if !accepted {
                trace!("sim: node {} filtered frame out", to);
                continue;
            }

            let crc_ok = !tx.collided && !lock.corrupt;
            radio.received = Some((tx.frame.clone(), RxStatus::new(SIM_RSSI_DBM, SIM_LQI, crc_ok)));
            radio.mode = RadioMode::Idle;
            self.nodes[to].rx_done();
        }

        let sender = &mut self.nodes[tx.from];
        if sender.transceiver().mode == (RadioMode::Tx { id }) {
            sender.transceiver_mut().mode = RadioMode::Idle;
            sender.tx_done();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::RadioQueue;
    use crate::radio::{AddressFilter, MacHandle};

    fn queue_node(net: &mut SimNetwork, settings: &RadioSettings, seed: u32) -> RadioQueue {
        let handle = MacHandle::new();
        let (queue, radio) = RadioQueue::new(handle.clone(), seed);
        net.add_node(Mac::new(SimTransceiver::new(), radio, handle), settings);
        queue
    }

    #[test]
    fn test_frame_delivered_after_airtime() {
        let mut net = SimNetwork::new();
        net.record_air();
        let settings = RadioSettings::with_channel(1);
        let mut a = queue_node(&mut net, &settings, 1);
        let b = queue_node(&mut net, &settings, 2);

        a.send(b"hello").unwrap();
        assert!(net.step());
        assert_eq!(net.now_us(), TX_TURNAROUND_US);
        assert_eq!(b.rx_available(), 0);

        assert!(net.step());
        let airtime = frame_airtime_us(5, &AirParams::default());
        assert_eq!(net.now_us(), TX_TURNAROUND_US + airtime);
        let packet = b.rx_current_packet().unwrap();
        assert_eq!(packet.data(), b"hello");
        assert_eq!(packet.status().rssi_dbm(), SIM_RSSI_DBM);
        assert!(packet.status().crc_ok());

        assert_eq!(net.air_log().len(), 1);
        assert_eq!(net.air_log()[0].frame, b"\x05hello");
        assert!(!net.step());
    }

    #[test]
    fn test_other_channel_not_heard() {
        let mut net = SimNetwork::new();
        let mut a = queue_node(&mut net, &RadioSettings::with_channel(1), 1);
        let b = queue_node(&mut net, &RadioSettings::with_channel(2), 2);
        a.send(b"x").unwrap();
        net.run_for(5_000);
        assert_eq!(b.rx_available(), 0);
    }

    #[test]
    fn test_simultaneous_transmissions_collide() {
        let mut net = SimNetwork::new();
        net.record_air();
        let settings = RadioSettings::with_channel(1);
        let mut a = queue_node(&mut net, &settings, 1);
        let mut b = queue_node(&mut net, &settings, 2);
        let c = queue_node(&mut net, &settings, 3);
        c.set_allow_crc_errors(true);

        a.send(b"from a").unwrap();
        b.send(b"from b").unwrap();
        net.run_for(5_000);

        let log = net.air_log();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|record| record.collided));
        // Half duplex: neither sender heard the other
        assert_eq!(a.rx_available() + b.rx_available(), 0);
        let packet = c.rx_current_packet().unwrap();
        assert!(!packet.status().crc_ok());
    }

    #[test]
    fn test_address_filter() {
        let mut net = SimNetwork::new();
        let open = RadioSettings::with_channel(1);
        let filtered = RadioSettings {
            address_filter: AddressFilter::Address(7),
            ..open
        };
        let mut a = queue_node(&mut net, &open, 1);
        let b = queue_node(&mut net, &filtered, 2);

        a.send(&[9, 1, 2]).unwrap();
        net.run_for(5_000);
        assert_eq!(b.rx_available(), 0);

        a.send(&[7, 1, 2]).unwrap();
        a.send(&[0, 3, 4]).unwrap();
        net.run_for(10_000);
        assert_eq!(b.rx_available(), 2);
    }

    #[test]
    fn test_delivery_filter() {
        let mut net = SimNetwork::new();
        let settings = RadioSettings::with_channel(1);
        let mut a = queue_node(&mut net, &settings, 1);
        let b = queue_node(&mut net, &settings, 2);
        net.set_delivery_filter(|info| match info.frame.get(1) {
            Some(b'd') => Delivery::Drop,
            Some(b'c') => Delivery::Corrupt,
            _ => Delivery::Deliver,
        });

        a.send(b"drop").unwrap();
        a.send(b"corrupt").unwrap();
        a.send(b"ok").unwrap();
        net.run_for(20_000);

        assert_eq!(b.rx_available(), 1);
        assert_eq!(b.rx_current_packet().unwrap().data(), b"ok");
        assert_eq!(b.stats().crc_failures.get(), 1);
    }

    #[test]
    fn test_run_until() {
        let mut net = SimNetwork::new();
        let settings = RadioSettings::with_channel(1);
        let mut a = queue_node(&mut net, &settings, 1);
        let b = queue_node(&mut net, &settings, 2);
        a.send(b"x").unwrap();
        assert!(net.run_until(10_000, || b.rx_available() == 1));
        assert!(net.now_us() < 1_000);
        assert!(!net.run_until(10_000, || b.rx_available() == 2));
        assert!(net.now_us() >= 10_000);
    }
}
