//! Radio Link: reliable, ordered packet delivery between two peers.
//!
//! The link is split in two halves sharing a pair of rings:
//!
//! - [`Link`] lives in the main loop. It fills transmit buffers, reads
//!   received ones and never blocks.
//! - [`LinkRadio`] is the [`MacEventHandler`](crate::radio::MacEventHandler)
//!   running in the interrupt domain. It frames, acknowledges and
//!   retransmits.
//!
//! Every data frame carries a one-bit sequence number. The receiver accepts a
//! frame whose bit differs from the last accepted one and answers ACK; a
//! repeat of the last accepted frame (its ACK was lost) is answered with ACK
//! again but not delivered twice. If all receive buffers are held by the
//! consumer the frame is refused with NAK and the sender keeps retrying.
//! There is no retry limit: a peer that never answers stalls the transmit
//! buffer forever.
//!
//! # Example
//!
//! ```
//! use radiolink::link::Link;
//! use radiolink::radio::MacHandle;
//!
//! let handle = MacHandle::new();
//! let (mut link, _radio) = Link::new(handle, 1);
//!
//! link.send(0, b"hello").unwrap();
//! assert_eq!(link.tx_available(), 1);
//! ```

mod frame;
mod radio;

pub use frame::{FrameType, Header, LINK_FRAME_LENGTH, LINK_PAYLOAD_CAPACITY, PAYLOAD_TYPES};
pub use radio::{LinkBuffer, LinkRadio};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;

use crate::radio::{MacHandle, Packet};
use crate::ring::{RxRing, TxRing};
use crate::stats::{LinkStats, NodeStats};
use crate::transport::PacketTransport;

/// Receive buffers. One is always left to the radio.
pub const LINK_RX_SLOTS: usize = 3;

/// Transmit buffers.
pub const LINK_TX_SLOTS: usize = 2;

/// Errors returned to the Link consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Every transmit buffer is waiting to be acknowledged.
    NoBuffer,
    /// Payload longer than [`LINK_PAYLOAD_CAPACITY`].
    PayloadTooLarge,
    /// Payload type not below [`PAYLOAD_TYPES`].
    InvalidPayloadType,
    /// Data frames must carry at least one byte.
    EmptyPayload,
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoBuffer => write!(f, "no free transmit buffer"),
            Self::PayloadTooLarge => {
                write!(f, "payload exceeds {} bytes", LINK_PAYLOAD_CAPACITY)
            }
            Self::InvalidPayloadType => write!(f, "payload type must be < {}", PAYLOAD_TYPES),
            Self::EmptyPayload => write!(f, "payload is empty"),
        }
    }
}

impl std::error::Error for LinkError {}

pub(crate) struct LinkShared {
    rx: RxRing<LINK_RX_SLOTS>,
    tx: TxRing<LINK_TX_SLOTS>,
    mac: MacHandle,
    reset_seen: AtomicBool,
    reset_requested: AtomicBool,
    stats: Arc<NodeStats>,
}

impl LinkShared {
    fn stats(&self) -> &LinkStats {
        &self.stats.link
    }
}

/// A received data packet, borrowed from the receive ring.
#[derive(Debug)]
pub struct RxPacket<'a> {
    packet: &'a Packet,
}

impl<'a> RxPacket<'a> {
    /// Decoded header byte.
    pub fn header(&self) -> Header {
        Header::from_byte(self.packet.data()[0])
    }

    /// Application payload.
    pub fn payload(&self) -> &'a [u8] {
        &self.packet.data()[1..]
    }

    /// Application payload type.
    pub fn payload_type(&self) -> u8 {
        self.header().payload_type
    }

    /// Signal strength of the frame in dBm.
    pub fn rssi_dbm(&self) -> i16 {
        self.packet.status().rssi_dbm()
    }

    /// Link quality indicator of the frame.
    pub fn lqi(&self) -> u8 {
        self.packet.status().lqi()
    }

    /// Whether the frame passed the CRC check. Always true for Link.
    pub fn crc_ok(&self) -> bool {
        self.packet.status().crc_ok()
    }
}

/// A transmit buffer owned by the consumer until it is sent.
#[derive(Debug)]
pub struct TxPacket<'a> {
    packet: &'a mut Packet,
}

impl TxPacket<'_> {
    /// The whole payload area, independent of the current length.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.packet.data_mut()[1..1 + LINK_PAYLOAD_CAPACITY]
    }

    /// Payload bytes set so far.
    pub fn payload(&self) -> &[u8] {
        self.packet.data().get(1..).unwrap_or(&[])
    }

    /// Set how many bytes of [`payload_mut`](Self::payload_mut) are in use.
    pub fn set_payload_len(&mut self, len: usize) -> Result<(), LinkError> {
        if len > LINK_PAYLOAD_CAPACITY {
            return Err(LinkError::PayloadTooLarge);
        }
        self.packet.set_len(1 + len);
        Ok(())
    }

    /// Copy `data` into the payload and set the length.
    pub fn set_payload(&mut self, data: &[u8]) -> Result<(), LinkError> {
        if data.len() > LINK_PAYLOAD_CAPACITY {
            return Err(LinkError::PayloadTooLarge);
        }
        self.payload_mut()[..data.len()].copy_from_slice(data);
        self.set_payload_len(data.len())
    }
}

/// Main-loop half of a Radio Link.
pub struct Link {
    shared: Arc<LinkShared>,
}

impl Link {
    /// Create both halves of a link. `mac` is the handle of the MAC the
    /// returned [`LinkRadio`] will be installed in.
    pub fn new(mac: MacHandle, backoff_seed: u32) -> (Self, LinkRadio) {
        Self::with_stats(mac, backoff_seed, Arc::new(NodeStats::default()))
    }

    /// Like [`Link::new`], counting into `stats`.
    pub fn with_stats(
        mac: MacHandle,
        backoff_seed: u32,
        stats: Arc<NodeStats>,
    ) -> (Self, LinkRadio) {
        let shared = Arc::new(LinkShared {
            rx: RxRing::new(),
            tx: TxRing::new(),
            mac,
            reset_seen: AtomicBool::new(false),
            reset_requested: AtomicBool::new(false),
            stats,
        });
        let radio = LinkRadio::new(shared.clone(), backoff_seed);
        (Self { shared }, radio)
    }

    /// Number of free transmit buffers (0..=2).
    pub fn tx_available(&self) -> usize {
        self.shared.tx.available()
    }

    /// Number of sent packets not yet acknowledged.
    pub fn tx_queued(&self) -> usize {
        self.shared.tx.pending()
    }

    /// The next free transmit buffer, if any.
    pub fn tx_current_packet(&mut self) -> Option<TxPacket<'_>> {
        let index = self.shared.tx.fill_index()?;
        // SAFETY: the fill slot is consumer-owned until `submit`
        let packet = unsafe { self.shared.tx.slot_mut(index) };
        Some(TxPacket { packet })
    }

    /// Queue the current transmit buffer with `payload_type`.
    pub fn tx_send_packet(&mut self, payload_type: u8) -> Result<(), LinkError> {
        if payload_type >= PAYLOAD_TYPES {
            return Err(LinkError::InvalidPayloadType);
        }
        let index = self.shared.tx.fill_index().ok_or(LinkError::NoBuffer)?;
        // SAFETY: the fill slot is consumer-owned until `submit`
        let packet = unsafe { self.shared.tx.slot_mut(index) };
        if packet.len() < 2 {
            return Err(LinkError::EmptyPayload);
        }
        packet.data_mut()[0] = Header {
            frame_type: FrameType::Ping,
            payload_type,
            sequence: false,
        }
        .to_byte();

        self.shared.tx.submit();
        self.shared.mac.request_event();
        Ok(())
    }

    /// Fill the current transmit buffer with `data` and queue it.
    pub fn send(&mut self, payload_type: u8, data: &[u8]) -> Result<(), LinkError> {
        if data.is_empty() {
            return Err(LinkError::EmptyPayload);
        }
        let mut packet = self.tx_current_packet().ok_or(LinkError::NoBuffer)?;
        packet.set_payload(data)?;
        self.tx_send_packet(payload_type)
    }

    /// Number of received packets waiting for the consumer.
    pub fn rx_available(&self) -> usize {
        self.shared.rx.held()
    }

    /// The oldest received packet, if any.
    pub fn rx_current_packet(&self) -> Option<RxPacket<'_>> {
        let index = self.shared.rx.read_index()?;
        // SAFETY: slots in [main, interrupt) are consumer-owned
        let packet = unsafe { self.shared.rx.slot(index) };
        Some(RxPacket { packet })
    }

    /// Release the oldest received packet back to the radio.
    pub fn rx_done_with_packet(&mut self) {
        if self.shared.rx.release() {
            // A refused frame may now be accepted
            self.shared.mac.request_event();
        }
    }

    /// Mark the next data frame as RESET so the peer forgets its sequence
    /// state. Call once after startup if the peer may have outlived us.
    pub fn announce_reset(&self) {
        debug!("link: announcing reset");
        self.shared.reset_requested.store(true, Ordering::Release);
    }

    /// Whether the peer announced a reset since the last call.
    pub fn take_reset_flag(&self) -> bool {
        self.shared.reset_seen.swap(false, Ordering::AcqRel)
    }

    /// Link counters.
    pub fn stats(&self) -> &LinkStats {
        self.shared.stats()
    }

    /// Handle of the MAC driving this link.
    pub fn mac(&self) -> &MacHandle {
        &self.shared.mac
    }

    /// Receive ring ownership as `(consumer, radio)` bit masks.
    pub fn rx_ownership(&self) -> (u32, u32) {
        self.shared.rx.ownership_masks()
    }

    /// Transmit ring ownership as `(consumer, radio)` bit masks.
    pub fn tx_ownership(&self) -> (u32, u32) {
        self.shared.tx.ownership_masks()
    }
}

impl PacketTransport for Link {
    type Error = LinkError;

    const PAYLOAD_CAPACITY: usize = LINK_PAYLOAD_CAPACITY;

    fn tx_available(&self) -> usize {
        Link::tx_available(self)
    }

    fn tx_queued(&self) -> usize {
        Link::tx_queued(self)
    }

    fn tx_payload_mut(&mut self) -> Option<&mut [u8]> {
        let index = self.shared.tx.fill_index()?;
        // SAFETY: the fill slot is consumer-owned until `submit`
        let packet = unsafe { self.shared.tx.slot_mut(index) };
        Some(&mut packet.data_mut()[1..1 + LINK_PAYLOAD_CAPACITY])
    }

    fn tx_send(&mut self, len: usize, payload_type: u8) -> Result<(), LinkError> {
        self.tx_current_packet()
            .ok_or(LinkError::NoBuffer)?
            .set_payload_len(len)?;
        self.tx_send_packet(payload_type)
    }

    fn rx_payload(&self) -> Option<(u8, &[u8])> {
        self.rx_current_packet()
            .map(|packet| (packet.payload_type(), packet.payload()))
    }

    fn rx_done(&mut self) {
        self.rx_done_with_packet();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_link() -> Link {
        Link::new(MacHandle::new(), 1).0
    }

    #[test]
    fn test_tx_accounting() {
        let mut link = new_link();
        assert_eq!(link.tx_available(), 2);
        link.send(0, b"a").unwrap();
        assert_eq!(link.tx_available(), 1);
        assert_eq!(link.tx_queued(), 1);
        link.send(0, b"b").unwrap();
        assert_eq!(link.tx_available(), 0);
        assert_eq!(link.send(0, b"c"), Err(LinkError::NoBuffer));
        assert!(link.tx_current_packet().is_none());
    }

    #[test]
    fn test_send_requests_strobe() {
        let mut link = new_link();
        assert!(!link.mac().strobe_pending());
        link.send(3, b"x").unwrap();
        assert!(link.mac().strobe_pending());
    }

    #[test]
    fn test_send_validation() {
        let mut link = new_link();
        assert_eq!(link.tx_send_packet(0), Err(LinkError::EmptyPayload));
        assert_eq!(
            link.send(0, &[0u8; LINK_PAYLOAD_CAPACITY + 1]),
            Err(LinkError::PayloadTooLarge)
        );
        assert_eq!(link.send(PAYLOAD_TYPES, b"x"), Err(LinkError::InvalidPayloadType));
        assert_eq!(link.send(0, b""), Err(LinkError::EmptyPayload));
        assert_eq!(link.tx_available(), 2);
        assert!(link.send(0, &[7u8; LINK_PAYLOAD_CAPACITY]).is_ok());
    }

    #[test]
    fn test_tx_packet_in_place() {
        let mut link = new_link();
        {
            let mut packet = link.tx_current_packet().unwrap();
            packet.payload_mut()[..3].copy_from_slice(b"xyz");
            packet.set_payload_len(3).unwrap();
            assert_eq!(packet.payload(), b"xyz");
        }
        link.tx_send_packet(4).unwrap();
        assert_eq!(link.tx_queued(), 1);
    }

    #[test]
    fn test_empty_receive_side() {
        let mut link = new_link();
        assert_eq!(link.rx_available(), 0);
        assert!(link.rx_current_packet().is_none());
        link.rx_done_with_packet();
        assert_eq!(link.rx_available(), 0);
        assert!(!link.take_reset_flag());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(LinkError::PayloadTooLarge.to_string(), "payload exceeds 18 bytes");
        assert_eq!(LinkError::NoBuffer.to_string(), "no free transmit buffer");
    }
}
