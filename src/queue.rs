//! Radio Queue: unordered, unacknowledged packet exchange.
//!
//! Same ring ownership as the Link, without any ACK, NAK or sequence
//! bookkeeping. Every frame that passes the CRC check (or every frame, with
//! [`RadioQueue::set_allow_crc_errors`]) is handed to the consumer if a
//! receive buffer is free and silently dropped otherwise. Transmit buffers
//! are freed as soon as the frame has left the antenna.
//!
//! Good for sniffing and best-effort broadcast among any number of nodes.
//! Consecutive transmissions are spaced by a random 0.9 to 3.7 ms backoff to
//! reduce collisions with other senders.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::trace;

use crate::radio::{
    Backoff, MacEvent, MacEventHandler, MacHandle, NextTransfer, Packet, RxStatus, FRAME_CAPACITY,
};
use crate::ring::{RxRing, TxRing};
use crate::stats::{NodeStats, QueueStats};
use crate::transport::PacketTransport;

/// Receive buffers. One is always left to the radio.
pub const QUEUE_RX_SLOTS: usize = 3;

/// Transmit buffers.
pub const QUEUE_TX_SLOTS: usize = 16;

/// Errors returned to the Queue consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Every transmit buffer is queued.
    NoBuffer,
    /// Frame longer than [`FRAME_CAPACITY`].
    PayloadTooLarge,
    /// Frame with no bytes; a zero length marks a free buffer.
    EmptyFrame,
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoBuffer => write!(f, "no free transmit buffer"),
            Self::PayloadTooLarge => write!(f, "frame exceeds {} bytes", FRAME_CAPACITY),
            Self::EmptyFrame => write!(f, "frame is empty"),
        }
    }
}

impl std::error::Error for QueueError {}

struct QueueShared {
    rx: RxRing<QUEUE_RX_SLOTS>,
    tx: TxRing<QUEUE_TX_SLOTS>,
    mac: MacHandle,
    allow_crc_errors: AtomicBool,
    stats: Arc<NodeStats>,
}

impl QueueShared {
    fn stats(&self) -> &QueueStats {
        &self.stats.queue
    }
}

/// A received frame, borrowed from the receive ring.
#[derive(Debug)]
pub struct QueueRxPacket<'a> {
    packet: &'a Packet,
}

impl<'a> QueueRxPacket<'a> {
    /// Frame bytes (without the length byte).
    pub fn data(&self) -> &'a [u8] {
        self.packet.data()
    }

    /// Receive status: RSSI, LQI and CRC result.
    pub fn status(&self) -> RxStatus {
        self.packet.status()
    }
}

/// Main-loop half of a Radio Queue.
pub struct RadioQueue {
    shared: Arc<QueueShared>,
}

impl RadioQueue {
    /// Create both halves of a queue for the MAC behind `mac`.
    pub fn new(mac: MacHandle, backoff_seed: u32) -> (Self, QueueRadio) {
        Self::with_stats(mac, backoff_seed, Arc::new(NodeStats::default()))
    }

    /// Like [`RadioQueue::new`], counting into `stats`.
    pub fn with_stats(
        mac: MacHandle,
        backoff_seed: u32,
        stats: Arc<NodeStats>,
    ) -> (Self, QueueRadio) {
        let shared = Arc::new(QueueShared {
            rx: RxRing::new(),
            tx: TxRing::new(),
            mac,
            allow_crc_errors: AtomicBool::new(false),
            stats,
        });
        let radio = QueueRadio {
            shared: shared.clone(),
            backoff: Backoff::new(backoff_seed),
            sending: false,
        };
        (Self { shared }, radio)
    }

    /// Deliver frames that fail the CRC check too (for sniffing).
    pub fn set_allow_crc_errors(&self, allow: bool) {
        self.shared.allow_crc_errors.store(allow, Ordering::Relaxed);
    }

    /// Whether frames failing the CRC check are delivered.
    pub fn allow_crc_errors(&self) -> bool {
        self.shared.allow_crc_errors.load(Ordering::Relaxed)
    }

    /// Free transmit buffers.
    pub fn tx_available(&self) -> usize {
        self.shared.tx.available()
    }

    /// Frames waiting to be transmitted.
    pub fn tx_queued(&self) -> usize {
        self.shared.tx.pending()
    }

    /// The next free transmit buffer, if any.
    pub fn tx_current_packet(&mut self) -> Option<&mut Packet> {
        let index = self.shared.tx.fill_index()?;
        // SAFETY: the fill slot is consumer-owned until `submit`
        Some(unsafe { self.shared.tx.slot_mut(index) })
    }

    /// Queue the current transmit buffer as filled.
    pub fn tx_send_packet(&mut self) -> Result<(), QueueError> {
        let index = self.shared.tx.fill_index().ok_or(QueueError::NoBuffer)?;
        // SAFETY: the fill slot is consumer-owned until `submit`
        if unsafe { self.shared.tx.slot_mut(index) }.len() == 0 {
            return Err(QueueError::EmptyFrame);
        }
        if !self.shared.tx.submit() {
            return Err(QueueError::NoBuffer);
        }
        self.shared.mac.request_event();
        Ok(())
    }

    /// Copy `frame` into the current transmit buffer and queue it.
    pub fn send(&mut self, frame: &[u8]) -> Result<(), QueueError> {
        if frame.is_empty() {
            return Err(QueueError::EmptyFrame);
        }
        if frame.len() > FRAME_CAPACITY {
            return Err(QueueError::PayloadTooLarge);
        }
        self.tx_current_packet()
            .ok_or(QueueError::NoBuffer)?
            .set_data(frame);
        self.tx_send_packet()
    }

    /// Received frames waiting for the consumer.
    pub fn rx_available(&self) -> usize {
        self.shared.rx.held()
    }

    /// The oldest received frame, if any.
    pub fn rx_current_packet(&self) -> Option<QueueRxPacket<'_>> {
        let index = self.shared.rx.read_index()?;
        // SAFETY: slots in [main, interrupt) are consumer-owned
        let packet = unsafe { self.shared.rx.slot(index) };
        Some(QueueRxPacket { packet })
    }

    /// Release the oldest received frame back to the radio.
    pub fn rx_done_with_packet(&mut self) {
        self.shared.rx.release();
    }

    /// Queue counters.
    pub fn stats(&self) -> &QueueStats {
        self.shared.stats()
    }

    pub(crate) fn node_stats(&self) -> &Arc<NodeStats> {
        &self.shared.stats
    }

    /// Handle of the MAC driving this queue.
    pub fn mac(&self) -> &MacHandle {
        &self.shared.mac
    }
}

/// Over a queue the payload type rides in the first frame byte.
impl PacketTransport for RadioQueue {
    type Error = QueueError;

    const PAYLOAD_CAPACITY: usize = FRAME_CAPACITY - 1;

    fn tx_available(&self) -> usize {
        RadioQueue::tx_available(self)
    }

    fn tx_queued(&self) -> usize {
        RadioQueue::tx_queued(self)
    }

    fn tx_payload_mut(&mut self) -> Option<&mut [u8]> {
        self.tx_current_packet().map(|packet| &mut packet.data_mut()[1..])
    }

    fn tx_send(&mut self, len: usize, payload_type: u8) -> Result<(), QueueError> {
        if len > Self::PAYLOAD_CAPACITY {
            return Err(QueueError::PayloadTooLarge);
        }
        let packet = self.tx_current_packet().ok_or(QueueError::NoBuffer)?;
        packet.data_mut()[0] = payload_type;
        packet.set_len(1 + len);
        self.tx_send_packet()
    }

    fn rx_payload(&self) -> Option<(u8, &[u8])> {
        let (payload_type, payload) = self.rx_current_packet()?.data().split_first()?;
        Some((*payload_type, payload))
    }

    fn rx_done(&mut self) {
        self.rx_done_with_packet();
    }
}

/// Buffers the queue hands to the MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBuffer {
    /// Receive ring slot.
    Rx(usize),
    /// Transmit ring slot.
    Tx(usize),
}

/// Interrupt-side half of a Radio Queue.
pub struct QueueRadio {
    shared: Arc<QueueShared>,
    backoff: Backoff,
    sending: bool,
}

impl QueueRadio {
    fn listen(&mut self, next: &mut NextTransfer<QueueBuffer>) {
        let timeout = if self.shared.tx.pending() > 0 {
            Some(self.backoff.queue_backoff())
        } else {
            None
        };
        next.start_receive(QueueBuffer::Rx(self.shared.rx.fill_index()), timeout);
    }

    fn on_receive(&mut self) {
        let stats = self.shared.stats();
        let index = self.shared.rx.fill_index();
        // SAFETY: the fill slot belongs to the radio until `commit`
        let packet = unsafe { self.shared.rx.slot(index) };
        let crc_ok = packet.status().crc_ok();
        if !crc_ok {
            stats.crc_failures.incr();
        }
        if packet.is_empty() || !(crc_ok || self.shared.allow_crc_errors.load(Ordering::Relaxed)) {
            return;
        }
        if self.shared.rx.commit() {
            stats.frames_received.incr();
        } else {
            trace!("queue: receive ring full, dropping frame");
            stats.dropped.incr();
        }
    }

    fn on_transmitted(&mut self) {
        if !std::mem::take(&mut self.sending) {
            return;
        }
        let tx = &self.shared.tx;
        if let Some(head) = tx.head_index() {
            // SAFETY: the head slot belongs to the radio until `complete`
            unsafe { tx.slot_mut(head) }.set_len(0);
            tx.complete();
            self.shared.stats().frames_sent.incr();
        }
    }

    fn transmit_or_listen(&mut self, next: &mut NextTransfer<QueueBuffer>) {
        match self.shared.tx.head_index() {
            Some(head) => {
                self.sending = true;
                next.start_transmit(QueueBuffer::Tx(head));
            }
            None => self.listen(next),
        }
    }
}

impl MacEventHandler for QueueRadio {
    type Buffer = QueueBuffer;

    fn on_event(&mut self, event: MacEvent, next: &mut NextTransfer<QueueBuffer>) {
        self.sending = self.sending && event == MacEvent::TxComplete;
        match event {
            MacEvent::RxComplete => {
                self.on_receive();
                self.listen(next);
            }
            MacEvent::TxComplete => {
                self.on_transmitted();
                self.listen(next);
            }
            MacEvent::RxTimeout | MacEvent::Strobe => self.transmit_or_listen(next),
        }
    }

    fn buffer(&mut self, id: QueueBuffer) -> &mut Packet {
        match id {
            // SAFETY: the MAC only names buffers this side armed, which are
            // radio-owned while the transfer is in flight
            QueueBuffer::Rx(index) => unsafe { self.shared.rx.slot_mut(index) },
            QueueBuffer::Tx(index) => unsafe { self.shared.tx.slot_mut(index) },
        }
    }
}
