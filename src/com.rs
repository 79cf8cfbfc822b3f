//! Radio Com: a byte stream over packet transports.
//!
//! Bytes written with [`RadioCom::tx_send_byte`] are packed straight into
//! the transport's current transmit buffer. A buffer is sent when it is
//! full, or from [`RadioCom::service`] as soon as the transport has no more
//! than a small number of packets queued, so short writes are not delayed
//! behind a long backlog. Received packets are served one byte at a time.
//!
//! A second channel of eight control-signal bits (RTS, DTR and the like)
//! travels as packets of payload type [`CONTROL_PAYLOAD_TYPE`].
//!
//! Works over [`Link`](crate::link::Link) (reliable, two peers) or
//! [`RadioQueue`](crate::queue::RadioQueue) (best effort).

use log::trace;

use crate::transport::PacketTransport;

/// Payload type of stream data packets.
pub const DATA_PAYLOAD_TYPE: u8 = 0;

/// Payload type of control-signal packets.
pub const CONTROL_PAYLOAD_TYPE: u8 = 1;

/// Flush partially filled packets once at most this many are queued.
pub const TX_FLUSH_THRESHOLD: usize = 0;

/// Errors returned by Radio Com.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComError {
    /// No transmit buffer is free; try again after [`RadioCom::service`].
    Full,
}

impl std::fmt::Display for ComError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "transmit buffers full"),
        }
    }
}

impl std::error::Error for ComError {}

/// Byte-stream endpoint over a packet transport.
pub struct RadioCom<T: PacketTransport> {
    transport: T,
    tx_loaded: usize,
    rx_offset: usize,
    tx_signals: Option<u8>,
    rx_signals: u8,
}

impl<T: PacketTransport> RadioCom<T> {
    /// Wrap `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            tx_loaded: 0,
            rx_offset: 0,
            tx_signals: None,
            rx_signals: 0,
        }
    }

    /// The wrapped transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The wrapped transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Bytes that can be written without blocking.
    pub fn tx_available(&self) -> usize {
        (self.transport.tx_available() * T::PAYLOAD_CAPACITY).saturating_sub(self.tx_loaded)
    }

    /// Append one byte to the outgoing stream.
    pub fn tx_send_byte(&mut self, byte: u8) -> Result<(), ComError> {
        let payload = self.transport.tx_payload_mut().ok_or(ComError::Full)?;
        payload[self.tx_loaded] = byte;
        self.tx_loaded += 1;
        if self.tx_loaded == T::PAYLOAD_CAPACITY {
            self.flush_data();
        }
        Ok(())
    }

    /// Append as many bytes of `data` as fit; returns how many were taken.
    pub fn tx_send(&mut self, data: &[u8]) -> usize {
        data.iter()
            .take_while(|&&byte| self.tx_send_byte(byte).is_ok())
            .count()
    }

    /// Queue a control-signal update; sent from [`service`](Self::service).
    pub fn tx_control_signals(&mut self, signals: u8) {
        self.tx_signals = Some(signals);
    }

    /// Last control signals received from the peer.
    pub fn rx_control_signals(&mut self) -> u8 {
        self.skip_consumed();
        self.rx_signals
    }

    /// Bytes readable from the current received packet.
    pub fn rx_available(&mut self) -> usize {
        self.skip_consumed();
        match self.transport.rx_payload() {
            Some((_, payload)) => payload.len() - self.rx_offset,
            None => 0,
        }
    }

    /// Read one byte of the incoming stream.
    pub fn rx_receive_byte(&mut self) -> Option<u8> {
        self.skip_consumed();
        let (_, payload) = self.transport.rx_payload()?;
        let byte = payload[self.rx_offset];
        self.rx_offset += 1;
        self.skip_consumed();
        Some(byte)
    }

    /// Drain all currently readable bytes into `buf`; returns the count.
    pub fn rx_receive(&mut self, buf: &mut [u8]) -> usize {
        let mut count = 0;
        while count < buf.len() {
            match self.rx_receive_byte() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Main-loop housekeeping: send partially filled data when the
    /// transport is idle enough, then any pending control signals.
    pub fn service(&mut self) {
        if self.tx_loaded > 0 && self.transport.tx_queued() <= TX_FLUSH_THRESHOLD {
            self.flush_data();
        }
        if let Some(signals) = self.tx_signals {
            if self.tx_loaded == 0 && self.send_control(signals) {
                self.tx_signals = None;
            }
        }
        self.skip_consumed();
    }

    fn flush_data(&mut self) {
        match self.transport.tx_send(self.tx_loaded, DATA_PAYLOAD_TYPE) {
            Ok(()) => {
                trace!("com: sent {} bytes", self.tx_loaded);
                self.tx_loaded = 0;
            }
            Err(e) => trace!("com: flush failed: {}", e),
        }
    }

    fn send_control(&mut self, signals: u8) -> bool {
        let Some(payload) = self.transport.tx_payload_mut() else {
            return false;
        };
        payload[0] = signals;
        self.transport.tx_send(1, CONTROL_PAYLOAD_TYPE).is_ok()
    }

    /// Release exhausted data packets and absorb control packets at the
    /// head of the receive queue.
    fn skip_consumed(&mut self) {
        while let Some((payload_type, payload)) = self.transport.rx_payload() {
            if payload_type == CONTROL_PAYLOAD_TYPE {
                if let Some(&signals) = payload.first() {
                    self.rx_signals = signals;
                }
            } else if self.rx_offset < payload.len() {
                return;
            }
            self.transport.rx_done();
            self.rx_offset = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory transport: sent packets appear in `sent`, `inbox` feeds
    /// the receive side.
    #[derive(Default)]
    struct Loopback {
        slots: usize,
        queued: usize,
        buffer: [u8; 4],
        sent: Vec<(u8, Vec<u8>)>,
        inbox: VecDeque<(u8, Vec<u8>)>,
    }

    #[derive(Debug)]
    struct Full;

    impl std::fmt::Display for Full {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "full")
        }
    }

    impl std::error::Error for Full {}

    impl PacketTransport for Loopback {
        type Error = Full;

        const PAYLOAD_CAPACITY: usize = 4;

        fn tx_available(&self) -> usize {
            self.slots - self.queued
        }

        fn tx_queued(&self) -> usize {
            self.queued
        }

        fn tx_payload_mut(&mut self) -> Option<&mut [u8]> {
            (self.queued < self.slots).then_some(&mut self.buffer[..])
        }

        fn tx_send(&mut self, len: usize, payload_type: u8) -> Result<(), Full> {
            if self.queued == self.slots {
                return Err(Full);
            }
            self.queued += 1;
            self.sent.push((payload_type, self.buffer[..len].to_vec()));
            Ok(())
        }

        fn rx_payload(&self) -> Option<(u8, &[u8])> {
            self.inbox.front().map(|(t, p)| (*t, p.as_slice()))
        }

        fn rx_done(&mut self) {
            self.inbox.pop_front();
        }
    }

    fn com(slots: usize) -> RadioCom<Loopback> {
        RadioCom::new(Loopback {
            slots,
            ..Default::default()
        })
    }

    #[test]
    fn test_full_packet_sent_immediately() {
        let mut com = com(2);
        assert_eq!(com.tx_available(), 8);
        assert_eq!(com.tx_send(b"abcd"), 4);
        assert_eq!(com.transport().sent, vec![(DATA_PAYLOAD_TYPE, b"abcd".to_vec())]);
        assert_eq!(com.tx_available(), 4);
    }

    #[test]
    fn test_partial_packet_flushed_when_idle() {
        let mut com = com(2);
        com.tx_send(b"ab");
        assert!(com.transport().sent.is_empty());
        assert_eq!(com.tx_available(), 6);
        com.service();
        assert_eq!(com.transport().sent, vec![(0, b"ab".to_vec())]);
    }

    #[test]
    fn test_partial_packet_held_while_backlogged() {
        let mut com = com(3);
        com.tx_send(b"abcdef");
        assert_eq!(com.transport().tx_queued(), 1);
        com.service();
        assert_eq!(com.transport().sent.len(), 1);

        // Backlog drains: the partial packet goes out
        com.transport_mut().queued = 0;
        com.service();
        assert_eq!(com.transport().sent[1], (0, b"ef".to_vec()));
    }

    #[test]
    fn test_full_when_no_buffers() {
        let mut com = com(1);
        assert_eq!(com.tx_send(b"abcdefg"), 4);
        assert_eq!(com.tx_available(), 0);
        assert_eq!(com.tx_send_byte(b'x'), Err(ComError::Full));
    }

    #[test]
    fn test_receive_bytes_across_packets() {
        let mut com = com(1);
        com.transport_mut().inbox.push_back((0, b"hel".to_vec()));
        com.transport_mut().inbox.push_back((0, b"lo".to_vec()));

        assert_eq!(com.rx_available(), 3);
        assert_eq!(com.rx_receive_byte(), Some(b'h'));
        assert_eq!(com.rx_available(), 2);

        let mut buf = [0u8; 16];
        assert_eq!(com.rx_receive(&mut buf), 4);
        assert_eq!(&buf[..4], b"ello");
        assert_eq!(com.rx_available(), 0);
        assert_eq!(com.rx_receive_byte(), None);
        assert!(com.transport().inbox.is_empty());
    }

    #[test]
    fn test_control_signals() {
        let mut com = com(2);
        com.tx_control_signals(0b11);
        com.service();
        assert_eq!(com.transport().sent, vec![(CONTROL_PAYLOAD_TYPE, vec![0b11])]);

        com.transport_mut().inbox.push_back((CONTROL_PAYLOAD_TYPE, vec![0b10]));
        com.transport_mut().inbox.push_back((0, b"z".to_vec()));
        assert_eq!(com.rx_receive_byte(), Some(b'z'));
        assert_eq!(com.rx_control_signals(), 0b10);
    }

    #[test]
    fn test_control_waits_for_pending_data() {
        let mut com = com(1);
        com.tx_send(b"ab");
        com.tx_control_signals(1);
        com.service();
        // Data flushed first; no buffer left for the control packet
        assert_eq!(com.transport().sent, vec![(0, b"ab".to_vec())]);

        com.transport_mut().queued = 0;
        com.service();
        assert_eq!(com.transport().sent[1], (CONTROL_PAYLOAD_TYPE, vec![1]));
    }
}
