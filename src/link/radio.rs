//! Interrupt-side half of the Radio Link.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, trace};

use super::frame::{FrameType, Header};
use super::LinkShared;
use crate::radio::{Backoff, MacEvent, MacEventHandler, NextTransfer, Packet, RxTimeout};

/// Buffers the link hands to the MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkBuffer {
    /// Receive ring slot.
    Rx(usize),
    /// Transmit ring slot.
    Tx(usize),
    /// The link's own standalone ACK/NAK frame.
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Accepted {
    sequence: bool,
    reset: bool,
}

/// Link protocol state machine, driven by MAC events.
pub struct LinkRadio {
    shared: Arc<LinkShared>,
    last_accepted: Option<Accepted>,
    response: Option<FrameType>,
    awaiting_ack: bool,
    sending_reset: bool,
    in_flight: Option<LinkBuffer>,
    backoff: Backoff,
    response_frame: Packet,
}

impl LinkRadio {
    pub(super) fn new(shared: Arc<LinkShared>, backoff_seed: u32) -> Self {
        Self {
            shared,
            last_accepted: None,
            response: None,
            awaiting_ack: false,
            sending_reset: false,
            in_flight: None,
            backoff: Backoff::new(backoff_seed),
            response_frame: Packet::new(),
        }
    }

    /// Whether the head transmit buffer has been sent and awaits an ACK.
    pub fn awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    fn tx_pending(&self) -> bool {
        self.shared.tx.pending() > 0
    }

    fn retry_timeout(&mut self) -> Option<RxTimeout> {
        if self.tx_pending() {
            Some(self.backoff.link_retry())
        } else {
            None
        }
    }

    fn listen(&mut self, next: &mut NextTransfer<LinkBuffer>, timeout: Option<RxTimeout>) {
        let buffer = LinkBuffer::Rx(self.shared.rx.fill_index());
        self.in_flight = Some(buffer);
        next.start_receive(buffer, timeout);
    }

    fn on_receive(&mut self, next: &mut NextTransfer<LinkBuffer>) {
        let index = self.shared.rx.fill_index();
        let (crc_ok, len, first) = {
            // SAFETY: the fill slot belongs to the radio until `commit`
            let packet = unsafe { self.shared.rx.slot(index) };
            (packet.status().crc_ok(), packet.len(), packet.data().first().copied())
        };

        let header = match first {
            Some(byte) if crc_ok => Header::from_byte(byte),
            _ => {
                self.shared.stats().crc_failures.incr();
                trace!("link: bad frame ignored");
                let timeout = self.retry_timeout();
                self.listen(next, timeout);
                return;
            }
        };
        self.shared.stats().frames_received.incr();

        if header.frame_type == FrameType::Ack && self.awaiting_ack {
            self.free_head();
        }

        if len > 1 {
            self.accept(header);
        }

        // Send now if we owe an answer or have fresh data; otherwise give
        // the peer a chance before retransmitting.
        if self.response.is_some() || (self.tx_pending() && !self.awaiting_ack) {
            self.take_initiative(next);
        } else {
            let timeout = self.retry_timeout();
            self.listen(next, timeout);
        }
    }

    /// Decide what to do with a data frame sitting in the fill slot.
    fn accept(&mut self, header: Header) {
        let stats = self.shared.stats();
        let reset = header.frame_type == FrameType::Reset;
        let duplicate = self
            .last_accepted
            .is_some_and(|last| last.sequence == header.sequence && (last.reset || !reset));

        if duplicate {
            stats.duplicates.incr();
            trace!("link: duplicate seq {}", header.sequence as u8);
            self.response = Some(FrameType::Ack);
        } else if self.shared.rx.commit() {
            if reset {
                debug!("link: peer announced reset");
                stats.resets.incr();
                self.shared.reset_seen.store(true, Ordering::Release);
            }
            stats.delivered.incr();
            self.last_accepted = Some(Accepted {
                sequence: header.sequence,
                reset,
            });
            self.response = Some(FrameType::Ack);
        } else {
            trace!("link: receive ring full, refusing");
            self.response = Some(FrameType::Nak);
        }
    }

    fn free_head(&mut self) {
        let tx = &self.shared.tx;
        if let Some(head) = tx.head_index() {
            // SAFETY: the head slot belongs to the radio until `complete`
            unsafe { tx.slot_mut(head) }.set_len(0);
            tx.complete();
            self.shared.stats().acked.incr();
        }
        self.awaiting_ack = false;
        self.sending_reset = false;
    }

    fn on_transmitted(&mut self, next: &mut NextTransfer<LinkBuffer>) {
        if let Some(LinkBuffer::Tx(_)) = self.in_flight {
            self.awaiting_ack = true;
        }
        let timeout = self.retry_timeout();
        self.listen(next, timeout);
    }

    fn take_response(&mut self) -> Option<FrameType> {
        let response = self.response.take()?;
        let stats = self.shared.stats();
        match response {
            FrameType::Nak => stats.naks_sent.incr(),
            _ => stats.acks_sent.incr(),
        }
        Some(response)
    }

    fn send_response(&mut self, next: &mut NextTransfer<LinkBuffer>, response: FrameType) {
        self.response_frame
            .set_data(&[Header::response(response).to_byte()]);
        self.shared.stats().standalone_responses.incr();
        self.in_flight = Some(LinkBuffer::Response);
        next.start_transmit(LinkBuffer::Response);
    }

    /// Transmit whatever is due: the head data frame (carrying any owed
    /// response), a standalone response, or nothing and listen.
    fn take_initiative(&mut self, next: &mut NextTransfer<LinkBuffer>) {
        let Some(head) = self.shared.tx.head_index() else {
            match self.take_response() {
                Some(response) => self.send_response(next, response),
                None => self.listen(next, None),
            }
            return;
        };

        if !self.awaiting_ack
            && !self.sending_reset
            && self.shared.reset_requested.swap(false, Ordering::AcqRel)
        {
            self.sending_reset = true;
        }

        // A RESET frame cannot also carry a response
        if self.sending_reset && self.response.is_some() {
            if let Some(response) = self.take_response() {
                self.send_response(next, response);
            }
            return;
        }

        let frame_type = match self.take_response() {
            Some(response) => response,
            None if self.sending_reset => FrameType::Reset,
            None => FrameType::Ping,
        };
        let sequence = self.shared.tx.completed() & 1 == 1;

        // SAFETY: the head slot belongs to the radio until `complete`
        let packet = unsafe { self.shared.tx.slot_mut(head) };
        let mut header = Header::from_byte(packet.data()[0]);
        header.frame_type = frame_type;
        header.sequence = sequence;
        packet.data_mut()[0] = header.to_byte();

        let stats = self.shared.stats();
        stats.frames_sent.incr();
        if self.awaiting_ack {
            stats.retransmissions.incr();
        }
        trace!("link: send {:?} seq {}", frame_type, sequence as u8);

        self.in_flight = Some(LinkBuffer::Tx(head));
        next.start_transmit(LinkBuffer::Tx(head));
    }
}

impl MacEventHandler for LinkRadio {
    type Buffer = LinkBuffer;

    fn on_event(&mut self, event: MacEvent, next: &mut NextTransfer<LinkBuffer>) {
        match event {
            MacEvent::RxComplete => self.on_receive(next),
            MacEvent::TxComplete => self.on_transmitted(next),
            MacEvent::RxTimeout | MacEvent::Strobe => self.take_initiative(next),
        }
    }

    fn buffer(&mut self, id: LinkBuffer) -> &mut Packet {
        match id {
            // SAFETY: the MAC only names buffers this side armed, which are
            // radio-owned while the transfer is in flight
            LinkBuffer::Rx(index) => unsafe { self.shared.rx.slot_mut(index) },
            LinkBuffer::Tx(index) => unsafe { self.shared.tx.slot_mut(index) },
            LinkBuffer::Response => &mut self.response_frame,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{Link, LinkError};
    use crate::radio::{MacHandle, RxStatus, Transfer};

    fn pair() -> (Link, LinkRadio) {
        Link::new(MacHandle::new(), 7)
    }

    fn run(radio: &mut LinkRadio, event: MacEvent) -> Transfer<LinkBuffer> {
        let mut next = NextTransfer::new();
        radio.on_event(event, &mut next);
        *next.choice().expect("link always chooses a transfer")
    }

    /// Deliver `frame` (length byte first) into the armed receive slot.
    fn receive(radio: &mut LinkRadio, frame: &[u8], crc_ok: bool) -> Transfer<LinkBuffer> {
        let index = radio.shared.rx.fill_index();
        radio
            .buffer(LinkBuffer::Rx(index))
            .load_received(frame, RxStatus::new(-50, 5, crc_ok));
        run(radio, MacEvent::RxComplete)
    }

    fn sent_header(radio: &mut LinkRadio, transfer: Transfer<LinkBuffer>) -> Header {
        match transfer {
            Transfer::Transmit { buffer } => Header::from_byte(radio.buffer(buffer).data()[0]),
            other => panic!("expected transmit, got {:?}", other),
        }
    }

    fn data(frame_type: FrameType, sequence: bool, payload: &[u8]) -> Vec<u8> {
        let header = Header {
            frame_type,
            payload_type: 0,
            sequence,
        };
        let mut frame = vec![payload.len() as u8 + 1, header.to_byte()];
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_idle_link_listens_forever() {
        let (_link, mut radio) = pair();
        assert_eq!(
            run(&mut radio, MacEvent::Strobe),
            Transfer::Receive {
                buffer: LinkBuffer::Rx(0),
                timeout: None
            }
        );
    }

    #[test]
    fn test_send_transmits_ping_with_sequence_zero() {
        let (mut link, mut radio) = pair();
        link.send(9, b"abc").unwrap();

        let transfer = run(&mut radio, MacEvent::Strobe);
        assert_eq!(transfer, Transfer::Transmit { buffer: LinkBuffer::Tx(0) });
        let header = sent_header(&mut radio, transfer);
        assert_eq!(header.frame_type, FrameType::Ping);
        assert_eq!(header.payload_type, 9);
        assert!(!header.sequence);

        // After sending, listen for the ACK with a retry timeout
        match run(&mut radio, MacEvent::TxComplete) {
            Transfer::Receive { timeout, .. } => assert!(timeout.is_some()),
            other => panic!("expected receive, got {:?}", other),
        }
        assert!(radio.awaiting_ack());
    }

    #[test]
    fn test_ack_frees_buffer_and_toggles_sequence() {
        let (mut link, mut radio) = pair();
        link.send(0, b"one").unwrap();
        link.send(0, b"two").unwrap();
        run(&mut radio, MacEvent::Strobe);
        run(&mut radio, MacEvent::TxComplete);
        assert_eq!(link.tx_available(), 0);

        // ACK frees slot 0 and the second packet goes out immediately
        let transfer = receive(&mut radio, &[1, Header::response(FrameType::Ack).to_byte()], true);
        assert_eq!(link.tx_available(), 1);
        assert_eq!(transfer, Transfer::Transmit { buffer: LinkBuffer::Tx(1) });
        assert!(sent_header(&mut radio, transfer).sequence);
    }

    #[test]
    fn test_ack_without_outstanding_data_ignored() {
        let (mut link, mut radio) = pair();
        link.send(0, b"one").unwrap();
        // Not yet transmitted: a stray ACK must not free it
        receive(&mut radio, &[1, Header::response(FrameType::Ack).to_byte()], true);
        assert_eq!(link.tx_queued(), 1);
    }

    #[test]
    fn test_timeout_retransmits() {
        let (mut link, mut radio) = pair();
        link.send(0, b"x").unwrap();
        run(&mut radio, MacEvent::Strobe);
        run(&mut radio, MacEvent::TxComplete);

        let transfer = run(&mut radio, MacEvent::RxTimeout);
        assert_eq!(transfer, Transfer::Transmit { buffer: LinkBuffer::Tx(0) });
        assert!(!sent_header(&mut radio, transfer).sequence);
        assert_eq!(link.stats().retransmissions.get(), 1);
    }

    #[test]
    fn test_nak_waits_before_retrying() {
        let (mut link, mut radio) = pair();
        link.send(0, b"x").unwrap();
        run(&mut radio, MacEvent::Strobe);
        run(&mut radio, MacEvent::TxComplete);

        match receive(&mut radio, &[1, Header::response(FrameType::Nak).to_byte()], true) {
            Transfer::Receive { timeout, .. } => assert!(timeout.is_some()),
            other => panic!("expected receive, got {:?}", other),
        }
        assert_eq!(link.tx_queued(), 1);
    }

    #[test]
    fn test_receive_data_answers_ack() {
        let (link, mut radio) = pair();
        let transfer = receive(&mut radio, &data(FrameType::Ping, false, b"hi"), true);
        assert_eq!(transfer, Transfer::Transmit { buffer: LinkBuffer::Response });
        assert_eq!(radio.buffer(LinkBuffer::Response).len(), 1);
        assert_eq!(sent_header(&mut radio, transfer).frame_type, FrameType::Ack);

        assert_eq!(link.rx_available(), 1);
        let packet = link.rx_current_packet().unwrap();
        assert_eq!(packet.payload(), b"hi");
        assert_eq!(packet.rssi_dbm(), -50);
        assert_eq!(packet.lqi(), 5);
        assert!(packet.crc_ok());
    }

    #[test]
    fn test_duplicate_acked_not_delivered() {
        let (link, mut radio) = pair();
        receive(&mut radio, &data(FrameType::Ping, false, b"hi"), true);
        run(&mut radio, MacEvent::TxComplete);

        let transfer = receive(&mut radio, &data(FrameType::Ping, false, b"hi"), true);
        assert_eq!(sent_header(&mut radio, transfer).frame_type, FrameType::Ack);
        assert_eq!(link.rx_available(), 1);
        assert_eq!(link.stats().duplicates.get(), 1);

        receive(&mut radio, &data(FrameType::Ping, true, b"ho"), true);
        assert_eq!(link.rx_available(), 2);
    }

    #[test]
    fn test_full_ring_answers_nak() {
        let (mut link, mut radio) = pair();
        receive(&mut radio, &data(FrameType::Ping, false, b"1"), true);
        receive(&mut radio, &data(FrameType::Ping, true, b"2"), true);
        let transfer = receive(&mut radio, &data(FrameType::Ping, false, b"3"), true);
        assert_eq!(sent_header(&mut radio, transfer).frame_type, FrameType::Nak);
        assert_eq!(link.rx_available(), 2);

        // Once the consumer frees a slot the retransmission is accepted
        link.rx_done_with_packet();
        let transfer = receive(&mut radio, &data(FrameType::Ping, false, b"3"), true);
        assert_eq!(sent_header(&mut radio, transfer).frame_type, FrameType::Ack);
        assert_eq!(link.rx_available(), 2);
        assert_eq!(link.rx_current_packet().unwrap().payload(), b"2");
    }

    #[test]
    fn test_crc_failure_ignored() {
        let (link, mut radio) = pair();
        let transfer = receive(&mut radio, &data(FrameType::Ping, false, b"bad"), false);
        assert!(matches!(transfer, Transfer::Receive { timeout: None, .. }));
        assert_eq!(link.rx_available(), 0);
        assert_eq!(link.stats().crc_failures.get(), 1);
    }

    #[test]
    fn test_crc_failure_with_pending_data_schedules_retry() {
        let (mut link, mut radio) = pair();
        link.send(0, b"x").unwrap();
        run(&mut radio, MacEvent::Strobe);
        run(&mut radio, MacEvent::TxComplete);

        match receive(&mut radio, &data(FrameType::Ack, true, b"bad"), false) {
            Transfer::Receive {
                timeout: Some(timeout),
                ..
            } => assert!((16..=136).contains(&timeout.units())),
            other => panic!("expected receive with timeout, got {:?}", other),
        }
        // A corrupted ACK frees nothing
        assert_eq!(link.tx_queued(), 1);
        assert_eq!(link.rx_available(), 0);
    }

    #[test]
    fn test_empty_frame_ignored() {
        let (link, mut radio) = pair();
        receive(&mut radio, &[0], true);
        assert_eq!(link.rx_available(), 0);
    }

    #[test]
    fn test_response_piggybacks_on_data() {
        let (mut link, mut radio) = pair();
        link.send(0, b"mine").unwrap();
        let transfer = receive(&mut radio, &data(FrameType::Ping, false, b"yours"), true);
        assert_eq!(transfer, Transfer::Transmit { buffer: LinkBuffer::Tx(0) });
        assert_eq!(sent_header(&mut radio, transfer).frame_type, FrameType::Ack);
        assert_eq!(link.stats().standalone_responses.get(), 0);
    }

    #[test]
    fn test_reset_announcement() {
        let (mut link, mut radio) = pair();
        link.announce_reset();
        link.send(0, b"boot").unwrap();
        let transfer = run(&mut radio, MacEvent::Strobe);
        assert_eq!(sent_header(&mut radio, transfer).frame_type, FrameType::Reset);

        // Retransmissions stay RESET until acknowledged
        run(&mut radio, MacEvent::TxComplete);
        let transfer = run(&mut radio, MacEvent::RxTimeout);
        assert_eq!(sent_header(&mut radio, transfer).frame_type, FrameType::Reset);

        run(&mut radio, MacEvent::TxComplete);
        receive(&mut radio, &[1, Header::response(FrameType::Ack).to_byte()], true);
        link.send(0, b"next").unwrap();
        let transfer = run(&mut radio, MacEvent::Strobe);
        assert_eq!(sent_header(&mut radio, transfer).frame_type, FrameType::Ping);
    }

    #[test]
    fn test_reset_received_restarts_sequence() {
        let (link, mut radio) = pair();
        receive(&mut radio, &data(FrameType::Ping, false, b"a"), true);
        // Peer restarted: its first frame reuses sequence 0
        receive(&mut radio, &data(FrameType::Reset, false, b"b"), true);
        assert_eq!(link.rx_available(), 2);
        assert!(link.take_reset_flag());
        assert!(!link.take_reset_flag());

        // A repeat of the RESET frame is a duplicate
        let mut link = link;
        link.rx_done_with_packet();
        receive(&mut radio, &data(FrameType::Reset, false, b"b"), true);
        assert_eq!(link.rx_available(), 1);
        assert!(!link.take_reset_flag());
    }

    #[test]
    fn test_tx_available_increases_only_on_ack() {
        let (mut link, mut radio) = pair();
        link.send(0, b"x").unwrap();
        assert_eq!(link.tx_available(), 1);
        run(&mut radio, MacEvent::Strobe);
        run(&mut radio, MacEvent::TxComplete);
        assert_eq!(link.tx_available(), 1);
        run(&mut radio, MacEvent::RxTimeout);
        run(&mut radio, MacEvent::TxComplete);
        assert_eq!(link.tx_available(), 1);
        receive(&mut radio, &[1, Header::response(FrameType::Ack).to_byte()], true);
        assert_eq!(link.tx_available(), 2);
        assert_eq!(link.send(0, b""), Err(LinkError::EmptyPayload));
    }
}
