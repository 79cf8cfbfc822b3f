//! Fixed-size packet buffer shared by every layer.
//!
//! Layout:
//!
//! ```text
//! [length][frame bytes: length <= 20][rssi][lqi|crc]
//! ```
//!
//! Byte 0 counts the frame bytes that follow it. The two status bytes are
//! only meaningful after a reception, where the transceiver writes them
//! directly after the frame. Buffers never grow or shrink; they are
//! allocated once and reused.

use super::settings::{RxStatus, MAX_FRAME_LENGTH};

/// Number of frame bytes a packet can hold after the length byte.
pub const FRAME_CAPACITY: usize = MAX_FRAME_LENGTH as usize;

/// Number of status bytes appended by the transceiver.
pub const STATUS_LEN: usize = 2;

/// Total buffer size in bytes.
pub const PACKET_SIZE: usize = 1 + FRAME_CAPACITY + STATUS_LEN;

/// A radio packet buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: [u8; PACKET_SIZE],
}

impl Packet {
    /// Create an empty packet (length = 0).
    pub const fn new() -> Self {
        Self {
            bytes: [0; PACKET_SIZE],
        }
    }

    /// Number of frame bytes following the length byte.
    pub fn len(&self) -> usize {
        (self.bytes[0] as usize).min(FRAME_CAPACITY)
    }

    /// Return `true` if the frame carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the length byte, clamped to [`FRAME_CAPACITY`].
    pub fn set_len(&mut self, len: usize) {
        self.bytes[0] = len.min(FRAME_CAPACITY) as u8;
    }

    /// Bytes that go on the air: length byte plus frame.
    pub fn frame(&self) -> &[u8] {
        &self.bytes[..1 + self.len()]
    }

    /// Frame bytes without the length byte.
    pub fn data(&self) -> &[u8] {
        &self.bytes[1..1 + self.len()]
    }

    /// The whole writable frame area, independent of the current length.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[1..1 + FRAME_CAPACITY]
    }

    /// Status bytes appended after the frame by the receiver.
    pub fn status(&self) -> RxStatus {
        let at = 1 + self.len();
        RxStatus::from_bytes([self.bytes[at], self.bytes[at + 1]])
    }

    /// Write a received frame (length byte included) and its status bytes.
    ///
    /// Frames longer than the buffer are truncated, which the caller sees as
    /// a CRC failure because the status is rewritten with the CRC bit clear.
    pub fn load_received(&mut self, frame: &[u8], status: RxStatus) {
        let well_formed = !frame.is_empty()
            && frame[0] as usize + 1 == frame.len()
            && frame[0] as usize <= FRAME_CAPACITY;
        let status = if well_formed {
            status
        } else {
            RxStatus {
                lqi_crc: status.lqi_crc & 0x7F,
                ..status
            }
        };
        let len = frame.len().saturating_sub(1).min(FRAME_CAPACITY);
        if len > 0 {
            self.bytes[1..1 + len].copy_from_slice(&frame[1..1 + len]);
        }
        self.bytes[0] = len as u8;
        let [rssi, lqi] = status.to_bytes();
        self.bytes[1 + len] = rssi;
        self.bytes[2 + len] = lqi;
    }

    /// Replace the frame contents.
    pub fn set_data(&mut self, data: &[u8]) -> usize {
        let len = data.len().min(FRAME_CAPACITY);
        self.bytes[1..1 + len].copy_from_slice(&data[..len]);
        self.bytes[0] = len as u8;
        len
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len())
            .field("data", &self.data())
            .finish()
    }
}
