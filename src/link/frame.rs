//! Link frame header.
//!
//! ```text
//! frame:  [length][header][payload: 0..=18]
//! header:  7 6 | 5 4 3 2 1      | 0
//!          type| payload type   | sequence
//! ```

use crate::radio::FRAME_CAPACITY;

/// Largest length byte a Link frame uses (header included).
pub const LINK_FRAME_LENGTH: usize = FRAME_CAPACITY - 1;

/// Payload bytes per Link frame.
pub const LINK_PAYLOAD_CAPACITY: usize = LINK_FRAME_LENGTH - 1;

/// Number of distinct payload types.
pub const PAYLOAD_TYPES: u8 = 32;

/// What a frame says about the last frame it received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Nothing to acknowledge.
    Ping = 0,
    /// The last data frame was refused; send it again later.
    Nak = 1,
    /// The last data frame was accepted (or already had been).
    Ack = 2,
    /// The sender restarted; its sequence bit starts over.
    Reset = 3,
}

impl FrameType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => Self::Nak,
            2 => Self::Ack,
            3 => Self::Reset,
            _ => Self::Ping,
        }
    }
}

/// Decoded header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Frame type.
    pub frame_type: FrameType,
    /// Application payload type, 0..32.
    pub payload_type: u8,
    /// Sequence bit of the carried data.
    pub sequence: bool,
}

impl Header {
    /// Header of a standalone response frame.
    pub fn response(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            payload_type: 0,
            sequence: false,
        }
    }

    /// Decode a header byte.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            frame_type: FrameType::from_bits(byte >> 6),
            payload_type: (byte >> 1) & 0x1F,
            sequence: byte & 0x01 != 0,
        }
    }

    /// Encode to a header byte.
    pub fn to_byte(self) -> u8 {
        (self.frame_type as u8) << 6 | (self.payload_type & 0x1F) << 1 | self.sequence as u8
    }
}
