//! Frame time-on-air.
//!
//! MSK sends one bit per symbol, so airtime is just the number of bits on
//! the air divided by the data rate. A frame on the air is:
//!
//! ```text
//! [preamble: 4][sync word: 4][length: 1][frame: length][crc: 2]
//! ```
//!
//! # Example
//!
//! ```
//! use radiolink::radio::{frame_airtime_us, AirParams};
//!
//! let params = AirParams::default();
//! let airtime = frame_airtime_us(20, &params);
//! println!("full frame takes {} us", airtime);
//! ```

use super::settings::DATA_RATE_BPS;

/// Parameters that determine how long a frame occupies the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AirParams {
    /// Bits per second.
    pub data_rate_bps: u32,
    /// Preamble length in bytes.
    pub preamble_bytes: u8,
    /// Sync word length in bytes.
    pub sync_bytes: u8,
    /// Whether a 16-bit CRC is appended.
    pub crc_enabled: bool,
}

impl Default for AirParams {
    fn default() -> Self {
        Self {
            data_rate_bps: DATA_RATE_BPS,
            preamble_bytes: 4,
            sync_bytes: 4,
            crc_enabled: true,
        }
    }
}

impl AirParams {
    /// Duration of one byte in nanoseconds.
    pub fn byte_duration_ns(&self) -> u64 {
        if self.data_rate_bps == 0 {
            return 0;
        }
        8 * 1_000_000_000 / self.data_rate_bps as u64
    }

    /// Bytes on the air for a frame whose length byte is `frame_len`.
    pub fn bytes_on_air(&self, frame_len: usize) -> usize {
        let crc = if self.crc_enabled { 2 } else { 0 };
        self.preamble_bytes as usize + self.sync_bytes as usize + 1 + frame_len + crc
    }
}

/// Airtime in microseconds of a frame carrying `frame_len` bytes after the
/// length byte. Rounded up so back-to-back frames never overlap.
pub fn frame_airtime_us(frame_len: usize, params: &AirParams) -> u64 {
    if params.data_rate_bps == 0 {
        return 0;
    }
    let bits = params.bytes_on_air(frame_len) as u64 * 8;
    (bits * 1_000_000).div_ceil(params.data_rate_bps as u64)
}
