//! Radio register configuration.
//!
//! One-time setup of the transceiver: carrier frequency, MSK modulation at
//! 350 kbit/s, packet handling (variable length, CRC, appended status bytes)
//! and the optional hardware address filter. Everything here is computed from
//! a handful of constants so it can be checked on the host.
//!
//! The transceiver appends two status bytes to every received frame:
//!
//! ```text
//! [rssi: i8 raw][crc_ok: 1 bit | lqi: 7 bits]
//! ```
//!
//! [`RxStatus`] decodes them.

/// Crystal frequency in Hz.
pub const XTAL_HZ: u64 = 24_000_000;

/// Carrier frequency of channel 0 in Hz.
pub const BASE_FREQUENCY_HZ: u64 = 2_403_470_000;

/// Spacing between adjacent channels in Hz.
pub const CHANNEL_SPACING_HZ: u64 = 286_700;

/// Over-the-air data rate in bits per second.
pub const DATA_RATE_BPS: u32 = 350_000;

/// Largest value the length byte of a frame may hold.
pub const MAX_FRAME_LENGTH: u8 = 20;

/// Offset subtracted from the halved raw RSSI to get dBm.
const RSSI_OFFSET_DB: i16 = 71;

/// Transceiver configuration registers touched during setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// Frequency control word, high byte.
    Freq2,
    /// Frequency control word, middle byte.
    Freq1,
    /// Frequency control word, low byte.
    Freq0,
    /// Channel number.
    Channr,
    /// Maximum packet length in variable-length mode.
    Pktlen,
    /// Packet automation control 1 (status append, address check).
    Pktctrl1,
    /// Packet automation control 0 (CRC, length mode).
    Pktctrl0,
    /// Device address for hardware filtering.
    Addr,
    /// Modem configuration 4 (channel bandwidth, data rate exponent).
    Mdmcfg4,
    /// Modem configuration 3 (data rate mantissa).
    Mdmcfg3,
    /// Modem configuration 2 (modulation format, sync mode).
    Mdmcfg2,
    /// Modem configuration 1 (preamble bytes, channel spacing exponent).
    Mdmcfg1,
    /// Modem configuration 0 (channel spacing mantissa).
    Mdmcfg0,
    /// Main radio control state machine configuration 1.
    Mcsm1,
    /// Main radio control state machine configuration 0.
    Mcsm0,
}

/// A single register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    /// Register to write.
    pub register: Register,
    /// Value to write.
    pub value: u8,
}

impl RegisterWrite {
    const fn new(register: Register, value: u8) -> Self {
        Self { register, value }
    }
}

/// Address filter applied by the transceiver to the first frame byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFilter {
    /// Accept every frame.
    #[default]
    Disabled,
    /// Accept frames addressed to this address or to broadcast address 0.
    Address(u8),
}

impl AddressFilter {
    /// Whether a frame whose first byte is `first_byte` passes the filter.
    pub fn accepts(self, first_byte: u8) -> bool {
        match self {
            Self::Disabled => true,
            Self::Address(address) => first_byte == address || first_byte == 0,
        }
    }
}

/// Radio settings chosen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioSettings {
    /// Channel number (0-255); must match between communicating peers.
    pub channel: u8,
    /// Hardware address filter.
    pub address_filter: AddressFilter,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            channel: 128,
            address_filter: AddressFilter::Disabled,
        }
    }
}

impl RadioSettings {
    /// Settings for the given channel with no address filtering.
    pub fn with_channel(channel: u8) -> Self {
        Self {
            channel,
            ..Default::default()
        }
    }

    /// Carrier frequency of the configured channel in Hz.
    pub fn frequency_hz(&self) -> u64 {
        BASE_FREQUENCY_HZ + self.channel as u64 * CHANNEL_SPACING_HZ
    }

    /// The 24-bit frequency control word for the base frequency.
    ///
    /// `FREQ = f_carrier * 2^16 / f_xtal`
    pub fn frequency_word(&self) -> u32 {
        ((BASE_FREQUENCY_HZ << 16) / XTAL_HZ) as u32
    }

    /// Register writes that bring the transceiver into the configured state.
    pub fn registers(&self) -> [RegisterWrite; 15] {
        let freq = self.frequency_word();
        let (address_check, address) = match self.address_filter {
            AddressFilter::Disabled => (0x00, 0x00),
            // ADR_CHK = 10: check address, accept 0x00 as broadcast
            AddressFilter::Address(address) => (0x02, address),
        };

        [
            RegisterWrite::new(Register::Freq2, (freq >> 16) as u8),
            RegisterWrite::new(Register::Freq1, (freq >> 8) as u8),
            RegisterWrite::new(Register::Freq0, freq as u8),
            RegisterWrite::new(Register::Channr, self.channel),
            RegisterWrite::new(Register::Pktlen, MAX_FRAME_LENGTH),
            // APPEND_STATUS
            RegisterWrite::new(Register::Pktctrl1, 0x04 | address_check),
            // CRC_EN, variable length
            RegisterWrite::new(Register::Pktctrl0, 0x05),
            RegisterWrite::new(Register::Addr, address),
            // 600 kHz channel filter, DRATE_E = 13
            RegisterWrite::new(Register::Mdmcfg4, 0x1D),
            // DRATE_M = 59 -> 350 kbit/s with a 24 MHz crystal
            RegisterWrite::new(Register::Mdmcfg3, 0x3B),
            // MSK, 30/32 sync word bits
            RegisterWrite::new(Register::Mdmcfg2, 0x73),
            // 4 preamble bytes, CHANSPC_E = 3
            RegisterWrite::new(Register::Mdmcfg1, 0x23),
            // CHANSPC_M
            RegisterWrite::new(Register::Mdmcfg0, 0x11),
            // Stay in IDLE after both RX and TX; the MAC decides what is next
            RegisterWrite::new(Register::Mcsm1, 0x00),
            // Calibrate when leaving IDLE
            RegisterWrite::new(Register::Mcsm0, 0x14),
        ]
    }
}

/// Status bytes the transceiver appends to a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxStatus {
    /// Raw RSSI register value.
    pub rssi_raw: i8,
    /// Raw second status byte: CRC flag in bit 7, LQI in bits 6..0.
    pub lqi_crc: u8,
}

impl RxStatus {
    const CRC_OK: u8 = 0x80;
    const LQI_MASK: u8 = 0x7F;

    /// Build status bytes from decoded values (used by simulated hardware).
    pub fn new(rssi_dbm: i16, lqi: u8, crc_ok: bool) -> Self {
        let raw = ((rssi_dbm + RSSI_OFFSET_DB) * 2).clamp(i8::MIN as i16, i8::MAX as i16);
        Self {
            rssi_raw: raw as i8,
            lqi_crc: (lqi & Self::LQI_MASK) | if crc_ok { Self::CRC_OK } else { 0 },
        }
    }

    /// Decode from the two raw bytes.
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self {
            rssi_raw: bytes[0] as i8,
            lqi_crc: bytes[1],
        }
    }

    /// Encode to the two raw bytes.
    pub fn to_bytes(self) -> [u8; 2] {
        [self.rssi_raw as u8, self.lqi_crc]
    }

    /// Received signal strength in dBm.
    pub fn rssi_dbm(&self) -> i16 {
        self.rssi_raw as i16 / 2 - RSSI_OFFSET_DB
    }

    /// Link quality indicator (lower is better).
    pub fn lqi(&self) -> u8 {
        self.lqi_crc & Self::LQI_MASK
    }

    /// Whether the hardware CRC check passed.
    pub fn crc_ok(&self) -> bool {
        self.lqi_crc & Self::CRC_OK != 0
    }
}
