//! Simulated transceiver.
//!
//! Holds the radio state the [`SimNetwork`](super::SimNetwork) needs to
//! schedule air events: whether it is listening (and until when), about to
//! transmit, transmitting, or locked onto an incoming frame.
//!
//! Configuration goes through the same register table a hardware driver
//! would write; channel and address filtering are read back from it.

use log::trace;

use crate::radio::settings::{Register, RegisterWrite};
use crate::radio::{AddressFilter, Packet, RadioSettings, RxStatus, RxTimeout, Transceiver};

/// Delay between the strobe that starts a transmission and the first bit
/// on the air.
pub const TX_TURNAROUND_US: u64 = 80;

/// A receive timeout closer than this is reported as imminent.
pub const TIMEOUT_GUARD_US: u64 = 30;

/// What the simulated radio is doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioMode {
    /// Not started, or between transfers.
    Idle,
    /// Listening, giving up at `deadline` (virtual microseconds).
    Rx {
        /// Absolute time of the receive timeout.
        deadline: Option<u64>,
    },
    /// Transmission requested; goes on the air at `start`.
    TxPending {
        /// Absolute start time.
        start: u64,
        /// Length byte and frame.
        frame: Vec<u8>,
    },
    /// Transmitting the air transmission `id`.
    Tx {
        /// Transmission id assigned by the network.
        id: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Lock {
    pub(super) id: u64,
    pub(super) corrupt: bool,
}

/// [`Transceiver`] backed by the simulated air.
#[derive(Debug)]
pub struct SimTransceiver {
    pub(super) settings: Option<RadioSettings>,
    registers: Vec<RegisterWrite>,
    pub(super) now: u64,
    pub(super) mode: RadioMode,
    pub(super) lock: Option<Lock>,
    pub(super) received: Option<(Vec<u8>, RxStatus)>,
}

impl Default for SimTransceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTransceiver {
    /// Unconfigured transceiver in IDLE.
    pub fn new() -> Self {
        Self {
            settings: None,
            registers: Vec::new(),
            now: 0,
            mode: RadioMode::Idle,
            lock: None,
            received: None,
        }
    }

    /// Settings applied by the MAC, once started.
    pub fn settings(&self) -> Option<&RadioSettings> {
        self.settings.as_ref()
    }

    /// Current mode.
    pub fn mode(&self) -> &RadioMode {
        &self.mode
    }

    /// Whether the transceiver is listening.
    pub fn is_receiving(&self) -> bool {
        matches!(self.mode, RadioMode::Rx { .. })
    }

    /// Last value written to `register`.
    pub fn register(&self, register: Register) -> Option<u8> {
        self.registers
            .iter()
            .rev()
            .find(|write| write.register == register)
            .map(|write| write.value)
    }

    pub(super) fn channel(&self) -> Option<u8> {
        self.register(Register::Channr)
    }

    /// Address filter as configured in PKTCTRL1 and ADDR.
    pub fn address_filter(&self) -> AddressFilter {
        match (self.register(Register::Pktctrl1), self.register(Register::Addr)) {
            (Some(ctrl), Some(address)) if ctrl & 0x03 != 0 => AddressFilter::Address(address),
            _ => AddressFilter::Disabled,
        }
    }

    /// Time the receive timeout should fire, unless a frame is arriving.
    pub(super) fn pending_timeout(&self) -> Option<u64> {
        match self.mode {
            RadioMode::Rx {
                deadline: Some(deadline),
            } if self.lock.is_none() => Some(deadline),
            _ => None,
        }
    }

    pub(super) fn pending_tx_start(&self) -> Option<u64> {
        match self.mode {
            RadioMode::TxPending { start, .. } => Some(start),
            _ => None,
        }
    }
}

impl Transceiver for SimTransceiver {
    fn configure(&mut self, settings: &RadioSettings) {
        trace!(
            "sim: configured channel {} ({} Hz)",
            settings.channel,
            settings.frequency_hz()
        );
        self.registers.clear();
        self.registers.extend(settings.registers());
        self.settings = Some(*settings);
    }

    fn idle(&mut self) {
        self.mode = RadioMode::Idle;
        self.lock = None;
    }

    fn start_tx(&mut self, packet: &Packet) {
        self.lock = None;
        self.mode = RadioMode::TxPending {
            start: self.now + TX_TURNAROUND_US,
            frame: packet.frame().to_vec(),
        };
    }

    fn start_rx(&mut self, timeout: Option<RxTimeout>) {
        self.lock = None;
        self.mode = RadioMode::Rx {
            deadline: timeout.map(|t| self.now + t.as_micros()),
        };
    }

    fn read_frame(&mut self, packet: &mut Packet) {
        match self.received.take() {
            Some((frame, status)) => packet.load_received(&frame, status),
            None => packet.load_received(&[], RxStatus::new(0, 0, false)),
        }
    }

    fn frame_in_progress(&self) -> bool {
        self.lock.is_some()
    }

    fn timeout_imminent(&self) -> bool {
        self.pending_timeout()
            .is_some_and(|deadline| deadline <= self.now + TIMEOUT_GUARD_US)
    }
}
