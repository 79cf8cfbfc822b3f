//! Radio MAC: transceiver state machine and event dispatch.
//!
//! The MAC owns the transceiver and runs in the interrupt domain. Every time
//! something happens on the radio (a frame was sent, a frame arrived, a
//! receive timed out) or the main loop asked for attention with a strobe,
//! the MAC:
//!
//! 1. puts the transceiver into IDLE, so nothing is in flight,
//! 2. clears any pending strobe,
//! 3. calls the [`MacEventHandler`] with the event,
//! 4. starts whatever transfer the handler picked through [`NextTransfer`],
//!    or an infinite receive if it picked nothing.
//!
//! The MAC knows nothing about packet contents. Buffers are named by the
//! handler's own [`MacEventHandler::Buffer`] ids, which stands in for the
//! DMA descriptor pointing at the handler's memory.
//!
//! The main loop talks to the MAC only through a [`MacHandle`]: one strobe
//! bit, the current state, and sticky FIFO error flags.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use log::{trace, warn};

use super::packet::Packet;
use super::settings::RadioSettings;
use super::timeout::RxTimeout;

/// Transceiver state as tracked by the MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MacState {
    /// Not started yet.
    Off = 0,
    /// Between transfers; only seen while the handler runs.
    Idle = 1,
    /// Receiving, possibly with a timeout.
    Rx = 2,
    /// Transmitting.
    Tx = 3,
}

impl MacState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Idle,
            2 => Self::Rx,
            3 => Self::Tx,
            _ => Self::Off,
        }
    }
}

/// Why the event handler is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacEvent {
    /// The transmitted frame left the antenna.
    TxComplete,
    /// A frame was received into the buffer the handler chose.
    RxComplete,
    /// The receive timeout expired with no frame.
    RxTimeout,
    /// The main loop requested attention.
    Strobe,
}

bitflags! {
    /// Sticky FIFO diagnostics.
    ///
    /// Not expected under correct use; recorded so they can be inspected,
    /// never cleared automatically.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MacErrors: u8 {
        /// The receive FIFO overflowed.
        const RX_OVERFLOW = 0x01;
        /// The transmit FIFO ran dry mid-frame.
        const TX_UNDERFLOW = 0x02;
    }
}

/// Downward boundary: the register-level transceiver.
///
/// On hardware this is a thin wrapper over strobes, the DMA channel and the
/// status registers. [`crate::sim::SimTransceiver`] implements it for the
/// host simulator.
pub trait Transceiver {
    /// Apply the one-time register configuration.
    fn configure(&mut self, settings: &RadioSettings);

    /// Abort any transfer and go to IDLE.
    fn idle(&mut self);

    /// Start sending `packet.frame()`.
    fn start_tx(&mut self, packet: &Packet);

    /// Start listening, giving up after `timeout` if one is given.
    fn start_rx(&mut self, timeout: Option<RxTimeout>);

    /// Copy the frame that just completed, with its status bytes, into
    /// `packet`.
    fn read_frame(&mut self, packet: &mut Packet);

    /// Whether a sync word has been seen and a frame is arriving.
    fn frame_in_progress(&self) -> bool;

    /// Whether the receive timeout is about to fire.
    fn timeout_imminent(&self) -> bool;
}

/// Upward boundary: the protocol layer driven by MAC events.
///
/// Runs in the interrupt domain: must not block and must not take a lock the
/// main loop may hold.
pub trait MacEventHandler {
    /// Identifies one of the handler's packet buffers.
    type Buffer: Copy + Debug;

    /// React to `event` and choose the next transfer on `next`.
    fn on_event(&mut self, event: MacEvent, next: &mut NextTransfer<Self::Buffer>);

    /// Resolve a buffer id to the packet it names.
    fn buffer(&mut self, id: Self::Buffer) -> &mut Packet;
}

/// The transfer a handler asks the MAC to start next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer<B> {
    /// Receive into `buffer`.
    Receive {
        /// Destination buffer.
        buffer: B,
        /// Give up after this long; `None` listens forever.
        timeout: Option<RxTimeout>,
    },
    /// Transmit `buffer`.
    Transmit {
        /// Source buffer.
        buffer: B,
    },
}

/// Collects the handler's choice of next transfer. The last call wins.
#[derive(Debug)]
pub struct NextTransfer<B> {
    choice: Option<Transfer<B>>,
}

impl<B> Default for NextTransfer<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> NextTransfer<B> {
    /// No transfer chosen yet.
    pub fn new() -> Self {
        Self { choice: None }
    }

    /// Receive into `buffer`, optionally with a timeout.
    pub fn start_receive(&mut self, buffer: B, timeout: Option<RxTimeout>) {
        self.choice = Some(Transfer::Receive { buffer, timeout });
    }

    /// Transmit `buffer`.
    pub fn start_transmit(&mut self, buffer: B) {
        self.choice = Some(Transfer::Transmit { buffer });
    }

    /// The transfer chosen so far.
    pub fn choice(&self) -> Option<&Transfer<B>> {
        self.choice.as_ref()
    }
}

#[derive(Debug)]
struct MacShared {
    strobe: AtomicBool,
    state: AtomicU8,
    errors: AtomicU8,
}

/// Main-loop side of the MAC. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MacHandle {
    shared: Arc<MacShared>,
}

impl Default for MacHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl MacHandle {
    /// Create a handle for a MAC that is still off.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(MacShared {
                strobe: AtomicBool::new(false),
                state: AtomicU8::new(MacState::Off as u8),
                errors: AtomicU8::new(0),
            }),
        }
    }

    /// Ask the MAC to call its event handler at the next safe moment.
    ///
    /// Idempotent; may be called from any thread.
    pub fn request_event(&self) {
        self.shared.strobe.store(true, Ordering::Relaxed);
    }

    /// Whether a strobe is waiting to be served.
    pub fn strobe_pending(&self) -> bool {
        self.shared.strobe.load(Ordering::Relaxed)
    }

    /// Current transceiver state.
    pub fn state(&self) -> MacState {
        MacState::from_u8(self.shared.state.load(Ordering::Relaxed))
    }

    /// Sticky FIFO errors seen so far.
    pub fn errors(&self) -> MacErrors {
        MacErrors::from_bits_truncate(self.shared.errors.load(Ordering::Relaxed))
    }

    fn clear_strobe(&self) {
        self.shared.strobe.store(false, Ordering::Relaxed);
    }

    fn set_state(&self, state: MacState) {
        self.shared.state.store(state as u8, Ordering::Relaxed);
    }

    fn record_errors(&self, errors: MacErrors) {
        self.shared.errors.fetch_or(errors.bits(), Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy)]
enum Armed<B> {
    Nothing,
    Receive(Option<B>),
    Transmit(B),
}

/// The MAC state machine.
///
/// Owned by the interrupt domain. The platform calls the `on_*` entry points
/// from its radio interrupt and [`Mac::poll_strobe`] whenever it gets a
/// chance (on hardware, from the strobe's software interrupt).
pub struct Mac<T: Transceiver, H: MacEventHandler> {
    transceiver: T,
    handler: H,
    handle: MacHandle,
    armed: Armed<H::Buffer>,
    scratch: Packet,
}

impl<T: Transceiver, H: MacEventHandler> Mac<T, H> {
    /// Build a MAC around `transceiver`, driving `handler`, signalled through
    /// `handle`.
    pub fn new(transceiver: T, handler: H, handle: MacHandle) -> Self {
        Self {
            transceiver,
            handler,
            handle,
            armed: Armed::Nothing,
            scratch: Packet::new(),
        }
    }

    /// Configure the transceiver and let the handler choose the first
    /// transfer.
    pub fn start(&mut self, settings: &RadioSettings) {
        self.transceiver.configure(settings);
        self.handle.set_state(MacState::Idle);
        self.dispatch(MacEvent::Strobe);
    }

    /// Radio interrupt: transmission finished.
    pub fn on_tx_done(&mut self) {
        if !matches!(self.armed, Armed::Transmit(_)) {
            trace!("mac: spurious tx done");
            return;
        }
        self.dispatch(MacEvent::TxComplete);
    }

    /// Radio interrupt: a frame was received.
    pub fn on_rx_done(&mut self) {
        match self.armed {
            Armed::Receive(Some(id)) => {
                self.transceiver.read_frame(self.handler.buffer(id));
                self.dispatch(MacEvent::RxComplete);
            }
            Armed::Receive(None) => {
                // Nobody provided a buffer; the frame is discarded.
                self.transceiver.read_frame(&mut self.scratch);
                trace!("mac: discarded frame of {} bytes", self.scratch.len());
                self.transceiver.idle();
                self.transceiver.start_rx(None);
                self.handle.set_state(MacState::Rx);
            }
            _ => trace!("mac: spurious rx done"),
        }
    }

    /// Radio interrupt: the receive timeout expired.
    pub fn on_rx_timeout(&mut self) {
        if !matches!(self.armed, Armed::Receive(_)) {
            trace!("mac: spurious rx timeout");
            return;
        }
        self.dispatch(MacEvent::RxTimeout);
    }

    /// Serve a pending strobe unless that would disrupt a transfer.
    ///
    /// The strobe stays pending while the radio is transmitting, while a
    /// frame is arriving, or while the receive timeout is about to fire (its
    /// own event will serve the strobe). Returns `true` if the handler ran.
    pub fn poll_strobe(&mut self) -> bool {
        if !self.handle.strobe_pending() {
            return false;
        }
        match self.handle.state() {
            MacState::Off | MacState::Tx => return false,
            MacState::Rx => {
                if self.transceiver.frame_in_progress() || self.transceiver.timeout_imminent() {
                    return false;
                }
            }
            MacState::Idle => {}
        }
        self.dispatch(MacEvent::Strobe);
        true
    }

    /// Radio interrupt: FIFO overflow or underflow.
    pub fn on_fifo_error(&mut self, errors: MacErrors) {
        warn!("mac: fifo error {:?}", errors);
        self.handle.record_errors(errors);
    }

    /// Main-loop handle shared with this MAC.
    pub fn handle(&self) -> &MacHandle {
        &self.handle
    }

    /// Current state.
    pub fn state(&self) -> MacState {
        self.handle.state()
    }

    /// The event handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// The event handler, mutably.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// The transceiver.
    pub fn transceiver(&self) -> &T {
        &self.transceiver
    }

    /// The transceiver, mutably.
    pub fn transceiver_mut(&mut self) -> &mut T {
        &mut self.transceiver
    }

    fn dispatch(&mut self, event: MacEvent) {
        self.transceiver.idle();
        self.handle.set_state(MacState::Idle);
        self.handle.clear_strobe();

        let mut next = NextTransfer::new();
        self.handler.on_event(event, &mut next);

        match next.choice {
            Some(Transfer::Transmit { buffer }) => {
                trace!("mac: {:?} -> tx {:?}", event, buffer);
                self.armed = Armed::Transmit(buffer);
                self.handle.set_state(MacState::Tx);
                self.transceiver.start_tx(self.handler.buffer(buffer));
            }
            Some(Transfer::Receive { buffer, timeout }) => {
                trace!("mac: {:?} -> rx {:?} timeout {:?}", event, buffer, timeout);
                self.armed = Armed::Receive(Some(buffer));
                self.handle.set_state(MacState::Rx);
                self.transceiver.start_rx(timeout);
            }
            None => {
                trace!("mac: {:?} -> rx (default)", event);
                self.armed = Armed::Receive(None);
                self.handle.set_state(MacState::Rx);
                self.transceiver.start_rx(None);
            }
        }
    }
}
