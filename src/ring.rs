//! Fixed-capacity packet rings shared between the interrupt domain and the
//! main loop.
//!
//! Each ring is a single-producer, single-consumer queue of [`Packet`]
//! buffers with two free-running counters. A slot's owner follows from the
//! counters alone, so no lock is needed:
//!
//! ```text
//! RxRing:  radio fills  -> commit -> consumer reads -> release
//!          consumer owns slots [main, interrupt), radio owns the rest
//!
//! TxRing:  consumer fills -> submit -> radio sends  -> complete
//!          radio owns slots [interrupt, main), consumer owns the rest
//! ```
//!
//! Counters are only ever advanced by their own side. Buffer contents are
//! written before the counter is stored with `Release` and read after it is
//! loaded with `Acquire`.
//!
//! The receive ring never lets the consumer hold every slot: with `N` slots
//! at most `N - 1` can be committed, so the radio always has a buffer to
//! receive into.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::radio::Packet;

fn new_slots<const N: usize>() -> [UnsafeCell<Packet>; N] {
    std::array::from_fn(|_| UnsafeCell::new(Packet::new()))
}

/// Ring of received packets: radio produces, consumer reads.
pub struct RxRing<const N: usize> {
    slots: [UnsafeCell<Packet>; N],
    interrupt: AtomicUsize,
    main: AtomicUsize,
}

// Slots are only touched by the side that owns them per the counters.
unsafe impl<const N: usize> Sync for RxRing<N> {}

impl<const N: usize> Default for RxRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RxRing<N> {
    /// Create an empty ring.
    pub fn new() -> Self {
        assert!(N >= 2, "receive ring needs at least two slots");
        Self {
            slots: new_slots(),
            interrupt: AtomicUsize::new(0),
            main: AtomicUsize::new(0),
        }
    }

    /// Number of slots.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Packets committed and not yet released by the consumer.
    pub fn held(&self) -> usize {
        let interrupt = self.interrupt.load(Ordering::Acquire);
        let main = self.main.load(Ordering::Acquire);
        interrupt.wrapping_sub(main)
    }

    /// Whether the radio may commit another packet.
    pub fn can_commit(&self) -> bool {
        self.held() < N - 1
    }

    /// Slot the radio receives into next. Always radio-owned.
    pub fn fill_index(&self) -> usize {
        self.interrupt.load(Ordering::Relaxed) % N
    }

    /// Hand the filled slot to the consumer. Radio side only.
    ///
    /// Returns `false` and does nothing if the consumer already holds
    /// `N - 1` packets.
    pub fn commit(&self) -> bool {
        if !self.can_commit() {
            return false;
        }
        let interrupt = self.interrupt.load(Ordering::Relaxed);
        self.interrupt
            .store(interrupt.wrapping_add(1), Ordering::Release);
        true
    }

    /// Slot of the oldest packet the consumer holds.
    pub fn read_index(&self) -> Option<usize> {
        (self.held() > 0).then(|| self.main.load(Ordering::Relaxed) % N)
    }

    /// Return the oldest held packet to the radio. Consumer side only.
    pub fn release(&self) -> bool {
        if self.held() == 0 {
            return false;
        }
        let main = self.main.load(Ordering::Relaxed);
        self.main.store(main.wrapping_add(1), Ordering::Release);
        true
    }

    /// Shared access to a slot.
    ///
    /// # Safety
    ///
    /// The caller must own `index` (see the module docs) for as long as the
    /// reference lives.
    pub unsafe fn slot(&self, index: usize) -> &Packet {
        &*self.slots[index].get()
    }

    /// Exclusive access to a slot.
    ///
    /// # Safety
    ///
    /// The caller must own `index` and hold no other reference to it.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slot_mut(&self, index: usize) -> &mut Packet {
        &mut *self.slots[index].get()
    }

    /// Bit masks of slots owned by `(consumer, radio)`.
    pub fn ownership_masks(&self) -> (u32, u32) {
        let main = self.main.load(Ordering::Acquire);
        let consumer = span_mask::<N>(main, self.held());
        (consumer, all_mask::<N>() & !consumer)
    }
}

/// Ring of packets to transmit: consumer produces, radio sends.
pub struct TxRing<const N: usize> {
    slots: [UnsafeCell<Packet>; N],
    interrupt: AtomicUsize,
    main: AtomicUsize,
}

// Slots are only touched by the side that owns them per the counters.
unsafe impl<const N: usize> Sync for TxRing<N> {}

impl<const N: usize> Default for TxRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TxRing<N> {
    /// Create an empty ring.
    pub fn new() -> Self {
        assert!(N >= 1, "transmit ring needs a slot");
        Self {
            slots: new_slots(),
            interrupt: AtomicUsize::new(0),
            main: AtomicUsize::new(0),
        }
    }

    /// Number of slots.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Packets submitted and not yet completed by the radio.
    pub fn pending(&self) -> usize {
        let main = self.main.load(Ordering::Acquire);
        let interrupt = self.interrupt.load(Ordering::Acquire);
        main.wrapping_sub(interrupt)
    }

    /// Free slots the consumer may fill.
    pub fn available(&self) -> usize {
        N - self.pending()
    }

    /// Slot the consumer fills next, if one is free.
    pub fn fill_index(&self) -> Option<usize> {
        (self.available() > 0).then(|| self.main.load(Ordering::Relaxed) % N)
    }

    /// Hand the filled slot to the radio. Consumer side only.
    pub fn submit(&self) -> bool {
        if self.available() == 0 {
            return false;
        }
        let main = self.main.load(Ordering::Relaxed);
        self.main.store(main.wrapping_add(1), Ordering::Release);
        true
    }

    /// Slot the radio is sending, if any.
    pub fn head_index(&self) -> Option<usize> {
        (self.pending() > 0).then(|| self.interrupt.load(Ordering::Relaxed) % N)
    }

    /// Number of packets the radio has completed so far (wrapping).
    pub fn completed(&self) -> usize {
        self.interrupt.load(Ordering::Relaxed)
    }

    /// Return the head slot to the consumer. Radio side only.
    pub fn complete(&self) -> bool {
        if self.pending() == 0 {
            return false;
        }
        let interrupt = self.interrupt.load(Ordering::Relaxed);
        self.interrupt
            .store(interrupt.wrapping_add(1), Ordering::Release);
        true
    }

    /// Shared access to a slot.
    ///
    /// # Safety
    ///
    /// The caller must own `index` (see the module docs) for as long as the
    /// reference lives.
    pub unsafe fn slot(&self, index: usize) -> &Packet {
        &*self.slots[index].get()
    }

    /// Exclusive access to a slot.
    ///
    /// # Safety
    ///
    /// The caller must own `index` and hold no other reference to it.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slot_mut(&self, index: usize) -> &mut Packet {
        &mut *self.slots[index].get()
    }

    /// Bit masks of slots owned by `(consumer, radio)`.
    pub fn ownership_masks(&self) -> (u32, u32) {
        let interrupt = self.interrupt.load(Ordering::Acquire);
        let radio = span_mask::<N>(interrupt, self.pending());
        (all_mask::<N>() & !radio, radio)
    }
}

fn all_mask<const N: usize>() -> u32 {
    if N >= 32 {
        u32::MAX
    } else {
        (1u32 << N) - 1
    }
}

fn span_mask<const N: usize>(start: usize, len: usize) -> u32 {
    (0..len.min(N)).fold(0, |mask, i| mask | 1 << ((start.wrapping_add(i)) % N))
}
