//! Receive timeouts and randomized retry delays.
//!
//! The transceiver's receive timer counts in units of roughly 25.39 us.
//! Layers pass an [`RxTimeout`] to the MAC when they want reception to give
//! up after a while, which is how every retry and backoff delay is built:
//! listen for a random, short time, and act on the timeout if nothing
//! arrived.

/// Length of one receive timer unit in nanoseconds.
pub const RX_TIMEOUT_UNIT_NS: u64 = 25_390;

/// A receive timeout in hardware timer units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RxTimeout(u16);

impl RxTimeout {
    /// Timeout of `units` timer ticks. Zero is clamped to one tick.
    pub const fn from_units(units: u16) -> Self {
        Self(if units == 0 { 1 } else { units })
    }

    /// Shortest timeout that lasts at least `us` microseconds.
    pub fn from_micros(us: u64) -> Self {
        let units = (us * 1000).div_ceil(RX_TIMEOUT_UNIT_NS);
        Self::from_units(units.min(u16::MAX as u64) as u16)
    }

    /// Raw timer units.
    pub fn units(self) -> u16 {
        self.0
    }

    /// Duration in microseconds, rounded down.
    pub fn as_micros(self) -> u64 {
        self.0 as u64 * RX_TIMEOUT_UNIT_NS / 1000
    }
}

/// Randomized delay generator for retransmissions and transmit backoff.
///
/// Uses a small LCG; the values only need to decorrelate two or more
/// transmitters sharing a channel.
#[derive(Debug, Clone)]
pub struct Backoff {
    rng_state: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(0x1234_5678)
    }
}

impl Backoff {
    /// Create a generator from a seed. A zero seed is replaced by 1.
    pub fn new(seed: u32) -> Self {
        let mut backoff = Self { rng_state: 1 };
        backoff.seed(seed);
        backoff
    }

    /// Reseed the generator.
    pub fn seed(&mut self, seed: u32) {
        self.rng_state = if seed == 0 { 1 } else { seed };
    }

    /// Delay before Link retransmits an unacknowledged frame:
    /// `(2 + r % 16) << 3` units, about 0.4 to 3.5 ms.
    pub fn link_retry(&mut self) -> RxTimeout {
        let r = self.next_random() % 16;
        RxTimeout::from_units(((2 + r) << 3) as u16)
    }

    /// Delay between Queue transmit attempts: `36 + r % 110` units,
    /// about 0.9 to 3.7 ms.
    pub fn queue_backoff(&mut self) -> RxTimeout {
        let r = self.next_random() % 110;
        RxTimeout::from_units((36 + r) as u16)
    }

    fn next_random(&mut self) -> u32 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(1664525)
            .wrapping_add(1013904223);
        // Low bits of an LCG have short periods
        self.rng_state >> 16
    }
}
