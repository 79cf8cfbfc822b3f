//! Packet transport abstraction shared by the Link and Queue consumers.
//!
//! Radio Com needs only a handful of operations from the layer below it:
//! fill a payload in place, send it with a payload type, and read received
//! payloads in order. [`Link`](crate::link::Link) provides them with
//! delivery guarantees, [`RadioQueue`](crate::queue::RadioQueue) on a best
//! effort basis.

/// A fixed-payload packet transport polled from the main loop.
pub trait PacketTransport {
    /// Error returned by [`tx_send`](Self::tx_send).
    type Error: std::error::Error;

    /// Payload bytes per packet.
    const PAYLOAD_CAPACITY: usize;

    /// Free transmit buffers.
    fn tx_available(&self) -> usize;

    /// Packets handed to the radio and not yet done with.
    fn tx_queued(&self) -> usize;

    /// Payload area of the next free transmit buffer.
    ///
    /// The same buffer is returned until it is sent.
    fn tx_payload_mut(&mut self) -> Option<&mut [u8]>;

    /// Send the first `len` bytes of the current payload.
    fn tx_send(&mut self, len: usize, payload_type: u8) -> Result<(), Self::Error>;

    /// Payload type and payload of the oldest received packet.
    fn rx_payload(&self) -> Option<(u8, &[u8])>;

    /// Release the oldest received packet.
    fn rx_done(&mut self);
}
