//! Radio hardware abstraction: register settings, packet buffers, timing and
//! the MAC state machine.

mod airtime;
pub mod mac;
mod packet;
pub mod settings;
mod timeout;

pub use airtime::{frame_airtime_us, AirParams};
pub use mac::{
    Mac, MacErrors, MacEvent, MacEventHandler, MacHandle, MacState, NextTransfer, Transceiver,
    Transfer,
};
pub use packet::{Packet, FRAME_CAPACITY, PACKET_SIZE, STATUS_LEN};
pub use settings::{AddressFilter, RadioSettings, RxStatus, MAX_FRAME_LENGTH};
pub use timeout::{Backoff, RxTimeout, RX_TIMEOUT_UNIT_NS};
