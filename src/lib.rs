//! # rfm9x-rs - Reliable Addressed Messaging over RFM9x LoRa Radios
//!
//! The rfm9x-rs crate drives a HopeRF RFM9x (Semtech SX127x) LoRa transceiver
//! over its register-addressed SPI bus and builds a reliable, addressed
//! datagram service on top of the physically unreliable channel. The wire
//! format is compatible with the RadioHead RF95 addressed-datagram layout.
//!
//! ## Features
//!
//! - Interrupt-driven transmit/receive state machine (no polling of the chip)
//! - 4-byte addressed header with broadcast and promiscuous reception
//! - Acknowledgment-and-retry reliable delivery with randomized backoff
//! - Channel activity detection before transmitting
//! - Optional length-framed payload encryption via a pluggable block cipher
//! - Raspberry Pi SPI/GPIO backend behind the `raspberry-pi` feature, plus an
//!   in-memory mock for hardware-free tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! # #[cfg(feature = "raspberry-pi")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use rfm9x_rs::hal::raspberry_pi::{RpiInterruptLine, RpiSpiBus};
//! use rfm9x_rs::{HeaderFlags, LoRa, LoRaConfig};
//!
//! let config = LoRaConfig {
//!     this_address: 1,
//!     frequency_mhz: 868.0,
//!     acks: true,
//!     ..Default::default()
//! };
//! let mut radio = LoRa::new(RpiSpiBus::new(0)?, RpiInterruptLine::new(24)?, config)?;
//! radio.on_receive(|packet| {
//!     println!("from {}: {:?} ({} dBm)", packet.from, packet.message, packet.rssi_dbm);
//! });
//!
//! if radio.send_to_wait(b"hello", 2, HeaderFlags::empty())? {
//!     println!("delivered");
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "raspberry-pi"))]
//! # fn main() {}
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod hal;
pub mod logging;
pub mod radio;
pub mod registers;

pub use crate::error::RadioError;
pub use crate::logging::{init_logger, log_info};

// Core driver types
pub use config::{DefaultMode, LoRaConfig, ModemConfig};
pub use frame::{Header, HeaderFlags, ReceivedPacket, HEADER_LEN};
pub use radio::{ChannelActivity, LoRa};
pub use registers::{Mode, BROADCAST_ADDRESS, MAX_FRAME_LEN};

// Encryption collaborator surface
pub use crypto::BlockCipher;

#[cfg(feature = "crypto")]
pub use crypto::Aes128Ecb;
