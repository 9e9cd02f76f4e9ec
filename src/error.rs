//! # Radio Error Handling
//!
//! This module defines the RadioError enum, which represents the different
//! error types that can occur in the rfm9x-rs crate.
//!
//! Channel-condition outcomes (busy channel, missing acknowledgment, transmit
//! timeout) are deliberately NOT errors: `send` and `send_to_wait` report them
//! as `Ok(false)` so callers can retry. Errors are reserved for bus faults,
//! configuration mistakes, and the initialization integrity check.

use crate::crypto::CryptoError;
use crate::hal::HalError;
use thiserror::Error;

/// Represents the different error types that can occur in the RFM9x driver.
#[derive(Debug, Error)]
pub enum RadioError {
    /// A bus or GPIO transaction failed.
    #[error("HAL error: {0}")]
    Hal(#[from] HalError),

    /// The sleep/long-range read-back after reset did not match; the chip is
    /// absent or miswired.
    #[error("LoRa initialization failed: op-mode read back 0x{actual:02X}, expected 0x{expected:02X}")]
    InitFailed { expected: u8, actual: u8 },

    /// A construction parameter is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The framed packet would not fit the 255-byte FIFO.
    #[error("Frame of {len} bytes exceeds the {max}-byte FIFO")]
    FrameTooLarge { len: usize, max: usize },

    /// Encryption framing failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}
