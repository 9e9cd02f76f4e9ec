//! # Hardware Abstraction Layer
//!
//! This module defines the two collaborator traits the driver core needs from
//! the platform — a register-addressed bus and an edge-triggered interrupt
//! line — and provides implementations: a Raspberry Pi SPI/GPIO backend
//! behind the `raspberry-pi` feature and an in-memory mock for tests.
//!
//! The core owns the mutual-exclusion discipline around the bus: every trait
//! call is assumed synchronous and atomic, but multi-register sequences are
//! serialized by the driver's own lock, never by the implementation.

use thiserror::Error;

/// Errors that can occur during HAL operations
#[derive(Debug, Error)]
pub enum HalError {
    #[error("SPI communication error: {0}")]
    Spi(String),

    #[error("GPIO operation error: {0}")]
    Gpio(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A register-addressed serial bus to the radio.
///
/// One call is one bus transaction. The driver holds its own lock across
/// logical multi-register sequences (a FIFO drain, a frame load), so
/// implementations do not need internal synchronization.
pub trait RadioBus: Send {
    /// Write `data` to the register at `reg`. Multi-byte writes burst into
    /// auto-incrementing registers such as the FIFO.
    fn write_register(&mut self, reg: u8, data: &[u8]) -> Result<(), HalError>;

    /// Read a single register.
    fn read_register(&mut self, reg: u8) -> Result<u8, HalError>;

    /// Burst-read `buf.len()` bytes starting at `reg` (used to drain the
    /// FIFO at the current address pointer).
    fn read_burst(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), HalError>;
}

/// An edge-triggered hardware interrupt line.
///
/// The platform invokes the attached callback once per rising edge, on its
/// own execution context, concurrently with foreground driver calls.
pub trait InterruptLine: Send {
    /// Register `callback` to run on every rising edge. Replaces any
    /// previously attached callback.
    fn attach(&mut self, callback: Box<dyn FnMut() + Send>) -> Result<(), HalError>;

    /// Remove the callback; no invocations occur after this returns.
    fn detach(&mut self) -> Result<(), HalError>;
}

// Test double
pub mod mock;

// Platform implementations
#[cfg(feature = "raspberry-pi")]
pub mod raspberry_pi;

// Re-export the mock types for integration tests
pub use mock::{MockBus, MockInterruptLine};

#[cfg(feature = "raspberry-pi")]
pub use raspberry_pi::{pulse_reset, RpiInterruptLine, RpiSpiBus};
