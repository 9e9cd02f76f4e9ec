//! # Raspberry Pi HAL Implementation
//!
//! SPI bus and GPIO interrupt-line collaborators for Raspberry Pi 4 and 5,
//! built on the rppal crate.
//!
//! ## Hardware Setup
//!
//! ```text
//! Pi Pin │ BCM GPIO │ RFM9x Pin │ Function
//! ───────┼──────────┼───────────┼─────────────
//! 19     │ GPIO 10  │ MOSI      │ SPI data out
//! 21     │ GPIO 9   │ MISO      │ SPI data in
//! 23     │ GPIO 11  │ SCK       │ SPI clock
//! 24     │ GPIO 8   │ NSS       │ Chip select (CE0)
//! 18     │ GPIO 24  │ DIO0      │ Interrupt (input)
//! 15     │ GPIO 22  │ RESET     │ Reset (output, optional)
//! ```
//!
//! SPI must be enabled in `/boot/config.txt` (`dtparam=spi=on`). All pin
//! numbers use BCM GPIO numbering.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rfm9x_rs::hal::raspberry_pi::{pulse_reset, RpiInterruptLine, RpiSpiBus};
//! use rfm9x_rs::{LoRa, LoRaConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! pulse_reset(22)?;
//! let bus = RpiSpiBus::new(0)?;
//! let dio0 = RpiInterruptLine::new(24)?;
//! let radio = LoRa::new(bus, dio0, LoRaConfig { this_address: 1, ..Default::default() })?;
//! # Ok(())
//! # }
//! ```

use crate::hal::{HalError, InterruptLine, RadioBus};
use crate::registers::{SPI_SPEED, SPI_WRITE_MASK};
use log::info;
use rppal::gpio::{Gpio, InputPin, Trigger};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use std::thread;
use std::time::Duration;

fn spi_err(e: rppal::spi::Error) -> HalError {
    HalError::Spi(e.to_string())
}

fn gpio_err(e: rppal::gpio::Error) -> HalError {
    HalError::Gpio(e.to_string())
}

/// RFM9x register bus over one of the Pi's hardware SPI channels.
pub struct RpiSpiBus {
    spi: Spi,
}

impl RpiSpiBus {
    /// Open SPI bus 0 with the given chip select (0 for CE0, 1 for CE1).
    pub fn new(channel: u8) -> Result<Self, HalError> {
        let slave = match channel {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            other => {
                return Err(HalError::InvalidConfig(format!(
                    "SPI channel must be 0 or 1, got {other}"
                )))
            }
        };
        let spi = Spi::new(Bus::Spi0, slave, SPI_SPEED, Mode::Mode0).map_err(spi_err)?;
        info!("SPI bus initialized on channel {channel} at {SPI_SPEED} Hz");
        Ok(Self { spi })
    }
}

impl RadioBus for RpiSpiBus {
    fn write_register(&mut self, reg: u8, data: &[u8]) -> Result<(), HalError> {
        let mut tx = Vec::with_capacity(data.len() + 1);
        tx.push(reg | SPI_WRITE_MASK);
        tx.extend_from_slice(data);
        self.spi.write(&tx).map_err(spi_err)?;
        Ok(())
    }

    fn read_register(&mut self, reg: u8) -> Result<u8, HalError> {
        let tx = [reg & !SPI_WRITE_MASK, 0];
        let mut rx = [0u8; 2];
        self.spi.transfer(&mut rx, &tx).map_err(spi_err)?;
        Ok(rx[1])
    }

    fn read_burst(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), HalError> {
        let mut tx = vec![0u8; buf.len() + 1];
        tx[0] = reg & !SPI_WRITE_MASK;
        let mut rx = vec![0u8; buf.len() + 1];
        self.spi.transfer(&mut rx, &tx).map_err(spi_err)?;
        buf.copy_from_slice(&rx[1..]);
        Ok(())
    }
}

/// Rising-edge interrupt source on a GPIO pin wired to DIO0.
pub struct RpiInterruptLine {
    pin: InputPin,
}

impl RpiInterruptLine {
    /// Claim `pin` (BCM numbering) as a pulled-down input.
    pub fn new(pin: u8) -> Result<Self, HalError> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let pin = gpio.get(pin).map_err(gpio_err)?.into_input_pulldown();
        Ok(Self { pin })
    }
}

impl InterruptLine for RpiInterruptLine {
    fn attach(&mut self, mut callback: Box<dyn FnMut() + Send>) -> Result<(), HalError> {
        self.pin
            .set_async_interrupt(Trigger::RisingEdge, move |_| callback())
            .map_err(gpio_err)?;
        info!("interrupt handler attached to GPIO {}", self.pin.pin());
        Ok(())
    }

    fn detach(&mut self) -> Result<(), HalError> {
        self.pin.clear_async_interrupt().map_err(gpio_err)
    }
}

/// Pulse the radio's reset pin low for 10 ms, then give the chip 10 ms to
/// come back up. Call before constructing the driver when the reset line is
/// wired.
pub fn pulse_reset(pin: u8) -> Result<(), HalError> {
    let gpio = Gpio::new().map_err(gpio_err)?;
    let mut reset = gpio.get(pin).map_err(gpio_err)?.into_output();
    reset.set_low();
    thread::sleep(Duration::from_millis(10));
    reset.set_high();
    thread::sleep(Duration::from_millis(10));
    Ok(())
}
