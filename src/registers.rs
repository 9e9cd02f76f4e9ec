//! # RFM9x Register Definitions and Constants
//!
//! Register addresses, operating modes, and bit field definitions for the
//! HopeRF RFM9x (Semtech SX127x) LoRa transceiver, taken from the SX1276
//! datasheet.
//!
//! ## Register Map
//!
//! Only the registers the driver touches are defined here:
//! - 0x00-0x0F: FIFO access, operating mode, carrier frequency, PA control
//! - 0x10-0x2F: FIFO pointers, IRQ flags, packet metadata, modem configuration
//! - 0x40-0x4D: DIO routing and PA DAC control
//!
//! ## Operating Modes
//!
//! The RFM9x LoRa modem runs in exactly one mode at a time:
//! - Sleep: lowest power, FIFO inaccessible
//! - Standby: oscillator running, FIFO accessible (the "idle" mode)
//! - Transmit: sends the loaded FIFO contents, raises TxDone
//! - Receive continuous: listens indefinitely, raises RxDone per packet
//! - Channel activity detection: scans for a LoRa preamble, raises CadDone

// =============================================================================
// RFM9x Register Addresses
// =============================================================================

/// FIFO read/write access register
pub const REG_00_FIFO: u8 = 0x00;

/// Operating mode and LoRa/FSK selection
pub const REG_01_OP_MODE: u8 = 0x01;

/// RF carrier frequency (MSB)
pub const REG_06_FRF_MSB: u8 = 0x06;

/// RF carrier frequency (MID)
pub const REG_07_FRF_MID: u8 = 0x07;

/// RF carrier frequency (LSB)
pub const REG_08_FRF_LSB: u8 = 0x08;

/// PA selection and output power control
pub const REG_09_PA_CONFIG: u8 = 0x09;

/// SPI read/write cursor into the FIFO data buffer
pub const REG_0D_FIFO_ADDR_PTR: u8 = 0x0D;

/// Base address of the transmit section of the FIFO
pub const REG_0E_FIFO_TX_BASE_ADDR: u8 = 0x0E;

/// Base address of the receive section of the FIFO
pub const REG_0F_FIFO_RX_BASE_ADDR: u8 = 0x0F;

/// Start address of the last packet received
pub const REG_10_FIFO_RX_CURRENT_ADDR: u8 = 0x10;

/// IRQ flags (write 1 to clear)
pub const REG_12_IRQ_FLAGS: u8 = 0x12;

/// Number of payload bytes of the last packet received
pub const REG_13_RX_NB_BYTES: u8 = 0x13;

/// SNR of the last packet received (two's complement, quarter dB)
pub const REG_19_PKT_SNR_VALUE: u8 = 0x19;

/// RSSI of the last packet received
pub const REG_1A_PKT_RSSI_VALUE: u8 = 0x1A;

/// Modem configuration 1 (bandwidth, coding rate)
pub const REG_1D_MODEM_CONFIG1: u8 = 0x1D;

/// Modem configuration 2 (spreading factor, CRC)
pub const REG_1E_MODEM_CONFIG2: u8 = 0x1E;

/// Preamble length (MSB)
pub const REG_20_PREAMBLE_MSB: u8 = 0x20;

/// Preamble length (LSB)
pub const REG_21_PREAMBLE_LSB: u8 = 0x21;

/// Payload length for transmission
pub const REG_22_PAYLOAD_LENGTH: u8 = 0x22;

/// Modem configuration 3 (low data rate optimization, AGC)
pub const REG_26_MODEM_CONFIG3: u8 = 0x26;

/// Mapping of DIO0 to DIO3 interrupt outputs
pub const REG_40_DIO_MAPPING1: u8 = 0x40;

/// High-power PA DAC control
pub const REG_4D_PA_DAC: u8 = 0x4D;

// =============================================================================
// Operating Mode Constants
// =============================================================================

/// Bit patterns for the mode field of REG_01_OP_MODE
pub const MODE_SLEEP: u8 = 0x00;
pub const MODE_STDBY: u8 = 0x01;
pub const MODE_TX: u8 = 0x03;
pub const MODE_RXCONTINUOUS: u8 = 0x05;
pub const MODE_CAD: u8 = 0x07;

/// LoRa (long range) mode selector, only writable from sleep
pub const LONG_RANGE_MODE: u8 = 0x80;

/// Operating modes of the RFM9x LoRa modem
///
/// Discriminants equal the mode field of REG_01_OP_MODE so a mode can be
/// written to the chip and mirrored in an atomic without translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    /// Sleep mode - lowest power consumption
    Sleep = MODE_SLEEP,
    /// Standby mode - FIFO accessible, ready for fast TX/RX entry
    Standby = MODE_STDBY,
    /// Transmit mode
    Transmit = MODE_TX,
    /// Continuous receive mode
    RxContinuous = MODE_RXCONTINUOUS,
    /// Channel activity detection scan
    Cad = MODE_CAD,
}

impl Mode {
    /// Decode a mode from its register bit pattern.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            MODE_SLEEP => Some(Mode::Sleep),
            MODE_STDBY => Some(Mode::Standby),
            MODE_TX => Some(Mode::Transmit),
            MODE_RXCONTINUOUS => Some(Mode::RxContinuous),
            MODE_CAD => Some(Mode::Cad),
            _ => None,
        }
    }
}

// =============================================================================
// IRQ Flag Definitions
// =============================================================================

/// IRQ flags in REG_12_IRQ_FLAGS
pub const IRQ_CAD_DETECTED: u8 = 0x01;
pub const IRQ_CAD_DONE: u8 = 0x04;
pub const IRQ_TX_DONE: u8 = 0x08;
pub const IRQ_RX_DONE: u8 = 0x40;
pub const IRQ_RX_TIMEOUT: u8 = 0x80;

/// Written to REG_12_IRQ_FLAGS to clear every pending event
pub const IRQ_CLEAR_ALL: u8 = 0xFF;

// =============================================================================
// DIO0 Routing
// =============================================================================

/// DIO0 mapping values for REG_40_DIO_MAPPING1 (bits 7-6, SX1276 table 63).
/// Exactly one event class is routed to the interrupt line at a time.
pub const DIO0_RX_DONE: u8 = 0x00;
pub const DIO0_TX_DONE: u8 = 0x40;
pub const DIO0_CAD_DONE: u8 = 0x80;

// =============================================================================
// PA Control Constants
// =============================================================================

/// PA_BOOST output pin selector in REG_09_PA_CONFIG
pub const PA_SELECT: u8 = 0x80;

/// High-power (+20 dBm) DAC settings for REG_4D_PA_DAC
pub const PA_DAC_ENABLE: u8 = 0x07;
pub const PA_DAC_DISABLE: u8 = 0x04;

// =============================================================================
// Configuration Constants
// =============================================================================

/// SPI register address flag selecting a write transaction
pub const SPI_WRITE_MASK: u8 = 0x80;

/// Default SPI clock speed
pub const SPI_SPEED: u32 = 5_000_000; // 5 MHz

/// RF frequency step per FRF register LSB (32 MHz / 2^19)
pub const FSTEP: f64 = 61.03515625;

/// Destination address that every device accepts
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// FIFO data buffer size, the hard upper bound on one frame
pub const MAX_FRAME_LEN: usize = 255;
