//! # Driver Configuration
//!
//! Construction parameters for the RFM9x driver. The configuration is a plain
//! serde-derived struct so it can be loaded from JSON:
//!
//! ```json
//! {
//!   "this_address": 1,
//!   "frequency_mhz": 868.0,
//!   "tx_power_dbm": 14,
//!   "modem_config": "Bw125Cr45Sf128",
//!   "acks": true,
//!   "default_mode": "RxContinuous"
//! }
//! ```
//!
//! Every field has a RadioHead-compatible default, so
//! `LoRaConfig { this_address: 1, ..Default::default() }` is a working
//! starting point.

use crate::error::RadioError;
use crate::registers::BROADCAST_ADDRESS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Named modem presets, each an opaque bundle of the three modem-config
/// register values (bandwidth / coding rate / spreading factor).
///
/// `Bw125Cr45Sf128` is the RadioHead library default and interoperates with
/// stock RadioHead nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModemConfig {
    /// 125 kHz bandwidth, 4/5 coding rate, SF7 (RadioHead default)
    Bw125Cr45Sf128,
    /// 500 kHz bandwidth, 4/5 coding rate, SF7 (fast, short range)
    Bw500Cr45Sf128,
    /// 31.25 kHz bandwidth, 4/8 coding rate, SF9
    Bw31_25Cr48Sf512,
    /// 125 kHz bandwidth, 4/8 coding rate, SF12 (slow, long range)
    Bw125Cr48Sf4096,
}

impl ModemConfig {
    /// The raw values for modem-config registers 1, 2 and 3.
    pub fn register_values(self) -> (u8, u8, u8) {
        match self {
            ModemConfig::Bw125Cr45Sf128 => (0x72, 0x74, 0x04),
            ModemConfig::Bw500Cr45Sf128 => (0x92, 0x74, 0x04),
            ModemConfig::Bw31_25Cr48Sf512 => (0x48, 0x94, 0x04),
            ModemConfig::Bw125Cr48Sf4096 => (0x78, 0xC4, 0x0C),
        }
    }
}

/// The mode the radio falls back to after a transmit or CAD scan completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultMode {
    /// Re-enter continuous receive (the usual choice for a node that should
    /// hear replies)
    RxContinuous,
    /// Return to standby
    Idle,
    /// Return to sleep for minimum power draw
    Sleep,
}

/// Construction parameters for [`crate::LoRa`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoRaConfig {
    /// Address of this device, 0-254 (255 is the broadcast address)
    pub this_address: u8,
    /// Carrier frequency in MHz
    pub frequency_mhz: f64,
    /// Transmit power in dBm, clamped to 5-23; values above 20 enable the
    /// PA DAC boost and are reduced by 3
    pub tx_power_dbm: i8,
    /// Modem preset
    pub modem_config: ModemConfig,
    /// Disable address filtering and deliver every packet heard
    pub receive_all: bool,
    /// Request acknowledgments on reliable sends and wait for them
    pub acks: bool,
    /// Do not answer incoming ack requests (acks are normally emitted
    /// automatically from the interrupt handler)
    pub suppress_auto_ack: bool,
    /// Mode entered after TxDone and CadDone events
    pub default_mode: DefaultMode,
    /// Total time budget for one channel-activity scan; zero skips CAD
    /// entirely and treats the channel as clear
    pub cad_timeout: Duration,
    /// Extra attempts after the first in `send_to_wait`
    pub send_retries: u8,
    /// How long `send` waits for the transmit-complete interrupt
    pub wait_packet_sent_timeout: Duration,
    /// Base acknowledgment wait; each attempt waits this times a random
    /// factor in [1, 2)
    pub retry_timeout: Duration,
}

impl Default for LoRaConfig {
    fn default() -> Self {
        Self {
            this_address: 0,
            frequency_mhz: 915.0,
            tx_power_dbm: 14,
            modem_config: ModemConfig::Bw125Cr45Sf128,
            receive_all: false,
            acks: false,
            suppress_auto_ack: false,
            default_mode: DefaultMode::RxContinuous,
            cad_timeout: Duration::ZERO,
            send_retries: 2,
            wait_packet_sent_timeout: Duration::from_millis(200),
            retry_timeout: Duration::from_millis(200),
        }
    }
}

impl LoRaConfig {
    /// Parse a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, RadioError> {
        serde_json::from_str(json).map_err(|e| RadioError::InvalidConfig(e.to_string()))
    }

    /// Check parameter ranges that the type system cannot express.
    pub fn validate(&self) -> Result<(), RadioError> {
        if self.this_address == BROADCAST_ADDRESS {
            return Err(RadioError::InvalidConfig(format!(
                "device address must be 0-254, {} is the broadcast address",
                BROADCAST_ADDRESS
            )));
        }
        if !self.frequency_mhz.is_finite() || self.frequency_mhz <= 0.0 {
            return Err(RadioError::InvalidConfig(format!(
                "frequency {} MHz is not usable",
                self.frequency_mhz
            )));
        }
        Ok(())
    }
}
