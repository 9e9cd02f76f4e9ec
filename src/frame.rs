//! # Packet Framing and Addressing
//!
//! Every over-the-air frame starts with a fixed 4-byte header:
//!
//! ```text
//! byte 0 | destination address (0xFF = broadcast)
//! byte 1 | source address
//! byte 2 | sequence id (wraps mod 256)
//! byte 3 | flags (ACK, REQUEST_ACK)
//! ```
//!
//! followed by 0-251 payload bytes. The layout is wire-compatible with the
//! RadioHead RF95 addressed-datagram format.

use bitflags::bitflags;

/// Fixed size of the addressing/control prefix on every packet.
pub const HEADER_LEN: usize = 4;

bitflags! {
    /// Control bits carried in the fourth header byte.
    ///
    /// Unknown bits are preserved verbatim so foreign flag values survive a
    /// parse/rebuild cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeaderFlags: u8 {
        /// This packet acknowledges an earlier one with the same sequence id.
        const ACK = 0x80;
        /// The receiver should answer with an ACK.
        const REQUEST_ACK = 0x40;
    }
}

/// The 4-byte addressing/control prefix of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Destination device address
    pub to: u8,
    /// Source device address
    pub from: u8,
    /// Sequence id correlating requests with acknowledgments
    pub id: u8,
    /// Control flags
    pub flags: HeaderFlags,
}

impl Header {
    /// Serialize into the on-air byte order.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        [self.to, self.from, self.id, self.flags.bits()]
    }

    /// Parse a header from the start of a frame. Returns `None` when fewer
    /// than [`HEADER_LEN`] bytes are available.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            to: bytes[0],
            from: bytes[1],
            id: bytes[2],
            flags: HeaderFlags::from_bits_retain(bytes[3]),
        })
    }
}

/// A fully received packet, published by the interrupt handler.
///
/// The most recent instance is shared state: the reliability layer reads it
/// for ACK correlation and the user callback receives a reference to it. It
/// is replaced wholesale per receive, never partially mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPacket {
    /// Payload with the header stripped (decrypted when a cipher matched)
    pub message: Vec<u8>,
    /// Destination address the sender used
    pub to: u8,
    /// Address of the sender
    pub from: u8,
    /// Sequence id from the sender
    pub id: u8,
    /// Control flags from the sender
    pub flags: HeaderFlags,
    /// Signal-to-noise ratio of the reception in dB
    pub snr_db: f32,
    /// Received signal strength in dBm
    pub rssi_dbm: i16,
}

/// Convert the packet-SNR register value from its two's-complement quarter-dB
/// encoding.
pub fn snr_from_raw(raw: u8) -> f32 {
    (raw as i8) as f32 / 4.0
}

/// Convert the packet-RSSI register value to dBm.
///
/// The -137 offset is the HopeRF RFM9x calibration; Semtech-branded modules
/// differ slightly.
pub fn rssi_from_raw(raw: u8) -> i16 {
    -137 + raw as i16
}
