//! # RFM9x Driver Core
//!
//! The mode state machine and the interrupt-driven transmit/receive protocol.
//!
//! Two execution contexts touch the hardware: the foreground caller thread
//! and the interrupt callback, which the platform runs on its own thread once
//! per rising edge of DIO0. All register traffic is serialized by one bus
//! lock held only for the span of a logical multi-register operation; the
//! current mode, the CAD result and the most recent packet are published
//! through atomics / their own mutex so the foreground wait loops never hold
//! a lock the interrupt context needs.
//!
//! ## Protocol sequencing
//!
//! The FIFO may only be loaded outside transmit mode, the DIO0 routing must
//! match the current mode (exactly one of TxDone / RxDone / CadDone is
//! observable at a time), and IRQ flags are cleared once per event. `send`
//! enforces the first rule by entering standby before the FIFO load; the mode
//! transition helpers enforce the second by writing the mapping register
//! together with the op-mode register.

use crate::config::{DefaultMode, LoRaConfig};
use crate::crypto::{self, BlockCipher};
use crate::error::RadioError;
use crate::frame::{
    rssi_from_raw, snr_from_raw, Header, HeaderFlags, ReceivedPacket, HEADER_LEN,
};
use crate::hal::{InterruptLine, RadioBus};
use crate::registers::*;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Sentinel for "no mode written yet"; not a valid op-mode bit pattern.
const MODE_UNSET: u8 = 0xFF;

/// Sleep quantum of the bounded busy-wait loops.
const POLL_QUANTUM: Duration = Duration::from_micros(500);

/// Settle time after commanding sleep/long-range during initialization.
const MODE_SETTLE: Duration = Duration::from_millis(100);

/// Outcome of a channel-activity-detection scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelActivity {
    /// No scan has completed since the last request
    Pending = 0,
    /// The scan saw no LoRa preamble
    Clear = 1,
    /// A transmission is on the air
    Detected = 2,
}

impl ChannelActivity {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ChannelActivity::Clear,
            2 => ChannelActivity::Detected,
            _ => ChannelActivity::Pending,
        }
    }
}

type ReceiveCallback = Box<dyn FnMut(&ReceivedPacket) + Send>;

/// State shared between the foreground thread and the interrupt context.
struct Shared {
    bus: Mutex<Box<dyn RadioBus>>,
    /// Mirror of the chip's current mode; written under the bus lock,
    /// polled lock-free by the wait loops
    mode: AtomicU8,
    /// Tri-state CAD result, written only by the interrupt handler
    cad: AtomicU8,
    /// Sequence counter for `send_to_wait`
    sequence: AtomicU8,
    /// Most recent delivered packet, replaced wholesale per receive
    last_packet: Mutex<Option<ReceivedPacket>>,
    on_receive: Mutex<Option<ReceiveCallback>>,
    cipher: Option<Box<dyn BlockCipher>>,
    cfg: LoRaConfig,
}

impl Shared {
    fn mode(&self) -> Option<Mode> {
        Mode::from_bits(self.mode.load(Ordering::Acquire))
    }

    fn channel_activity(&self) -> ChannelActivity {
        ChannelActivity::from_u8(self.cad.load(Ordering::Acquire))
    }

    // ------------------------------------------------------------------
    // Mode controller
    // ------------------------------------------------------------------

    /// Write the op-mode register and, for the event-producing modes, route
    /// the matching event class to DIO0. No-op when already in `mode`.
    fn enter_mode(&self, mode: Mode, dio0: Option<u8>) -> Result<(), RadioError> {
        if self.mode() == Some(mode) {
            return Ok(());
        }
        let mut bus = self.bus.lock().unwrap();
        bus.write_register(REG_01_OP_MODE, &[mode as u8])?;
        if let Some(mapping) = dio0 {
            bus.write_register(REG_40_DIO_MAPPING1, &[mapping])?;
        }
        self.mode.store(mode as u8, Ordering::Release);
        debug!("mode -> {mode:?}");
        Ok(())
    }

    fn set_mode_sleep(&self) -> Result<(), RadioError> {
        self.enter_mode(Mode::Sleep, None)
    }

    fn set_mode_idle(&self) -> Result<(), RadioError> {
        self.enter_mode(Mode::Standby, None)
    }

    fn set_mode_tx(&self) -> Result<(), RadioError> {
        self.enter_mode(Mode::Transmit, Some(DIO0_TX_DONE))
    }

    fn set_mode_rx(&self) -> Result<(), RadioError> {
        self.enter_mode(Mode::RxContinuous, Some(DIO0_RX_DONE))
    }

    fn set_mode_cad(&self) -> Result<(), RadioError> {
        self.enter_mode(Mode::Cad, Some(DIO0_CAD_DONE))
    }

    fn enter_default_mode(&self) -> Result<(), RadioError> {
        match self.cfg.default_mode {
            DefaultMode::RxContinuous => self.set_mode_rx(),
            DefaultMode::Idle => self.set_mode_idle(),
            DefaultMode::Sleep => self.set_mode_sleep(),
        }
    }

    // ------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------

    fn initialize(&self) -> Result<(), RadioError> {
        self.bus
            .lock()
            .unwrap()
            .write_register(REG_01_OP_MODE, &[MODE_SLEEP | LONG_RANGE_MODE])?;
        thread::sleep(MODE_SETTLE);

        {
            let mut bus = self.bus.lock().unwrap();
            let opmode = bus.read_register(REG_01_OP_MODE)?;
            if opmode != MODE_SLEEP | LONG_RANGE_MODE {
                return Err(RadioError::InitFailed {
                    expected: MODE_SLEEP | LONG_RANGE_MODE,
                    actual: opmode,
                });
            }
            // Use the whole FIFO for both directions.
            bus.write_register(REG_0E_FIFO_TX_BASE_ADDR, &[0])?;
            bus.write_register(REG_0F_FIFO_RX_BASE_ADDR, &[0])?;
        }
        self.mode.store(Mode::Sleep as u8, Ordering::Release);
        self.set_mode_idle()?;

        {
            let mut bus = self.bus.lock().unwrap();
            let (cfg1, cfg2, cfg3) = self.cfg.modem_config.register_values();
            bus.write_register(REG_1D_MODEM_CONFIG1, &[cfg1])?;
            bus.write_register(REG_1E_MODEM_CONFIG2, &[cfg2])?;
            bus.write_register(REG_26_MODEM_CONFIG3, &[cfg3])?;

            bus.write_register(REG_20_PREAMBLE_MSB, &[0])?;
            bus.write_register(REG_21_PREAMBLE_LSB, &[8])?;

            let frf = ((self.cfg.frequency_mhz * 1_000_000.0) / FSTEP) as u32;
            bus.write_register(REG_06_FRF_MSB, &[(frf >> 16) as u8])?;
            bus.write_register(REG_07_FRF_MID, &[(frf >> 8) as u8])?;
            bus.write_register(REG_08_FRF_LSB, &[frf as u8])?;

            // Power above +20 dBm needs the PA DAC boost and is delivered
            // 3 dB hot, so back the PA setting off by the same amount.
            let mut tx_power = self.cfg.tx_power_dbm.clamp(5, 23);
            if tx_power > 20 {
                bus.write_register(REG_4D_PA_DAC, &[PA_DAC_ENABLE])?;
                tx_power -= 3;
            } else {
                bus.write_register(REG_4D_PA_DAC, &[PA_DAC_DISABLE])?;
            }
            bus.write_register(REG_09_PA_CONFIG, &[PA_SELECT | (tx_power as u8 - 5)])?;
        }
        self.enter_default_mode()?;

        info!(
            "RFM9x up: address {}, {} MHz, {:?}, {} dBm",
            self.cfg.this_address, self.cfg.frequency_mhz, self.cfg.modem_config, self.cfg.tx_power_dbm
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Interrupt event handler
    // ------------------------------------------------------------------

    fn handle_interrupt(&self) {
        if let Err(e) = self.service_interrupt() {
            // A bus fault mid-event leaves the chip in an unknown state and
            // there is nothing safe to retry from interrupt context.
            error!("interrupt handling aborted: {e}");
        }
    }

    fn service_interrupt(&self) -> Result<(), RadioError> {
        let irq_flags = self.bus.lock().unwrap().read_register(REG_12_IRQ_FLAGS)?;

        match self.mode() {
            Some(Mode::RxContinuous) if irq_flags & IRQ_RX_DONE != 0 => {
                let (raw, snr_raw, rssi_raw) = self.drain_rx_fifo()?;
                self.process_received(raw, snr_raw, rssi_raw)?;
            }
            Some(Mode::Transmit) if irq_flags & IRQ_TX_DONE != 0 => {
                self.enter_default_mode()?;
            }
            Some(Mode::Cad) if irq_flags & IRQ_CAD_DONE != 0 => {
                let result = if irq_flags & IRQ_CAD_DETECTED != 0 {
                    ChannelActivity::Detected
                } else {
                    ChannelActivity::Clear
                };
                self.cad.store(result as u8, Ordering::Release);
                self.enter_default_mode()?;
            }
            Some(Mode::RxContinuous) if irq_flags & IRQ_RX_TIMEOUT != 0 => {
                // Nothing to extract; the flag is cleared below.
            }
            _ => {}
        }

        // Idempotent: safe even when the receive path already cleared them.
        self.bus
            .lock()
            .unwrap()
            .write_register(REG_12_IRQ_FLAGS, &[IRQ_CLEAR_ALL])?;
        Ok(())
    }

    /// One lock span covering the whole buffer drain, so a foreground FIFO
    /// load cannot interleave with it.
    fn drain_rx_fifo(&self) -> Result<(Vec<u8>, u8, u8), RadioError> {
        let mut bus = self.bus.lock().unwrap();
        let len = bus.read_register(REG_13_RX_NB_BYTES)? as usize;
        let current = bus.read_register(REG_10_FIFO_RX_CURRENT_ADDR)?;
        bus.write_register(REG_0D_FIFO_ADDR_PTR, &[current])?;
        let mut raw = vec![0u8; len];
        bus.read_burst(REG_00_FIFO, &mut raw)?;
        bus.write_register(REG_12_IRQ_FLAGS, &[IRQ_CLEAR_ALL])?;
        let snr_raw = bus.read_register(REG_19_PKT_SNR_VALUE)?;
        let rssi_raw = bus.read_register(REG_1A_PKT_RSSI_VALUE)?;
        Ok((raw, snr_raw, rssi_raw))
    }

    fn process_received(&self, raw: Vec<u8>, snr_raw: u8, rssi_raw: u8) -> Result<(), RadioError> {
        let Some(header) = Header::parse(&raw) else {
            debug!("dropping malformed {}-byte packet", raw.len());
            return Ok(());
        };

        if header.to != self.cfg.this_address
            && header.to != BROADCAST_ADDRESS
            && !self.cfg.receive_all
        {
            debug!(
                "filtered packet addressed to {} (this device is {})",
                header.to, self.cfg.this_address
            );
            return Ok(());
        }

        let mut message = raw[HEADER_LEN..].to_vec();
        if let Some(cipher) = &self.cipher {
            if !message.is_empty() && message.len() % cipher.block_len() == 0 {
                match crypto::decrypt_frame(cipher.as_ref(), &message) {
                    Some(plain) => message = plain,
                    // Probably a block-aligned plaintext; deliver it as-is.
                    None => debug!("block-aligned message failed decryption framing"),
                }
            }
        }

        if header.to == self.cfg.this_address
            && header.flags.contains(HeaderFlags::REQUEST_ACK)
            && !header.flags.contains(HeaderFlags::ACK)
            && !self.cfg.suppress_auto_ack
        {
            self.send_ack(header.from, header.id)?;
        }
        self.set_mode_rx()?;

        let packet = ReceivedPacket {
            message,
            to: header.to,
            from: header.from,
            id: header.id,
            flags: header.flags,
            snr_db: snr_from_raw(snr_raw),
            rssi_dbm: rssi_from_raw(rssi_raw),
        };
        debug!(
            "rx {} bytes from {} id {} flags {:#04X} snr {} dB rssi {} dBm: {}",
            packet.message.len(),
            packet.from,
            packet.id,
            packet.flags.bits(),
            packet.snr_db,
            packet.rssi_dbm,
            hex::encode(&packet.message)
        );

        let is_ack = packet.flags.contains(HeaderFlags::ACK);
        *self.last_packet.lock().unwrap() = Some(packet.clone());
        if !is_ack {
            if let Some(callback) = self.on_receive.lock().unwrap().as_mut() {
                callback(&packet);
            }
        }
        Ok(())
    }

    /// Answer an ack request. Fire and forget: the TxDone edge for the ack is
    /// queued behind the edge being handled, so the trailing wait inside
    /// `send` expires and the queued edge restores the default mode later.
    fn send_ack(&self, to: u8, id: u8) -> Result<(), RadioError> {
        debug!("auto-ack id {id} to {to}");
        self.send(b"!", to, id, HeaderFlags::ACK)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Waits
    // ------------------------------------------------------------------

    /// Poll until the interrupt handler moves the chip out of transmit mode.
    /// Returns false when the packet-sent timeout expires first.
    fn wait_packet_sent(&self) -> bool {
        let deadline = Instant::now() + self.cfg.wait_packet_sent_timeout;
        loop {
            if self.mode() != Some(Mode::Transmit) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_QUANTUM);
        }
    }

    /// Run a channel-activity scan bounded by the configured CAD timeout.
    ///
    /// A zero timeout disables CAD: the channel is reported clear without any
    /// bus traffic. A scan that does not complete in time is reported as
    /// `Detected` — ambiguity is treated as a busy channel rather than a
    /// license to collide.
    fn wait_channel_clear(&self) -> Result<ChannelActivity, RadioError> {
        if self.cfg.cad_timeout.is_zero() {
            return Ok(ChannelActivity::Clear);
        }
        self.cad
            .store(ChannelActivity::Pending as u8, Ordering::Release);
        self.set_mode_cad()?;

        let deadline = Instant::now() + self.cfg.cad_timeout;
        while self.mode() == Some(Mode::Cad) {
            if Instant::now() >= deadline {
                return Ok(ChannelActivity::Detected);
            }
            thread::sleep(POLL_QUANTUM);
        }
        Ok(match self.channel_activity() {
            ChannelActivity::Clear => ChannelActivity::Clear,
            // A scan that ended without a recorded result counts as busy.
            _ => ChannelActivity::Detected,
        })
    }

    // ------------------------------------------------------------------
    // Transmit path
    // ------------------------------------------------------------------

    /// Single transmit attempt. `Ok(false)` means a channel condition
    /// (busy channel, no transmit-complete event) — retryable, not an error.
    fn send(&self, data: &[u8], to: u8, id: u8, flags: HeaderFlags) -> Result<bool, RadioError> {
        // Never load the FIFO over an in-flight transmission.
        self.wait_packet_sent();

        if self.wait_channel_clear()? == ChannelActivity::Detected {
            debug!("channel busy, aborting send to {to}");
            return Ok(false);
        }

        // The FIFO is only writable outside transmit mode.
        self.set_mode_idle()?;

        let body = match &self.cipher {
            Some(cipher) => crypto::encrypt_frame(cipher.as_ref(), data)?,
            None => data.to_vec(),
        };
        let header = Header {
            to,
            from: self.cfg.this_address,
            id,
            flags,
        };
        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(&body);
        if frame.len() > MAX_FRAME_LEN {
            return Err(RadioError::FrameTooLarge {
                len: frame.len(),
                max: MAX_FRAME_LEN,
            });
        }

        {
            let mut bus = self.bus.lock().unwrap();
            bus.write_register(REG_0D_FIFO_ADDR_PTR, &[0])?;
            bus.write_register(REG_00_FIFO, &frame)?;
            bus.write_register(REG_22_PAYLOAD_LENGTH, &[frame.len() as u8])?;
        }

        self.set_mode_tx()?;
        Ok(self.wait_packet_sent())
    }

    /// Advance the sequence counter and return the id for a new logical send.
    fn next_sequence_id(&self) -> u8 {
        self.sequence
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
    }

    fn ack_received(&self, from: u8, id: u8) -> bool {
        match self.last_packet.lock().unwrap().as_ref() {
            Some(p) => {
                p.to == self.cfg.this_address
                    && p.from == from
                    && p.flags.contains(HeaderFlags::ACK)
                    && p.id == id
            }
            None => false,
        }
    }

    /// Reliable send: one sequence id, up to `send_retries + 1` attempts,
    /// each followed by a jittered acknowledgment wait.
    fn send_to_wait(&self, data: &[u8], to: u8, flags: HeaderFlags) -> Result<bool, RadioError> {
        let id = self.next_sequence_id();

        for attempt in 0..=u32::from(self.cfg.send_retries) {
            let mut flags = flags;
            if self.cfg.acks {
                flags |= HeaderFlags::REQUEST_ACK;
            }

            if !self.send(data, to, id, flags)? {
                // Channel condition; go straight to the next attempt.
                continue;
            }
            if !self.cfg.acks || to == BROADCAST_ADDRESS {
                return Ok(true);
            }

            // The random factor desynchronizes retry storms across devices
            // that heard the same collision.
            let ack_wait = self.cfg.retry_timeout.mul_f64(1.0 + rand::random::<f64>());
            let deadline = Instant::now() + ack_wait;
            while Instant::now() < deadline {
                if self.ack_received(to, id) {
                    debug!("ack id {id} from {to} on attempt {attempt}");
                    return Ok(true);
                }
                thread::sleep(POLL_QUANTUM);
            }
            debug!("no ack for id {id} from {to} on attempt {attempt}");
        }
        Ok(false)
    }
}

/// Handle to one RFM9x transceiver.
///
/// Owns the bus and interrupt-line collaborators for one physical radio;
/// every operation goes through this handle, so tests can run any number of
/// simulated radios side by side.
///
/// ```rust,no_run
/// use rfm9x_rs::hal::{MockBus, MockInterruptLine};
/// use rfm9x_rs::{HeaderFlags, LoRa, LoRaConfig};
///
/// # fn main() -> Result<(), rfm9x_rs::RadioError> {
/// let radio = LoRa::new(
///     MockBus::new(),
///     MockInterruptLine::new(),
///     LoRaConfig { this_address: 1, acks: true, ..Default::default() },
/// )?;
/// radio.on_receive(|packet| println!("from {}: {:?}", packet.from, packet.message));
/// let delivered = radio.send_to_wait(b"hello", 2, HeaderFlags::empty())?;
/// # let _ = delivered;
/// # Ok(())
/// # }
/// ```
pub struct LoRa {
    shared: Arc<Shared>,
    interrupt: Box<dyn InterruptLine>,
    closed: bool,
}

impl LoRa {
    /// Initialize a radio without payload encryption.
    pub fn new(
        bus: impl RadioBus + 'static,
        interrupt: impl InterruptLine + 'static,
        config: LoRaConfig,
    ) -> Result<Self, RadioError> {
        Self::build(Box::new(bus), Box::new(interrupt), config, None)
    }

    /// Initialize a radio that encrypts payloads with `cipher`.
    pub fn with_cipher(
        bus: impl RadioBus + 'static,
        interrupt: impl InterruptLine + 'static,
        config: LoRaConfig,
        cipher: impl BlockCipher + 'static,
    ) -> Result<Self, RadioError> {
        Self::build(
            Box::new(bus),
            Box::new(interrupt),
            config,
            Some(Box::new(cipher)),
        )
    }

    fn build(
        bus: Box<dyn RadioBus>,
        mut interrupt: Box<dyn InterruptLine>,
        config: LoRaConfig,
        cipher: Option<Box<dyn BlockCipher>>,
    ) -> Result<Self, RadioError> {
        config.validate()?;
        let shared = Arc::new(Shared {
            bus: Mutex::new(bus),
            mode: AtomicU8::new(MODE_UNSET),
            cad: AtomicU8::new(ChannelActivity::Pending as u8),
            sequence: AtomicU8::new(0),
            last_packet: Mutex::new(None),
            on_receive: Mutex::new(None),
            cipher,
            cfg: config,
        });

        // Attach before touching the chip so no event is ever missed.
        let handler = Arc::clone(&shared);
        interrupt.attach(Box::new(move || handler.handle_interrupt()))?;
        shared.initialize()?;

        Ok(Self {
            shared,
            interrupt,
            closed: false,
        })
    }

    /// Register the receive callback, replacing any previous one.
    ///
    /// The callback runs synchronously on the interrupt context and must be
    /// fast and non-blocking. Acknowledgment packets are correlated
    /// internally and do not reach the callback.
    pub fn on_receive(&self, callback: impl FnMut(&ReceivedPacket) + Send + 'static) {
        *self.shared.on_receive.lock().unwrap() = Some(Box::new(callback));
    }

    /// Address of this device.
    pub fn this_address(&self) -> u8 {
        self.shared.cfg.this_address
    }

    /// Current mode, `None` before initialization completes.
    pub fn mode(&self) -> Option<Mode> {
        self.shared.mode()
    }

    /// Most recent delivered packet, acknowledgments included.
    pub fn last_received(&self) -> Option<ReceivedPacket> {
        self.shared.last_packet.lock().unwrap().clone()
    }

    /// Result of the most recent channel-activity scan.
    pub fn channel_activity(&self) -> ChannelActivity {
        self.shared.channel_activity()
    }

    pub fn set_mode_sleep(&self) -> Result<(), RadioError> {
        self.shared.set_mode_sleep()
    }

    pub fn set_mode_idle(&self) -> Result<(), RadioError> {
        self.shared.set_mode_idle()
    }

    pub fn set_mode_tx(&self) -> Result<(), RadioError> {
        self.shared.set_mode_tx()
    }

    pub fn set_mode_rx(&self) -> Result<(), RadioError> {
        self.shared.set_mode_rx()
    }

    pub fn set_mode_cad(&self) -> Result<(), RadioError> {
        self.shared.set_mode_cad()
    }

    /// Scan for channel activity; see [`ChannelActivity`].
    pub fn wait_channel_clear(&self) -> Result<ChannelActivity, RadioError> {
        self.shared.wait_channel_clear()
    }

    /// Wait for an in-flight transmission to complete.
    pub fn wait_packet_sent(&self) -> bool {
        self.shared.wait_packet_sent()
    }

    /// Transmit one frame. `Ok(false)` reports a busy channel or a missing
    /// transmit-complete event; both are retryable channel conditions.
    pub fn send(
        &self,
        data: &[u8],
        to: u8,
        id: u8,
        flags: HeaderFlags,
    ) -> Result<bool, RadioError> {
        self.shared.send(data, to, id, flags)
    }

    /// Transmit with retries and, unless `to` is the broadcast address or
    /// acknowledgments are disabled, wait for the matching ACK.
    ///
    /// Returns `Ok(false)` after `send_retries + 1` unacknowledged attempts.
    pub fn send_to_wait(
        &self,
        data: &[u8],
        to: u8,
        flags: HeaderFlags,
    ) -> Result<bool, RadioError> {
        self.shared.send_to_wait(data, to, flags)
    }

    /// Release the interrupt registration and put the radio to sleep.
    /// Idempotent; also runs on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.interrupt.detach() {
            warn!("failed to detach interrupt handler: {e}");
        }
        if let Err(e) = self.shared.set_mode_sleep() {
            warn!("failed to sleep radio on close: {e}");
        }
        info!("radio closed");
    }
}

impl Drop for LoRa {
    fn drop(&mut self) {
        self.close();
    }
}
