//! Mock bus and interrupt line for testing
//!
//! An in-memory register file standing in for the radio, plus a manually
//! fired interrupt line. Tests inject received packets into the register
//! file, fire the edge, and inspect the transaction log — no hardware
//! required.

use crate::hal::{HalError, InterruptLine, RadioBus};
use crate::registers::{
    IRQ_RX_DONE, REG_00_FIFO, REG_10_FIFO_RX_CURRENT_ADDR, REG_12_IRQ_FLAGS, REG_13_RX_NB_BYTES,
    REG_19_PKT_SNR_VALUE, REG_1A_PKT_RSSI_VALUE,
};
use std::sync::{Arc, Mutex};

struct MockBusState {
    registers: [u8; 0x80],
    /// Every frame burst-written to the FIFO register, oldest first
    fifo_writes: Vec<Vec<u8>>,
    /// Packet bytes served by the next FIFO burst read
    rx_fifo: Vec<u8>,
    /// Full write log as (register, payload) pairs
    writes: Vec<(u8, Vec<u8>)>,
    /// Registers read, in order
    reads: Vec<u8>,
    /// Error returned by the next transaction
    next_error: Option<String>,
}

impl Default for MockBusState {
    fn default() -> Self {
        Self {
            registers: [0u8; 0x80],
            fifo_writes: Vec::new(),
            rx_fifo: Vec::new(),
            writes: Vec::new(),
            reads: Vec::new(),
            next_error: None,
        }
    }
}

/// Mock register bus that records every transaction.
///
/// Clones share state, so a test can keep one handle while the driver owns
/// another.
#[derive(Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<MockBusState>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a register.
    pub fn register(&self, reg: u8) -> u8 {
        self.state.lock().unwrap().registers[reg as usize]
    }

    /// Overwrite a register from the test side.
    pub fn set_register(&self, reg: u8, value: u8) {
        self.state.lock().unwrap().registers[reg as usize] = value;
    }

    /// OR bits into a register, the way the chip raises IRQ flags.
    pub fn raise_flags(&self, bits: u8) {
        self.state.lock().unwrap().registers[REG_12_IRQ_FLAGS as usize] |= bits;
    }

    /// Total transactions (reads + writes) performed so far.
    pub fn transaction_count(&self) -> usize {
        let st = self.state.lock().unwrap();
        st.writes.len() + st.reads.len()
    }

    /// Number of writes that targeted `reg`.
    pub fn writes_to(&self, reg: u8) -> usize {
        self.state
            .lock()
            .unwrap()
            .writes
            .iter()
            .filter(|(r, _)| *r == reg)
            .count()
    }

    /// Frames burst-written to the FIFO, oldest first.
    pub fn fifo_frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().fifo_writes.clone()
    }

    /// Stage a received packet: length, FIFO contents, signal metadata, and
    /// the RxDone flag. Follow with [`MockInterruptLine::fire`] to deliver it.
    pub fn inject_rx(&self, frame: &[u8], snr_raw: u8, rssi_raw: u8) {
        let mut st = self.state.lock().unwrap();
        st.registers[REG_13_RX_NB_BYTES as usize] = frame.len() as u8;
        st.registers[REG_10_FIFO_RX_CURRENT_ADDR as usize] = 0;
        st.registers[REG_19_PKT_SNR_VALUE as usize] = snr_raw;
        st.registers[REG_1A_PKT_RSSI_VALUE as usize] = rssi_raw;
        st.registers[REG_12_IRQ_FLAGS as usize] |= IRQ_RX_DONE;
        st.rx_fifo = frame.to_vec();
    }

    /// Fail the next transaction with an SPI error.
    pub fn fail_next(&self, message: &str) {
        self.state.lock().unwrap().next_error = Some(message.to_string());
    }

    fn take_error(st: &mut MockBusState) -> Result<(), HalError> {
        match st.next_error.take() {
            Some(msg) => Err(HalError::Spi(msg)),
            None => Ok(()),
        }
    }
}

impl RadioBus for MockBus {
    fn write_register(&mut self, reg: u8, data: &[u8]) -> Result<(), HalError> {
        let mut st = self.state.lock().unwrap();
        MockBus::take_error(&mut st)?;
        st.writes.push((reg, data.to_vec()));
        match reg {
            REG_00_FIFO => st.fifo_writes.push(data.to_vec()),
            // The IRQ flag register is write-1-to-clear on the chip.
            REG_12_IRQ_FLAGS => st.registers[reg as usize] &= !data[0],
            _ => st.registers[reg as usize] = data[0],
        }
        Ok(())
    }

    fn read_register(&mut self, reg: u8) -> Result<u8, HalError> {
        let mut st = self.state.lock().unwrap();
        MockBus::take_error(&mut st)?;
        st.reads.push(reg);
        Ok(st.registers[reg as usize])
    }

    fn read_burst(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), HalError> {
        let mut st = self.state.lock().unwrap();
        MockBus::take_error(&mut st)?;
        st.reads.push(reg);
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = st.rx_fifo.get(i).copied().unwrap_or(0);
        }
        Ok(())
    }
}

type EdgeCallback = Box<dyn FnMut() + Send>;

/// Mock interrupt line fired manually from tests.
///
/// Clones share the attached callback, so a test keeps one handle to fire
/// edges after handing the other to the driver. `fire` runs the callback on
/// the calling thread, which is exactly the concurrency shape of the real
/// GPIO dispatch thread.
#[derive(Clone, Default)]
pub struct MockInterruptLine {
    callback: Arc<Mutex<Option<EdgeCallback>>>,
}

impl MockInterruptLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate one rising edge.
    pub fn fire(&self) {
        if let Some(cb) = self.callback.lock().unwrap().as_mut() {
            cb();
        }
    }

    /// Whether a callback is currently attached.
    pub fn is_attached(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }
}

impl InterruptLine for MockInterruptLine {
    fn attach(&mut self, callback: Box<dyn FnMut() + Send>) -> Result<(), HalError> {
        *self.callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    fn detach(&mut self) -> Result<(), HalError> {
        *self.callback.lock().unwrap() = None;
        Ok(())
    }
}
