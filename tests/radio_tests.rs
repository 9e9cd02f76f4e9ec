//! # Driver Tests
//!
//! Mock-backed tests of the mode controller, the interrupt handler, the CAD
//! wait, and the send paths. The mock bus records every transaction, so mode
//! idempotency and transmit-attempt counts are observable directly.

use rfm9x_rs::hal::{MockBus, MockInterruptLine};
use rfm9x_rs::registers::{
    DIO0_CAD_DONE, DIO0_RX_DONE, DIO0_TX_DONE, IRQ_CAD_DETECTED, IRQ_CAD_DONE, IRQ_TX_DONE,
    MODE_SLEEP, MODE_TX, REG_01_OP_MODE, REG_22_PAYLOAD_LENGTH, REG_40_DIO_MAPPING1,
};
use rfm9x_rs::{
    BlockCipher, ChannelActivity, DefaultMode, HeaderFlags, LoRa, LoRaConfig, Mode, RadioError,
    ReceivedPacket,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn make_radio(config: LoRaConfig) -> (LoRa, MockBus, MockInterruptLine) {
    let bus = MockBus::new();
    let irq = MockInterruptLine::new();
    let radio = LoRa::new(bus.clone(), irq.clone(), config).expect("mock init");
    (radio, bus, irq)
}

/// Config with all wait loops shortened so failing paths stay fast.
fn fast_config(this_address: u8) -> LoRaConfig {
    LoRaConfig {
        this_address,
        wait_packet_sent_timeout: Duration::ZERO,
        ..Default::default()
    }
}

/// Collect delivered packets from the receive callback.
fn capture_receives(radio: &LoRa) -> Arc<Mutex<Vec<ReceivedPacket>>> {
    let sink = Arc::new(Mutex::new(Vec::new()));
    let inner = Arc::clone(&sink);
    radio.on_receive(move |packet| inner.lock().unwrap().push(packet.clone()));
    sink
}

/// Background "chip" that completes every transmission it sees.
fn spawn_tx_completer(
    bus: MockBus,
    irq: MockInterruptLine,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            if bus.register(REG_01_OP_MODE) == MODE_TX {
                bus.raise_flags(IRQ_TX_DONE);
                irq.fire();
            }
            thread::sleep(Duration::from_micros(200));
        }
    })
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_micros(200));
    }
}

mod mode_control {
    use super::*;

    #[test]
    fn init_leaves_radio_in_default_mode() {
        let (radio, bus, _irq) = make_radio(fast_config(1));
        assert_eq!(radio.mode(), Some(Mode::RxContinuous));
        assert_eq!(bus.register(REG_40_DIO_MAPPING1), DIO0_RX_DONE);
    }

    #[test]
    fn default_mode_is_configurable() {
        let (radio, _bus, _irq) = make_radio(LoRaConfig {
            default_mode: DefaultMode::Idle,
            ..fast_config(1)
        });
        assert_eq!(radio.mode(), Some(Mode::Standby));
    }

    #[test]
    fn mode_transitions_are_idempotent() {
        let (radio, bus, _irq) = make_radio(fast_config(1));
        let before = bus.writes_to(REG_01_OP_MODE);
        radio.set_mode_idle().unwrap();
        radio.set_mode_idle().unwrap();
        // Exactly one register write sequence for the two calls.
        assert_eq!(bus.writes_to(REG_01_OP_MODE), before + 1);

        let before = bus.transaction_count();
        radio.set_mode_idle().unwrap();
        assert_eq!(bus.transaction_count(), before);
    }

    #[test]
    fn dio0_routing_follows_mode() {
        let (radio, bus, _irq) = make_radio(fast_config(1));
        radio.set_mode_tx().unwrap();
        assert_eq!(bus.register(REG_40_DIO_MAPPING1), DIO0_TX_DONE);
        radio.set_mode_cad().unwrap();
        assert_eq!(bus.register(REG_40_DIO_MAPPING1), DIO0_CAD_DONE);
        radio.set_mode_rx().unwrap();
        assert_eq!(bus.register(REG_40_DIO_MAPPING1), DIO0_RX_DONE);
    }

    #[test]
    fn broadcast_device_address_is_rejected() {
        let result = LoRa::new(
            MockBus::new(),
            MockInterruptLine::new(),
            LoRaConfig {
                this_address: 255,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(RadioError::InvalidConfig(_))));
    }

    #[test]
    fn init_verification_failure_is_fatal() {
        let bus = MockBus::new();
        let irq = MockInterruptLine::new();
        // Clobber the op-mode register during the settle window so the
        // read-back check sees a chip that did not take the command.
        let saboteur = {
            let bus = bus.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                bus.set_register(REG_01_OP_MODE, 0x00);
            })
        };
        let result = LoRa::new(bus, irq, fast_config(1));
        saboteur.join().unwrap();
        assert!(matches!(result, Err(RadioError::InitFailed { .. })));
    }

    #[test]
    fn close_is_idempotent_and_detaches() {
        let (mut radio, bus, irq) = make_radio(fast_config(1));
        assert!(irq.is_attached());
        radio.close();
        assert!(!irq.is_attached());
        assert_eq!(bus.register(REG_01_OP_MODE), MODE_SLEEP);
        let transactions = bus.transaction_count();
        radio.close();
        assert_eq!(bus.transaction_count(), transactions);
        // A stray edge after close must find no handler.
        irq.fire();
    }
}

mod cad {
    use super::*;

    #[test]
    fn zero_timeout_skips_cad_entirely() {
        let (radio, bus, _irq) = make_radio(fast_config(1));
        let before = bus.transaction_count();
        assert_eq!(radio.wait_channel_clear().unwrap(), ChannelActivity::Clear);
        assert_eq!(bus.transaction_count(), before, "CAD must stay off the bus");
        assert_ne!(radio.mode(), Some(Mode::Cad));
    }

    #[test]
    fn scan_timeout_reports_detected() {
        let (radio, _bus, _irq) = make_radio(LoRaConfig {
            cad_timeout: Duration::from_millis(20),
            ..fast_config(1)
        });
        // Nobody completes the scan, so the conservative answer is busy.
        assert_eq!(
            radio.wait_channel_clear().unwrap(),
            ChannelActivity::Detected
        );
    }

    #[test]
    fn completed_scan_reports_recorded_result() {
        for (extra_flags, expected) in [
            (0u8, ChannelActivity::Clear),
            (IRQ_CAD_DETECTED, ChannelActivity::Detected),
        ] {
            let (radio, bus, irq) = make_radio(LoRaConfig {
                cad_timeout: Duration::from_millis(500),
                ..fast_config(1)
            });
            let chip = {
                let (bus, irq) = (bus.clone(), irq.clone());
                thread::spawn(move || {
                    wait_until("CAD mode entry", || {
                        bus.register(REG_01_OP_MODE) == Mode::Cad as u8
                    });
                    // Keep delivering the event until the handler consumes it.
                    while bus.register(REG_01_OP_MODE) == Mode::Cad as u8 {
                        bus.raise_flags(IRQ_CAD_DONE | extra_flags);
                        irq.fire();
                        thread::sleep(Duration::from_micros(200));
                    }
                })
            };
            assert_eq!(radio.wait_channel_clear().unwrap(), expected);
            chip.join().unwrap();
            // The handler re-armed the configured default mode.
            assert_eq!(radio.mode(), Some(Mode::RxContinuous));
        }
    }
}

mod sending {
    use super::*;

    #[test]
    fn frame_layout_on_the_bus() {
        let (radio, bus, _irq) = make_radio(fast_config(1));
        let sent = radio
            .send(b"ping", 9, 7, HeaderFlags::REQUEST_ACK)
            .unwrap();
        // No chip completes the transmission, so the attempt times out...
        assert!(!sent);
        // ...but the frame must be fully loaded: header then payload.
        let frames = bus.fifo_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], vec![9, 1, 7, 0x40, b'p', b'i', b'n', b'g']);
        assert_eq!(bus.register(REG_22_PAYLOAD_LENGTH), 8);
    }

    #[test]
    fn sequence_ids_increment_once_per_logical_send() {
        let (radio, bus, _irq) = make_radio(LoRaConfig {
            send_retries: 0,
            ..fast_config(1)
        });
        for _ in 0..5 {
            radio
                .send_to_wait(b"x", 2, HeaderFlags::empty())
                .unwrap();
        }
        let frames = bus.fifo_frames();
        assert_eq!(frames.len(), 5);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame[2] as usize, i + 1, "id of send {i}");
        }
    }

    #[test]
    fn sequence_id_wraps_mod_256() {
        let (radio, bus, _irq) = make_radio(LoRaConfig {
            send_retries: 0,
            ..fast_config(1)
        });
        for _ in 0..300 {
            radio
                .send_to_wait(b"", 2, HeaderFlags::empty())
                .unwrap();
        }
        let frames = bus.fifo_frames();
        assert_eq!(frames[254][2], 255);
        assert_eq!(frames[255][2], 0);
        assert_eq!(frames[256][2], 1);
    }

    #[test]
    fn retries_reuse_the_sequence_id() {
        let (radio, bus, _irq) = make_radio(LoRaConfig {
            send_retries: 2,
            acks: true,
            ..fast_config(1)
        });
        let delivered = radio.send_to_wait(b"x", 2, HeaderFlags::empty()).unwrap();
        assert!(!delivered);
        // maxRetries + 1 attempts, one sequence id.
        assert_eq!(bus.writes_to(REG_22_PAYLOAD_LENGTH), 3);
        let frames = bus.fifo_frames();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f[2] == 1));
        // Every attempt requested an acknowledgment.
        assert!(frames.iter().all(|f| f[3] & 0x40 != 0));
    }

    #[test]
    fn oversized_frame_is_an_error() {
        let (radio, _bus, _irq) = make_radio(fast_config(1));
        let result = radio.send(&[0u8; 252], 2, 0, HeaderFlags::empty());
        assert!(matches!(result, Err(RadioError::FrameTooLarge { len: 256, .. })));
        // One byte less fits exactly.
        assert!(radio.send(&[0u8; 251], 2, 0, HeaderFlags::empty()).is_ok());
    }

    #[test]
    fn bus_fault_surfaces_as_error() {
        let (radio, bus, _irq) = make_radio(fast_config(1));
        bus.fail_next("wire fell out");
        let result = radio.send(b"x", 2, 0, HeaderFlags::empty());
        assert!(matches!(result, Err(RadioError::Hal(_))));
    }

    #[test]
    fn busy_channel_aborts_the_attempt() {
        let (radio, bus, _irq) = make_radio(LoRaConfig {
            cad_timeout: Duration::from_millis(10),
            ..fast_config(1)
        });
        let fifo_before = bus.fifo_frames().len();
        // The scan never completes, which counts as a busy channel.
        let sent = radio.send(b"x", 2, 0, HeaderFlags::empty()).unwrap();
        assert!(!sent);
        assert_eq!(bus.fifo_frames().len(), fifo_before, "no FIFO load on busy channel");
    }
}

mod reliability {
    use super::*;

    #[test]
    fn ack_with_matching_id_completes_the_send() {
        let (radio, bus, irq) = make_radio(LoRaConfig {
            this_address: 1,
            acks: true,
            send_retries: 2,
            retry_timeout: Duration::from_millis(200),
            wait_packet_sent_timeout: Duration::from_millis(100),
            ..Default::default()
        });
        let stop = Arc::new(AtomicBool::new(false));
        let completer = spawn_tx_completer(bus.clone(), irq.clone(), Arc::clone(&stop));

        let acker = {
            let (bus, irq) = (bus.clone(), irq.clone());
            thread::spawn(move || {
                wait_until("frame load", || !bus.fifo_frames().is_empty());
                let frame = bus.fifo_frames().remove(0);
                // Let the transmit complete before answering.
                wait_until("return to rx", || {
                    bus.register(REG_01_OP_MODE) == Mode::RxContinuous as u8
                });
                bus.inject_rx(&[frame[1], frame[0], frame[2], 0x80, b'!'], 0x08, 60);
                irq.fire();
            })
        };

        let delivered = radio.send_to_wait(b"hi", 2, HeaderFlags::empty()).unwrap();
        stop.store(true, Ordering::Relaxed);
        acker.join().unwrap();
        completer.join().unwrap();

        assert!(delivered);
        assert_eq!(bus.writes_to(REG_22_PAYLOAD_LENGTH), 1, "one transmit attempt");
        // The correlated ack is visible as the last received packet.
        let ack = radio.last_received().unwrap();
        assert!(ack.flags.contains(HeaderFlags::ACK));
        assert_eq!(ack.from, 2);
        assert_eq!(ack.to, 1);
    }

    #[test]
    fn missing_acks_exhaust_all_attempts() {
        let (radio, bus, irq) = make_radio(LoRaConfig {
            this_address: 1,
            acks: true,
            send_retries: 2,
            retry_timeout: Duration::from_millis(20),
            wait_packet_sent_timeout: Duration::from_millis(100),
            ..Default::default()
        });
        let stop = Arc::new(AtomicBool::new(false));
        let completer = spawn_tx_completer(bus.clone(), irq.clone(), Arc::clone(&stop));

        let delivered = radio.send_to_wait(b"hi", 2, HeaderFlags::empty()).unwrap();
        stop.store(true, Ordering::Relaxed);
        completer.join().unwrap();

        assert!(!delivered);
        assert_eq!(bus.writes_to(REG_22_PAYLOAD_LENGTH), 3);
    }

    #[test]
    fn mismatched_ack_id_is_ignored() {
        let (radio, bus, irq) = make_radio(LoRaConfig {
            this_address: 1,
            acks: true,
            send_retries: 0,
            retry_timeout: Duration::from_millis(30),
            wait_packet_sent_timeout: Duration::from_millis(100),
            ..Default::default()
        });
        let stop = Arc::new(AtomicBool::new(false));
        let completer = spawn_tx_completer(bus.clone(), irq.clone(), Arc::clone(&stop));

        let acker = {
            let (bus, irq) = (bus.clone(), irq.clone());
            thread::spawn(move || {
                wait_until("frame load", || !bus.fifo_frames().is_empty());
                wait_until("return to rx", || {
                    bus.register(REG_01_OP_MODE) == Mode::RxContinuous as u8
                });
                // Right sender, wrong sequence id.
                bus.inject_rx(&[1, 2, 0xEE, 0x80], 0x08, 60);
                irq.fire();
            })
        };

        let delivered = radio.send_to_wait(b"hi", 2, HeaderFlags::empty()).unwrap();
        stop.store(true, Ordering::Relaxed);
        acker.join().unwrap();
        completer.join().unwrap();
        assert!(!delivered);
    }

    #[test]
    fn broadcast_needs_no_ack() {
        let (radio, bus, irq) = make_radio(LoRaConfig {
            this_address: 1,
            acks: true,
            send_retries: 2,
            retry_timeout: Duration::from_secs(5),
            wait_packet_sent_timeout: Duration::from_millis(100),
            ..Default::default()
        });
        let stop = Arc::new(AtomicBool::new(false));
        let completer = spawn_tx_completer(bus.clone(), irq.clone(), Arc::clone(&stop));

        let started = Instant::now();
        let delivered = radio
            .send_to_wait(b"to all", rfm9x_rs::BROADCAST_ADDRESS, HeaderFlags::empty())
            .unwrap();
        stop.store(true, Ordering::Relaxed);
        completer.join().unwrap();

        assert!(delivered);
        assert_eq!(bus.writes_to(REG_22_PAYLOAD_LENGTH), 1);
        // Success came from the transmit completing, not an ack window.
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}

mod receiving {
    use super::*;

    #[test]
    fn packet_for_this_address_reaches_the_callback() {
        let (radio, bus, irq) = make_radio(fast_config(1));
        let received = capture_receives(&radio);
        bus.inject_rx(&[1, 5, 9, 0x00, b'h', b'i'], 40, 107);
        irq.fire();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let packet = &received[0];
        assert_eq!(packet.message, b"hi");
        assert_eq!(packet.from, 5);
        assert_eq!(packet.id, 9);
        assert_eq!(packet.snr_db, 10.0);
        assert_eq!(packet.rssi_dbm, -30);
        assert_eq!(radio.last_received().unwrap().message, b"hi");
    }

    #[test]
    fn broadcast_packet_is_delivered() {
        let (radio, bus, irq) = make_radio(fast_config(1));
        let received = capture_receives(&radio);
        bus.inject_rx(&[255, 5, 9, 0x00, b'!'], 0, 0);
        irq.fire();
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn foreign_packet_is_filtered() {
        let (radio, bus, irq) = make_radio(fast_config(1));
        let received = capture_receives(&radio);
        bus.inject_rx(&[2, 5, 9, 0x00, b'h', b'i'], 0, 0);
        irq.fire();
        assert!(received.lock().unwrap().is_empty());
        assert!(radio.last_received().is_none());
    }

    #[test]
    fn receive_all_disables_the_filter() {
        let (radio, bus, irq) = make_radio(LoRaConfig {
            receive_all: true,
            ..fast_config(1)
        });
        let received = capture_receives(&radio);
        bus.inject_rx(&[2, 5, 9, 0x00, b'h', b'i'], 0, 0);
        irq.fire();
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn malformed_short_packet_is_dropped() {
        let (radio, bus, irq) = make_radio(fast_config(1));
        let received = capture_receives(&radio);
        bus.inject_rx(&[1, 5, 9], 0, 0);
        irq.fire();
        assert!(received.lock().unwrap().is_empty());
        assert!(radio.last_received().is_none());
        // The radio stays armed for the next packet.
        assert_eq!(radio.mode(), Some(Mode::RxContinuous));
    }

    #[test]
    fn acks_update_shared_state_but_skip_the_callback() {
        let (radio, bus, irq) = make_radio(fast_config(1));
        let received = capture_receives(&radio);
        bus.inject_rx(&[1, 5, 9, 0x80, b'!'], 0, 0);
        irq.fire();
        assert!(received.lock().unwrap().is_empty());
        let packet = radio.last_received().unwrap();
        assert!(packet.flags.contains(HeaderFlags::ACK));
        assert_eq!(packet.id, 9);
    }

    #[test]
    fn ack_request_is_answered_automatically() {
        let (radio, bus, irq) = make_radio(fast_config(1));
        let received = capture_receives(&radio);
        bus.inject_rx(&[1, 7, 42, 0x40, b'd', b'a', b't', b'a'], 0, 0);
        irq.fire();

        // The ack went onto the bus: reversed addresses, same id, ACK flag.
        let frames = bus.fifo_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], vec![7, 1, 42, 0x80, b'!']);
        // The original message still reached the callback.
        assert_eq!(received.lock().unwrap().len(), 1);
        assert_eq!(radio.mode(), Some(Mode::RxContinuous));
    }

    #[test]
    fn auto_ack_can_be_suppressed() {
        let (radio, bus, irq) = make_radio(LoRaConfig {
            suppress_auto_ack: true,
            ..fast_config(1)
        });
        let received = capture_receives(&radio);
        bus.inject_rx(&[1, 7, 42, 0x40, b'd'], 0, 0);
        irq.fire();
        assert!(bus.fifo_frames().is_empty());
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn broadcast_ack_request_is_not_answered() {
        let (radio, bus, irq) = make_radio(fast_config(1));
        bus.inject_rx(&[255, 7, 42, 0x40, b'd'], 0, 0);
        irq.fire();
        assert!(bus.fifo_frames().is_empty());
    }

    #[test]
    fn handler_survives_a_bus_fault() {
        let (radio, bus, irq) = make_radio(fast_config(1));
        let received = capture_receives(&radio);
        bus.inject_rx(&[1, 5, 9, 0x00, b'a'], 0, 0);
        bus.fail_next("glitch");
        irq.fire();
        assert!(received.lock().unwrap().is_empty());

        // The next event is processed normally.
        bus.inject_rx(&[1, 5, 10, 0x00, b'b'], 0, 0);
        irq.fire();
        assert_eq!(received.lock().unwrap().len(), 1);
    }
}

mod encryption {
    use super::*;

    struct XorCipher {
        key: u8,
        block: usize,
    }

    impl BlockCipher for XorCipher {
        fn block_len(&self) -> usize {
            self.block
        }

        fn encrypt(&self, data: &[u8]) -> Vec<u8> {
            data.iter().map(|b| b ^ self.key).collect()
        }

        fn decrypt(&self, data: &[u8]) -> Vec<u8> {
            data.iter().map(|b| b ^ self.key).collect()
        }
    }

    fn make_encrypted_radio(config: LoRaConfig) -> (LoRa, MockBus, MockInterruptLine) {
        let bus = MockBus::new();
        let irq = MockInterruptLine::new();
        let radio = LoRa::with_cipher(
            bus.clone(),
            irq.clone(),
            config,
            XorCipher { key: 0x5A, block: 8 },
        )
        .expect("mock init");
        (radio, bus, irq)
    }

    #[test]
    fn sent_payload_is_encrypted_on_the_bus() {
        let (radio, bus, _irq) = make_encrypted_radio(fast_config(1));
        radio.send(b"secret", 2, 3, HeaderFlags::empty()).unwrap();
        let frame = bus.fifo_frames().remove(0);
        // Header in the clear, body padded to the block size and scrambled.
        assert_eq!(&frame[..4], &[2, 1, 3, 0x00]);
        assert_eq!(frame.len(), 4 + 8);
        assert_ne!(&frame[4..10], b"secret");
    }

    #[test]
    fn encrypted_loopback_delivers_plaintext() {
        let (sender, sender_bus, _irq_a) = make_encrypted_radio(fast_config(1));
        let (receiver, receiver_bus, receiver_irq) = make_encrypted_radio(fast_config(2));
        let received = capture_receives(&receiver);

        sender.send(b"secret", 2, 3, HeaderFlags::empty()).unwrap();
        let frame = sender_bus.fifo_frames().remove(0);

        receiver_bus.inject_rx(&frame, 0, 0);
        receiver_irq.fire();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message, b"secret");
    }

    #[test]
    fn unframed_aligned_message_is_delivered_raw() {
        let (radio, bus, irq) = make_encrypted_radio(fast_config(1));
        let received = capture_receives(&radio);
        // Block-aligned, but its first "decrypted" byte claims an impossible
        // plaintext length, so the framing backs off.
        let body = [200u8 ^ 0x5A, 1, 2, 3, 4, 5, 6, 7];
        let mut frame = vec![1, 5, 9, 0x00];
        frame.extend_from_slice(&body);
        bus.inject_rx(&frame, 0, 0);
        irq.fire();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message, body);
    }
}
