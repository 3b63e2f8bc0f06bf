// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Poll cycle behaviour of the bridge engine against the simulated board bus

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::time;

use rust_ocr_gateway::bridge::{
    BoardDefaults, BridgeEngine, DefaultsStore, IndicatorDefaults, TickOutcome,
};
use rust_ocr_gateway::config::SerialConfig;
use rust_ocr_gateway::indicator::{IndicatorMode, SharedIndicator};
use rust_ocr_gateway::modbus::{
    addr, encode_register, RegisterStore, FAULT_SENTINEL, MIXED_SENTINEL,
};
use rust_ocr_gateway::serial::drivers::mock::{MockBoardBus, ReplyFault};
use rust_ocr_gateway::serial::{BoardReading, FrameTransport, SerialLink};

struct Rig {
    engine: BridgeEngine<MockBoardBus>,
    bus: MockBoardBus,
    registers: RegisterStore,
    indicator: SharedIndicator,
    defaults: DefaultsStore,
    _dir: TempDir,
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Engine on a fresh bus and empty defaults directory, before startup
fn build_rig(boards: [BoardReading; 3]) -> Rig {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let defaults = DefaultsStore::new(
        dir.path().join("board_defaults.json"),
        dir.path().join("indicator_defaults.json"),
    );

    let bus = MockBoardBus::new();
    for (board, reading) in [1u8, 2, 3].into_iter().zip(boards) {
        bus.set_board(board, reading);
    }

    // Short reply timeout so offline boards fail fast
    let serial = SerialConfig {
        max_polls: 5,
        ..SerialConfig::default()
    };
    let registers = RegisterStore::new();
    let indicator = SharedIndicator::new();
    let engine = BridgeEngine::new(
        SerialLink::with_config(bus.clone(), &serial),
        registers.clone(),
        Arc::new(indicator.clone()),
        defaults.clone(),
    );

    Rig {
        engine,
        bus,
        registers,
        indicator,
        defaults,
        _dir: dir,
    }
}

/// Started engine with all boards at `reading`, traffic history cleared
async fn started_rig(reading: BoardReading) -> Rig {
    let mut rig = build_rig([reading; 3]);
    rig.engine.startup().await;
    rig.bus.clear_history();
    rig
}

fn raw(value: i16) -> u16 {
    value as u16
}

#[tokio::test]
async fn test_startup_captures_defaults_when_absent() {
    let rig = started_rig(BoardReading::new(100, -20, 45)).await;

    assert_eq!(rig.registers.get(addr::SYSTEM_V_AMP), 100);
    assert_eq!(rig.registers.get(addr::SYSTEM_I_AMP), -20);
    assert_eq!(rig.registers.get(addr::SYSTEM_I_SHIFT), 45);
    for board in 0..3 {
        assert_eq!(rig.registers.get(addr::BOARD_V_AMP + board), 100);
        assert_eq!(rig.registers.get(addr::BOARD_I_AMP + board), -20);
        assert_eq!(rig.registers.get(addr::BOARD_I_SHIFT + board), 45);
    }
    assert!(rig.defaults.board_path().exists());

    // Built-in indicator defaults are persisted and shown
    assert!(rig.defaults.indicator_path().exists());
    let indicator_regs: Vec<i16> = (50..56).map(|a| rig.registers.get(a)).collect();
    assert_eq!(indicator_regs, vec![0, 10, 100, 0, 255, 0]);
    let settings = rig.indicator.settings();
    assert_eq!(settings.colour, [0, 255, 0]);
    assert_eq!(settings.brightness, 100);
    assert!(!rig.engine.is_degraded());
}

#[tokio::test]
async fn test_startup_pushes_persisted_defaults() {
    let mut rig = build_rig([BoardReading::default(); 3]);
    let record = BoardDefaults::from_readings([
        BoardReading::new(10, 20, 30),
        BoardReading::new(10, -20, 30),
        BoardReading::new(10, 20, 30),
    ]);
    std::fs::write(
        rig.defaults.board_path(),
        serde_json::to_string(&record).unwrap(),
    )
    .unwrap();

    rig.engine.startup().await;

    assert_eq!(rig.bus.board(2), BoardReading::new(10, -20, 30));
    assert_eq!(rig.registers.get(addr::SYSTEM_V_AMP), 10);
    assert_eq!(rig.registers.get(addr::SYSTEM_I_AMP), MIXED_SENTINEL);
    assert_eq!(rig.registers.get(addr::BOARD_I_AMP + 1), -20);
}

#[tokio::test]
async fn test_corrupt_defaults_are_regenerated() {
    let mut rig = build_rig([BoardReading::new(5, 6, 7); 3]);
    std::fs::write(rig.defaults.board_path(), "{ not json").unwrap();

    rig.engine.startup().await;

    let contents = std::fs::read_to_string(rig.defaults.board_path()).unwrap();
    let record: BoardDefaults = serde_json::from_str(&contents).unwrap();
    assert_eq!(record.boards, [BoardReading::new(5, 6, 7); 3]);
    assert_eq!(rig.registers.get(addr::SYSTEM_I_SHIFT), 7);
}

#[tokio::test]
async fn test_no_change_means_no_traffic_but_probe() {
    let mut rig = started_rig(BoardReading::new(1, 2, 3)).await;

    let outcome = rig.engine.poll_once().await;

    assert_eq!(outcome, TickOutcome::Synced { changed: 0 });
    assert!(rig.bus.writes().is_empty());
    // Health probe only: one read per board
    assert_eq!(rig.bus.sent_frames().len(), 3);
}

#[tokio::test]
async fn test_valid_system_write_fans_out() {
    let mut rig = started_rig(BoardReading::new(0, 0, 0)).await;
    rig.registers.set(addr::SYSTEM_V_AMP, 200);

    let outcome = rig.engine.poll_once().await;

    assert_eq!(outcome, TickOutcome::Synced { changed: 1 });
    for board in 1..=3 {
        assert_eq!(rig.bus.board(board).v_amp, 200);
        assert_eq!(
            rig.registers.get(addr::BOARD_V_AMP + usize::from(board) - 1),
            200
        );
    }
    assert_eq!(rig.registers.get(addr::SYSTEM_V_AMP), 200);
    assert_eq!(rig.bus.writes().len(), 3);
}

#[tokio::test]
async fn test_invalid_system_write_is_reverted() {
    let mut rig = started_rig(BoardReading::new(50, 0, 0)).await;
    rig.registers.set(addr::SYSTEM_I_SHIFT, 91);

    rig.engine.poll_once().await;

    assert_eq!(rig.registers.get(addr::SYSTEM_I_SHIFT), 0);
    assert!(rig.bus.writes().is_empty());

    // The restored value is the new baseline, nothing left to process
    let outcome = rig.engine.poll_once().await;
    assert_eq!(outcome, TickOutcome::Synced { changed: 0 });
}

#[tokio::test]
async fn test_board_write_marks_system_mixed() {
    let mut rig = started_rig(BoardReading::new(50, 10, 0)).await;
    rig.registers.set(addr::BOARD_I_AMP + 1, -50);

    rig.engine.poll_once().await;

    assert_eq!(rig.bus.board(2).i_amp, -50);
    assert_eq!(rig.bus.board(1).i_amp, 10);
    assert_eq!(rig.bus.board(3).i_amp, 10);
    assert_eq!(rig.registers.get(addr::SYSTEM_I_AMP), MIXED_SENTINEL);
    assert_eq!(rig.registers.get(addr::SYSTEM_V_AMP), 50);
    // Only the changed field is altered on the board
    assert_eq!(rig.bus.board(2).v_amp, 50);
}

#[tokio::test]
async fn test_invalid_board_write_is_reverted() {
    let mut rig = started_rig(BoardReading::new(50, 10, 30)).await;
    rig.registers.set(addr::BOARD_I_SHIFT + 2, -100);

    rig.engine.poll_once().await;

    assert_eq!(rig.registers.get(addr::BOARD_I_SHIFT + 2), 30);
    assert_eq!(rig.registers.get(addr::SYSTEM_I_SHIFT), 30);
    assert!(rig.bus.writes().is_empty());
}

#[tokio::test]
async fn test_system_write_wins_over_board_write() {
    let mut rig = started_rig(BoardReading::new(0, 0, 0)).await;
    rig.registers.set(addr::SYSTEM_V_AMP, 50);
    rig.registers.set(addr::BOARD_V_AMP + 1, 70);

    let outcome = rig.engine.poll_once().await;

    assert_eq!(outcome, TickOutcome::Synced { changed: 2 });
    for board in 1..=3 {
        assert_eq!(rig.bus.board(board).v_amp, 50);
    }
    assert_eq!(rig.registers.get(addr::BOARD_V_AMP + 1), 50);
    assert_eq!(rig.registers.get(addr::SYSTEM_V_AMP), 50);
}

#[tokio::test]
async fn test_invalid_system_write_does_not_block_board_write() {
    let mut rig = started_rig(BoardReading::new(0, 0, 0)).await;
    rig.registers.set(addr::SYSTEM_V_AMP, 999);
    rig.registers.set(addr::BOARD_V_AMP, 70);

    rig.engine.poll_once().await;

    assert_eq!(rig.bus.board(1).v_amp, 70);
    assert_eq!(rig.bus.board(2).v_amp, 0);
    assert_eq!(rig.registers.get(addr::SYSTEM_V_AMP), MIXED_SENTINEL);
}

#[tokio::test]
async fn test_failed_board_write_is_not_rolled_back() {
    let mut rig = started_rig(BoardReading::new(0, 0, 0)).await;
    rig.bus.set_fault(3, Some(ReplyFault::NoAck));
    rig.registers.set(addr::SYSTEM_I_AMP, 20);

    rig.engine.poll_once().await;

    assert_eq!(rig.bus.board(1).i_amp, 20);
    assert_eq!(rig.bus.board(2).i_amp, 20);
    assert_eq!(rig.bus.board(3).i_amp, 0);
    assert_eq!(rig.registers.get(addr::SYSTEM_I_AMP), 20);
    assert_eq!(rig.registers.get(addr::BOARD_I_AMP + 2), 20);
}

#[tokio::test]
async fn test_save_board_defaults_trigger() {
    let mut rig = started_rig(BoardReading::new(40, 0, 0)).await;
    rig.registers.set(addr::BOARD_V_AMP + 2, 90);
    rig.engine.poll_once().await;

    rig.registers.set(addr::SAVE_BOARD_DEFAULTS, 1);
    rig.engine.poll_once().await;

    assert_eq!(rig.registers.get(addr::SAVE_BOARD_DEFAULTS), 0);
    let contents = std::fs::read_to_string(rig.defaults.board_path()).unwrap();
    let record: BoardDefaults = serde_json::from_str(&contents).unwrap();
    assert_eq!(record.boards[2], BoardReading::new(90, 0, 0));
    assert_eq!(record.system.v_amp, MIXED_SENTINEL);
    assert_eq!(record.system.i_amp, 0);
}

#[tokio::test]
async fn test_indicator_registers_drive_indicator() {
    let mut rig = started_rig(BoardReading::default()).await;
    rig.registers.set(addr::INDICATOR_FUNCTION, 2);
    rig.registers.set(addr::INDICATOR_FREQUENCY, 25);
    rig.registers.set(addr::INDICATOR_BRIGHTNESS, 40);
    rig.registers.set(addr::INDICATOR_RED, 255);

    rig.engine.poll_once().await;

    let settings = rig.indicator.settings();
    assert_eq!(settings.mode, IndicatorMode::Flashing);
    assert_eq!(settings.frequency, 2.5);
    assert_eq!(settings.brightness, 40);
    assert_eq!(settings.colour, [255, 255, 0]);
}

#[tokio::test]
async fn test_invalid_indicator_registers_are_reverted() {
    let mut rig = started_rig(BoardReading::default()).await;
    rig.registers.set(addr::INDICATOR_FUNCTION, 7);
    rig.registers.set(addr::INDICATOR_FREQUENCY, 256);
    rig.registers.set(addr::INDICATOR_BRIGHTNESS, 101);
    rig.registers.set(addr::INDICATOR_BLUE, -1);

    rig.engine.poll_once().await;

    let indicator_regs: Vec<i16> = (50..56).map(|a| rig.registers.get(a)).collect();
    assert_eq!(indicator_regs, vec![0, 10, 100, 0, 255, 0]);
    assert_eq!(rig.indicator.settings().mode, IndicatorMode::Off);
    assert_eq!(rig.indicator.settings().colour, [0, 255, 0]);
}

#[tokio::test]
async fn test_save_indicator_defaults_trigger() {
    let mut rig = started_rig(BoardReading::default()).await;
    rig.registers.set(addr::INDICATOR_FUNCTION, 5);
    rig.registers.set(addr::INDICATOR_GREEN, 12);
    rig.registers.set(addr::SAVE_INDICATOR_DEFAULTS, 3);

    rig.engine.poll_once().await;

    assert_eq!(rig.registers.get(addr::SAVE_INDICATOR_DEFAULTS), 0);
    let saved = rig.defaults.load_indicator_defaults(None).unwrap();
    assert_eq!(
        saved,
        IndicatorDefaults {
            function: 5,
            green: 12,
            ..IndicatorDefaults::BUILT_IN
        }
    );
}

#[tokio::test]
async fn test_link_loss_shows_fault_block() {
    let mut rig = started_rig(BoardReading::new(30, 30, 30)).await;
    rig.bus.set_offline(2, true);

    let outcome = rig.engine.poll_once().await;

    assert_eq!(outcome, TickOutcome::Degraded);
    assert!(rig.engine.is_degraded());
    let map = rig.registers.snapshot();
    assert!(map[..=12].iter().all(|word| *word == raw(FAULT_SENTINEL)));
    assert_eq!(map[addr::INDICATOR_BRIGHTNESS], 100);
    assert!(rig.bus.writes().is_empty());
}

#[tokio::test]
async fn test_recovery_restores_map_and_resyncs_boards() {
    let mut rig = started_rig(BoardReading::new(30, -30, 15)).await;
    let good_map = rig.registers.snapshot();

    rig.bus.set_offline(1, true);
    assert_eq!(rig.engine.poll_once().await, TickOutcome::Degraded);

    // Written while degraded, discarded on recovery
    rig.registers.set(addr::SYSTEM_V_AMP, 9);
    // A board lost its setpoints while the link was down
    rig.bus.set_board(3, BoardReading::new(0, 0, 0));

    rig.bus.set_offline(1, false);
    assert_eq!(rig.engine.poll_once().await, TickOutcome::Recovered);

    assert!(!rig.engine.is_degraded());
    assert_eq!(rig.registers.snapshot(), good_map);
    for board in 1..=3 {
        assert_eq!(rig.bus.board(board), BoardReading::new(30, -30, 15));
    }

    assert_eq!(
        rig.engine.poll_once().await,
        TickOutcome::Synced { changed: 0 }
    );
}

#[tokio::test]
async fn test_startup_without_boards_starts_degraded() {
    let mut rig = build_rig([BoardReading::new(8, 9, 10); 3]);
    rig.bus.set_offline(1, true);

    rig.engine.startup().await;

    assert!(rig.engine.is_degraded());
    assert_eq!(rig.registers.get(addr::SYSTEM_V_AMP), FAULT_SENTINEL);
    assert!(!rig.defaults.board_path().exists());

    rig.bus.set_offline(1, false);
    assert_eq!(rig.engine.poll_once().await, TickOutcome::Recovered);
    assert_eq!(rig.registers.get(addr::SYSTEM_V_AMP), 8);
    assert_eq!(rig.registers.get(addr::BOARD_I_SHIFT + 2), 10);
    assert_eq!(rig.registers.get(addr::INDICATOR_BRIGHTNESS), 100);

    // The record captured on recovery is persisted for the next start
    let contents = std::fs::read_to_string(rig.defaults.board_path()).unwrap();
    let record: BoardDefaults = serde_json::from_str(&contents).unwrap();
    assert_eq!(record.boards, [BoardReading::new(8, 9, 10); 3]);
    assert_eq!(record.system.i_amp, 9);
}

#[tokio::test]
async fn test_shutdown_zeroes_outputs_and_keeps_shift() {
    let mut rig = started_rig(BoardReading::new(120, -60, 30)).await;
    rig.bus.set_offline(2, true);

    rig.engine.shutdown_outputs().await;

    assert_eq!(rig.bus.board(1), BoardReading::new(0, 0, 30));
    assert_eq!(rig.bus.board(3), BoardReading::new(0, 0, 30));
    // An unreachable board is skipped without stopping the others
    assert_eq!(rig.bus.board(2), BoardReading::new(120, -60, 30));
}

#[tokio::test]
async fn test_every_out_of_range_write_is_reverted() {
    let mut rig = started_rig(BoardReading::new(50, 10, 30)).await;
    let baseline = rig.registers.snapshot();
    let indicator_before = rig.indicator.settings();

    // (address, below range, above range)
    let cases: [(usize, i16, i16); 18] = [
        (addr::SYSTEM_V_AMP, -1, 256),
        (addr::SYSTEM_I_AMP, -256, 256),
        (addr::SYSTEM_I_SHIFT, -91, 91),
        (addr::BOARD_V_AMP, -1, 256),
        (addr::BOARD_V_AMP + 1, -1, 256),
        (addr::BOARD_V_AMP + 2, -1, 256),
        (addr::BOARD_I_AMP, -256, 256),
        (addr::BOARD_I_AMP + 1, -256, 256),
        (addr::BOARD_I_AMP + 2, -256, 256),
        (addr::BOARD_I_SHIFT, -91, 91),
        (addr::BOARD_I_SHIFT + 1, -91, 91),
        (addr::BOARD_I_SHIFT + 2, -91, 91),
        (addr::INDICATOR_FUNCTION, -1, 7),
        (addr::INDICATOR_FREQUENCY, -1, 256),
        (addr::INDICATOR_BRIGHTNESS, -1, 101),
        (addr::INDICATOR_RED, -1, 256),
        (addr::INDICATOR_GREEN, -1, 256),
        (addr::INDICATOR_BLUE, -1, 256),
    ];

    for (address, below, above) in cases {
        for value in [below, above] {
            rig.registers.set(address, value);

            let outcome = rig.engine.poll_once().await;

            assert_eq!(outcome, TickOutcome::Synced { changed: 1 });
            assert_eq!(
                rig.registers.snapshot(),
                baseline,
                "register {} = {} was not reverted",
                address,
                value
            );
            assert!(
                rig.bus.writes().is_empty(),
                "register {} = {} reached a board",
                address,
                value
            );
        }
    }
    assert_eq!(rig.indicator.settings(), indicator_before);
}

/// Board bus where every transmitted frame occupies the line for `delay`
#[derive(Clone)]
struct SlowBus {
    inner: MockBoardBus,
    delay: Duration,
}

#[async_trait]
impl FrameTransport for SlowBus {
    async fn clear_input(&mut self) -> std::io::Result<()> {
        self.inner.clear_input().await
    }

    async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        time::sleep(self.delay).await;
        self.inner.send(data).await
    }

    async fn bytes_available(&mut self) -> std::io::Result<usize> {
        self.inner.bytes_available().await
    }

    async fn receive(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.inner.receive(buf).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_clients_only_see_whole_ticks() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let defaults = DefaultsStore::new(
        dir.path().join("board_defaults.json"),
        dir.path().join("indicator_defaults.json"),
    );
    let bus = MockBoardBus::new();
    for board in 1..=3 {
        bus.set_board(board, BoardReading::new(10, 0, 0));
    }
    let slow = SlowBus {
        inner: bus.clone(),
        delay: Duration::from_millis(20),
    };
    let registers = RegisterStore::new();
    let mut engine = BridgeEngine::new(
        SerialLink::with_config(slow, &SerialConfig::default()),
        registers.clone(),
        Arc::new(SharedIndicator::new()),
        defaults,
    );
    engine.startup().await;

    registers.set(addr::SYSTEM_V_AMP, 200);
    registers.set(addr::INDICATOR_BRIGHTNESS, 500);
    let before = registers.snapshot();
    let mut after = before;
    for board in 0..3 {
        after[addr::BOARD_V_AMP + board] = encode_register(200);
    }
    after[addr::INDICATOR_BRIGHTNESS] = encode_register(100);

    let tick = tokio::spawn(async move {
        let outcome = engine.poll_once().await;
        (engine, outcome)
    });

    // Sample the map like a client would while the boards are being written
    let mut client_wrote = false;
    while !tick.is_finished() {
        if !client_wrote {
            let map = registers.snapshot();
            assert!(map == before || map == after, "partial tick visible: {:?}", &map[..13]);
            if map == after {
                registers.set(addr::BOARD_V_AMP + 1, 77);
                client_wrote = true;
            }
        }
        time::sleep(Duration::from_millis(5)).await;
    }
    let (mut engine, outcome) = tick.await.unwrap();

    assert_eq!(outcome, TickOutcome::Synced { changed: 2 });
    assert!(client_wrote, "corrections were published only after the board writes");
    // The write made during the tick survives and is handled by the next one
    assert_eq!(registers.get(addr::BOARD_V_AMP + 1), 77);
    assert_eq!(bus.board(2).v_amp, 200);

    assert_eq!(
        engine.poll_once().await,
        TickOutcome::Synced { changed: 1 }
    );
    assert_eq!(bus.board(2).v_amp, 77);
    assert_eq!(bus.board(1).v_amp, 200);
    assert_eq!(registers.get(addr::SYSTEM_V_AMP), MIXED_SENTINEL);
}
