// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! End to end: a Modbus client drives simulated boards through the daemon

use std::time::Duration;

use tokio::time;
use tokio_modbus::prelude::*;

use rust_ocr_gateway::config::{Config, SerialDriverType};
use rust_ocr_gateway::daemon::Daemon;
use rust_ocr_gateway::indicator::IndicatorMode;
use rust_ocr_gateway::modbus::encode_register;
use rust_ocr_gateway::serial::drivers::mock::MockBoardBus;
use rust_ocr_gateway::serial::BoardReading;

fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.modbus.address = "127.0.0.1".to_string();
    config.modbus.port = 0;
    config.serial.driver = SerialDriverType::Mock;
    config.bridge.poll_interval_ms = 20;
    config.bridge.board_defaults_path = dir.join("boards.json").display().to_string();
    config.bridge.indicator_defaults_path = dir.join("indicator.json").display().to_string();
    config.indicator.led_count = 16;
    config
}

#[tokio::test]
async fn test_client_writes_reach_boards_and_shutdown_zeroes_outputs(
) -> Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path());

    let bus = MockBoardBus::new();
    for board in 1..=3 {
        bus.set_board(board, BoardReading::new(10, 10, 10));
    }

    let mut daemon = Daemon::new();
    daemon.launch_with_transport(&config, bus.clone()).await?;
    let socket_addr = daemon.modbus_address().ok_or("listener not bound")?;

    let mut ctx = tcp::connect(socket_addr).await?;
    let initial = ctx.read_holding_registers(0, 3).await??;
    assert_eq!(initial, vec![10, 10, 10]);

    ctx.write_single_register(1, encode_register(-100)).await??;
    ctx.write_single_register(50, IndicatorMode::Solid.index() as u16).await??;
    time::sleep(Duration::from_millis(300)).await;

    for board in 1..=3 {
        assert_eq!(bus.board(board).i_amp, -100);
    }
    let mirrored = ctx.read_holding_registers(6, 3).await??;
    assert_eq!(mirrored, vec![encode_register(-100); 3]);
    assert_eq!(daemon.indicator().settings().mode, IndicatorMode::Solid);

    ctx.disconnect().await?;

    daemon.shutdown();
    daemon.join().await?;

    for board in 1..=3 {
        assert_eq!(bus.board(board), BoardReading::new(0, 0, 10));
    }
    Ok(())
}

#[tokio::test]
async fn test_launch_fails_when_listener_cannot_bind() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let mut config = test_config(dir.path());
    config.modbus.port = occupied.local_addr()?.port();

    let mut daemon = Daemon::new();
    let result = daemon
        .launch_with_transport(&config, MockBoardBus::new())
        .await;
    assert!(result.is_err());
    // The indicator started before the bind attempt is told to stop
    assert!(!daemon.is_running());

    daemon.join().await?;
    Ok(())
}
