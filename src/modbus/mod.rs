// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module provides the Modbus TCP side of the gateway: the shared
//! holding-register map and the server answering PLC requests against it.
//!
//! ## Key Components
//!
//! - [`RegisterStore`]: the 100-register map shared with the bridge engine
//! - [`GatewayModbusServer`]: the `tokio_modbus` service serving that map
//!
//! ## Usage
//!
//! The Modbus server is normally started by the daemon:
//!
//! ```no_run
//! use rust_ocr_gateway::config::Config;
//! use rust_ocr_gateway::daemon::launch_daemon::Daemon;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut daemon = Daemon::new();
//! daemon.launch(&Config::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod modbus_server;
pub mod registers;

pub use modbus_server::GatewayModbusServer;
pub use registers::{
    addr, decode_register, encode_register, RegisterMap, RegisterStore, FAULT_BLOCK,
    FAULT_SENTINEL, MIXED_SENTINEL, REGISTER_COUNT,
};
