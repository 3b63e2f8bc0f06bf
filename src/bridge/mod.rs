// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Bridge between the Modbus register map and the boards
//!
//! - `defaults`: persisted board and indicator defaults
//! - `engine`: the poll loop turning register writes into board commands

pub mod defaults;
pub mod engine;

pub use defaults::{BoardDefaults, DefaultsError, DefaultsStore, IndicatorDefaults, SystemSetpoints};
pub use engine::{BridgeEngine, Setpoint, TickOutcome};
