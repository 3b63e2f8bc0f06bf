// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus/TCP gateway for the OCR output boards
//!
//! The gateway exposes a 100-register Modbus map to a PLC and bridges it to
//! three output boards on a serial line, plus an LED strip status indicator
//! driven from the same map.
//!
//! - [`config`]: YAML configuration validated against a JSON schema
//! - [`serial`]: framed serial link to the boards
//! - [`modbus`]: register map and Modbus TCP server
//! - [`bridge`]: defaults persistence and the register poll engine
//! - [`indicator`]: status indicator settings and render loop
//! - [`daemon`]: service lifecycle

pub mod bridge;
pub mod config;
pub mod daemon;
pub mod indicator;
pub mod modbus;
pub mod serial;
