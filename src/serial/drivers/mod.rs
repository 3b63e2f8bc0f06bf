// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Byte transports for the board serial link
//!
//! This module provides the different driver implementations:
//! - Native: a real UART opened through the `serialport` crate
//! - Mock: a simulated bus with three boards for testing and development

pub mod mock;
pub mod native;

pub use mock::{MockBoardBus, ReplyFault};
pub use native::NativeSerialDriver;
