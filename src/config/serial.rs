// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Serial link configuration
//!
//! Settings for the UART connecting the gateway to the three output boards.

use serde::{Deserialize, Serialize};

/// Byte transport used to reach the boards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialDriverType {
    /// Real serial device
    Native,
    /// Simulated boards, for development without hardware
    Mock,
}

/// Configuration of the board serial link
///
/// The reply timeout is `poll_interval_ms * max_polls` (about 100 ms by default).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Which transport to use
    pub driver: SerialDriverType,

    /// Serial device path
    pub port: String,

    /// Line speed
    pub baud_rate: u32,

    /// Delay between two checks of the receive buffer, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of checks before a transaction times out
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

fn default_poll_interval_ms() -> u64 {
    1
}

fn default_max_polls() -> u32 {
    100
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            driver: SerialDriverType::Native,
            port: "/dev/serial0".to_string(),
            baud_rate: 115200,
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
        }
    }
}
