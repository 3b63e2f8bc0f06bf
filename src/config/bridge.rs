// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Bridge engine configuration
//!
//! Poll period of the register diff engine and the locations of the two
//! persisted default records.

use serde::{Deserialize, Serialize};

/// Configuration of the register bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Period of the poll cycle (health probe + diff), in milliseconds
    pub poll_interval_ms: u64,

    /// File holding the board setpoint defaults
    pub board_defaults_path: String,

    /// File holding the indicator defaults
    pub indicator_defaults_path: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            board_defaults_path: "board_defaults.json".to_string(),
            indicator_defaults_path: "indicator_defaults.json".to_string(),
        }
    }
}
