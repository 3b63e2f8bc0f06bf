// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Status indicator configuration

use serde::{Deserialize, Serialize};

/// Configuration of the LED strip status indicator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// Whether the render loop runs at all
    pub enabled: bool,

    /// Number of LEDs on the strip
    pub led_count: usize,

    /// LEDs lit in each chaser segment
    #[serde(default = "default_chaser_on")]
    pub chaser_leds_on: usize,

    /// LEDs dark in each chaser segment
    #[serde(default = "default_chaser_off")]
    pub chaser_leds_off: usize,

    /// Run the chaser backwards
    #[serde(default)]
    pub chaser_reverse: bool,
}

fn default_chaser_on() -> usize {
    3
}

fn default_chaser_off() -> usize {
    7
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            led_count: 300,
            chaser_leds_on: default_chaser_on(),
            chaser_leds_off: default_chaser_off(),
            chaser_reverse: false,
        }
    }
}
