// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Status indicator (LED strip)
//!
//! The bridge engine drives the indicator through the [`StatusIndicator`]
//! trait. [`SharedIndicator`] is the implementation used by the daemon: every
//! setting is an atomic so the engine can update it while the render loop
//! ([`daemon::run_indicator`]) samples it at the start of each frame.
//!
//! | Index | Mode |
//! |-------|------|
//! | 0 | off |
//! | 1 | solid |
//! | 2 | flashing |
//! | 3 | alternate |
//! | 4 | pulse |
//! | 5 | chase |
//! | 6 | bounce |

pub mod daemon;
pub mod render;

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

pub use daemon::run_indicator;
pub use render::{LogStrip, PixelStrip, Renderer, StripFrame};

/// One pixel as `[red, green, blue]`
pub type Rgb = [u8; 3];

/// Colour shown until a client or the persisted defaults change it
pub const DEFAULT_COLOUR: Rgb = [29, 60, 125];

/// Brightness percent shown until changed
pub const DEFAULT_BRIGHTNESS: u8 = 50;

/// Animation frequency in Hz until changed (one on/off period per second)
pub const DEFAULT_FREQUENCY: f32 = 1.0;

/// Animation modes of the strip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum IndicatorMode {
    #[default]
    Off = 0,
    Solid = 1,
    Flashing = 2,
    Alternate = 3,
    Pulse = 4,
    Chase = 5,
    Bounce = 6,
}

impl IndicatorMode {
    /// Number of modes, valid indices are `0..STATE_COUNT`
    pub const STATE_COUNT: usize = 7;

    /// Mode for a register index, `None` when out of range
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Off),
            1 => Some(Self::Solid),
            2 => Some(Self::Flashing),
            3 => Some(Self::Alternate),
            4 => Some(Self::Pulse),
            5 => Some(Self::Chase),
            6 => Some(Self::Bounce),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Partial colour change, channels left at `None` keep their value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColourUpdate {
    pub red: Option<u8>,
    pub green: Option<u8>,
    pub blue: Option<u8>,
}

impl ColourUpdate {
    pub fn red(value: u8) -> Self {
        Self {
            red: Some(value),
            ..Self::default()
        }
    }

    pub fn green(value: u8) -> Self {
        Self {
            green: Some(value),
            ..Self::default()
        }
    }

    pub fn blue(value: u8) -> Self {
        Self {
            blue: Some(value),
            ..Self::default()
        }
    }

    /// Update setting all three channels
    pub fn all(colour: Rgb) -> Self {
        Self {
            red: Some(colour[0]),
            green: Some(colour[1]),
            blue: Some(colour[2]),
        }
    }

    /// Apply this update to `colour`
    pub fn apply(&self, colour: Rgb) -> Rgb {
        [
            self.red.unwrap_or(colour[0]),
            self.green.unwrap_or(colour[1]),
            self.blue.unwrap_or(colour[2]),
        ]
    }
}

/// Operations the bridge engine needs from a status indicator
pub trait StatusIndicator: Send + Sync {
    /// Select the animation mode by index
    fn set_function(&self, index: usize);

    /// Set the animation frequency in Hz
    fn set_frequency(&self, hz: f32);

    /// Set the brightness in percent (0..100)
    fn set_brightness(&self, percent: u8);

    /// Change some or all colour channels
    fn set_colour(&self, update: ColourUpdate);

    /// Number of supported modes
    fn state_count(&self) -> usize;
}

/// Settings sampled by the render loop at the start of a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSettings {
    pub mode: IndicatorMode,
    pub frequency: f32,
    pub brightness: u8,
    pub colour: Rgb,
}

impl IndicatorSettings {
    /// Time each half of an animation period lasts: `1 / f / 2`
    ///
    /// `None` when the frequency is zero (or negative), the animation then
    /// holds its current step.
    pub fn period_delay(&self) -> Option<Duration> {
        if self.frequency > 0.0 && self.frequency.is_finite() {
            Some(Duration::from_secs_f32(1.0 / self.frequency / 2.0))
        } else {
            None
        }
    }

    /// Brightness as a strip scale factor in `0.0..=1.0`
    pub fn brightness_scale(&self) -> f32 {
        f32::from(self.brightness.min(100)) / 100.0
    }
}

#[derive(Debug)]
struct IndicatorState {
    mode: AtomicU8,
    frequency: AtomicU32,
    brightness: AtomicU8,
    colour: AtomicU32,
}

fn pack(colour: Rgb) -> u32 {
    u32::from_be_bytes([0, colour[0], colour[1], colour[2]])
}

fn unpack(packed: u32) -> Rgb {
    let [_, red, green, blue] = packed.to_be_bytes();
    [red, green, blue]
}

/// Lock-free indicator settings shared between the engine and the render loop
///
/// Clones share the same settings.
#[derive(Debug, Clone)]
pub struct SharedIndicator {
    state: Arc<IndicatorState>,
}

impl Default for SharedIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedIndicator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(IndicatorState {
                mode: AtomicU8::new(IndicatorMode::Off as u8),
                frequency: AtomicU32::new(DEFAULT_FREQUENCY.to_bits()),
                brightness: AtomicU8::new(DEFAULT_BRIGHTNESS),
                colour: AtomicU32::new(pack(DEFAULT_COLOUR)),
            }),
        }
    }

    /// Current settings
    pub fn settings(&self) -> IndicatorSettings {
        let mode = IndicatorMode::from_index(self.state.mode.load(Ordering::Relaxed).into())
            .unwrap_or_default();
        IndicatorSettings {
            mode,
            frequency: f32::from_bits(self.state.frequency.load(Ordering::Relaxed)),
            brightness: self.state.brightness.load(Ordering::Relaxed),
            colour: unpack(self.state.colour.load(Ordering::Relaxed)),
        }
    }
}

impl StatusIndicator for SharedIndicator {
    fn set_function(&self, index: usize) {
        let mode = IndicatorMode::from_index(index).unwrap_or_else(|| {
            warn!("Unknown indicator function {}, switching off", index);
            IndicatorMode::Off
        });
        debug!("Indicator function set to {:?}", mode);
        self.state.mode.store(mode as u8, Ordering::Relaxed);
    }

    fn set_frequency(&self, hz: f32) {
        debug!("Indicator frequency set to {} Hz", hz);
        self.state.frequency.store(hz.to_bits(), Ordering::Relaxed);
    }

    fn set_brightness(&self, percent: u8) {
        debug!("Indicator brightness set to {}%", percent);
        self.state
            .brightness
            .store(percent.min(100), Ordering::Relaxed);
    }

    fn set_colour(&self, update: ColourUpdate) {
        // fetch_update keeps concurrent single-channel updates from clobbering each other.
        // The closure never returns None, so the update always succeeds.
        self.state
            .colour
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |packed| {
                Some(pack(update.apply(unpack(packed))))
            })
            .ok();
        debug!("Indicator colour set to {:?}", self.settings().colour);
    }

    fn state_count(&self) -> usize {
        IndicatorMode::STATE_COUNT
    }
}
