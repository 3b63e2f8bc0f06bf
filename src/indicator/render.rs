// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Frame rendering for the LED strip
//!
//! [`Renderer`] turns the sampled [`IndicatorSettings`] into one [`StripFrame`]
//! per call and keeps the animation position between calls. Frames go to a
//! [`PixelStrip`] sink.

use anyhow::Result;
use log::trace;

use super::{IndicatorMode, IndicatorSettings, Rgb};
use crate::config::IndicatorConfig;

/// Points on each half of the pulse brightness curve
const PULSE_POINTS: usize = 40;

const BLACK: Rgb = [0, 0, 0];

/// Output device for rendered frames
pub trait PixelStrip: Send {
    /// Number of LEDs on the strip
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Display `pixels` at `brightness` (0.0..=1.0)
    fn show(&mut self, pixels: &[Rgb], brightness: f32) -> Result<()>;
}

/// Strip sink that only traces frames
///
/// Used when no LED hardware is attached. Keeps the last frame shown.
#[derive(Debug, Clone, Default)]
pub struct LogStrip {
    len: usize,
    frames_shown: u64,
    last_frame: Vec<Rgb>,
    last_brightness: f32,
}

impl LogStrip {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            ..Self::default()
        }
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }

    pub fn last_frame(&self) -> &[Rgb] {
        &self.last_frame
    }

    pub fn last_brightness(&self) -> f32 {
        self.last_brightness
    }
}

impl PixelStrip for LogStrip {
    fn len(&self) -> usize {
        self.len
    }

    fn show(&mut self, pixels: &[Rgb], brightness: f32) -> Result<()> {
        self.frames_shown += 1;
        self.last_frame.clear();
        self.last_frame.extend_from_slice(pixels);
        self.last_brightness = brightness;
        trace!(
            "Strip frame {}: {} lit at brightness {:.2}",
            self.frames_shown,
            pixels.iter().filter(|p| **p != BLACK).count(),
            brightness
        );
        Ok(())
    }
}

/// One rendered frame
#[derive(Debug, Clone, PartialEq)]
pub struct StripFrame {
    pub pixels: Vec<Rgb>,
    pub brightness: f32,
    /// Hold the frame for the animation half-period rather than the refresh tick
    pub paced: bool,
}

/// Stateful frame generator for all indicator modes
#[derive(Debug, Clone)]
pub struct Renderer {
    leds: usize,
    chaser_on: usize,
    chaser_off: usize,
    chaser_reverse: bool,
    phase: bool,
    pulse_curve: Vec<f32>,
    pulse_index: usize,
    chase_step: usize,
    bounce_led: usize,
    bounce_back: bool,
}

/// Rising then falling exponential brightness ramp, peak normalised to 1.0
fn pulse_curve() -> Vec<f32> {
    let rising: Vec<f32> = (0..PULSE_POINTS).map(|i| 1.15f32.powi(i as i32)).collect();
    let peak = rising.last().copied().unwrap_or(1.0);
    let rising: Vec<f32> = rising.into_iter().map(|v| v / peak).collect();
    rising
        .iter()
        .copied()
        .chain(rising.iter().rev().copied())
        .collect()
}

impl Renderer {
    pub fn new(config: &IndicatorConfig) -> Self {
        Self {
            leds: config.led_count,
            chaser_on: config.chaser_leds_on.max(1),
            chaser_off: config.chaser_leds_off,
            chaser_reverse: config.chaser_reverse,
            phase: false,
            pulse_curve: pulse_curve(),
            pulse_index: 0,
            chase_step: 0,
            bounce_led: 0,
            bounce_back: false,
        }
    }

    fn filled(&self, colour: Rgb) -> Vec<Rgb> {
        vec![colour; self.leds]
    }

    /// Frame with every LED off, shown when the loop stops
    pub fn blank(&self) -> StripFrame {
        StripFrame {
            pixels: self.filled(BLACK),
            brightness: 0.0,
            paced: false,
        }
    }

    /// Render the next frame and advance the animation
    ///
    /// Paced modes (flashing, alternate, chase) hold their step when the
    /// frequency is zero.
    pub fn next_frame(&mut self, settings: &IndicatorSettings) -> StripFrame {
        let colour = settings.colour;
        let brightness = settings.brightness_scale();
        let advance = settings.period_delay().is_some();

        match settings.mode {
            IndicatorMode::Off => StripFrame {
                pixels: self.filled(BLACK),
                brightness,
                paced: false,
            },
            IndicatorMode::Solid => StripFrame {
                pixels: self.filled(colour),
                brightness,
                paced: false,
            },
            IndicatorMode::Flashing => {
                let pixels = self.filled(if self.phase { BLACK } else { colour });
                if advance {
                    self.phase = !self.phase;
                }
                StripFrame {
                    pixels,
                    brightness,
                    paced: true,
                }
            }
            IndicatorMode::Alternate => {
                // odd LEDs lit on the first half-period, even ones on the second
                let lit_parity = usize::from(!self.phase);
                let pixels = (0..self.leds)
                    .map(|i| if i % 2 == lit_parity { colour } else { BLACK })
                    .collect();
                if advance {
                    self.phase = !self.phase;
                }
                StripFrame {
                    pixels,
                    brightness,
                    paced: true,
                }
            }
            IndicatorMode::Pulse => {
                let level = self.pulse_curve[self.pulse_index % self.pulse_curve.len()];
                self.pulse_index = (self.pulse_index + 1) % self.pulse_curve.len();
                StripFrame {
                    pixels: self.filled(colour),
                    brightness: level,
                    paced: false,
                }
            }
            IndicatorMode::Chase => {
                let segment = self.chaser_on + self.chaser_off;
                let pixels = (0..self.leds)
                    .map(|i| {
                        let position = if self.chaser_reverse {
                            self.leds - 1 - i
                        } else {
                            i
                        };
                        let offset = (position % segment + segment - self.chase_step) % segment;
                        if offset < self.chaser_on {
                            colour
                        } else {
                            BLACK
                        }
                    })
                    .collect();
                if advance {
                    self.chase_step = (self.chase_step + 1) % segment;
                }
                StripFrame {
                    pixels,
                    brightness,
                    paced: true,
                }
            }
            IndicatorMode::Bounce => {
                let mut pixels = self.filled(BLACK);
                if let Some(pixel) = pixels.get_mut(self.bounce_led) {
                    *pixel = colour;
                }
                let last = self.leds.saturating_sub(1);
                if self.bounce_back {
                    if self.bounce_led == 0 {
                        self.bounce_back = false;
                    } else {
                        self.bounce_led -= 1;
                    }
                } else if self.bounce_led >= last {
                    self.bounce_back = true;
                } else {
                    self.bounce_led += 1;
                }
                StripFrame {
                    pixels,
                    brightness,
                    paced: false,
                }
            }
        }
    }
}
