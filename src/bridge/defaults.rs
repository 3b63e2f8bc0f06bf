// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Persisted default setpoints
//!
//! Two records survive a restart:
//! - [`BoardDefaults`]: the setpoints of boards 1..3 plus the system aggregate
//!   shown in registers 0..2
//! - [`IndicatorDefaults`]: the indicator settings shown in registers 50..55
//!
//! Each record is a JSON file. Parsing is strict (unknown fields and out of
//! range values are rejected). A record that cannot be read or fails to parse
//! is logged and handled as if it were absent, so it gets regenerated.
//! Files are replaced atomically: the new content goes to a temporary file in
//! the same directory which is then renamed over the old one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::config::BridgeConfig;
use crate::indicator::IndicatorMode;
use crate::modbus::MIXED_SENTINEL;
use crate::serial::frame::{I_AMP_RANGE, I_SHIFT_RANGE, V_AMP_RANGE};
use crate::serial::{BoardReading, BoardUpdate, FrameTransport, SerialError, SerialLink, BOARDS};

/// Errors raised while loading or saving defaults
#[derive(Debug, Error)]
pub enum DefaultsError {
    #[error("defaults file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("defaults record could not be encoded or decoded: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("defaults record is invalid: {0}")]
    Invalid(String),

    #[error("could not read the boards: {0}")]
    Serial(#[from] SerialError),
}

pub type Result<T> = std::result::Result<T, DefaultsError>;

/// System-wide setpoints shown in registers 0..2
///
/// Each field holds the value shared by the three boards, or
/// [`MIXED_SENTINEL`] when they differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemSetpoints {
    pub v_amp: i16,
    pub i_amp: i16,
    pub i_shift: i16,
}

/// Board setpoint record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoardDefaults {
    /// Setpoints of boards 1, 2 and 3
    pub boards: [BoardReading; 3],
    pub system: SystemSetpoints,
}

fn common_or_mixed(values: [i16; 3]) -> i16 {
    if values[0] == values[1] && values[1] == values[2] {
        values[0]
    } else {
        MIXED_SENTINEL
    }
}

fn check_system_field(
    field: &str,
    value: i16,
    range: &std::ops::RangeInclusive<i32>,
) -> std::result::Result<(), String> {
    if value == MIXED_SENTINEL || range.contains(&i32::from(value)) {
        Ok(())
    } else {
        Err(format!("system {} {} outside {:?}", field, value, range))
    }
}

impl BoardDefaults {
    /// Build the record from three board readings, aggregating the system setpoints
    pub fn from_readings(boards: [BoardReading; 3]) -> Self {
        let system = SystemSetpoints {
            v_amp: common_or_mixed(boards.map(|b| i16::from(b.v_amp))),
            i_amp: common_or_mixed(boards.map(|b| b.i_amp)),
            i_shift: common_or_mixed(boards.map(|b| b.i_shift)),
        };
        Self { boards, system }
    }
}

/// Indicator settings record, register values as written by clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndicatorDefaults {
    /// Mode index
    pub function: u8,
    /// Tenths of Hz
    pub frequency: u8,
    /// Percent
    pub brightness: u8,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Default for IndicatorDefaults {
    fn default() -> Self {
        Self::BUILT_IN
    }
}

impl IndicatorDefaults {
    /// Used when nothing is persisted and no current values are known
    pub const BUILT_IN: Self = Self {
        function: 0,
        frequency: 10,
        brightness: 100,
        red: 0,
        green: 255,
        blue: 0,
    };

    /// Record for registers 50..55, `None` when any of them is out of range
    pub fn from_registers(values: [i16; 6]) -> Option<Self> {
        let [function, frequency, brightness, red, green, blue] = values;
        let byte = |v: i16| u8::try_from(v).ok();
        let record = Self {
            function: byte(function)?,
            frequency: byte(frequency)?,
            brightness: byte(brightness)?,
            red: byte(red)?,
            green: byte(green)?,
            blue: byte(blue)?,
        };
        record.validate().ok().map(|_| record)
    }

    /// Register values 50..55
    pub fn to_registers(&self) -> [i16; 6] {
        [
            self.function,
            self.frequency,
            self.brightness,
            self.red,
            self.green,
            self.blue,
        ]
        .map(i16::from)
    }
}

/// Semantic checks applied after parsing a record
trait Record: Serialize + DeserializeOwned {
    const NAME: &'static str;

    fn validate(&self) -> std::result::Result<(), String>;
}

impl Record for BoardDefaults {
    const NAME: &'static str = "board defaults";

    fn validate(&self) -> std::result::Result<(), String> {
        for (board, reading) in BOARDS.iter().zip(self.boards.iter()) {
            if !reading.is_valid() {
                return Err(format!("board {} setpoints out of range: {:?}", board, reading));
            }
        }
        check_system_field("v_amp", self.system.v_amp, &V_AMP_RANGE)?;
        check_system_field("i_amp", self.system.i_amp, &I_AMP_RANGE)?;
        check_system_field("i_shift", self.system.i_shift, &I_SHIFT_RANGE)
    }
}

impl Record for IndicatorDefaults {
    const NAME: &'static str = "indicator defaults";

    fn validate(&self) -> std::result::Result<(), String> {
        if usize::from(self.function) >= IndicatorMode::STATE_COUNT {
            return Err(format!("unknown indicator function {}", self.function));
        }
        if self.brightness > 100 {
            return Err(format!("brightness {}% above 100%", self.brightness));
        }
        Ok(())
    }
}

/// Load and persist the two default records
#[derive(Debug, Clone)]
pub struct DefaultsStore {
    board_path: PathBuf,
    indicator_path: PathBuf,
}

impl DefaultsStore {
    pub fn new(board_path: impl Into<PathBuf>, indicator_path: impl Into<PathBuf>) -> Self {
        Self {
            board_path: board_path.into(),
            indicator_path: indicator_path.into(),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(&config.board_defaults_path, &config.indicator_defaults_path)
    }

    pub fn board_path(&self) -> &Path {
        &self.board_path
    }

    pub fn indicator_path(&self) -> &Path {
        &self.indicator_path
    }

    /// Persisted board defaults pushed to the boards, or computed from them when absent
    ///
    /// When a record exists each board receives its setpoints; a board that
    /// fails to take them is logged and skipped. Otherwise the boards are read,
    /// the record is built from their current state and persisted.
    pub async fn load_board_defaults<T: FrameTransport>(
        &self,
        link: &mut SerialLink<T>,
    ) -> Result<BoardDefaults> {
        let Some(defaults) = read_record::<BoardDefaults>(&self.board_path) else {
            info!("No usable board defaults, capturing them from the boards");
            return self.save_board_defaults(link).await;
        };

        for (board, reading) in BOARDS.iter().zip(defaults.boards.iter()) {
            if let Err(e) = link.write(*board, BoardUpdate::all(reading)).await {
                warn!("Failed to restore defaults on board {}: {}", board, e);
            }
        }
        info!("Board defaults restored from {}", self.board_path.display());
        Ok(defaults)
    }

    /// Capture the current setpoints of the three boards and persist them
    ///
    /// Nothing is written if any board cannot be read.
    pub async fn save_board_defaults<T: FrameTransport>(
        &self,
        link: &mut SerialLink<T>,
    ) -> Result<BoardDefaults> {
        let mut readings = [BoardReading::default(); 3];
        for (board, slot) in BOARDS.iter().zip(readings.iter_mut()) {
            *slot = link.read(*board).await?;
        }
        let defaults = BoardDefaults::from_readings(readings);
        self.store_board_defaults(&defaults)?;
        Ok(defaults)
    }

    /// Persist an already captured board record
    pub fn store_board_defaults(&self, defaults: &BoardDefaults) -> Result<()> {
        write_record(&self.board_path, defaults)?;
        info!(
            "Board defaults saved to {}: {:?}",
            self.board_path.display(),
            defaults
        );
        Ok(())
    }

    /// Persisted indicator defaults, or `current` (built-in when `None`) saved and returned
    pub fn load_indicator_defaults(
        &self,
        current: Option<IndicatorDefaults>,
    ) -> Result<IndicatorDefaults> {
        match read_record::<IndicatorDefaults>(&self.indicator_path) {
            Some(defaults) => {
                debug!("Indicator defaults loaded: {:?}", defaults);
                Ok(defaults)
            }
            None => self.save_indicator_defaults(current),
        }
    }

    /// Persist `current`, or the built-in set when `None`
    pub fn save_indicator_defaults(
        &self,
        current: Option<IndicatorDefaults>,
    ) -> Result<IndicatorDefaults> {
        let defaults = current.unwrap_or(IndicatorDefaults::BUILT_IN);
        defaults.validate().map_err(DefaultsError::Invalid)?;
        write_record(&self.indicator_path, &defaults)?;
        info!(
            "Indicator defaults saved to {}: {:?}",
            self.indicator_path.display(),
            defaults
        );
        Ok(defaults)
    }
}

/// Parse and validate a record, `None` when missing or unusable
fn read_record<R: Record>(path: &Path) -> Option<R> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No {} file at {}", R::NAME, path.display());
            return None;
        }
        Err(e) => {
            warn!("Cannot read {} from {}: {}", R::NAME, path.display(), e);
            return None;
        }
    };

    let record: R = match serde_json::from_str(&contents) {
        Ok(record) => record,
        Err(e) => {
            warn!("Ignoring corrupt {} in {}: {}", R::NAME, path.display(), e);
            return None;
        }
    };

    if let Err(reason) = record.validate() {
        warn!("Ignoring invalid {} in {}: {}", R::NAME, path.display(), reason);
        return None;
    }
    Some(record)
}

/// Replace `path` with the JSON encoding of `record`
fn write_record<R: Record>(path: &Path, record: &R) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut file, record)?;
    file.write_all(b"\n")?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| DefaultsError::Io(e.error))?;
    debug!("Wrote {} to {}", R::NAME, path.display());
    Ok(())
}
