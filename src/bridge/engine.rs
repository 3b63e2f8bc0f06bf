// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register bridge engine
//!
//! The engine owns the serial link and periodically reconciles the Modbus
//! register map with the boards and the status indicator. Each poll tick:
//!
//! 1. **Health probe**: every board is read. Any failure marks the link
//!    degraded and registers 0..=12 are overwritten with the fault sentinel.
//! 2. **Recovery**: the first healthy tick after a degraded one restores the
//!    last known-good map and writes its per-board setpoints back to the boards.
//! 3. **Diff and dispatch**: registers changed by clients since the previous
//!    tick are validated in ascending address order. Valid values are sent to
//!    the boards or the indicator, invalid ones are put back to their old value.
//!
//! A valid system setpoint (registers 0..2) is sent to every board and copied
//! into the matching per-board registers. Per-board writes of the same field in
//! the same tick are then ignored. A valid per-board write marks the system
//! register as mixed (300).
//!
//! Clients never see a half-processed tick: all corrections of a tick are
//! published under one lock before any serial transaction starts, and the
//! lock is never held across one.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::time::{self, MissedTickBehavior};

use super::defaults::{BoardDefaults, DefaultsStore, IndicatorDefaults};
use crate::indicator::{ColourUpdate, StatusIndicator};
use crate::modbus::{
    addr, decode_register, encode_register, RegisterMap, RegisterStore, FAULT_BLOCK,
    FAULT_SENTINEL, MIXED_SENTINEL, REGISTER_COUNT,
};
use crate::serial::frame::{I_AMP_RANGE, I_SHIFT_RANGE, V_AMP_RANGE};
use crate::serial::{BoardReading, BoardUpdate, FrameTransport, SerialLink, BOARDS};

/// Board setpoint carried by a register group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setpoint {
    VAmp,
    IAmp,
    IShift,
}

impl Setpoint {
    pub const ALL: [Setpoint; 3] = [Setpoint::VAmp, Setpoint::IAmp, Setpoint::IShift];

    /// System register of the group
    pub fn system_register(self) -> usize {
        match self {
            Setpoint::VAmp => addr::SYSTEM_V_AMP,
            Setpoint::IAmp => addr::SYSTEM_I_AMP,
            Setpoint::IShift => addr::SYSTEM_I_SHIFT,
        }
    }

    /// Register of `board` (1..3) in the group
    pub fn board_register(self, board: u8) -> usize {
        let first = match self {
            Setpoint::VAmp => addr::BOARD_V_AMP,
            Setpoint::IAmp => addr::BOARD_I_AMP,
            Setpoint::IShift => addr::BOARD_I_SHIFT,
        };
        first + usize::from(board) - 1
    }

    fn range(self) -> RangeInclusive<i32> {
        match self {
            Setpoint::VAmp => V_AMP_RANGE,
            Setpoint::IAmp => I_AMP_RANGE,
            Setpoint::IShift => I_SHIFT_RANGE,
        }
    }

    pub fn accepts(self, value: i16) -> bool {
        self.range().contains(&i32::from(value))
    }

    fn update(self, value: i16) -> BoardUpdate {
        match self {
            Setpoint::VAmp => BoardUpdate::v_amp(value),
            Setpoint::IAmp => BoardUpdate::i_amp(value),
            Setpoint::IShift => BoardUpdate::i_shift(value),
        }
    }

    fn index(self) -> usize {
        match self {
            Setpoint::VAmp => 0,
            Setpoint::IAmp => 1,
            Setpoint::IShift => 2,
        }
    }

    /// Group and board (`None` for the system register) of a setpoint register
    fn classify(address: usize) -> Option<(Setpoint, Option<u8>)> {
        Setpoint::ALL.into_iter().find_map(|setpoint| {
            if address == setpoint.system_register() {
                return Some((setpoint, None));
            }
            BOARDS
                .iter()
                .find(|board| setpoint.board_register(**board) == address)
                .map(|board| (setpoint, Some(*board)))
        })
    }
}

/// What a poll tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// At least one board did not answer, the fault block is shown
    Degraded,
    /// The link came back, the last known-good map was restored
    Recovered,
    /// Normal tick, `changed` registers were processed
    Synced { changed: usize },
}

/// Copy of the register map being reconciled during one tick
///
/// Corrections only touch the copy. They reach the shared store all at once,
/// before any board or indicator is contacted.
struct Working {
    map: RegisterMap,
}

impl Working {
    fn get(&self, address: usize) -> i16 {
        decode_register(self.map[address])
    }

    fn set(&mut self, address: usize, value: i16) {
        self.map[address] = encode_register(value);
    }
}

/// Side effect of a validated register write, run after the map is updated
#[derive(Debug, Clone, Copy)]
enum Command {
    Board {
        board: u8,
        setpoint: Setpoint,
        value: i16,
    },
    Function(usize),
    Frequency(f32),
    Brightness(u8),
    Colour(ColourUpdate),
    SaveBoardDefaults,
    SaveIndicatorDefaults(Option<IndicatorDefaults>),
}

/// Reconciles the Modbus register map with the boards and the indicator
pub struct BridgeEngine<T: FrameTransport> {
    link: SerialLink<T>,
    registers: RegisterStore,
    indicator: Arc<dyn StatusIndicator>,
    defaults: DefaultsStore,
    snapshot: RegisterMap,
    link_degraded: bool,
    /// Board defaults could not be loaded at startup, take the map from the boards on recovery
    resync_from_boards: bool,
}

impl<T: FrameTransport> BridgeEngine<T> {
    pub fn new(
        link: SerialLink<T>,
        registers: RegisterStore,
        indicator: Arc<dyn StatusIndicator>,
        defaults: DefaultsStore,
    ) -> Self {
        let snapshot = registers.snapshot();
        Self {
            link,
            registers,
            indicator,
            defaults,
            snapshot,
            link_degraded: false,
            resync_from_boards: false,
        }
    }

    pub fn link(&self) -> &SerialLink<T> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut SerialLink<T> {
        &mut self.link
    }

    pub fn registers(&self) -> &RegisterStore {
        &self.registers
    }

    pub fn is_degraded(&self) -> bool {
        self.link_degraded
    }

    /// Last known-good register map
    pub fn snapshot(&self) -> &RegisterMap {
        &self.snapshot
    }

    /// Load both default records, push them out and prefill the register map
    ///
    /// Runs once before polling starts. If the board defaults cannot be
    /// obtained the engine starts degraded and rebuilds the board registers
    /// from the boards once they answer.
    pub async fn startup(&mut self) {
        info!("Loading board defaults from {}", self.defaults.board_path().display());
        match self.defaults.load_board_defaults(&mut self.link).await {
            Ok(defaults) => self.show_board_defaults(&defaults),
            Err(e) => {
                error!("Failed to load board defaults, starting degraded: {}", e);
                self.link_degraded = true;
                self.resync_from_boards = true;
            }
        }

        let indicator_defaults = self
            .defaults
            .load_indicator_defaults(None)
            .unwrap_or_else(|e| {
                error!("Failed to load indicator defaults, using built-in set: {}", e);
                IndicatorDefaults::BUILT_IN
            });
        self.apply_indicator_defaults(&indicator_defaults);

        self.snapshot = self.registers.snapshot();
        if self.link_degraded {
            self.registers.with_map(write_fault_block);
        }
    }

    fn show_board_defaults(&self, defaults: &BoardDefaults) {
        self.registers
            .with_map(|map| write_board_defaults(map, defaults));
    }

    fn apply_indicator_defaults(&self, defaults: &IndicatorDefaults) {
        self.registers
            .set_many(addr::INDICATOR_FUNCTION, &defaults.to_registers());
        self.indicator.set_function(usize::from(defaults.function));
        self.indicator
            .set_frequency(f32::from(defaults.frequency) / 10.0);
        self.indicator.set_brightness(defaults.brightness);
        self.indicator
            .set_colour(ColourUpdate::all([defaults.red, defaults.green, defaults.blue]));
    }

    /// Run one poll tick
    pub async fn poll_once(&mut self) -> TickOutcome {
        let readings = match self.probe().await {
            Ok(readings) => readings,
            Err(e) => {
                if self.link_degraded {
                    debug!("Board link still down: {}", e);
                } else {
                    error!("Board link lost: {}", e);
                }
                self.link_degraded = true;
                self.registers.with_map(write_fault_block);
                return TickOutcome::Degraded;
            }
        };

        if self.link_degraded {
            return self.recover(readings).await;
        }

        TickOutcome::Synced {
            changed: self.sync().await,
        }
    }

    async fn probe(&mut self) -> crate::serial::error::Result<[BoardReading; 3]> {
        let mut readings = [BoardReading::default(); 3];
        for (board, slot) in BOARDS.iter().zip(readings.iter_mut()) {
            *slot = self.link.read(*board).await?;
        }
        Ok(readings)
    }

    /// Leave the degraded state, `readings` being the probe that just succeeded
    async fn recover(&mut self, readings: [BoardReading; 3]) -> TickOutcome {
        self.link_degraded = false;

        if self.resync_from_boards {
            let defaults = BoardDefaults::from_readings(readings);
            let snapshot = self.snapshot;
            self.snapshot = self.registers.with_map(|map| {
                *map = snapshot;
                write_board_defaults(map, &defaults);
                *map
            });
            self.resync_from_boards = false;
            info!("Board link up, register map taken from the boards");
            // Startup never got to persist a record
            if let Err(e) = self.defaults.store_board_defaults(&defaults) {
                error!("Failed to save board defaults: {}", e);
            }
            return TickOutcome::Recovered;
        }

        self.registers.replace(&self.snapshot);
        for board in BOARDS {
            let update = BoardUpdate {
                v_amp: Some(decode_register(
                    self.snapshot[Setpoint::VAmp.board_register(board)],
                )),
                i_amp: Some(decode_register(
                    self.snapshot[Setpoint::IAmp.board_register(board)],
                )),
                i_shift: Some(decode_register(
                    self.snapshot[Setpoint::IShift.board_register(board)],
                )),
            };
            if let Err(e) = self.link.write(board, update).await {
                warn!("Failed to resynchronise board {}: {}", board, e);
            }
        }
        info!("Board link recovered, last known-good registers restored");
        TickOutcome::Recovered
    }

    /// Process every register changed since the last snapshot, returns how many
    ///
    /// The tick validates the changes on a copy of the map, publishes every
    /// correction in one locked update, and only then talks to the boards and
    /// the indicator.
    async fn sync(&mut self) -> usize {
        let current = self.registers.snapshot();
        let changed: Vec<usize> = (0..REGISTER_COUNT)
            .filter(|address| current[*address] != self.snapshot[*address])
            .collect();
        if changed.is_empty() {
            return 0;
        }
        debug!("Registers changed by clients: {:?}", changed);

        let (working, commands) = self.validate(&current, &changed);
        self.publish(&current, &working.map);
        self.snapshot = working.map;

        for command in commands {
            self.execute(command).await;
        }
        changed.len()
    }

    /// Validate the changed registers in ascending order
    ///
    /// Returns the corrected map and the side effects to run, in address order.
    fn validate(&self, current: &RegisterMap, changed: &[usize]) -> (Working, Vec<Command>) {
        let mut working = Working { map: *current };
        let mut commands = Vec::new();
        let mut system_touched = [false; 3];

        for address in changed.iter().copied() {
            let new = decode_register(current[address]);
            let old = decode_register(self.snapshot[address]);

            if let Some((setpoint, board)) = Setpoint::classify(address) {
                validate_setpoint(
                    &mut working,
                    &mut commands,
                    &mut system_touched,
                    setpoint,
                    board,
                    new,
                    old,
                );
                continue;
            }

            match address {
                addr::SAVE_BOARD_DEFAULTS => {
                    if new != 0 {
                        commands.push(Command::SaveBoardDefaults);
                    }
                    working.set(address, 0);
                }
                addr::INDICATOR_FUNCTION => {
                    let index = usize::try_from(new)
                        .ok()
                        .filter(|index| *index < self.indicator.state_count());
                    match index {
                        Some(index) => commands.push(Command::Function(index)),
                        None => working.set(address, old),
                    }
                }
                addr::INDICATOR_FREQUENCY => match u8::try_from(new) {
                    Ok(tenths) => commands.push(Command::Frequency(f32::from(tenths) / 10.0)),
                    Err(_) => working.set(address, old),
                },
                addr::INDICATOR_BRIGHTNESS => match u8::try_from(new) {
                    Ok(percent) if percent <= 100 => commands.push(Command::Brightness(percent)),
                    _ => working.set(address, old),
                },
                addr::INDICATOR_RED | addr::INDICATOR_GREEN | addr::INDICATOR_BLUE => {
                    match u8::try_from(new) {
                        Ok(level) => {
                            let update = match address {
                                addr::INDICATOR_RED => ColourUpdate::red(level),
                                addr::INDICATOR_GREEN => ColourUpdate::green(level),
                                _ => ColourUpdate::blue(level),
                            };
                            commands.push(Command::Colour(update));
                        }
                        Err(_) => working.set(address, old),
                    }
                }
                addr::SAVE_INDICATOR_DEFAULTS => {
                    if new != 0 {
                        let mut values = [0i16; 6];
                        for (offset, value) in values.iter_mut().enumerate() {
                            *value = working.get(addr::INDICATOR_FUNCTION + offset);
                        }
                        let shown = IndicatorDefaults::from_registers(values);
                        if shown.is_none() {
                            warn!("Indicator registers out of range, saving built-in defaults");
                        }
                        commands.push(Command::SaveIndicatorDefaults(shown));
                    }
                    working.set(address, 0);
                }
                _ => {}
            }
        }

        (working, commands)
    }

    /// Write the corrections of a tick to the shared map in a single update
    ///
    /// An address a client rewrote since `current` was read keeps the client
    /// value; it differs from the new snapshot and is handled next tick.
    fn publish(&self, current: &RegisterMap, corrected: &RegisterMap) {
        let kept = self.registers.with_map(|map| {
            let mut kept = Vec::new();
            for address in 0..REGISTER_COUNT {
                if corrected[address] == current[address] {
                    continue;
                }
                if map[address] == current[address] {
                    map[address] = corrected[address];
                } else {
                    kept.push(address);
                }
            }
            kept
        });
        if !kept.is_empty() {
            debug!("Registers rewritten during the tick, deferred: {:?}", kept);
        }
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::Board {
                board,
                setpoint,
                value,
            } => {
                if let Err(e) = self.link.write(board, setpoint.update(value)).await {
                    warn!("Failed to set {:?} on board {}: {}", setpoint, board, e);
                }
            }
            Command::Function(index) => self.indicator.set_function(index),
            Command::Frequency(hz) => self.indicator.set_frequency(hz),
            Command::Brightness(percent) => self.indicator.set_brightness(percent),
            Command::Colour(update) => self.indicator.set_colour(update),
            Command::SaveBoardDefaults => {
                if let Err(e) = self.defaults.save_board_defaults(&mut self.link).await {
                    error!("Failed to save board defaults: {}", e);
                }
            }
            Command::SaveIndicatorDefaults(current) => {
                if let Err(e) = self.defaults.save_indicator_defaults(current) {
                    error!("Failed to save indicator defaults: {}", e);
                }
            }
        }
    }

    /// Turn the outputs of every board off, leaving the phase shift untouched
    pub async fn shutdown_outputs(&mut self) {
        for board in BOARDS {
            info!("Stopping board {}", board);
            if let Err(e) = self.link.write(board, BoardUpdate::outputs_off()).await {
                warn!("Failed to stop board {}: {}", board, e);
            }
        }
    }

    /// Poll every `period` until `running` is cleared, then turn the outputs off
    pub async fn run(mut self, period: Duration, running: Arc<AtomicBool>) -> Result<()> {
        info!("Starting bridge engine with a {:?} poll period", period);
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while running.load(Ordering::SeqCst) {
            interval.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }
            let outcome = self.poll_once().await;
            debug!("Poll tick: {:?}", outcome);
        }

        info!("Bridge engine stopping, turning board outputs off");
        self.shutdown_outputs().await;
        Ok(())
    }
}

/// Validate one setpoint register, queueing the board writes it calls for
fn validate_setpoint(
    working: &mut Working,
    commands: &mut Vec<Command>,
    system_touched: &mut [bool; 3],
    setpoint: Setpoint,
    board: Option<u8>,
    new: i16,
    old: i16,
) {
    match board {
        None => {
            if !setpoint.accepts(new) {
                debug!("Rejected system {:?} = {}", setpoint, new);
                working.set(setpoint.system_register(), old);
                return;
            }
            system_touched[setpoint.index()] = true;
            for board in BOARDS {
                commands.push(Command::Board {
                    board,
                    setpoint,
                    value: new,
                });
                working.set(setpoint.board_register(board), new);
            }
        }
        Some(board) => {
            if system_touched[setpoint.index()] {
                debug!(
                    "Ignoring board {} {:?}, system value written in the same cycle",
                    board, setpoint
                );
                return;
            }
            if !setpoint.accepts(new) {
                debug!("Rejected board {} {:?} = {}", board, setpoint, new);
                working.set(setpoint.board_register(board), old);
                return;
            }
            working.set(setpoint.system_register(), MIXED_SENTINEL);
            commands.push(Command::Board {
                board,
                setpoint,
                value: new,
            });
        }
    }
}

/// Show a board defaults record in registers 0..=11
fn write_board_defaults(map: &mut RegisterMap, defaults: &BoardDefaults) {
    map[addr::SYSTEM_V_AMP] = encode_register(defaults.system.v_amp);
    map[addr::SYSTEM_I_AMP] = encode_register(defaults.system.i_amp);
    map[addr::SYSTEM_I_SHIFT] = encode_register(defaults.system.i_shift);
    for (board, reading) in BOARDS.iter().zip(defaults.boards.iter()) {
        map[Setpoint::VAmp.board_register(*board)] = encode_register(i16::from(reading.v_amp));
        map[Setpoint::IAmp.board_register(*board)] = encode_register(reading.i_amp);
        map[Setpoint::IShift.board_register(*board)] = encode_register(reading.i_shift);
    }
}

fn write_fault_block(map: &mut RegisterMap) {
    for address in FAULT_BLOCK {
        map[address] = encode_register(FAULT_SENTINEL);
    }
}
