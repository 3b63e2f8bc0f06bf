// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Holding-register map shared by the Modbus server and the bridge engine
//!
//! The map is a fixed array of 100 raw Modbus words. Values are signed: a word
//! is interpreted as a 16-bit two's complement integer, so `-10` is stored as
//! `0xFFF6`.
//!
//! Every access locks the whole map for one discrete operation only, so a
//! client never observes a half-applied update and the lock is never held
//! while the engine talks to the boards.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Number of holding registers exposed
pub const REGISTER_COUNT: usize = 100;

/// Raw register words, index = Modbus address
pub type RegisterMap = [u16; REGISTER_COUNT];

/// Register addresses of the gateway map
pub mod addr {
    /// System voltage amplitude (0..255)
    pub const SYSTEM_V_AMP: usize = 0;
    /// System current amplitude (-255..255)
    pub const SYSTEM_I_AMP: usize = 1;
    /// System current phase shift (-90..90)
    pub const SYSTEM_I_SHIFT: usize = 2;
    /// First per-board voltage amplitude (boards 1..3 at 3..5)
    pub const BOARD_V_AMP: usize = 3;
    /// First per-board current amplitude (boards 1..3 at 6..8)
    pub const BOARD_I_AMP: usize = 6;
    /// First per-board phase shift (boards 1..3 at 9..11)
    pub const BOARD_I_SHIFT: usize = 9;
    /// Save board defaults trigger
    pub const SAVE_BOARD_DEFAULTS: usize = 12;

    /// Indicator function (mode) index
    pub const INDICATOR_FUNCTION: usize = 50;
    /// Indicator frequency in tenths of Hz
    pub const INDICATOR_FREQUENCY: usize = 51;
    /// Indicator brightness percent
    pub const INDICATOR_BRIGHTNESS: usize = 52;
    pub const INDICATOR_RED: usize = 53;
    pub const INDICATOR_GREEN: usize = 54;
    pub const INDICATOR_BLUE: usize = 55;
    /// Save indicator defaults trigger
    pub const SAVE_INDICATOR_DEFAULTS: usize = 56;
}

/// Value written to a system register when the three boards disagree.
///
/// Deliberately outside every valid range so a client can tell it apart.
pub const MIXED_SENTINEL: i16 = 300;

/// Value written to the board block while the serial link is degraded
pub const FAULT_SENTINEL: i16 = i16::MIN;

/// Registers overwritten with [`FAULT_SENTINEL`] while the link is degraded
pub const FAULT_BLOCK: std::ops::RangeInclusive<usize> = addr::SYSTEM_V_AMP..=addr::SAVE_BOARD_DEFAULTS;

/// Store a signed value in a register word
pub fn encode_register(value: i16) -> u16 {
    value as u16
}

/// Read a register word as a signed value
pub fn decode_register(word: u16) -> i16 {
    word as i16
}

/// Thread-safe holding-register map
#[derive(Debug, Clone)]
pub struct RegisterStore {
    map: Arc<Mutex<RegisterMap>>,
}

impl Default for RegisterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterStore {
    /// Create a map with every register at zero
    pub fn new() -> Self {
        Self {
            map: Arc::new(Mutex::new([0; REGISTER_COUNT])),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegisterMap> {
        // A panic while holding the lock cannot leave the array half-written
        // in a way that matters more than losing the gateway, keep serving it
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the whole map
    pub fn with_map<R>(&self, f: impl FnOnce(&mut RegisterMap) -> R) -> R {
        f(&mut self.lock())
    }

    /// Copy of the whole map
    pub fn snapshot(&self) -> RegisterMap {
        *self.lock()
    }

    /// Replace the whole map at once
    pub fn replace(&self, map: &RegisterMap) {
        *self.lock() = *map;
    }

    /// Signed value at `address`
    ///
    /// # Panics
    ///
    /// Panics if `address` is not below [`REGISTER_COUNT`].
    pub fn get(&self, address: usize) -> i16 {
        decode_register(self.lock()[address])
    }

    /// Store a signed value at `address`
    ///
    /// # Panics
    ///
    /// Panics if `address` is not below [`REGISTER_COUNT`].
    pub fn set(&self, address: usize, value: i16) {
        self.lock()[address] = encode_register(value);
    }

    /// Store consecutive signed values starting at `start`, in one locked operation
    pub fn set_many(&self, start: usize, values: &[i16]) {
        let mut map = self.lock();
        for (offset, value) in values.iter().enumerate() {
            map[start + offset] = encode_register(*value);
        }
    }
}
