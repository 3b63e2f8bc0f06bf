// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Errors raised by the serial link

use thiserror::Error;

/// Failure of a single board transaction.
///
/// None of these are fatal for the gateway: the bridge engine logs them and
/// treats the board as unreachable for the current poll cycle.
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("invalid board number {0} (expected 1, 2 or 3)")]
    InvalidBoard(u8),

    #[error("board {board} did not answer within {attempts} polls")]
    Timeout { board: u8, attempts: u32 },

    #[error("bad frame from board {board}: incorrect start or end marker")]
    Framing { board: u8 },

    #[error("reply from board {board} addressed to {address:#04x}, expected the gateway")]
    AddressMismatch { board: u8, address: u8 },

    #[error("board {board} replied with a {received} frame, expected a {expected} frame")]
    UnexpectedType {
        board: u8,
        expected: &'static str,
        received: &'static str,
    },

    #[error("board {board} did not acknowledge the write (got {ack:#04x})")]
    NotAcknowledged { board: u8, ack: u8 },

    #[error("{field} value {value} out of range ({min} to {max})")]
    OutOfRange {
        field: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },

    #[error("serial transport error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
