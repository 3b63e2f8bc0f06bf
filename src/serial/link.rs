// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Request/reply exchange with the output boards
//!
//! The line is strictly half-duplex: one request, one 10-byte reply, no
//! pipelining. [`SerialLink`] takes `&mut self` on every operation so the
//! borrow checker enforces the single-caller rule.

use std::time::Duration;

use log::{debug, trace};

use super::error::{Result, SerialError};
use super::frame::{
    self, BoardReading, Frame, FrameKind, FRAME_LENGTH, GATEWAY_ADDRESS, I_AMP_RANGE,
    I_SHIFT_RANGE, V_AMP_RANGE, WRITE_ACK,
};
use super::FrameTransport;
use crate::config::serial::SerialConfig;

/// Default delay between two polls of the input buffer
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Default number of polls before a transaction times out (~100 ms)
pub const DEFAULT_MAX_POLLS: u32 = 100;

/// Partial update of a board's setpoints.
///
/// Omitted fields are filled from the board's current state, never from zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoardUpdate {
    pub v_amp: Option<i16>,
    pub i_amp: Option<i16>,
    pub i_shift: Option<i16>,
}

impl BoardUpdate {
    pub fn v_amp(value: i16) -> Self {
        Self {
            v_amp: Some(value),
            ..Self::default()
        }
    }

    pub fn i_amp(value: i16) -> Self {
        Self {
            i_amp: Some(value),
            ..Self::default()
        }
    }

    pub fn i_shift(value: i16) -> Self {
        Self {
            i_shift: Some(value),
            ..Self::default()
        }
    }

    /// Update setting every field of `reading`
    pub fn all(reading: &BoardReading) -> Self {
        Self {
            v_amp: Some(i16::from(reading.v_amp)),
            i_amp: Some(reading.i_amp),
            i_shift: Some(reading.i_shift),
        }
    }

    /// Outputs off: zero voltage and current, phase shift untouched
    pub fn outputs_off() -> Self {
        Self {
            v_amp: Some(0),
            i_amp: Some(0),
            i_shift: None,
        }
    }
}

/// Framed transport to boards 1..3
pub struct SerialLink<T: FrameTransport> {
    transport: T,
    poll_interval: Duration,
    max_polls: u32,
}

impl<T: FrameTransport> SerialLink<T> {
    /// Create a link with the default ~100 ms reply timeout
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    /// Create a link using the timing settings of the configuration
    pub fn with_config(transport: T, config: &SerialConfig) -> Self {
        Self {
            transport,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_polls: config.max_polls,
        }
    }

    /// Access the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Read the current setpoints of `board`
    ///
    /// ### Errors
    ///
    /// `InvalidBoard`, `Timeout`, `Framing`, `AddressMismatch`, `UnexpectedType`,
    /// or `Io` when the transport itself fails.
    pub async fn read(&mut self, board: u8) -> Result<BoardReading> {
        check_board(board)?;

        let request = frame::build_request(board, FrameKind::Read, &BoardReading::default());
        let reply = self.transact(board, &request).await?;

        if frame::kind(&reply) != FrameKind::Read {
            return Err(SerialError::UnexpectedType {
                board,
                expected: "read",
                received: "write",
            });
        }

        let reading = frame::decode_payload(&reply);
        debug!("Board {} reports {:?}", board, reading);
        Ok(reading)
    }

    /// Write new setpoints to `board`
    ///
    /// Fields missing from `update` are taken from a fresh [`read`](Self::read)
    /// of the board. Range checks run before anything is transmitted.
    pub async fn write(&mut self, board: u8, update: BoardUpdate) -> Result<()> {
        check_board(board)?;
        if let Some(v_amp) = update.v_amp {
            check_range("v_amp", v_amp, &V_AMP_RANGE)?;
        }
        if let Some(i_amp) = update.i_amp {
            check_range("i_amp", i_amp, &I_AMP_RANGE)?;
        }
        if let Some(i_shift) = update.i_shift {
            check_range("i_shift", i_shift, &I_SHIFT_RANGE)?;
        }

        let current = self.read(board).await?;
        let payload = BoardReading {
            // Range checked above
            v_amp: update.v_amp.map_or(current.v_amp, |v| v as u8),
            i_amp: update.i_amp.unwrap_or(current.i_amp),
            i_shift: update.i_shift.unwrap_or(current.i_shift),
        };

        let request = frame::build_request(board, FrameKind::Write, &payload);
        let reply = self.transact(board, &request).await?;

        if frame::kind(&reply) != FrameKind::Write {
            return Err(SerialError::UnexpectedType {
                board,
                expected: "write",
                received: "read",
            });
        }
        let ack = frame::ack_byte(&reply);
        if ack != WRITE_ACK {
            return Err(SerialError::NotAcknowledged { board, ack });
        }

        debug!("Board {} accepted {:?}", board, payload);
        Ok(())
    }

    /// Send one frame and wait for the reply, checking markers and address
    async fn transact(&mut self, board: u8, request: &Frame) -> Result<Frame> {
        // Stale bytes from an earlier failed exchange would shift the reply
        self.transport.clear_input().await?;
        trace!("-> board {}: {:02X?}", board, request);
        self.transport.send(request).await?;

        let mut polls = 0u32;
        while self.transport.bytes_available().await? < FRAME_LENGTH {
            if polls >= self.max_polls {
                return Err(SerialError::Timeout {
                    board,
                    attempts: self.max_polls,
                });
            }
            polls += 1;
            tokio::time::sleep(self.poll_interval).await;
        }

        let mut reply = [0u8; FRAME_LENGTH];
        self.transport.receive(&mut reply).await?;
        trace!("<- board {}: {:02X?}", board, reply);

        if !frame::has_valid_markers(&reply) {
            return Err(SerialError::Framing { board });
        }
        let address = frame::address(&reply);
        if address != GATEWAY_ADDRESS {
            return Err(SerialError::AddressMismatch { board, address });
        }
        Ok(reply)
    }
}

fn check_board(board: u8) -> Result<()> {
    if super::BOARDS.contains(&board) {
        Ok(())
    } else {
        Err(SerialError::InvalidBoard(board))
    }
}

fn check_range(
    field: &'static str,
    value: i16,
    range: &std::ops::RangeInclusive<i32>,
) -> Result<()> {
    let value = i32::from(value);
    if range.contains(&value) {
        Ok(())
    } else {
        Err(SerialError::OutOfRange {
            field,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}
