// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated board bus
//!
//! [`MockBoardBus`] behaves like the serial line with three output boards
//! attached: requests are answered immediately with well-formed replies, and
//! each board can be made to misbehave (silence, corrupted marker, wrong
//! address, wrong frame type, missing acknowledgement) to exercise the error
//! paths of the link and the recovery logic of the bridge engine.
//!
//! The bus is cheaply cloneable; clones share the same simulated boards so a
//! test can keep a handle while the link owns another.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::debug;

use crate::serial::frame::{self, BoardReading, Frame, FrameKind, FRAME_LENGTH};
use crate::serial::FrameTransport;

/// Misbehaviour injected on one simulated board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyFault {
    /// The board never answers
    NoReply,
    /// The end of packet marker is corrupted
    BadEndMarker,
    /// The reply is addressed to someone other than the gateway
    WrongAddress(u8),
    /// The reply flag does not match the request
    WrongType,
    /// Write replies carry no acknowledgement (reads are unaffected)
    NoAck,
}

#[derive(Debug, Default)]
struct MockBusState {
    boards: [BoardReading; 3],
    faults: [Option<ReplyFault>; 3],
    rx: VecDeque<u8>,
    sent: Vec<Frame>,
    writes: Vec<(u8, BoardReading)>,
}

/// Simulated serial line with three boards
#[derive(Debug, Clone, Default)]
pub struct MockBoardBus {
    state: Arc<Mutex<MockBusState>>,
}

impl MockBoardBus {
    pub fn new() -> Self {
        debug!("Creating simulated board bus");
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockBusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current setpoints held by `board` (1..3)
    pub fn board(&self, board: u8) -> BoardReading {
        self.state().boards[slot(board)]
    }

    /// Overwrite the setpoints held by `board` without any traffic
    pub fn set_board(&self, board: u8, reading: BoardReading) {
        self.state().boards[slot(board)] = reading;
    }

    /// Inject (or clear with `None`) a fault on `board`
    pub fn set_fault(&self, board: u8, fault: Option<ReplyFault>) {
        self.state().faults[slot(board)] = fault;
    }

    /// Take `board` offline (or bring it back)
    pub fn set_offline(&self, board: u8, offline: bool) {
        self.set_fault(board, offline.then_some(ReplyFault::NoReply));
    }

    /// Push garbage into the receive buffer, as line noise would
    pub fn inject_noise(&self, bytes: &[u8]) {
        self.state().rx.extend(bytes.iter().copied());
    }

    /// Every frame transmitted by the gateway so far
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.state().sent.clone()
    }

    /// Every accepted write, as `(board, new setpoints)`
    pub fn writes(&self) -> Vec<(u8, BoardReading)> {
        self.state().writes.clone()
    }

    /// Forget recorded traffic
    pub fn clear_history(&self) {
        let mut state = self.state();
        state.sent.clear();
        state.writes.clear();
    }
}

fn slot(board: u8) -> usize {
    match board {
        1..=3 => usize::from(board - 1),
        _ => panic!("simulated bus only has boards 1, 2 and 3 (got {board})"),
    }
}

impl MockBusState {
    fn answer(&mut self, request: &Frame) {
        if !frame::has_valid_markers(request) {
            return;
        }
        let board = frame::address(request);
        if !(1..=3).contains(&board) {
            return;
        }
        let index = usize::from(board - 1);
        let fault = self.faults[index];
        if fault == Some(ReplyFault::NoReply) {
            return;
        }

        let request_kind = frame::kind(request);
        let mut reply = match request_kind {
            FrameKind::Read => frame::build_reply(FrameKind::Read, &self.boards[index]),
            FrameKind::Write => {
                if fault == Some(ReplyFault::NoAck) {
                    frame::build_reply(FrameKind::Write, &BoardReading::default())
                } else {
                    let reading = frame::decode_payload(request);
                    self.boards[index] = reading;
                    self.writes.push((board, reading));
                    frame::build_write_ack()
                }
            }
        };

        match fault {
            Some(ReplyFault::BadEndMarker) => reply[FRAME_LENGTH - 1] = 0x00,
            Some(ReplyFault::WrongAddress(address)) => reply[1] = address,
            Some(ReplyFault::WrongType) => {
                reply[2] = match request_kind {
                    FrameKind::Read => 1,
                    FrameKind::Write => 0,
                }
            }
            _ => {}
        }

        self.rx.extend(reply);
    }
}

#[async_trait]
impl FrameTransport for MockBoardBus {
    async fn clear_input(&mut self) -> std::io::Result<()> {
        self.state().rx.clear();
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        let mut state = self.state();
        if let Ok(request) = Frame::try_from(data) {
            state.sent.push(request);
            state.answer(&request);
        }
        Ok(())
    }

    async fn bytes_available(&mut self) -> std::io::Result<usize> {
        Ok(self.state().rx.len())
    }

    async fn receive(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        let mut state = self.state();
        let wanted = buf.len();
        if state.rx.len() < wanted {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "not enough buffered bytes",
            ));
        }
        for (dst, src) in buf.iter_mut().zip(state.rx.drain(..wanted)) {
            *dst = src;
        }
        Ok(())
    }
}
