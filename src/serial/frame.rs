// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Board frame codec
//!
//! Every exchange with an output board is a single fixed 10-byte frame:
//!
//! | Byte | Content |
//! |------|---------|
//! | 0 | Start of packet (`0x7E`) |
//! | 1 | Address (board 1..3 on requests, gateway `0` on replies) |
//! | 2 | Read (`0`) / write (`1`) flag |
//! | 3 | Voltage amplitude (0..255), or the write acknowledgement on write replies |
//! | 4-5 | Current amplitude, big-endian two's complement |
//! | 6-7 | Current phase shift, big-endian two's complement |
//! | 8 | Reserved |
//! | 9 | End of packet (`0xFF`) |
//!
//! There is no checksum, only the start and end markers.

use serde::{Deserialize, Serialize};

/// Length of every frame on the wire
pub const FRAME_LENGTH: usize = 10;
/// Start of packet marker
pub const START_BYTE: u8 = 0x7E;
/// End of packet marker
pub const END_BYTE: u8 = 0xFF;
/// Acknowledgement carried in the voltage slot of a write reply
pub const WRITE_ACK: u8 = 0x77;
/// Address of the gateway itself; every reply must be addressed to it
pub const GATEWAY_ADDRESS: u8 = 0x00;

const ADDRESS_INDEX: usize = 1;
const FLAG_INDEX: usize = 2;
const V_AMP_INDEX: usize = 3;
const I_AMP_INDEX: usize = 4;
const I_SHIFT_INDEX: usize = 6;

/// Valid voltage amplitude range
pub const V_AMP_RANGE: std::ops::RangeInclusive<i32> = 0..=255;
/// Valid current amplitude range
pub const I_AMP_RANGE: std::ops::RangeInclusive<i32> = -255..=255;
/// Valid current phase shift range, in degrees
pub const I_SHIFT_RANGE: std::ops::RangeInclusive<i32> = -90..=90;

/// A raw frame as exchanged on the serial line
pub type Frame = [u8; FRAME_LENGTH];

/// Direction of a transaction, encoded in byte 2 of the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Read,
    Write,
}

impl FrameKind {
    fn flag(self) -> u8 {
        match self {
            FrameKind::Read => 0,
            FrameKind::Write => 1,
        }
    }
}

/// Output setpoints reported by (or sent to) one board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoardReading {
    /// Voltage amplitude, 0..255
    pub v_amp: u8,
    /// Current amplitude, -255..255
    pub i_amp: i16,
    /// Current phase shift in degrees, -90..90
    pub i_shift: i16,
}

impl BoardReading {
    pub fn new(v_amp: u8, i_amp: i16, i_shift: i16) -> Self {
        Self {
            v_amp,
            i_amp,
            i_shift,
        }
    }

    /// True when every field lies within its documented range
    pub fn is_valid(&self) -> bool {
        I_AMP_RANGE.contains(&i32::from(self.i_amp))
            && I_SHIFT_RANGE.contains(&i32::from(self.i_shift))
    }
}

/// Encode a signed value as two big-endian two's complement bytes
pub fn encode_i16(value: i16) -> [u8; 2] {
    value.to_be_bytes()
}

/// Decode two big-endian two's complement bytes
pub fn decode_i16(bytes: [u8; 2]) -> i16 {
    i16::from_be_bytes(bytes)
}

/// Build a request frame for `board`
pub fn build_request(board: u8, kind: FrameKind, payload: &BoardReading) -> Frame {
    let mut frame = [0u8; FRAME_LENGTH];
    frame[0] = START_BYTE;
    frame[ADDRESS_INDEX] = board;
    frame[FLAG_INDEX] = kind.flag();
    frame[V_AMP_INDEX] = payload.v_amp;
    frame[I_AMP_INDEX..I_AMP_INDEX + 2].copy_from_slice(&encode_i16(payload.i_amp));
    frame[I_SHIFT_INDEX..I_SHIFT_INDEX + 2].copy_from_slice(&encode_i16(payload.i_shift));
    frame[FRAME_LENGTH - 1] = END_BYTE;
    frame
}

/// Build a reply frame as a board would send it back to the gateway
pub fn build_reply(kind: FrameKind, payload: &BoardReading) -> Frame {
    build_request(GATEWAY_ADDRESS, kind, payload)
}

/// Build the acknowledgement a board returns after a successful write
pub fn build_write_ack() -> Frame {
    let mut frame = build_reply(FrameKind::Write, &BoardReading::default());
    frame[V_AMP_INDEX] = WRITE_ACK;
    frame
}

/// Whether both markers are in place
pub fn has_valid_markers(frame: &Frame) -> bool {
    frame[0] == START_BYTE && frame[FRAME_LENGTH - 1] == END_BYTE
}

pub fn address(frame: &Frame) -> u8 {
    frame[ADDRESS_INDEX]
}

/// Interpret the read/write flag; anything but 0 is treated as a write
pub fn kind(frame: &Frame) -> FrameKind {
    if frame[FLAG_INDEX] == 0 {
        FrameKind::Read
    } else {
        FrameKind::Write
    }
}

/// Value in the voltage slot (the acknowledgement byte on write replies)
pub fn ack_byte(frame: &Frame) -> u8 {
    frame[V_AMP_INDEX]
}

/// Decode the payload of a frame
pub fn decode_payload(frame: &Frame) -> BoardReading {
    BoardReading {
        v_amp: frame[V_AMP_INDEX],
        i_amp: decode_i16([frame[I_AMP_INDEX], frame[I_AMP_INDEX + 1]]),
        i_shift: decode_i16([frame[I_SHIFT_INDEX], frame[I_SHIFT_INDEX + 1]]),
    }
}
