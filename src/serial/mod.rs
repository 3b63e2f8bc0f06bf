// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Serial link to the output boards
//!
//! This module provides the half-duplex request/reply transport used to talk to
//! the three output boards:
//! - `frame`: the fixed 10-byte frame codec
//! - `link`: [`SerialLink`], one transaction at a time with timeout and acknowledgement checks
//! - `drivers`: byte transports (native UART and a simulated board bus)

pub mod drivers;
pub mod error;
pub mod frame;
pub mod link;

use async_trait::async_trait;

use crate::config::serial::{SerialConfig, SerialDriverType};

pub use error::SerialError;
pub use frame::BoardReading;
pub use link::{BoardUpdate, SerialLink};

/// Board addresses handled by the gateway
pub const BOARDS: [u8; 3] = [1, 2, 3];

/// Byte transport trait for hardware abstraction
///
/// Implementations only move bytes; framing, timeouts and validation are the
/// responsibility of [`SerialLink`].
#[async_trait]
pub trait FrameTransport: Send {
    /// Discard any byte waiting in the input buffer
    async fn clear_input(&mut self) -> std::io::Result<()>;

    /// Transmit a complete buffer
    async fn send(&mut self, data: &[u8]) -> std::io::Result<()>;

    /// Number of bytes waiting in the input buffer
    async fn bytes_available(&mut self) -> std::io::Result<usize>;

    /// Read exactly `buf.len()` buffered bytes
    async fn receive(&mut self, buf: &mut [u8]) -> std::io::Result<()>;
}

/// Create the byte transport selected by the configuration
pub fn create_transport(config: &SerialConfig) -> anyhow::Result<Box<dyn FrameTransport>> {
    match config.driver {
        SerialDriverType::Native => Ok(Box::new(drivers::native::NativeSerialDriver::open(
            &config.port,
            config.baud_rate,
        )?)),
        SerialDriverType::Mock => Ok(Box::new(drivers::mock::MockBoardBus::new())),
    }
}

#[async_trait]
impl<T: FrameTransport + ?Sized> FrameTransport for Box<T> {
    async fn clear_input(&mut self) -> std::io::Result<()> {
        (**self).clear_input().await
    }

    async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        (**self).send(data).await
    }

    async fn bytes_available(&mut self) -> std::io::Result<usize> {
        (**self).bytes_available().await
    }

    async fn receive(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        (**self).receive(buf).await
    }
}
