// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Native UART driver
//!
//! Talks to the boards through a real serial device (`/dev/serial0` on the
//! Raspberry Pi) using the `serialport` crate, 8N1 without flow control.
//!
//! `serialport` is a blocking API. Writes and reads, which may wait up to the
//! port timeout, run on the blocking thread pool; buffer queries and flushes
//! are single ioctls and run inline.

use std::io::{Read, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::serial::FrameTransport;

/// Serial device driver
pub struct NativeSerialDriver {
    /// `None` only while a blocking call owns the port
    port: Option<Box<dyn SerialPort>>,
}

impl NativeSerialDriver {
    /// Open `device` at `baud_rate` and drop anything already buffered
    ///
    /// Failing to open the device is fatal at startup.
    pub fn open(device: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(device, baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_secs(1))
            .open()
            .with_context(|| format!("Failed to open serial device {}", device))?;

        port.clear(ClearBuffer::All)
            .with_context(|| format!("Failed to flush serial device {}", device))?;

        info!("Opened serial device {} at {} baud", device, baud_rate);
        Ok(Self { port: Some(port) })
    }

    fn port(&mut self) -> std::io::Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(port_lost)
    }
}

fn port_lost() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "serial port lost")
}

/// Run `f` on the blocking pool with the value taken out of `slot`
///
/// The value is put back once `f` returns. If `f` panics it is dropped and
/// every later call fails with `NotConnected`.
async fn run_blocking<P, R, F>(slot: &mut Option<P>, f: F) -> std::io::Result<R>
where
    P: Send + 'static,
    R: Send + 'static,
    F: FnOnce(&mut P) -> std::io::Result<R> + Send + 'static,
{
    let mut value = slot.take().ok_or_else(port_lost)?;
    let (value, result) = tokio::task::spawn_blocking(move || {
        let result = f(&mut value);
        (value, result)
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    *slot = Some(value);
    result
}

#[async_trait]
impl FrameTransport for NativeSerialDriver {
    async fn clear_input(&mut self) -> std::io::Result<()> {
        self.port()?
            .clear(ClearBuffer::Input)
            .map_err(std::io::Error::from)
    }

    async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        let data = data.to_vec();
        run_blocking(&mut self.port, move |port| {
            port.write_all(&data)?;
            port.flush()
        })
        .await
    }

    async fn bytes_available(&mut self) -> std::io::Result<usize> {
        let pending = self.port()?.bytes_to_read().map_err(std::io::Error::from)?;
        Ok(pending as usize)
    }

    async fn receive(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        let len = buf.len();
        let bytes = run_blocking(&mut self.port, move |port| {
            let mut bytes = vec![0u8; len];
            port.read_exact(&mut bytes)?;
            Ok(bytes)
        })
        .await?;
        buf.copy_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_blocking_returns_value_to_slot() {
        let mut slot = Some(vec![1u8, 2]);

        let len = run_blocking(&mut slot, |bytes: &mut Vec<u8>| {
            bytes.push(3);
            Ok(bytes.len())
        })
        .await
        .unwrap();

        assert_eq!(len, 3);
        assert_eq!(slot, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_run_blocking_keeps_value_after_io_error() {
        let mut slot = Some(0u32);

        let result: std::io::Result<()> = run_blocking(&mut slot, |_| {
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no reply"))
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::TimedOut);
        assert_eq!(slot, Some(0));
    }

    #[tokio::test]
    async fn test_run_blocking_after_panic_reports_lost_port() {
        let mut slot = Some(0u32);

        let result: std::io::Result<()> = run_blocking(&mut slot, |_| panic!("driver bug")).await;
        assert!(result.is_err());
        assert!(slot.is_none());

        let result: std::io::Result<()> = run_blocking(&mut slot, |_| Ok(())).await;
        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::NotConnected);
    }
}
