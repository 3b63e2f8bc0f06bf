// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP server exposing the gateway holding registers
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module uses
//! the terms "server" and "client" instead. The PLC is the client, the gateway is the
//! server.
//!
//! ## Register Map
//!
//! | Address | Description | Range |
//! |---------|-------------|-------|
//! | 0 | System voltage amplitude | 0..255, 300 = boards differ |
//! | 1 | System current amplitude | -255..255, 300 = boards differ |
//! | 2 | System current phase shift | -90..90, 300 = boards differ |
//! | 3-5 | Voltage amplitude of boards 1-3 | 0..255 |
//! | 6-8 | Current amplitude of boards 1-3 | -255..255 |
//! | 9-11 | Current phase shift of boards 1-3 | -90..90 |
//! | 12 | Save board defaults (write nonzero) | |
//! | 50 | Indicator function | 0..6 |
//! | 51 | Indicator frequency | tenths of Hz |
//! | 52 | Indicator brightness | 0..100 % |
//! | 53-55 | Indicator red, green, blue | 0..255 |
//! | 56 | Save indicator defaults (write nonzero) | |
//!
//! Registers 0 to 12 read `-32768` while the serial link to the boards is down.
//!
//! The server only stores what clients write. The bridge engine picks the
//! changes up on its next poll cycle.

use std::future;

use log::{debug, error};
use tokio_modbus::prelude::*;

use super::registers::{RegisterMap, RegisterStore, REGISTER_COUNT};

/// Holding-register service answering function codes 0x03, 0x06 and 0x10.
///
/// Any other function code is answered with an IllegalFunction exception.
#[derive(Debug, Clone)]
pub struct GatewayModbusServer {
    registers: RegisterStore,
}

impl tokio_modbus::server::Service for GatewayModbusServer {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        debug!("Received Modbus request: {:?}", req);

        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => {
                debug!(
                    "Reading {} holding registers starting from address {}",
                    cnt, addr
                );
                self.registers
                    .with_map(|map| register_read(map, addr, cnt))
                    .map(Response::ReadHoldingRegisters)
            }
            Request::WriteMultipleRegisters(addr, values) => {
                debug!(
                    "Writing {} values to holding registers starting from address {}",
                    values.len(),
                    addr
                );
                self.registers
                    .with_map(|map| register_write(map, addr, &values))
                    .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16))
            }
            Request::WriteSingleRegister(addr, value) => {
                debug!("Writing value {} to holding register {}", value, addr);
                self.registers
                    .with_map(|map| register_write(map, addr, std::slice::from_ref(&value)))
                    .map(|_| Response::WriteSingleRegister(addr, value))
            }
            _ => {
                error!(
                    "Exception::IllegalFunction - Unimplemented function code in request: {req:?}"
                );
                Err(ExceptionCode::IllegalFunction)
            }
        };

        if let Err(e) = &res {
            error!("Modbus request error: {:?}", e);
        }

        future::ready(res)
    }
}

impl GatewayModbusServer {
    /// Serve the given register store
    ///
    /// The store is shared: clones of it held by the bridge engine see every
    /// client write.
    pub fn new(registers: RegisterStore) -> Self {
        Self { registers }
    }

    /// The register store behind this server
    pub fn registers(&self) -> &RegisterStore {
        &self.registers
    }
}

/// Checks that `cnt` registers starting at `addr` all exist
fn checked_span(addr: u16, cnt: usize) -> Result<std::ops::Range<usize>, ExceptionCode> {
    let start = usize::from(addr);
    let end = start + cnt;
    if end > REGISTER_COUNT {
        error!(
            "Exception::IllegalDataAddress - Registers {}..{} outside of map",
            start, end
        );
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(start..end)
}

/// Copy `cnt` registers starting at `addr`
fn register_read(map: &RegisterMap, addr: u16, cnt: u16) -> Result<Vec<u16>, ExceptionCode> {
    let span = checked_span(addr, cnt.into())?;
    debug!("Successfully read {} registers from address {}", cnt, addr);
    Ok(map[span].to_vec())
}

/// Write `values` starting at `addr`
///
/// Nothing is written when any target address is outside of the map.
fn register_write(map: &mut RegisterMap, addr: u16, values: &[u16]) -> Result<(), ExceptionCode> {
    let span = checked_span(addr, values.len())?;
    map[span].copy_from_slice(values);
    debug!(
        "Successfully wrote {} registers from address {}",
        values.len(),
        addr
    );
    Ok(())
}
