// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP server configuration
//!
//! This module defines the structures for configuring the Modbus TCP server
//! that exposes the gateway's holding-register map.

use serde::{Deserialize, Serialize};

/// Configuration for the Modbus TCP server component.
///
/// # Fields
///
/// * `port` - TCP port number for the Modbus server (default: 502)
/// * `address` - Network address for the Modbus server to bind to (default: 0.0.0.0)
/// * `vendor_name` / `product_name` - Device identity reported in the logs
///
/// # Example
///
/// ```
/// use rust_ocr_gateway::config::ModbusConfig;
///
/// let modbus_config = ModbusConfig {
///     port: 5020,
///     address: "127.0.0.1".to_string(),
///     ..ModbusConfig::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// The TCP port the Modbus server will listen on.
    ///
    /// Valid range is 1-65534. Default value is 502, which is the standard Modbus TCP port.
    pub port: u16,

    /// The network address the Modbus server will bind to.
    ///
    /// Use "0.0.0.0" to bind to all IPv4 interfaces, which is the default since
    /// the gateway is meant to be reached by PLCs on the plant network.
    pub address: String,

    /// Vendor name of the device identity
    #[serde(default = "default_vendor_name")]
    pub vendor_name: String,

    /// Product name of the device identity
    #[serde(default = "default_product_name")]
    pub product_name: String,
}

fn default_vendor_name() -> String {
    "NHP".to_string()
}

fn default_product_name() -> String {
    "OCR Current Transducer".to_string()
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            port: 502,
            address: "0.0.0.0".to_string(),
            vendor_name: default_vendor_name(),
            product_name: default_product_name(),
        }
    }
}
