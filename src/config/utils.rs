// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::debug;

use super::Config;

/// JSON schema embedded at build time
pub const CONFIG_SCHEMA: &str = include_str!("../../resources/config.schema.json");

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./rust_ocr_gateway --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    // Special cases
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against additional rules that aren't covered by the JSON schema.
///
/// # Validation Rules
///
/// - **Port Range**: the Modbus port is within 1-65534
/// - **IP Address Format**: the Modbus bind address is a valid IP address or special value
/// - **Serial timing**: the reply timeout is not zero
/// - **Defaults files**: the two persisted records do not share a path
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    if config.modbus.port < 1 || config.modbus.port > 65534 {
        anyhow::bail!("Invalid Modbus port number: {}", config.modbus.port);
    }

    if !is_valid_ip_address(&config.modbus.address) {
        anyhow::bail!("Invalid Modbus address: {}", config.modbus.address);
    }

    if config.serial.max_polls == 0 || config.serial.poll_interval_ms == 0 {
        anyhow::bail!("Serial reply timeout must be greater than zero");
    }

    if config.bridge.poll_interval_ms == 0 {
        anyhow::bail!("Bridge poll interval must be greater than zero");
    }

    if config.bridge.board_defaults_path == config.bridge.indicator_defaults_path {
        anyhow::bail!(
            "Board and indicator defaults must use different files ({})",
            config.bridge.board_defaults_path
        );
    }

    if config.indicator.enabled && config.indicator.led_count == 0 {
        anyhow::bail!("Indicator is enabled but led_count is 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_address_validation() {
        assert!(is_valid_ip_address("192.168.1.10"));
        assert!(is_valid_ip_address("::1"));
        assert!(is_valid_ip_address("localhost"));
        assert!(!is_valid_ip_address("plc.local"));
    }

    #[test]
    fn test_default_config_passes_specific_rules() {
        assert!(validate_specific_rules(&Config::default()).is_ok());
    }

    #[test]
    fn test_shared_defaults_path_is_rejected() {
        let mut config = Config::default();
        config.bridge.indicator_defaults_path = config.bridge.board_defaults_path.clone();
        assert!(validate_specific_rules(&config).is_err());
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let mut config = Config::default();
        config.serial.max_polls = 0;
        assert!(validate_specific_rules(&config).is_err());
    }
}
