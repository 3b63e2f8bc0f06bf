// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the gateway
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings. The configuration is backed by a YAML file and
//! validated against a JSON schema for robustness.
//!
//! ## Configuration Structure
//!
//! - `modbus`: Modbus TCP server binding
//! - `serial`: serial link to the output boards
//! - `bridge`: poll period and persisted defaults locations
//! - `indicator`: LED strip status indicator
//!
//! ## Usage
//!
//! ```no_run
//! use rust_ocr_gateway::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some("127.0.0.1".to_string()),    // Modbus address
//!     Some(5020),                       // Modbus port
//!     Some("/dev/ttyUSB0".to_string()), // Serial device
//!     None,                             // Baud rate
//!     false,                            // Simulated boards
//!     None,                             // Poll interval
//! );
//!
//! println!("Modbus port: {}", config.modbus.port);
//! ```

pub mod bridge;
pub mod indicator;
pub mod modbus;
pub mod serial;
pub mod utils;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

pub use bridge::BridgeConfig;
pub use indicator::IndicatorConfig;
pub use modbus::ModbusConfig;
pub use serial::{SerialConfig, SerialDriverType};
pub use utils::{is_valid_ip_address, output_config_schema};

/// Root configuration structure for the gateway.
///
/// The configuration is deserialized from and serialized to YAML using serde.
/// It is validated against a JSON schema before deserialization, then against
/// a few rules the schema cannot express (see [`utils::validate_specific_rules`]).
///
/// Each section falls back to its defaults when missing from the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Modbus TCP server settings
    #[serde(default)]
    pub modbus: ModbusConfig,

    /// Serial link to the output boards
    #[serde(default)]
    pub serial: SerialConfig,

    /// Register bridge settings
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Status indicator settings
    #[serde(default)]
    pub indicator: IndicatorConfig,
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Creating sample configuration file at {:?}", sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
    ///
    /// A default configuration is written when the file does not exist.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        match Self::from_yaml_str(&contents) {
            Ok(config) => Ok(config),
            Err(err) => {
                error!("Configuration error in {}: {:#}", path.display(), err);
                Self::create_sample_config(path)?;
                Err(err.context(format!("Invalid configuration file {}", path.display())))
            }
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        // First step: convert YAML to a generic Value
        let yaml_value: serde_yml::Value =
            serde_yml::from_str(contents).context("Failed to parse YAML configuration")?;

        // Convert to JSON Value for validation
        let json_value = serde_json::to_value(&yaml_value)
            .context("Failed to convert YAML to JSON for validation")?;

        let schema: serde_json::Value =
            serde_json::from_str(utils::CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)
            .context("Failed to build JSON schema validator")?;

        if let Err(error) = validator.validate(&json_value) {
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config =
            serde_yml::from_str(contents).context("Failed to deserialize configuration")?;

        utils::validate_specific_rules(&config)?;
        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only explicitly provided values override the loaded configuration.
    ///
    /// # Parameters
    ///
    /// * `modbus_address` - Network address for the Modbus server to bind to
    /// * `modbus_port` - TCP port for the Modbus server
    /// * `serial_port` - Serial device connected to the boards
    /// * `baud_rate` - Serial line speed
    /// * `mock_boards` - If true, use the simulated board bus instead of the serial device
    /// * `poll_interval_ms` - Period of the bridge poll cycle
    pub fn apply_args(
        &mut self,
        modbus_address: Option<String>,
        modbus_port: Option<u16>,
        serial_port: Option<String>,
        baud_rate: Option<u32>,
        mock_boards: bool,
        poll_interval_ms: Option<u64>,
    ) {
        if let Some(address) = modbus_address {
            debug!("Overriding Modbus address from command line: {}", address);
            self.modbus.address = address;
        }
        if let Some(port) = modbus_port {
            debug!("Overriding Modbus port from command line: {}", port);
            self.modbus.port = port;
        }
        if let Some(port) = serial_port {
            debug!("Overriding serial device from command line: {}", port);
            self.serial.port = port;
        }
        if let Some(baud_rate) = baud_rate {
            debug!("Overriding baud rate from command line: {}", baud_rate);
            self.serial.baud_rate = baud_rate;
        }
        if mock_boards {
            debug!("Using simulated boards (command line)");
            self.serial.driver = SerialDriverType::Mock;
        }
        if let Some(interval) = poll_interval_ms {
            debug!("Overriding poll interval from command line: {} ms", interval);
            self.bridge.poll_interval_ms = interval;
        }
    }
}
