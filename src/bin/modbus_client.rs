// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Commissioning client: read or write the gateway holding registers
//!
//! ```bash
//! modbus_client --address 192.168.1.20 read 0 13
//! modbus_client write 1 -- -120
//! ```

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_modbus::prelude::*;

use rust_ocr_gateway::modbus::{decode_register, encode_register};

/// Modbus client for the OCR gateway holding registers
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Modbus server address
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Modbus server port
    #[clap(long, default_value = "502")]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read consecutive holding registers
    Read {
        /// First register address
        register: u16,
        /// Number of registers to read
        #[clap(default_value = "1")]
        quantity: u16,
    },
    /// Write signed values starting at a register
    Write {
        /// First register address
        register: u16,
        /// Values to write, one per register
        #[clap(allow_negative_numbers = true, required = true)]
        values: Vec<i16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();

    let socket_addr: SocketAddr = format!("{}:{}", args.address, args.port)
        .parse()
        .with_context(|| format!("Invalid socket address {}:{}", args.address, args.port))?;
    println!("Connecting to Modbus server at {}", socket_addr);

    let mut ctx = tcp::connect(socket_addr)
        .await
        .with_context(|| format!("Failed to connect to {}", socket_addr))?;

    match args.command {
        Command::Read { register, quantity } => {
            let words = ctx
                .read_holding_registers(register, quantity)
                .await?
                .map_err(|e| anyhow::anyhow!("Modbus exception: {:?}", e))?;
            for (offset, word) in words.iter().enumerate() {
                println!(
                    "{:>3}: {:>6} (0x{:04X})",
                    usize::from(register) + offset,
                    decode_register(*word),
                    word
                );
            }
        }
        Command::Write { register, values } => {
            let words: Vec<u16> = values.iter().copied().map(encode_register).collect();
            ctx.write_multiple_registers(register, &words)
                .await?
                .map_err(|e| anyhow::anyhow!("Modbus exception: {:?}", e))?;
            println!("Wrote {} register(s) from address {}", words.len(), register);
        }
    }

    ctx.disconnect().await?;
    Ok(())
}
