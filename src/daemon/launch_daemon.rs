// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Management Module
//!
//! This module runs the gateway services and handles their lifecycle:
//!
//! - Status indicator render loop
//! - Bridge engine (defaults push, then the register poll loop)
//! - Modbus TCP server
//!
//! Services start in that order. On shutdown the bridge engine stops first
//! and turns the board outputs off, only then is the Modbus listener released.
//!
//! ## Usage
//!
//! ```no_run
//! use rust_ocr_gateway::{config::Config, daemon::launch_daemon::Daemon};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config).await?;
//!
//!     // Later, trigger a graceful shutdown
//!     daemon.shutdown();
//!
//!     // Wait for all tasks to complete
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

use crate::bridge::{BridgeEngine, DefaultsStore};
use crate::config::Config;
use crate::indicator::{run_indicator, LogStrip, SharedIndicator};
use crate::modbus::{GatewayModbusServer, RegisterStore};
use crate::serial::{create_transport, FrameTransport, SerialLink};

/// How long `join` waits for each task before giving up on it
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Coordinates the gateway background tasks
///
/// # Thread Safety
///
/// The `running` flag is shared with the engine and indicator tasks, which
/// check it once per loop iteration. The Modbus server has its own flag so it
/// can outlive the engine during shutdown.
pub struct Daemon {
    engine_task: Option<JoinHandle<Result<()>>>,
    indicator_task: Option<JoinHandle<Result<()>>>,
    modbus_task: Option<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    server_running: Arc<AtomicBool>,
    registers: RegisterStore,
    indicator: SharedIndicator,
    modbus_address: Option<SocketAddr>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance with no task started
    pub fn new() -> Self {
        Daemon {
            engine_task: None,
            indicator_task: None,
            modbus_task: None,
            running: Arc::new(AtomicBool::new(true)),
            server_running: Arc::new(AtomicBool::new(true)),
            registers: RegisterStore::new(),
            indicator: SharedIndicator::new(),
            modbus_address: None,
        }
    }

    /// Register map served over Modbus
    pub fn registers(&self) -> &RegisterStore {
        &self.registers
    }

    pub fn indicator(&self) -> &SharedIndicator {
        &self.indicator
    }

    /// Address the Modbus listener is bound to, once launched
    pub fn modbus_address(&self) -> Option<SocketAddr> {
        self.modbus_address
    }

    /// Launch all services using the serial transport selected by the configuration
    ///
    /// # Errors
    ///
    /// Fails when the serial device cannot be opened or the Modbus listener
    /// cannot be bound.
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        let transport = create_transport(&config.serial).with_context(|| {
            format!(
                "Failed to open {:?} serial transport on {}",
                config.serial.driver, config.serial.port
            )
        })?;
        self.launch_with_transport(config, transport).await
    }

    /// Launch all services on an already opened transport
    pub async fn launch_with_transport<T>(&mut self, config: &Config, transport: T) -> Result<()>
    where
        T: FrameTransport + 'static,
    {
        if config.indicator.enabled {
            self.start_indicator(config);
        }

        let link = SerialLink::with_config(transport, &config.serial);
        let mut engine = BridgeEngine::new(
            link,
            self.registers.clone(),
            Arc::new(self.indicator.clone()),
            DefaultsStore::from_config(&config.bridge),
        );
        engine.startup().await;

        if let Err(e) = self.start_modbus_server(config).await {
            // the indicator may already be running
            self.shutdown();
            return Err(e);
        }
        self.start_bridge_engine(config, engine);
        Ok(())
    }

    fn start_indicator(&mut self, config: &Config) {
        info!("Starting status indicator task");
        let strip = Box::new(LogStrip::new(config.indicator.led_count));
        let task = tokio::spawn(run_indicator(
            self.indicator.clone(),
            strip,
            config.indicator.clone(),
            self.running.clone(),
        ));
        self.indicator_task = Some(task);
    }

    fn start_bridge_engine<T>(&mut self, config: &Config, engine: BridgeEngine<T>)
    where
        T: FrameTransport + 'static,
    {
        let period = Duration::from_millis(config.bridge.poll_interval_ms);
        let task = tokio::spawn(engine.run(period, self.running.clone()));
        self.engine_task = Some(task);
    }

    /// Bind the Modbus listener and serve the register map
    async fn start_modbus_server(&mut self, config: &Config) -> Result<()> {
        let socket_addr: SocketAddr = format!("{}:{}", config.modbus.address, config.modbus.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid Modbus socket address {}:{}",
                    config.modbus.address, config.modbus.port
                )
            })?;
        let listener = TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("Failed to bind Modbus listener on {}", socket_addr))?;
        let local_addr = listener.local_addr()?;
        self.modbus_address = Some(local_addr);
        info!(
            "Modbus server for {} {} listening on {}",
            config.modbus.vendor_name, config.modbus.product_name, local_addr
        );

        let registers = self.registers.clone();
        let server_running = self.server_running.clone();

        let task = tokio::spawn(async move {
            let server = Server::new(listener);

            let on_connected = move |stream: TcpStream, socket_addr: SocketAddr| {
                let registers = registers.clone();
                debug!("Modbus client connected from {}", socket_addr);
                async move {
                    accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                        Ok(Some(GatewayModbusServer::new(registers.clone())))
                    })
                }
            };

            let on_process_error = |err| {
                error!("Modbus server error: {err}");
            };

            let server_handle = tokio::spawn(async move {
                if let Err(e) = server.serve(&on_connected, on_process_error).await {
                    error!("Modbus server error: {}", e);
                }
            });

            while server_running.load(Ordering::SeqCst) {
                time::sleep(Duration::from_millis(100)).await;
            }

            info!("Shutting down Modbus server...");
            server_handle.abort();
            match time::timeout(TASK_JOIN_TIMEOUT, server_handle).await {
                Ok(_) => info!("Modbus server shut down successfully"),
                Err(_) => warn!("Modbus server shutdown timed out, forcing termination"),
            }
            Ok(())
        });

        self.modbus_task = Some(task);
        Ok(())
    }

    /// Whether the engine and indicator tasks are still asked to run
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal the engine and indicator tasks to stop
    ///
    /// The Modbus server keeps serving until [`join`](Self::join) has seen the
    /// engine finish.
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for all tasks to complete
    ///
    /// Call after [`shutdown`](Self::shutdown). Waits for the engine (which
    /// turns the board outputs off), then stops the Modbus server and the
    /// indicator. A task that panics or hangs is logged, not propagated.
    pub async fn join(self) -> Result<()> {
        // the engine only leaves its loop once running is cleared
        self.running.store(false, Ordering::SeqCst);
        wait_for("bridge engine", self.engine_task).await;

        self.server_running.store(false, Ordering::SeqCst);
        wait_for("Modbus server", self.modbus_task).await;
        wait_for("status indicator", self.indicator_task).await;
        Ok(())
    }
}

async fn wait_for(name: &str, task: Option<JoinHandle<Result<()>>>) {
    let Some(task) = task else {
        return;
    };
    match time::timeout(TASK_JOIN_TIMEOUT, task).await {
        Ok(Ok(Ok(()))) => debug!("{} task finished", name),
        Ok(Ok(Err(e))) => error!("{} task failed: {:#}", name, e),
        Ok(Err(e)) => error!("{} task panicked: {}", name, e),
        Err(_) => warn!("{} task did not complete within timeout period, may be hung", name),
    }
}
