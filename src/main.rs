// Copyright 2026 RelayLink Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! RelayLink Desktop Application

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relaylink::bluetooth::{
    BluerCapability, LinkManager, ReconnectSupervisor, RfcommTransport,
};
use relaylink::config::Config;
use relaylink::events::LinkEvent;
use relaylink::state::LinkState;
use relaylink::storage::Registry;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relaylink=info".parse().unwrap()),
        )
        .init();

    info!("Starting RelayLink v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    // Open the device registry
    let registry = Registry::open(&config.data_dir)?;
    registry.resume_running_timers(chrono::Local::now().timestamp_millis())?;
    info!("Device registry initialized");

    // Connect to BlueZ
    let session = bluer::Session::new().await?;
    let adapter = match &config.bluetooth.adapter {
        Some(name) => session.adapter(name)?,
        None => session.default_adapter().await?,
    };
    info!("Using Bluetooth adapter: {}", adapter.name());

    let transport = Arc::new(RfcommTransport::new(adapter.clone()));
    let capability = Arc::new(BluerCapability::new(adapter));
    let state = LinkState::new();

    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel::<LinkEvent>(32);
    let manager = LinkManager::new(
        transport,
        capability,
        registry.clone(),
        state.clone(),
        event_tx,
    );

    manager.initialize().await;
    if let Some(message) = state.last_error() {
        error!("Initialization problem: {message}");
    }

    // Log link events; a UI would subscribe here instead.
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                LinkEvent::Connected { device_name } => {
                    info!("Link established with {device_name}");
                }
                LinkEvent::Disconnected => info!("Link closed"),
                LinkEvent::ApplianceChanged { id, is_on } => {
                    info!("Appliance {id} reported {}", if is_on { "ON" } else { "OFF" });
                }
                LinkEvent::Error(message) => error!("Link error: {message}"),
            }
        }
    });

    // Keep the run-time display strings of running appliances current.
    let ticker_registry = registry.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tick.tick().await;
            let now_ms = chrono::Local::now().timestamp_millis();
            if let Err(err) = ticker_registry.refresh_display_times(now_ms) {
                error!("Failed to refresh appliance timers: {err}");
            }
        }
    });

    let supervisor = ReconnectSupervisor::new();
    if config.bluetooth.auto_connect {
        supervisor.start(manager.clone()).await;
    }

    info!("Ready.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    supervisor.stop().await;
    manager.close_connection().await;

    info!("RelayLink stopped");
    Ok(())
}
