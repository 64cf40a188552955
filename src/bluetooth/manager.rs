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

//! Link connection manager.
//!
//! Owns the single SPP session: state transitions, the outbound command
//! path, and the inbound listener task. At most one connection attempt is
//! in flight at a time; a new request supersedes the previous one.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use super::capability::{CapabilityProbe, DeviceInfo};
use super::codec::{self, APPLIANCE_COUNT};
use super::transport::{LinkError, LinkReader, LinkWriter, Transport};
use crate::events::LinkEvent;
use crate::state::LinkState;
use crate::storage::Registry;

/// Connection state machine plus inbound listener for the relay link.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct LinkManager {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    capability: Arc<dyn CapabilityProbe>,
    registry: Registry,
    state: Arc<LinkState>,
    events: mpsc::Sender<LinkEvent>,
    writer: Mutex<Option<Box<dyn LinkWriter>>>,
    connect_task: Mutex<Option<AbortHandle>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl LinkManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        capability: Arc<dyn CapabilityProbe>,
        registry: Registry,
        state: Arc<LinkState>,
        events: mpsc::Sender<LinkEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                capability,
                registry,
                state,
                events,
                writer: Mutex::new(None),
                connect_task: Mutex::new(None),
                reader_task: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> &Arc<LinkState> {
        &self.inner.state
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Both capability preconditions for touching the radio.
    pub async fn preconditions_met(&self) -> bool {
        self.inner.capability.has_permission().await
            && self.inner.capability.is_adapter_enabled().await
    }

    /// Startup initialization: verify capabilities, seed the displayed name
    /// from the trusted device, refresh the bonded list. Failures publish an
    /// error and leave prior state untouched.
    pub async fn initialize(&self) {
        let state = &self.inner.state;
        state.clear_error();

        if !self.inner.capability.has_permission().await {
            error!("Cannot initialize - Bluetooth permission not granted");
            state.set_error("Bluetooth permissions required");
            return;
        }
        if !self.inner.capability.is_adapter_enabled().await {
            error!("Cannot initialize - Bluetooth not enabled");
            state.set_error("Bluetooth is not enabled");
            return;
        }

        if let Some(trusted) = self.trusted_device().await {
            debug!("Found trusted device during initialization");
            state.set_device_name(Some(trusted.display_name()));
        }
        self.refresh_bonded_devices().await;
    }

    /// Publishes the bonded device list, or an error when the radio is not
    /// usable.
    pub async fn refresh_bonded_devices(&self) {
        let state = &self.inner.state;
        if !self.inner.capability.has_permission().await {
            state.set_available_devices(Vec::new());
            state.set_error("Bluetooth permission not granted");
            return;
        }
        if !self.inner.capability.is_adapter_enabled().await {
            state.set_available_devices(Vec::new());
            state.set_error("Bluetooth is not enabled");
            return;
        }
        let devices = self.inner.capability.bonded_devices().await;
        debug!("Found {} paired devices", devices.len());
        state.set_available_devices(devices);
    }

    /// Resolves the persisted trusted address against the bonded list.
    pub async fn trusted_device(&self) -> Option<DeviceInfo> {
        let address = match self.inner.registry.trusted_device_address() {
            Ok(address) => address,
            Err(err) => {
                warn!("Failed to read trusted device address: {err}");
                return None;
            }
        };
        if address.is_empty() {
            debug!("No trusted device address saved");
            return None;
        }
        if !self.inner.capability.has_permission().await {
            warn!("Cannot resolve trusted device - permission not granted");
            return None;
        }
        self.inner
            .capability
            .bonded_devices()
            .await
            .into_iter()
            .find(|device| device.address == address)
    }

    /// Marks a device as trusted (auto-connect target), or clears the slot.
    /// Only one device is trusted at a time; setting replaces the previous.
    pub async fn set_trusted_device(&self, device: Option<&DeviceInfo>) {
        match device {
            Some(device) => {
                if !self.inner.capability.has_permission().await {
                    error!("Cannot set trusted device - permission not granted");
                    self.inner
                        .state
                        .set_error("Cannot set trusted device - permission not granted");
                    return;
                }
                if let Err(err) = self
                    .inner
                    .registry
                    .set_trusted_device_address(&device.address)
                {
                    self.inner
                        .state
                        .set_error(format!("Failed to save trusted device: {err}"));
                    return;
                }
                debug!("Set {} as trusted device", device.display_name());
            }
            None => {
                if let Err(err) = self.inner.registry.set_trusted_device_address("") {
                    warn!("Failed to clear trusted device: {err}");
                }
                debug!("Cleared trusted device");
            }
        }
    }

    /// Launches a connection attempt in the background.
    pub async fn spawn_connect(&self, device: DeviceInfo) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.connect_to_device(&device).await;
        });
    }

    /// One full connection attempt, superseding any attempt still in flight.
    /// The dial runs as its own task so that a later call can cancel it
    /// without ever opening a second session.
    pub async fn connect_to_device(&self, device: &DeviceInfo) {
        let attempt = {
            let mut slot = self.inner.connect_task.lock().await;
            if let Some(previous) = slot.take() {
                previous.abort();
            }
            let manager = self.clone();
            let device = device.clone();
            let attempt = tokio::spawn(async move {
                manager.dial(&device).await;
            });
            *slot = Some(attempt.abort_handle());
            attempt
        };
        let _ = attempt.await;
    }

    async fn dial(&self, device: &DeviceInfo) {
        let state = &self.inner.state;
        state.clear_error();

        if !self.inner.capability.has_permission().await {
            error!("Cannot connect - Bluetooth permission not granted");
            state.set_error("Cannot connect - Bluetooth permission not granted");
            return;
        }

        // Tear down whatever session is still around before dialing again.
        self.close_connection().await;
        state.set_connecting();
        debug!("Attempting to connect to device: {}", device.address);

        match self.inner.transport.connect(&device.address).await {
            Ok((reader, writer)) => {
                *self.inner.writer.lock().await = Some(writer);
                let display_name = device.display_name();
                state.set_connected(display_name.clone(), device.address.clone());
                info!("Connected to device: {display_name}");
                self.spawn_reader(reader).await;
                self.emit(LinkEvent::Connected {
                    device_name: display_name,
                })
                .await;
            }
            Err(err) => {
                error!("Failed to connect to device: {err}");
                self.publish_error(&describe_connect_error(&err)).await;
                state.set_disconnected();
            }
        }
    }

    /// Sends one command byte. Any write failure invalidates the whole
    /// session, symmetric with a read failure.
    pub async fn send_command(&self, byte: u8) {
        let failure = {
            let mut writer = self.inner.writer.lock().await;
            match writer.as_mut() {
                Some(writer) => writer.write_byte(byte).await.err(),
                None => {
                    warn!("Cannot send command - not connected");
                    None
                }
            }
        };

        if let Some(err) = failure {
            error!("Error sending command: {err}");
            self.inner.state.set_error(format!("Connection lost: {err}"));
            self.close_connection().await;
            self.emit(LinkEvent::Disconnected).await;
        } else {
            debug!("Sent command: {}", byte as char);
        }
    }

    /// User-initiated toggle: sends the command and records the new state
    /// locally (switching ON restarts the run timer, OFF zeroes it).
    /// Appliance numbers outside 1-8 are a no-op.
    pub async fn set_appliance(&self, appliance: u8, turn_on: bool) {
        if !(1..=APPLIANCE_COUNT).contains(&appliance) {
            return;
        }
        let command = codec::encode_command(appliance, turn_on);
        debug!(
            "Turning appliance {appliance} {} with command: {}",
            if turn_on { "ON" } else { "OFF" },
            command as char
        );
        self.send_command(command).await;
        self.apply_report(appliance, turn_on).await;
    }

    /// Unconditional teardown: cancels the inbound listener, closes the
    /// socket best-effort, resets published state. Callable from any state,
    /// idempotent, never fails.
    pub async fn close_connection(&self) {
        if let Some(task) = self.inner.reader_task.lock().await.take() {
            task.abort();
        }
        self.teardown_session().await;
    }

    async fn spawn_reader(&self, reader: Box<dyn LinkReader>) {
        debug!("Starting data listener");
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            manager.read_loop(reader).await;
        });
        let mut slot = self.inner.reader_task.lock().await;
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Inbound listener: drains the read half while connected, applying each
    /// decoded status byte. Any read failure or EOF ends the session.
    async fn read_loop(&self, mut reader: Box<dyn LinkReader>) {
        while self.inner.state.is_connected() {
            match reader.read_chunk().await {
                Ok(Some(chunk)) => {
                    debug!("Received {} bytes", chunk.len());
                    for (id, is_on) in codec::decode_chunk(&chunk) {
                        self.apply_report(id, is_on).await;
                    }
                }
                Ok(None) => {
                    info!("Connection closed by remote");
                    self.connection_lost("Connection closed by device").await;
                    break;
                }
                Err(err) => {
                    error!("Error reading data: {err}");
                    self.connection_lost(format!("Connection lost: {err}"))
                        .await;
                    break;
                }
            }
        }
    }

    /// Teardown from inside the listener. Does not abort the listener task
    /// itself; the loop condition flips instead.
    async fn connection_lost(&self, message: impl Into<String>) {
        self.inner.state.set_error(message);
        self.teardown_session().await;
        self.emit(LinkEvent::Disconnected).await;
    }

    async fn teardown_session(&self) {
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            writer.close().await;
        }
        self.inner.state.set_disconnected();
    }

    async fn apply_report(&self, id: u8, is_on: bool) {
        debug!(
            "Updating appliance {id} state to {}",
            if is_on { "ON" } else { "OFF" }
        );
        let now_ms = chrono::Local::now().timestamp_millis();
        if let Err(err) = self.inner.registry.apply_report(id, is_on, now_ms) {
            warn!("Failed to persist appliance {id} state: {err}");
        }
        self.emit(LinkEvent::ApplianceChanged { id, is_on }).await;
    }

    /// Publishes a link error to the shared state and to event subscribers.
    pub(crate) async fn publish_error(&self, message: &str) {
        self.inner.state.set_error(message);
        self.emit(LinkEvent::Error(message.into())).await;
    }

    async fn emit(&self, event: LinkEvent) {
        let _ = self.inner.events.send(event).await;
    }
}

/// User-facing description of a connect failure.
fn describe_connect_error(err: &LinkError) -> String {
    match err {
        LinkError::PermissionDenied => "Cannot connect - Bluetooth permission not granted".into(),
        LinkError::AdapterDisabled => "Bluetooth is not enabled".into(),
        LinkError::TimedOut => "Connection timed out".into(),
        LinkError::Io(_) if err.looks_unreachable() => {
            "Device may be powered off or out of range".into()
        }
        other => format!("Connection failed: {other}"),
    }
}
