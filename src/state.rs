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

//! Published link state.
//!
//! Single-writer, multi-reader: only the connection manager (and the
//! reconnect supervisor, for error reporting) mutates this; any UI reads it.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::bluetooth::DeviceInfo;

/// Link status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Disconnected => "Disconnected",
            LinkStatus::Connecting => "Connecting...",
            LinkStatus::Connected => "Connected",
        }
    }
}

/// Shared link state.
#[derive(Debug)]
pub struct LinkState {
    /// Current link status.
    pub status: RwLock<LinkStatus>,

    /// Display name of the connected (or trusted) device.
    pub device_name: RwLock<Option<String>>,

    /// Address of the connected device.
    pub device_address: RwLock<Option<String>>,

    /// Bonded devices available for connection.
    pub available_devices: RwLock<Vec<DeviceInfo>>,

    /// Last published error, until cleared.
    pub last_error: RwLock<Option<String>>,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            status: RwLock::new(LinkStatus::Disconnected),
            device_name: RwLock::new(None),
            device_address: RwLock::new(None),
            available_devices: RwLock::new(Vec::new()),
            last_error: RwLock::new(None),
        }
    }
}

impl LinkState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connecting(&self) {
        *self.status.write() = LinkStatus::Connecting;
    }

    pub fn set_connected(&self, device_name: String, device_address: String) {
        *self.status.write() = LinkStatus::Connected;
        *self.device_name.write() = Some(device_name);
        *self.device_address.write() = Some(device_address);
    }

    pub fn set_disconnected(&self) {
        *self.status.write() = LinkStatus::Disconnected;
        *self.device_name.write() = None;
        *self.device_address.write() = None;
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.read()
    }

    pub fn is_connected(&self) -> bool {
        *self.status.read() == LinkStatus::Connected
    }

    pub fn device_name(&self) -> Option<String> {
        self.device_name.read().clone()
    }

    /// Seeds the displayed name before a connection exists (trusted device
    /// found at startup).
    pub fn set_device_name(&self, name: Option<String>) {
        *self.device_name.write() = name;
    }

    pub fn set_available_devices(&self, devices: Vec<DeviceInfo>) {
        *self.available_devices.write() = devices;
    }

    pub fn available_devices(&self) -> Vec<DeviceInfo> {
        self.available_devices.read().clone()
    }

    pub fn set_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn clear_error(&self) {
        *self.last_error.write() = None;
    }
}
