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

//! Radio capability checks: authorization, adapter power state, and the
//! bonded device list.

use async_trait::async_trait;
use bluer::Adapter;
use tracing::warn;

/// A bonded (paired) Bluetooth device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub address: String,
    pub name: Option<String>,
}

impl DeviceInfo {
    /// Human-readable name, falling back to a truncated address when the
    /// device name is unavailable.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => {
                let tail = &self.address[self.address.len().saturating_sub(5)..];
                format!("Device {tail}")
            }
        }
    }
}

/// Queries the core consumes before touching the radio. It never drives
/// permission prompts itself.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn has_permission(&self) -> bool;
    async fn is_adapter_enabled(&self) -> bool;
    async fn bonded_devices(&self) -> Vec<DeviceInfo>;
}

/// BlueZ-backed capability probe.
pub struct BluerCapability {
    adapter: Adapter,
}

impl BluerCapability {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl CapabilityProbe for BluerCapability {
    async fn has_permission(&self) -> bool {
        // bluetoothd refuses adapter property reads when the caller is not
        // authorized, so a successful address query stands in for the
        // runtime permission check.
        self.adapter.address().await.is_ok()
    }

    async fn is_adapter_enabled(&self) -> bool {
        self.adapter.is_powered().await.unwrap_or(false)
    }

    async fn bonded_devices(&self) -> Vec<DeviceInfo> {
        let addresses = match self.adapter.device_addresses().await {
            Ok(addresses) => addresses,
            Err(err) => {
                warn!("Failed to list known devices: {err}");
                return Vec::new();
            }
        };

        let mut devices = Vec::new();
        for address in addresses {
            let Ok(device) = self.adapter.device(address) else {
                continue;
            };
            if !device.is_paired().await.unwrap_or(false) {
                continue;
            }
            let name = device.alias().await.ok();
            devices.push(DeviceInfo {
                address: address.to_string(),
                name,
            });
        }
        devices
    }
}
