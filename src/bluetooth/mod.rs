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

//! Bluetooth link module.
//!
//! Manages the SPP (RFCOMM) connection to the relay board: transport,
//! command codec, connection state machine, and the auto-reconnect loop.

mod capability;
pub mod codec;
mod manager;
mod reconnect;
mod transport;

pub use capability::{BluerCapability, CapabilityProbe, DeviceInfo};
pub use manager::LinkManager;
pub use reconnect::{
    backoff_delay, ReconnectSupervisor, BACKOFF_CAP, BASE_INTERVAL, MAX_FAILED_ATTEMPTS,
    PENALTY_DELAY,
};
pub use transport::{
    LinkError, LinkReader, LinkWriter, RfcommTransport, Transport, CONNECT_TIMEOUT, SPP_CHANNEL,
    SPP_UUID,
};
