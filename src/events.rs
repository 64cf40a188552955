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

//! Events emitted by the link manager for UI consumers.

/// Events emitted over the link event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Link established.
    Connected { device_name: String },
    /// Link closed or lost.
    Disconnected,
    /// The board reported an appliance state.
    ApplianceChanged { id: u8, is_on: bool },
    /// A failure was published.
    Error(String),
}
