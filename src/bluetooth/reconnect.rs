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

//! Auto-reconnect supervisor.
//!
//! A single long-lived loop that redials the trusted device whenever the
//! link is down, with exponential backoff and a degraded mode after
//! repeated failures. The loop only exits via an explicit `stop`.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::manager::LinkManager;
use super::transport::CONNECT_TIMEOUT;

/// Steady-state poll interval while connected or idle.
pub const BASE_INTERVAL: Duration = Duration::from_millis(2000);

/// Ceiling on the exponential backoff.
pub const BACKOFF_CAP: Duration = Duration::from_millis(30_000);

/// Consecutive failures before entering degraded mode.
pub const MAX_FAILED_ATTEMPTS: u32 = 5;

/// Extra delay inserted in degraded mode.
pub const PENALTY_DELAY: Duration = Duration::from_millis(10_000);

/// Settle time after an attempt before judging whether it stuck.
const SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// Delay before the next attempt after `failures` consecutive failures:
/// `min(2000 * 2^failures, 30000)` ms, or the base interval when clean.
pub fn backoff_delay(failures: u32) -> Duration {
    if failures == 0 {
        return BASE_INTERVAL;
    }
    let shift = failures.min(16);
    let millis = (BASE_INTERVAL.as_millis() as u64).saturating_mul(1u64 << shift);
    Duration::from_millis(millis.min(BACKOFF_CAP.as_millis() as u64))
}

/// Handle to the reconnect loop. Starting a new loop supersedes any
/// previous one; at most one loop runs at a time.
pub struct ReconnectSupervisor {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ReconnectSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectSupervisor {
    pub fn new() -> Self {
        Self {
            task: Mutex::new(None),
        }
    }

    pub async fn start(&self, manager: LinkManager) {
        let mut slot = self.task.lock().await;
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        info!("Starting auto-reconnect mechanism");
        *slot = Some(tokio::spawn(run(manager)));
    }

    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            info!("Stopped auto-reconnect mechanism");
        }
    }
}

async fn run(manager: LinkManager) {
    let mut failed_attempts: u32 = 0;

    loop {
        let connected = manager.state().is_connected();
        debug!("Auto-reconnect check - currently connected: {connected}");

        if connected {
            failed_attempts = 0;
        } else if !manager.preconditions_met().await {
            debug!("Auto-reconnect skipped - no permission or Bluetooth disabled");
        } else if let Some(device) = manager.trusted_device().await {
            debug!("Auto-reconnecting to trusted device: {}", device.address);

            let attempt =
                tokio::time::timeout(CONNECT_TIMEOUT, manager.connect_to_device(&device)).await;
            tokio::time::sleep(SETTLE_DELAY).await;

            if attempt.is_ok() && manager.state().is_connected() {
                failed_attempts = 0;
            } else {
                failed_attempts = failed_attempts.saturating_add(1);
                debug!("Auto-reconnect attempt failed ({failed_attempts} consecutive)");
            }

            if failed_attempts >= MAX_FAILED_ATTEMPTS {
                warn!("Reached {MAX_FAILED_ATTEMPTS} consecutive failed attempts, backing off");
                manager
                    .publish_error("Device may be out of range. Reducing reconnection attempts.")
                    .await;
                tokio::time::sleep(PENALTY_DELAY).await;
                continue;
            }
        }

        tokio::time::sleep(backoff_delay(failed_attempts)).await;
    }
}
