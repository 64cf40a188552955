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

//! Device registry using SQLite.
//!
//! Holds the per-appliance state (on/off, run timer, display name) and the
//! single trusted device address.

use anyhow::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::bluetooth::codec::APPLIANCE_COUNT;

const TRUSTED_DEVICE_KEY: &str = "trusted_device_address";

/// Snapshot of one appliance row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplianceState {
    pub id: u8,
    pub is_on: bool,
    /// Wall-clock milliseconds when the appliance was switched on; 0 when
    /// it is not running.
    pub started_at: i64,
    /// `HH:MM:SS` run time shown by the UI.
    pub display_time: String,
    pub name: String,
}

/// Registry database manager.
#[derive(Clone)]
pub struct Registry {
    conn: Arc<Mutex<Connection>>,
}

impl Registry {
    /// Create or open the registry database.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("relaylink.db");
        info!("Opening device registry: {:?}", db_path);
        Self::init(Connection::open(&db_path)?)
    }

    /// In-memory registry for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS appliances (
                id INTEGER PRIMARY KEY,
                is_on INTEGER NOT NULL DEFAULT 0,
                started_at INTEGER NOT NULL DEFAULT 0,
                display_time TEXT NOT NULL DEFAULT '00:00:00',
                name TEXT
            );
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        // First-run seeding: every channel off, timer at zero. INSERT OR
        // IGNORE keeps existing rows across restarts.
        for id in 1..=APPLIANCE_COUNT {
            conn.execute(
                "INSERT OR IGNORE INTO appliances (id) VALUES (?1)",
                [id],
            )?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Saved trusted device address; empty string when none.
    pub fn trusted_device_address(&self) -> Result<String> {
        let conn = self.conn.lock();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [TRUSTED_DEVICE_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or_default())
    }

    /// Saves the trusted device address, replacing any previous one. An
    /// empty string clears it.
    pub fn set_trusted_device_address(&self, address: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![TRUSTED_DEVICE_KEY, address],
        )?;
        Ok(())
    }

    pub fn appliance_is_on(&self, id: u8) -> Result<bool> {
        let conn = self.conn.lock();
        let is_on: bool =
            conn.query_row("SELECT is_on FROM appliances WHERE id = ?1", [id], |row| {
                row.get(0)
            })?;
        Ok(is_on)
    }

    pub fn set_appliance_on(&self, id: u8, is_on: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE appliances SET is_on = ?2 WHERE id = ?1",
            params![id, is_on],
        )?;
        Ok(())
    }

    pub fn start_time(&self, id: u8) -> Result<i64> {
        let conn = self.conn.lock();
        let started_at: i64 = conn.query_row(
            "SELECT started_at FROM appliances WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(started_at)
    }

    pub fn set_start_time(&self, id: u8, started_at: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE appliances SET started_at = ?2 WHERE id = ?1",
            params![id, started_at],
        )?;
        Ok(())
    }

    pub fn display_time(&self, id: u8) -> Result<String> {
        let conn = self.conn.lock();
        let display_time: String = conn.query_row(
            "SELECT display_time FROM appliances WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(display_time)
    }

    pub fn set_display_time(&self, id: u8, display_time: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE appliances SET display_time = ?2 WHERE id = ?1",
            params![id, display_time],
        )?;
        Ok(())
    }

    /// Custom appliance name, or `default` when none was set.
    pub fn appliance_name(&self, id: u8, default: &str) -> Result<String> {
        let conn = self.conn.lock();
        let name: Option<String> =
            conn.query_row("SELECT name FROM appliances WHERE id = ?1", [id], |row| {
                row.get(0)
            })?;
        Ok(name.unwrap_or_else(|| default.to_string()))
    }

    pub fn set_appliance_name(&self, id: u8, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE appliances SET name = ?2 WHERE id = ?1",
            params![id, name],
        )?;
        Ok(())
    }

    /// Full snapshot of one appliance.
    pub fn appliance(&self, id: u8) -> Result<ApplianceState> {
        let conn = self.conn.lock();
        let state = conn.query_row(
            "SELECT id, is_on, started_at, display_time, name FROM appliances WHERE id = ?1",
            [id],
            |row| {
                Ok(ApplianceState {
                    id: row.get(0)?,
                    is_on: row.get(1)?,
                    started_at: row.get(2)?,
                    display_time: row.get(3)?,
                    name: row
                        .get::<_, Option<String>>(4)?
                        .unwrap_or_else(|| format!("Device {id}")),
                })
            },
        )?;
        Ok(state)
    }

    /// Applies an on/off state change, keeping the run-timer invariant:
    /// switching ON restarts the timer, switching OFF zeroes it.
    pub fn apply_report(&self, id: u8, is_on: bool, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock();
        if is_on {
            conn.execute(
                "UPDATE appliances
                 SET is_on = 1, started_at = ?2, display_time = '00:00:00'
                 WHERE id = ?1",
                params![id, now_ms],
            )?;
        } else {
            conn.execute(
                "UPDATE appliances SET is_on = 0, started_at = 0 WHERE id = ?1",
                [id],
            )?;
        }
        Ok(())
    }

    /// Gives a start time to appliances that are marked ON but have none,
    /// so their timers survive a process restart.
    pub fn resume_running_timers(&self, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE appliances SET started_at = ?1 WHERE is_on = 1 AND started_at = 0",
            [now_ms],
        )?;
        Ok(())
    }

    /// Recomputes the `HH:MM:SS` display string for every running appliance.
    pub fn refresh_display_times(&self, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, started_at FROM appliances WHERE is_on = 1 AND started_at > 0")?;
        let running: Vec<(u8, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);

        for (id, started_at) in running {
            let display = format_elapsed(now_ms - started_at);
            conn.execute(
                "UPDATE appliances SET display_time = ?2 WHERE id = ?1",
                params![id, display],
            )?;
        }
        Ok(())
    }
}

/// Formats elapsed milliseconds as `HH:MM:SS`.
pub fn format_elapsed(elapsed_ms: i64) -> String {
    let total_seconds = elapsed_ms.max(0) / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
