// src/prefs.rs

//! User preferences
//!
//! Settings are stored as key-value rows in the `preferences` table. Reading
//! yields a full [`Preferences`] snapshot with defaults filled in; each
//! update writes exactly one key. Changes are announced through the store's
//! subscription mechanism under [`Table::Preferences`](crate::db::Table).

use crate::db::Store;
use crate::error::{Error, Result};
use rusqlite::{Connection, params};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// The scheduler never runs more often than this
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Default value of the sync-interval preference
pub const DEFAULT_SYNC_INTERVAL: &str = "1d";

/// Known preference keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefKey {
    LightMode,
    ShowSystemApps,
    BackgroundSync,
    OrderBySdk,
    SyncInterval,
}

impl PrefKey {
    pub const ALL: [PrefKey; 5] = [
        PrefKey::LightMode,
        PrefKey::ShowSystemApps,
        PrefKey::BackgroundSync,
        PrefKey::OrderBySdk,
        PrefKey::SyncInterval,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            PrefKey::LightMode => "light_mode",
            PrefKey::ShowSystemApps => "show_system_apps",
            PrefKey::BackgroundSync => "background_sync",
            PrefKey::OrderBySdk => "order_by_sdk",
            PrefKey::SyncInterval => "sync_interval",
        }
    }
}

impl fmt::Display for PrefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrefKey {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        PrefKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| Error::InvalidPreference(format!("Unknown preference key: {}", s)))
    }
}

/// Snapshot of all user preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preferences {
    pub light_mode: bool,
    pub show_system_apps: bool,
    pub background_sync: bool,
    pub order_by_sdk: bool,
    pub sync_interval: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            light_mode: false,
            show_system_apps: false,
            background_sync: true,
            order_by_sdk: false,
            sync_interval: DEFAULT_SYNC_INTERVAL.to_string(),
        }
    }
}

impl Preferences {
    /// Load the current snapshot, using defaults for unset keys
    ///
    /// Stored values that no longer parse fall back to their default.
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare("SELECT key, value FROM preferences")?;
        let stored = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;

        let mut prefs = Self::default();
        for (key, value) in &stored {
            let Ok(key) = key.parse::<PrefKey>() else {
                continue;
            };
            if let Err(e) = prefs.apply(key, value) {
                warn!("Ignoring invalid stored value for {}: {}", key, e);
            }
        }
        Ok(prefs)
    }

    /// Update a single key
    ///
    /// The value is validated against the key's type before anything is
    /// written; the write itself is one upsert statement.
    pub fn set(store: &Store, key: PrefKey, value: &str) -> Result<Self> {
        let mut prefs = Preferences::load(store.conn())?;
        prefs.apply(key, value)?;
        let normalized = prefs.get(key);

        store.write(|conn| {
            conn.execute(
                "INSERT INTO preferences (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
                params![key.as_str(), &normalized],
            )?;
            Ok(())
        })?;

        info!("Preference {} set to {}", key, normalized);
        Ok(prefs)
    }

    /// Remove a stored key so it reads back as its default
    pub fn reset(store: &Store, key: PrefKey) -> Result<()> {
        store.write(|conn| {
            conn.execute("DELETE FROM preferences WHERE key = ?1", [key.as_str()])?;
            Ok(())
        })
    }

    /// String form of one key's current value
    pub fn get(&self, key: PrefKey) -> String {
        match key {
            PrefKey::LightMode => self.light_mode.to_string(),
            PrefKey::ShowSystemApps => self.show_system_apps.to_string(),
            PrefKey::BackgroundSync => self.background_sync.to_string(),
            PrefKey::OrderBySdk => self.order_by_sdk.to_string(),
            PrefKey::SyncInterval => self.sync_interval.clone(),
        }
    }

    /// Effective interval between background syncs
    pub fn sync_interval(&self) -> Duration {
        parse_interval(&self.sync_interval)
            .or_else(|_| parse_interval(DEFAULT_SYNC_INTERVAL))
            .unwrap_or(MIN_SYNC_INTERVAL)
            .max(MIN_SYNC_INTERVAL)
    }

    fn apply(&mut self, key: PrefKey, value: &str) -> Result<()> {
        match key {
            PrefKey::LightMode => self.light_mode = parse_bool(value)?,
            PrefKey::ShowSystemApps => self.show_system_apps = parse_bool(value)?,
            PrefKey::BackgroundSync => self.background_sync = parse_bool(value)?,
            PrefKey::OrderBySdk => self.order_by_sdk = parse_bool(value)?,
            PrefKey::SyncInterval => {
                parse_interval(value)?;
                self.sync_interval = value.trim().to_string();
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" => Ok(false),
        other => Err(Error::InvalidPreference(format!(
            "Expected a boolean, got '{}'",
            other
        ))),
    }
}

/// Parse an interval such as `30`, `45m`, `6h` or `2d`
///
/// A bare number is read as minutes. The result is not clamped; see
/// [`Preferences::sync_interval`] for the effective value.
pub fn parse_interval(value: &str) -> Result<Duration> {
    let value = value.trim();
    let invalid = || Error::InvalidPreference(format!("Invalid sync interval: '{}'", value));

    let (number, unit_secs) = match value.chars().last() {
        Some('m') => (&value[..value.len() - 1], 60),
        Some('h') => (&value[..value.len() - 1], 60 * 60),
        Some('d') => (&value[..value.len() - 1], 24 * 60 * 60),
        Some(c) if c.is_ascii_digit() => (value, 60),
        _ => return Err(invalid()),
    };

    let amount: u64 = number.trim().parse().map_err(|_| invalid())?;
    if amount == 0 {
        return Err(invalid());
    }
    amount
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}
