// src/db/models.rs

//! Data models for sdkwatch database entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting records.

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Colors handed out to apps, picked by package name hash (ARGB)
const APP_COLORS: [u32; 12] = [
    0xFFE57373, 0xFFF06292, 0xFFBA68C8, 0xFF9575CD, 0xFF7986CB, 0xFF64B5F6,
    0xFF4FC3F7, 0xFF4DD0E1, 0xFF4DB6AC, 0xFF81C784, 0xFFFFB74D, 0xFFA1887F,
];

/// Derive a stable display color for a package
pub fn derive_color(package_name: &str) -> i64 {
    let digest = Sha256::digest(package_name.as_bytes());
    APP_COLORS[digest[0] as usize % APP_COLORS.len()] as i64
}

/// An App is the latest known metadata snapshot of one installed package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct App {
    pub package_name: String,
    pub title: String,
    pub background_color: i64,
    pub is_from_play_store: bool,
    pub is_system: bool,
}

impl App {
    /// Create a new App with its derived display color
    pub fn new(package_name: String, title: String) -> Self {
        let background_color = derive_color(&package_name);
        Self {
            package_name,
            title,
            background_color,
            is_from_play_store: false,
            is_system: false,
        }
    }

    /// Insert this app, or overwrite the existing row's metadata in place
    ///
    /// `INSERT OR REPLACE` would delete the old row first and cascade the
    /// delete into `versions`, so this uses an upsert instead.
    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO apps (package_name, title, background_color, is_from_play_store, is_system)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(package_name) DO UPDATE SET
                title = excluded.title,
                background_color = excluded.background_color,
                is_from_play_store = excluded.is_from_play_store,
                is_system = excluded.is_system",
            params![
                &self.package_name,
                &self.title,
                &self.background_color,
                &self.is_from_play_store,
                &self.is_system,
            ],
        )?;
        Ok(())
    }

    /// Find an app by package name
    pub fn find_by_name(conn: &Connection, package_name: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT package_name, title, background_color, is_from_play_store, is_system
             FROM apps WHERE package_name = ?1",
        )?;

        let app = stmt.query_row([package_name], Self::from_row).optional()?;

        Ok(app)
    }

    /// List all apps
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT package_name, title, background_color, is_from_play_store, is_system
             FROM apps ORDER BY title, package_name",
        )?;

        let apps = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(apps)
    }

    /// Delete an app by package name; its version history goes with it
    ///
    /// Returns true if a row was deleted.
    pub fn delete(conn: &Connection, package_name: &str) -> Result<bool> {
        let deleted = conn.execute("DELETE FROM apps WHERE package_name = ?1", [package_name])?;
        Ok(deleted > 0)
    }

    /// Convert a database row to an App
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            package_name: row.get(0)?,
            title: row.get(1)?,
            background_color: row.get(2)?,
            is_from_play_store: row.get(3)?,
            is_system: row.get(4)?,
        })
    }
}

/// One immutable snapshot of a package's version and target SDK
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    pub version_id: String,
    pub package_name: String,
    pub version_code: i64,
    pub version_name: String,
    pub target_sdk: i64,
    pub last_update_time: i64,
}

impl VersionRecord {
    /// Create a new VersionRecord, deriving its identifier from its content
    pub fn new(
        package_name: String,
        version_code: i64,
        version_name: String,
        target_sdk: i64,
        last_update_time: i64,
    ) -> Self {
        let version_id = Self::compute_id(&package_name, version_code, &version_name, target_sdk);
        Self {
            version_id,
            package_name,
            version_code,
            version_name,
            target_sdk,
            last_update_time,
        }
    }

    /// Content hash of the fields that make a version distinct
    ///
    /// `last_update_time` is not hashed, so reinstalling the same build
    /// maps to the existing record.
    pub fn compute_id(
        package_name: &str,
        version_code: i64,
        version_name: &str,
        target_sdk: i64,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(package_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(version_code.to_le_bytes());
        hasher.update([0u8]);
        hasher.update(version_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(target_sdk.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Insert this record unless an identical one already exists
    ///
    /// Returns true if a new row was written.
    pub fn insert_ignore(&self, conn: &Connection) -> Result<bool> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO versions
                (version_id, version, package_name, version_name, last_update_time, target_sdk)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &self.version_id,
                &self.version_code,
                &self.package_name,
                &self.version_name,
                &self.last_update_time,
                &self.target_sdk,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// All records of a package, newest version first
    pub fn find_by_package(conn: &Connection, package_name: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT version_id, package_name, version, version_name, target_sdk, last_update_time
             FROM versions WHERE package_name = ?1
             ORDER BY version DESC, last_update_time DESC",
        )?;

        let records = stmt
            .query_map([package_name], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// The most recent record of a package (highest version code)
    pub fn latest_for_package(conn: &Connection, package_name: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT version_id, package_name, version, version_name, target_sdk, last_update_time
             FROM versions WHERE package_name = ?1
             ORDER BY version DESC, last_update_time DESC LIMIT 1",
        )?;

        let record = stmt.query_row([package_name], Self::from_row).optional()?;

        Ok(record)
    }

    /// Number of records stored for a package
    pub fn count_for_package(conn: &Connection, package_name: &str) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM versions WHERE package_name = ?1",
            [package_name],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Convert a database row to a VersionRecord
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            version_id: row.get(0)?,
            package_name: row.get(1)?,
            version_code: row.get(2)?,
            version_name: row.get(3)?,
            target_sdk: row.get(4)?,
            last_update_time: row.get(5)?,
        })
    }
}
