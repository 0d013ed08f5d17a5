// src/db/schema.rs

//! Database schema definitions and migrations for sdkwatch
//!
//! This module defines the SQLite schema for the app, version history and
//! preference tables and provides a migration system to evolve the schema
//! over time.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        debug!("Schema is up to date");
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!(
        "Schema migration complete. Now at version {}",
        SCHEMA_VERSION
    );
    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(Error::InitError(format!(
            "Unknown migration version: {}",
            version
        ))),
    }
}

/// Initial schema - Version 1
///
/// - apps: one row per known package, overwritten on every sync
/// - versions: append-only version history, keyed by content hash
/// - preferences: key-value user settings
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE apps (
            package_name TEXT PRIMARY KEY NOT NULL,
            title TEXT NOT NULL,
            background_color INTEGER NOT NULL,
            is_from_play_store INTEGER NOT NULL DEFAULT 0,
            is_system INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX idx_apps_title ON apps(title);

        -- version_id is a hash of (package_name, version, version_name, target_sdk)
        CREATE TABLE versions (
            version_id TEXT PRIMARY KEY NOT NULL,
            version INTEGER NOT NULL,
            package_name TEXT NOT NULL,
            version_name TEXT NOT NULL,
            last_update_time INTEGER NOT NULL,
            target_sdk INTEGER NOT NULL,
            UNIQUE(package_name, version_id),
            FOREIGN KEY (package_name) REFERENCES apps(package_name) ON DELETE CASCADE
        );

        CREATE INDEX idx_versions_package ON versions(package_name, version);
        CREATE INDEX idx_versions_last_update ON versions(last_update_time);

        CREATE TABLE preferences (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        ",
    )?;

    info!("Schema version 1 created successfully");
    Ok(())
}
