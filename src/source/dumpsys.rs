// src/source/dumpsys.rs

//! `dumpsys package` parser and the sources built on it
//!
//! The package manager dump lists one block per package:
//!
//! ```text
//! Packages:
//!   Package [com.example.app] (4f2a1c9):
//!     versionCode=123 minSdk=24 targetSdk=34
//!     versionName=1.2.3
//!     lastUpdateTime=2024-03-01 12:30:00
//!     installerPackageName=com.android.vending
//!     pkgFlags=[ HAS_CODE ALLOW_CLEAR_USER_DATA ]
//! ```
//!
//! Only blocks under the `Packages:` section are read; the dump repeats
//! some packages under other sections (e.g. hidden system packages).

use super::{PackageInfo, PackageSource};
use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Keys whose value runs to the end of the line (may contain spaces)
const FULL_LINE_KEYS: [&str; 5] = [
    "versionName",
    "lastUpdateTime",
    "firstInstallTime",
    "timeStamp",
    "installerPackageName",
];

/// Timestamp layout used by the package manager dump
const DUMPSYS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Raw fields of one `Package [...]` block
#[derive(Debug, Clone, Default)]
struct DumpsysEntry {
    fields: HashMap<String, String>,
    flags: Vec<String>,
}

impl DumpsysEntry {
    fn record_line(&mut self, line: &str) {
        for prefix in ["pkgFlags=[", "flags=["] {
            if let Some(rest) = line.strip_prefix(prefix) {
                let inner = rest.split(']').next().unwrap_or_default();
                self.flags
                    .extend(inner.split_whitespace().map(|f| f.to_string()));
                return;
            }
        }

        if let Some((key, value)) = line.split_once('=') {
            if FULL_LINE_KEYS.contains(&key) {
                self.fields
                    .entry(key.to_string())
                    .or_insert_with(|| value.trim().to_string());
                return;
            }
        }

        for token in line.split_whitespace() {
            if let Some((key, value)) = token.split_once('=') {
                self.fields
                    .entry(key.to_string())
                    .or_insert_with(|| value.to_string());
            }
        }
    }

    fn required_int(&self, package_name: &str, key: &str) -> Result<i64> {
        let raw = self.fields.get(key).ok_or_else(|| {
            Error::ParseError(format!("{}: missing {}", package_name, key))
        })?;
        raw.parse().map_err(|_| {
            Error::ParseError(format!("{}: invalid {} '{}'", package_name, key, raw))
        })
    }

    fn to_info(&self, package_name: &str) -> Result<PackageInfo> {
        let version_code = self.required_int(package_name, "versionCode")?;
        let target_sdk = self.required_int(package_name, "targetSdk")?;

        let last_update_time = match self.fields.get("lastUpdateTime") {
            Some(raw) => parse_dumpsys_time(raw).map_err(|e| {
                Error::ParseError(format!("{}: {}", package_name, e))
            })?,
            None => 0,
        };

        let installer = self
            .fields
            .get("installerPackageName")
            .filter(|v| !v.is_empty() && v.as_str() != "null")
            .cloned();

        Ok(PackageInfo {
            package_name: package_name.to_string(),
            title: None,
            version_code,
            version_name: self.fields.get("versionName").cloned().unwrap_or_default(),
            target_sdk,
            last_update_time,
            is_system_app: self.flags.iter().any(|f| f == "SYSTEM"),
            installer,
        })
    }
}

/// Parse a dump timestamp as UTC epoch milliseconds
pub fn parse_dumpsys_time(raw: &str) -> Result<i64> {
    let parsed = NaiveDateTime::parse_from_str(raw.trim(), DUMPSYS_TIME_FORMAT)
        .map_err(|e| Error::ParseError(format!("invalid timestamp '{}': {}", raw, e)))?;
    Ok(parsed.and_utc().timestamp_millis())
}

/// Split a dump into its package blocks
fn parse_entries(text: &str) -> BTreeMap<String, DumpsysEntry> {
    let mut entries: BTreeMap<String, DumpsysEntry> = BTreeMap::new();
    let mut in_packages = true;
    let mut current: Option<(String, DumpsysEntry)> = None;

    let mut finish = |current: &mut Option<(String, DumpsysEntry)>| {
        if let Some((name, entry)) = current.take() {
            entries.entry(name).or_insert(entry);
        }
    };

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // Unindented "Something:" lines start a new section
        if !line.starts_with(char::is_whitespace) && trimmed.ends_with(':') {
            finish(&mut current);
            in_packages = trimmed == "Packages:";
            continue;
        }
        if !in_packages {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("Package [") {
            finish(&mut current);
            if let Some((name, _)) = rest.split_once(']') {
                current = Some((name.to_string(), DumpsysEntry::default()));
            }
            continue;
        }

        if let Some((_, entry)) = current.as_mut() {
            entry.record_line(trimmed);
        }
    }
    finish(&mut current);

    entries
}

fn lookup(entries: &BTreeMap<String, DumpsysEntry>, package_name: &str) -> Result<PackageInfo> {
    entries
        .get(package_name)
        .ok_or_else(|| Error::NotFoundError(format!("Package {} not in dump", package_name)))?
        .to_info(package_name)
}

/// Package source backed by captured `dumpsys package` output
pub struct DumpsysSource {
    label: String,
    path: Option<PathBuf>,
    entries: RefCell<BTreeMap<String, DumpsysEntry>>,
}

impl DumpsysSource {
    /// Parse dump text held in memory
    pub fn from_text(label: impl Into<String>, text: &str) -> Self {
        Self {
            label: label.into(),
            path: None,
            entries: RefCell::new(parse_entries(text)),
        }
    }

    /// Read the dump from a file; the file is re-read on every listing
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            label: format!("dumpsys:{}", path.display()),
            path: Some(path),
            entries: RefCell::new(BTreeMap::new()),
        }
    }
}

impl PackageSource for DumpsysSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn list_packages(&self) -> Result<Vec<String>> {
        if let Some(path) = &self.path {
            let text = std::fs::read_to_string(path).map_err(|e| {
                Error::SourceError(format!("Failed to read {}: {}", path.display(), e))
            })?;
            *self.entries.borrow_mut() = parse_entries(&text);
        }

        let entries = self.entries.borrow();
        debug!("{} lists {} packages", self.label, entries.len());
        Ok(entries.keys().cloned().collect())
    }

    fn package_info(&self, package_name: &str) -> Result<PackageInfo> {
        lookup(&self.entries.borrow(), package_name)
    }
}

/// Package source that queries a connected device through `adb`
pub struct AdbSource {
    label: String,
    serial: Option<String>,
    entries: RefCell<BTreeMap<String, DumpsysEntry>>,
}

impl AdbSource {
    /// Target the device with `serial`, or the only connected device
    pub fn new(serial: Option<String>) -> Self {
        let label = match &serial {
            Some(serial) => format!("adb:{}", serial),
            None => "adb".to_string(),
        };
        Self {
            label,
            serial,
            entries: RefCell::new(BTreeMap::new()),
        }
    }

    fn dump(&self) -> Result<String> {
        let mut command = Command::new("adb");
        if let Some(serial) = &self.serial {
            command.arg("-s").arg(serial);
        }
        command.args(["shell", "dumpsys", "package", "packages"]);

        info!("Querying packages from {}", self.label);
        let output = command
            .output()
            .map_err(|e| Error::SourceError(format!("Failed to run adb: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::SourceError(format!(
                "adb exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl PackageSource for AdbSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn list_packages(&self) -> Result<Vec<String>> {
        let entries = parse_entries(&self.dump()?);
        if entries.is_empty() {
            return Err(Error::SourceError(format!(
                "{} reported no packages",
                self.label
            )));
        }

        let names = entries.keys().cloned().collect();
        *self.entries.borrow_mut() = entries;
        Ok(names)
    }

    fn package_info(&self, package_name: &str) -> Result<PackageInfo> {
        lookup(&self.entries.borrow(), package_name)
    }
}
