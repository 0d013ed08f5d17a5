// src/source/snapshot.rs

//! JSON snapshot package source
//!
//! Reads a file containing a JSON array of package objects (see
//! [`PackageInfo`] for the field names). The file is re-read on every
//! `list_packages` call so a long-running scheduler picks up new snapshots.
//! Entries are decoded one at a time; a malformed entry only fails that
//! package.

use super::{PackageInfo, PackageSource};
use crate::error::{Error, Result};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Package source backed by a JSON snapshot file
pub struct SnapshotSource {
    path: PathBuf,
    label: String,
    entries: RefCell<BTreeMap<String, Value>>,
}

impl SnapshotSource {
    /// Create a source reading from `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let label = format!("snapshot:{}", path.display());
        Self {
            path,
            label,
            entries: RefCell::new(BTreeMap::new()),
        }
    }

    /// Split a snapshot document into per-package raw entries
    fn index(text: &str) -> Result<BTreeMap<String, Value>> {
        let document: Value = serde_json::from_str(text)?;
        let Value::Array(items) = document else {
            return Err(Error::SourceError(
                "Snapshot must be a JSON array of packages".to_string(),
            ));
        };

        let mut entries = BTreeMap::new();
        for (position, item) in items.into_iter().enumerate() {
            let Some(name) = item.get("packageName").and_then(Value::as_str) else {
                warn!("Snapshot entry {} has no packageName, skipping", position);
                continue;
            };
            let name = name.to_string();
            if entries.contains_key(&name) {
                warn!("Duplicate snapshot entry for {}, keeping the first", name);
                continue;
            }
            entries.insert(name, item);
        }
        Ok(entries)
    }
}

impl PackageSource for SnapshotSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn list_packages(&self) -> Result<Vec<String>> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::SourceError(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        let entries = Self::index(&text)?;
        debug!("Snapshot {} lists {} packages", self.path.display(), entries.len());

        let names = entries.keys().cloned().collect();
        *self.entries.borrow_mut() = entries;
        Ok(names)
    }

    fn package_info(&self, package_name: &str) -> Result<PackageInfo> {
        let entries = self.entries.borrow();
        let entry = entries
            .get(package_name)
            .ok_or_else(|| Error::NotFoundError(format!("Package {} not in snapshot", package_name)))?;

        let info: PackageInfo = serde_json::from_value(entry.clone()).map_err(|e| {
            Error::ParseError(format!("Invalid snapshot entry for {}: {}", package_name, e))
        })?;
        Ok(info)
    }
}
