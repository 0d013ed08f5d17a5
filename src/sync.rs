// src/sync.rs

//! Package synchronization
//!
//! Reconciles what a [`PackageSource`] reports with the stored history:
//! every listed package gets its App row refreshed and its current version
//! appended to `versions` if that exact version is not recorded yet.
//!
//! Each package is written in its own transaction. A package that cannot be
//! read or written is logged and skipped; only a source that cannot list
//! packages at all fails the sync.

use crate::db::Store;
use crate::db::models::{App, VersionRecord};
use crate::error::Result;
use crate::source::PackageSource;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Options for a sync run
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Delete apps (and their history) that the source no longer lists
    ///
    /// Never applied when the source lists no packages at all.
    pub prune_missing: bool,
}

/// A package that could not be synchronized
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub package_name: String,
    pub error: String,
}

/// Summary of one sync run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub source: String,
    /// Packages listed by the source
    pub seen: usize,
    /// Version records written
    pub new_versions: usize,
    /// Packages recorded for the first time
    pub added: Vec<String>,
    /// Known packages that gained a new version record
    pub updated: Vec<String>,
    pub failed: Vec<SyncFailure>,
    pub pruned: Vec<String>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackageOutcome {
    Unchanged,
    Added,
    Updated,
}

/// Synchronize the store with everything `source` lists
pub fn sync(store: &mut Store, source: &dyn PackageSource, options: SyncOptions) -> Result<SyncReport> {
    info!("Synchronizing packages from {}", source.name());

    let packages = source.list_packages()?;
    let mut report = SyncReport {
        source: source.name().to_string(),
        seen: packages.len(),
        ..SyncReport::default()
    };

    for package_name in &packages {
        match sync_package(store, source, package_name) {
            Ok(PackageOutcome::Unchanged) => {
                debug!("{} unchanged", package_name);
            }
            Ok(PackageOutcome::Added) => {
                debug!("{} recorded for the first time", package_name);
                report.new_versions += 1;
                report.added.push(package_name.clone());
            }
            Ok(PackageOutcome::Updated) => {
                info!("{} has a new version", package_name);
                report.new_versions += 1;
                report.updated.push(package_name.clone());
            }
            Err(e) => {
                warn!("Skipping {}: {}", package_name, e);
                report.failed.push(SyncFailure {
                    package_name: package_name.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    if options.prune_missing && packages.is_empty() {
        warn!(
            "{} listed no packages, refusing to prune the stored history",
            source.name()
        );
    } else if options.prune_missing {
        let listed: HashSet<&str> = packages.iter().map(String::as_str).collect();
        report.pruned = prune_missing(store, &listed)?;
    }

    info!(
        "Synchronized {} packages from {} ({} new versions, {} failed)",
        report.seen,
        report.source,
        report.new_versions,
        report.failed.len()
    );
    Ok(report)
}

/// Refresh one package's App row and append its version if new
fn sync_package(store: &mut Store, source: &dyn PackageSource, package_name: &str) -> Result<PackageOutcome> {
    let info = source.package_info(package_name)?;
    let app = info.to_app();
    let record = info.to_version_record();

    store.transaction(|tx| {
        let known_versions = VersionRecord::count_for_package(tx, &app.package_name)?;
        app.upsert(tx)?;
        let inserted = record.insert_ignore(tx)?;

        Ok(match (inserted, known_versions) {
            (false, _) => PackageOutcome::Unchanged,
            (true, 0) => PackageOutcome::Added,
            (true, _) => PackageOutcome::Updated,
        })
    })
}

/// Delete every app whose package name is not in `keep`
///
/// Returns the package names that were removed.
pub fn prune_missing(store: &mut Store, keep: &HashSet<&str>) -> Result<Vec<String>> {
    let stale: Vec<String> = App::list_all(store.conn())?
        .into_iter()
        .map(|app| app.package_name)
        .filter(|name| !keep.contains(name.as_str()))
        .collect();

    if stale.is_empty() {
        return Ok(stale);
    }

    store.transaction(|tx| {
        for name in &stale {
            App::delete(tx, name)?;
        }
        Ok(())
    })?;

    info!("Pruned {} packages no longer installed", stale.len());
    Ok(stale)
}
