// src/source/mod.rs

//! Package sources
//!
//! A package source enumerates the packages installed on a device and
//! reports their current version metadata. Each implementation adapts one
//! way of getting at that data:
//!
//! - [`SnapshotSource`]: a JSON file holding an array of package objects
//! - [`DumpsysSource`]: captured output of `dumpsys package packages`
//! - [`AdbSource`]: a live device, queried through `adb`

pub mod dumpsys;
pub mod snapshot;

pub use dumpsys::{AdbSource, DumpsysSource};
pub use snapshot::SnapshotSource;

use crate::db::models::{App, VersionRecord};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Installer package name of the Play Store
pub const PLAY_STORE_INSTALLER: &str = "com.android.vending";

/// Current metadata of one installed package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    pub package_name: String,
    #[serde(default)]
    pub title: Option<String>,
    pub version_code: i64,
    #[serde(default)]
    pub version_name: String,
    pub target_sdk: i64,
    /// Epoch milliseconds
    #[serde(default)]
    pub last_update_time: i64,
    #[serde(default)]
    pub is_system_app: bool,
    /// Installer package, when the platform reports one
    #[serde(default)]
    pub installer: Option<String>,
}

impl PackageInfo {
    /// Display title, falling back to the package name
    pub fn title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.package_name)
    }

    /// Whether the package was installed by the Play Store
    pub fn is_from_play_store(&self) -> bool {
        self.installer.as_deref() == Some(PLAY_STORE_INSTALLER)
    }

    /// Convert to the App row stored for this package
    pub fn to_app(&self) -> App {
        let mut app = App::new(self.package_name.clone(), self.title().to_string());
        app.is_from_play_store = self.is_from_play_store();
        app.is_system = self.is_system_app;
        app
    }

    /// Convert to the VersionRecord describing the current version
    pub fn to_version_record(&self) -> VersionRecord {
        VersionRecord::new(
            self.package_name.clone(),
            self.version_code,
            self.version_name.clone(),
            self.target_sdk,
            self.last_update_time,
        )
    }
}

/// Common interface for everything that can enumerate installed packages
pub trait PackageSource {
    /// Short human-readable name, used in logs
    fn name(&self) -> &str;

    /// List the identifiers of all installed packages
    ///
    /// An error here means the source as a whole is unavailable.
    fn list_packages(&self) -> Result<Vec<String>>;

    /// Read the current metadata of one package
    ///
    /// Only valid for identifiers returned by the latest `list_packages`.
    fn package_info(&self, package_name: &str) -> Result<PackageInfo>;
}
