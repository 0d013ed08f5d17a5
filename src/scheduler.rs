// src/scheduler.rs

//! Periodic background sync
//!
//! A thin trigger around [`sync`](crate::sync::sync): every tick it reads the
//! preferences, runs one sync if background sync is enabled, reports the
//! outcome, and waits for the configured interval. It does not retry a
//! failed run early; the next attempt happens on the next tick.

use crate::db::Store;
use crate::error::Result;
use crate::prefs::{MIN_SYNC_INTERVAL, Preferences};
use crate::source::PackageSource;
use crate::sync::{self, SyncOptions, SyncReport};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of one scheduled run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkResult {
    /// Background sync is disabled in the preferences
    Skipped,
    Success(SyncReport),
    /// The source could not be read at all
    Failure(String),
}

/// Runs syncs from one package source on the preference-driven interval
pub struct Scheduler<'a> {
    source: &'a dyn PackageSource,
    options: SyncOptions,
}

impl<'a> Scheduler<'a> {
    pub fn new(source: &'a dyn PackageSource, options: SyncOptions) -> Self {
        Self { source, options }
    }

    /// Run a single sync, honoring the background-sync preference
    pub fn run_once(&self, store: &mut Store) -> Result<WorkResult> {
        let prefs = Preferences::load(store.conn())?;
        if !prefs.background_sync {
            debug!("Background sync disabled, skipping run");
            return Ok(WorkResult::Skipped);
        }

        Ok(match sync::sync(store, self.source, self.options) {
            Ok(report) => WorkResult::Success(report),
            Err(e) => {
                error!("Scheduled sync from {} failed: {}", self.source.name(), e);
                WorkResult::Failure(e.to_string())
            }
        })
    }

    /// Loop until `shutdown` receives a message or its sender is dropped
    ///
    /// `on_result` is called after every run with the store and the run's
    /// result. Store errors are reported as [`WorkResult::Failure`] and the
    /// loop carries on. Returns the number of runs performed.
    pub fn run<F>(&self, store: &mut Store, shutdown: &Receiver<()>, mut on_result: F) -> Result<usize>
    where
        F: FnMut(&Store, &WorkResult),
    {
        let mut runs = 0;
        loop {
            let result = self.run_once(store).unwrap_or_else(|e| {
                error!("Scheduled run failed: {}", e);
                WorkResult::Failure(e.to_string())
            });
            runs += 1;
            on_result(store, &result);

            let interval = next_interval(store).unwrap_or_else(|e| {
                warn!("Cannot read sync interval, retrying in {}: {}", format_interval(MIN_SYNC_INTERVAL), e);
                MIN_SYNC_INTERVAL
            });
            info!("Next sync in {}", format_interval(interval));

            match shutdown.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    info!("Scheduler stopping after {} runs", runs);
                    return Ok(runs);
                }
            }
        }
    }
}

/// Interval until the next run, read fresh so preference changes apply
fn next_interval(store: &Store) -> Result<Duration> {
    Ok(Preferences::load(store.conn())?.sync_interval())
}

/// Render an interval the way the preference is written (`15m`, `6h`, `1d`)
pub fn format_interval(interval: Duration) -> String {
    let minutes = interval.as_secs() / 60;
    if minutes % (24 * 60) == 0 {
        format!("{}d", minutes / (24 * 60))
    } else if minutes % 60 == 0 {
        format!("{}h", minutes / 60)
    } else {
        format!("{}m", minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::prefs::PrefKey;
    use crate::source::PackageInfo;
    use std::sync::mpsc;

    struct OneAppSource {
        online: bool,
    }

    impl PackageSource for OneAppSource {
        fn name(&self) -> &str {
            "one-app"
        }

        fn list_packages(&self) -> Result<Vec<String>> {
            if self.online {
                Ok(vec!["com.a".to_string()])
            } else {
                Err(Error::SourceError("offline".to_string()))
            }
        }

        fn package_info(&self, package_name: &str) -> Result<PackageInfo> {
            Ok(PackageInfo {
                package_name: package_name.to_string(),
                title: None,
                version_code: 1,
                version_name: "1.0".to_string(),
                target_sdk: 33,
                last_update_time: 0,
                is_system_app: false,
                installer: None,
            })
        }
    }

    #[test]
    fn test_run_once_success() {
        let mut store = Store::open_in_memory().unwrap();
        let source = OneAppSource { online: true };
        let scheduler = Scheduler::new(&source, SyncOptions::default());

        match scheduler.run_once(&mut store).unwrap() {
            WorkResult::Success(report) => assert_eq!(report.new_versions, 1),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_run_once_failure() {
        let mut store = Store::open_in_memory().unwrap();
        let source = OneAppSource { online: false };
        let scheduler = Scheduler::new(&source, SyncOptions::default());

        assert!(matches!(
            scheduler.run_once(&mut store).unwrap(),
            WorkResult::Failure(_)
        ));
    }

    #[test]
    fn test_run_once_skipped_when_disabled() {
        let mut store = Store::open_in_memory().unwrap();
        Preferences::set(&store, PrefKey::BackgroundSync, "false").unwrap();
        let source = OneAppSource { online: true };
        let scheduler = Scheduler::new(&source, SyncOptions::default());

        assert_eq!(scheduler.run_once(&mut store).unwrap(), WorkResult::Skipped);
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let mut store = Store::open_in_memory().unwrap();
        let source = OneAppSource { online: true };
        let scheduler = Scheduler::new(&source, SyncOptions::default());

        let (tx, rx) = mpsc::channel();
        tx.send(()).unwrap();

        let mut seen = Vec::new();
        let runs = scheduler
            .run(&mut store, &rx, |_, result| seen.push(result.clone()))
            .unwrap();

        assert_eq!(runs, 1);
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], WorkResult::Success(_)));
    }

    #[test]
    fn test_run_stops_when_sender_dropped() {
        let mut store = Store::open_in_memory().unwrap();
        let source = OneAppSource { online: false };
        let scheduler = Scheduler::new(&source, SyncOptions::default());

        let (tx, rx) = mpsc::channel::<()>();
        drop(tx);

        let runs = scheduler.run(&mut store, &rx, |_, _| {}).unwrap();
        assert_eq!(runs, 1);
    }

    #[test]
    fn test_run_survives_store_errors() {
        let mut store = Store::open_in_memory().unwrap();
        store.conn().execute("DROP TABLE preferences", []).unwrap();
        let source = OneAppSource { online: true };
        let scheduler = Scheduler::new(&source, SyncOptions::default());

        let (tx, rx) = mpsc::channel();
        tx.send(()).unwrap();

        let mut seen = Vec::new();
        let runs = scheduler
            .run(&mut store, &rx, |_, result| seen.push(result.clone()))
            .unwrap();

        assert_eq!(runs, 1);
        assert!(matches!(seen[0], WorkResult::Failure(_)));
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(Duration::from_secs(15 * 60)), "15m");
        assert_eq!(format_interval(Duration::from_secs(6 * 3600)), "6h");
        assert_eq!(format_interval(Duration::from_secs(2 * 86400)), "2d");
        assert_eq!(format_interval(Duration::from_secs(90 * 60)), "90m");
    }
}
