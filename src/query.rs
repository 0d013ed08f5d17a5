// src/query.rs

//! Read-side views over the stored history
//!
//! - [`latest_versions`]: every app with its most recent version
//! - [`change_log`]: version transitions, newest first
//! - [`history`]: all versions of one app
//!
//! [`LiveQuery`] re-runs one of these whenever the store reports a change
//! to a table the view reads from.

use crate::db::models::{App, VersionRecord};
use crate::db::{Store, StoreEvent, Table};
use crate::error::Result;
use crate::prefs::Preferences;
use rusqlite::{Connection, Row, params};
use serde::Serialize;
use std::sync::mpsc::{Receiver, TryRecvError};

/// Filtering and ordering applied to list views
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewOptions {
    pub show_system_apps: bool,
    pub order_by_sdk: bool,
}

impl From<&Preferences> for ViewOptions {
    fn from(prefs: &Preferences) -> Self {
        Self {
            show_system_apps: prefs.show_system_apps,
            order_by_sdk: prefs.order_by_sdk,
        }
    }
}

/// An app together with its latest recorded version
///
/// Apps without any version record report version 0, an empty version
/// name and target SDK 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppSummary {
    #[serde(flatten)]
    pub app: App,
    pub version_code: i64,
    pub version_name: String,
    pub target_sdk: i64,
    pub last_update_time: i64,
}

impl AppSummary {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            app: App::from_row(row)?,
            version_code: row.get(5)?,
            version_name: row.get(6)?,
            target_sdk: row.get(7)?,
            last_update_time: row.get(8)?,
        })
    }
}

/// One version transition of a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeLogEntry {
    pub package_name: String,
    pub title: String,
    pub old_target_sdk: i64,
    pub new_target_sdk: i64,
    pub old_version_name: String,
    pub new_version_name: String,
    pub old_version_code: i64,
    pub new_version_code: i64,
    /// When the newer version was installed (epoch millis)
    pub last_update_time: i64,
    /// Identifier of the newer version record
    pub new_version_id: String,
}

impl ChangeLogEntry {
    pub fn sdk_changed(&self) -> bool {
        self.old_target_sdk != self.new_target_sdk
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            package_name: row.get(0)?,
            title: row.get(1)?,
            old_target_sdk: row.get(2)?,
            new_target_sdk: row.get(3)?,
            old_version_name: row.get(4)?,
            new_version_name: row.get(5)?,
            old_version_code: row.get(6)?,
            new_version_code: row.get(7)?,
            last_update_time: row.get(8)?,
            new_version_id: row.get(9)?,
        })
    }
}

/// Every app joined with its latest version record
pub fn latest_versions(conn: &Connection, options: ViewOptions) -> Result<Vec<AppSummary>> {
    let mut stmt = conn.prepare(
        "SELECT a.package_name, a.title, a.background_color, a.is_from_play_store, a.is_system,
                COALESCE(v.version, 0),
                COALESCE(v.version_name, ''),
                COALESCE(v.target_sdk, 0),
                COALESCE(v.last_update_time, 0)
         FROM apps a
         LEFT JOIN versions v ON v.version_id = (
             SELECT version_id FROM versions
             WHERE package_name = a.package_name
             ORDER BY version DESC, last_update_time DESC, version_id
             LIMIT 1
         )
         WHERE ?1 OR a.is_system = 0
         ORDER BY CASE WHEN ?2 THEN COALESCE(v.target_sdk, 0) END,
                  a.title COLLATE NOCASE,
                  a.package_name",
    )?;

    let apps = stmt
        .query_map(
            params![options.show_system_apps, options.order_by_sdk],
            AppSummary::from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(apps)
}

/// Version transitions, pairing each record with its predecessor
///
/// Records of a package are ordered by version code; every record that has
/// a predecessor yields one entry. Packages with a single record therefore
/// never appear. Entries are ordered by update time, newest first.
pub fn change_log(conn: &Connection, options: ViewOptions) -> Result<Vec<ChangeLogEntry>> {
    let mut stmt = conn.prepare(
        "WITH ordered AS (
             SELECT version_id, package_name, version, version_name, target_sdk, last_update_time,
                    LAG(target_sdk) OVER w AS old_target_sdk,
                    LAG(version_name) OVER w AS old_version_name,
                    LAG(version) OVER w AS old_version
             FROM versions
             WINDOW w AS (PARTITION BY package_name ORDER BY version, last_update_time, version_id)
         )
         SELECT o.package_name, a.title,
                o.old_target_sdk, o.target_sdk,
                o.old_version_name, o.version_name,
                o.old_version, o.version,
                o.last_update_time, o.version_id
         FROM ordered o
         JOIN apps a ON a.package_name = o.package_name
         WHERE o.old_version IS NOT NULL
           AND (?1 OR a.is_system = 0)
         ORDER BY o.last_update_time DESC, o.package_name, o.version DESC",
    )?;

    let entries = stmt
        .query_map(params![options.show_system_apps], ChangeLogEntry::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// All versions of one package, newest first
pub fn history(conn: &Connection, package_name: &str) -> Result<Vec<VersionRecord>> {
    VersionRecord::find_by_package(conn, package_name)
}

/// State of a view as presented to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState<T> {
    Loading,
    Empty,
    Success(T),
    Error(String),
}

impl<U> QueryState<Vec<U>> {
    /// Classify a query result
    pub fn from_rows(result: Result<Vec<U>>) -> Self {
        match result {
            Ok(rows) if rows.is_empty() => QueryState::Empty,
            Ok(rows) => QueryState::Success(rows),
            Err(e) => QueryState::Error(e.to_string()),
        }
    }
}

type QueryFn<T> = Box<dyn Fn(&Connection) -> Result<Vec<T>>>;

/// A view that re-derives itself when its tables change
pub struct LiveQuery<T> {
    tables: Vec<Table>,
    events: Receiver<StoreEvent>,
    query: QueryFn<T>,
    state: QueryState<Vec<T>>,
}

impl<T> LiveQuery<T> {
    /// Subscribe to `store` and watch `tables`
    ///
    /// The query starts out `Loading` until the first [`refresh`](Self::refresh).
    pub fn new<F>(store: &Store, tables: &[Table], query: F) -> Self
    where
        F: Fn(&Connection) -> Result<Vec<T>> + 'static,
    {
        Self {
            tables: tables.to_vec(),
            events: store.subscribe(),
            query: Box::new(query),
            state: QueryState::Loading,
        }
    }

    /// Re-run the query now
    pub fn refresh(&mut self, store: &Store) -> &QueryState<Vec<T>> {
        self.state = QueryState::from_rows((self.query)(store.conn()));
        &self.state
    }

    /// Re-run the query if a watched table changed since the last call
    ///
    /// Returns the new state when it was re-derived.
    pub fn poll(&mut self, store: &Store) -> Option<&QueryState<Vec<T>>> {
        let mut dirty = false;
        loop {
            match self.events.try_recv() {
                Ok(event) => dirty |= event.touches(&self.tables),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.state = QueryState::Error("Store subscription closed".to_string());
                    return Some(&self.state);
                }
            }
        }

        if dirty {
            Some(self.refresh(store))
        } else {
            None
        }
    }

    /// The most recently derived state
    pub fn state(&self) -> &QueryState<Vec<T>> {
        &self.state
    }
}

impl LiveQuery<AppSummary> {
    pub fn latest_versions(store: &Store, options: ViewOptions) -> Self {
        Self::new(store, &[Table::Apps, Table::Versions], move |conn| {
            latest_versions(conn, options)
        })
    }
}

impl LiveQuery<ChangeLogEntry> {
    pub fn change_log(store: &Store, options: ViewOptions) -> Self {
        Self::new(store, &[Table::Apps, Table::Versions], move |conn| {
            change_log(conn, options)
        })
    }
}

impl LiveQuery<VersionRecord> {
    pub fn history(store: &Store, package_name: &str) -> Self {
        let package_name = package_name.to_string();
        Self::new(store, &[Table::Versions], move |conn| history(conn, &package_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::PrefKey;

    fn add_app(store: &Store, name: &str, title: &str, is_system: bool) {
        store
            .write(|conn| {
                let mut app = App::new(name.to_string(), title.to_string());
                app.is_system = is_system;
                app.upsert(conn)
            })
            .unwrap();
    }

    fn add_version(store: &Store, name: &str, code: i64, sdk: i64, time: i64) {
        store
            .write(|conn| {
                VersionRecord::new(name.to_string(), code, format!("{}.0", code), sdk, time)
                    .insert_ignore(conn)
            })
            .unwrap();
    }

    #[test]
    fn test_latest_defaults_without_versions() {
        let store = Store::open_in_memory().unwrap();
        add_app(&store, "com.fresh", "Fresh", false);

        let apps = latest_versions(store.conn(), ViewOptions::default()).unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].target_sdk, 0);
        assert_eq!(apps[0].version_name, "");
        assert_eq!(apps[0].version_code, 0);
    }

    #[test]
    fn test_latest_picks_highest_version_code() {
        let store = Store::open_in_memory().unwrap();
        add_app(&store, "com.a", "A", false);
        add_version(&store, "com.a", 12, 34, 100);
        add_version(&store, "com.a", 10, 31, 500);

        let apps = latest_versions(store.conn(), ViewOptions::default()).unwrap();
        assert_eq!(apps[0].version_code, 12);
        assert_eq!(apps[0].target_sdk, 34);
        assert_eq!(apps[0].version_name, "12.0");
    }

    #[test]
    fn test_latest_filter_and_order() {
        let store = Store::open_in_memory().unwrap();
        add_app(&store, "com.b", "beta", false);
        add_app(&store, "com.a", "Alpha", false);
        add_app(&store, "android", "System", true);
        add_version(&store, "com.a", 1, 34, 0);
        add_version(&store, "com.b", 1, 28, 0);
        add_version(&store, "android", 1, 30, 0);

        let by_title = latest_versions(store.conn(), ViewOptions::default()).unwrap();
        let names: Vec<&str> = by_title.iter().map(|a| a.app.package_name.as_str()).collect();
        assert_eq!(names, vec!["com.a", "com.b"]);

        let by_sdk = latest_versions(
            store.conn(),
            ViewOptions {
                show_system_apps: true,
                order_by_sdk: true,
            },
        )
        .unwrap();
        let sdks: Vec<i64> = by_sdk.iter().map(|a| a.target_sdk).collect();
        assert_eq!(sdks, vec![28, 30, 34]);
    }

    #[test]
    fn test_change_log_requires_two_versions() {
        let store = Store::open_in_memory().unwrap();
        add_app(&store, "com.once", "Once", false);
        add_version(&store, "com.once", 1, 30, 1000);

        assert!(change_log(store.conn(), ViewOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn test_change_log_pairs_with_predecessor() {
        let store = Store::open_in_memory().unwrap();
        add_app(&store, "com.a", "A", false);
        add_version(&store, "com.a", 10, 31, 1000);
        add_version(&store, "com.a", 11, 33, 2000);
        add_version(&store, "com.a", 12, 34, 3000);
        add_app(&store, "com.b", "B", false);
        add_version(&store, "com.b", 1, 29, 1500);
        add_version(&store, "com.b", 2, 29, 2500);

        let log = change_log(store.conn(), ViewOptions::default()).unwrap();
        let summary: Vec<(&str, i64, i64, i64)> = log
            .iter()
            .map(|e| (e.package_name.as_str(), e.new_version_code, e.old_target_sdk, e.new_target_sdk))
            .collect();
        assert_eq!(
            summary,
            vec![("com.a", 12, 33, 34), ("com.b", 2, 29, 29), ("com.a", 11, 31, 33)]
        );
        assert_eq!(log[0].old_version_name, "11.0");
        assert_eq!(log[0].new_version_name, "12.0");
        assert!(log[0].sdk_changed());
        assert!(!log[1].sdk_changed());
    }

    #[test]
    fn test_change_log_distinguishes_same_version_code() {
        let store = Store::open_in_memory().unwrap();
        add_app(&store, "com.a", "A", false);
        let records = [
            VersionRecord::new("com.a".to_string(), 10, "1.0".to_string(), 31, 1000),
            VersionRecord::new("com.a".to_string(), 10, "1.0".to_string(), 33, 2000),
            VersionRecord::new("com.a".to_string(), 10, "1.0-hotfix".to_string(), 33, 3000),
        ];
        for record in &records {
            store.write(|conn| record.insert_ignore(conn)).unwrap();
        }

        let log = change_log(store.conn(), ViewOptions::default()).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|e| e.new_version_code == 10));
        assert_eq!(log[0].new_version_id, records[2].version_id);
        assert_eq!(log[0].old_version_name, "1.0");
        assert_eq!(log[0].new_version_name, "1.0-hotfix");
        assert_eq!(log[1].new_version_id, records[1].version_id);
        assert!(log[1].sdk_changed());
    }

    #[test]
    fn test_change_log_hides_system_apps() {
        let store = Store::open_in_memory().unwrap();
        add_app(&store, "android", "System", true);
        add_version(&store, "android", 1, 30, 1000);
        add_version(&store, "android", 2, 31, 2000);

        assert!(change_log(store.conn(), ViewOptions::default()).unwrap().is_empty());
        let all = ViewOptions {
            show_system_apps: true,
            order_by_sdk: false,
        };
        assert_eq!(change_log(store.conn(), all).unwrap().len(), 1);
    }

    #[test]
    fn test_query_state_from_rows() {
        assert_eq!(QueryState::<Vec<i32>>::from_rows(Ok(vec![])), QueryState::Empty);
        assert_eq!(QueryState::from_rows(Ok(vec![1])), QueryState::Success(vec![1]));
        let err: Result<Vec<i32>> = Err(crate::Error::NotFoundError("x".to_string()));
        assert!(matches!(QueryState::from_rows(err), QueryState::Error(_)));
    }

    #[test]
    fn test_live_query_rederives_on_change() {
        let store = Store::open_in_memory().unwrap();
        let mut live = LiveQuery::latest_versions(&store, ViewOptions::default());
        assert_eq!(live.state(), &QueryState::Loading);
        assert_eq!(live.refresh(&store), &QueryState::Empty);
        assert!(live.poll(&store).is_none());

        add_app(&store, "com.a", "A", false);
        match live.poll(&store) {
            Some(QueryState::Success(apps)) => assert_eq!(apps.len(), 1),
            other => panic!("unexpected state: {:?}", other),
        }
        assert!(live.poll(&store).is_none());
    }

    #[test]
    fn test_live_query_ignores_unrelated_tables() {
        let store = Store::open_in_memory().unwrap();
        let mut live = LiveQuery::change_log(&store, ViewOptions::default());
        live.refresh(&store);

        crate::prefs::Preferences::set(&store, PrefKey::LightMode, "true").unwrap();
        assert!(live.poll(&store).is_none());
    }

    #[test]
    fn test_live_history() {
        let store = Store::open_in_memory().unwrap();
        add_app(&store, "com.a", "A", false);
        let mut live = LiveQuery::history(&store, "com.a");
        live.refresh(&store);

        add_version(&store, "com.a", 1, 30, 0);
        add_version(&store, "com.a", 2, 31, 0);
        match live.poll(&store) {
            Some(QueryState::Success(records)) => {
                let codes: Vec<i64> = records.iter().map(|r| r.version_code).collect();
                assert_eq!(codes, vec![2, 1]);
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }
}
