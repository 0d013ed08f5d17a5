// src/main.rs

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use sdkwatch::db::models::App;
use sdkwatch::prefs::{PrefKey, Preferences};
use sdkwatch::query::{self, LiveQuery, QueryState, ViewOptions};
use sdkwatch::scheduler::{Scheduler, WorkResult, format_interval};
use sdkwatch::source::{AdbSource, DumpsysSource, PackageSource, SnapshotSource};
use sdkwatch::sync::{self, SyncOptions, SyncReport};
use sdkwatch::Store;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc;
use tracing::info;

#[derive(Parser)]
#[command(name = "sdkwatch")]
#[command(author, version, about = "Track target SDK and version changes of installed Android apps", long_about = None)]
struct Cli {
    /// Database path (default: <data dir>/sdkwatch/sdkwatch.db)
    #[arg(short, long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Where package metadata is read from
#[derive(Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// JSON snapshot file (array of package objects)
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,
    /// Captured `dumpsys package packages` output
    #[arg(long, value_name = "PATH")]
    dumpsys: Option<PathBuf>,
    /// Query a connected device through adb
    #[arg(long)]
    adb: bool,
}

impl SourceArgs {
    fn build(&self, serial: Option<String>) -> Box<dyn PackageSource> {
        if let Some(path) = &self.snapshot {
            Box::new(SnapshotSource::new(path))
        } else if let Some(path) = &self.dumpsys {
            Box::new(DumpsysSource::from_path(path))
        } else {
            Box::new(AdbSource::new(serial))
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the sdkwatch database
    Init,
    /// Record the current version of every installed package
    Sync {
        #[command(flatten)]
        source: SourceArgs,
        /// Device serial when several are connected (with --adb)
        #[arg(short, long, requires = "adb")]
        serial: Option<String>,
        /// Forget packages that are no longer installed
        #[arg(long)]
        prune: bool,
        /// Print the sync report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List apps with their latest target SDK
    Apps {
        /// Include system apps (overrides the show_system_apps preference)
        #[arg(short, long)]
        all: bool,
        /// Sort by target SDK (overrides the order_by_sdk preference)
        #[arg(long)]
        by_sdk: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show the recorded versions of one app
    History {
        /// Package name
        package_name: String,
        #[arg(long)]
        json: bool,
    },
    /// Show version and target SDK changes, newest first
    Changes {
        /// Include system apps (overrides the show_system_apps preference)
        #[arg(short, long)]
        all: bool,
        /// Only show entries where the target SDK changed
        #[arg(long)]
        sdk_only: bool,
        #[arg(long)]
        json: bool,
    },
    /// Forget an app and its recorded history
    Remove {
        /// Package name
        package_name: String,
    },
    /// Read or change preferences
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Sync periodically, printing changes as they are detected
    Watch {
        #[command(flatten)]
        source: SourceArgs,
        /// Device serial when several are connected (with --adb)
        #[arg(short, long, requires = "adb")]
        serial: Option<String>,
        /// Forget packages that are no longer installed
        #[arg(long)]
        prune: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show every preference
    List,
    /// Show one preference
    Get { key: String },
    /// Change one preference
    Set { key: String, value: String },
    /// Restore one preference to its default
    Reset { key: String },
}

/// Default database location under the user's data directory
fn default_db_path() -> String {
    match dirs::data_dir() {
        Some(dir) => dir.join("sdkwatch").join("sdkwatch.db").display().to_string(),
        None => "sdkwatch.db".to_string(),
    }
}

/// Render epoch milliseconds as a UTC date, `-` when unknown
fn format_millis(millis: i64) -> String {
    if millis <= 0 {
        return "-".to_string();
    }
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_sync_report(report: &SyncReport) {
    println!("Synchronized {} package(s) from {}", report.seen, report.source);
    println!("  New versions: {}", report.new_versions);
    if !report.added.is_empty() {
        println!("  Added: {}", report.added.len());
    }
    for name in &report.updated {
        println!("  Updated: {}", name);
    }
    for name in &report.pruned {
        println!("  Pruned: {}", name);
    }
    for failure in &report.failed {
        println!("  Failed: {} ({})", failure.package_name, failure.error);
    }
}

fn print_change(entry: &query::ChangeLogEntry) {
    let sdk = if entry.sdk_changed() {
        format!("SDK {} -> {}", entry.old_target_sdk, entry.new_target_sdk)
    } else {
        format!("SDK {}", entry.new_target_sdk)
    };
    println!(
        "  [{}] {} ({}) {} -> {}, {}",
        format_millis(entry.last_update_time),
        entry.title,
        entry.package_name,
        entry.old_version_name,
        entry.new_version_name,
        sdk
    );
}

/// Entries whose newer version has not been seen yet, marking them seen
fn unseen_changes<'a>(
    known: &mut HashSet<String>,
    entries: &'a [query::ChangeLogEntry],
) -> Vec<&'a query::ChangeLogEntry> {
    entries
        .iter()
        .filter(|entry| known.insert(entry.new_version_id.clone()))
        .collect()
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = cli.db_path.unwrap_or_else(default_db_path);

    match cli.command {
        Some(Commands::Init) => {
            info!("Initializing sdkwatch database at: {}", db_path);
            sdkwatch::db::init(&db_path)?;
            println!("Database initialized successfully at: {}", db_path);
            Ok(())
        }
        Some(Commands::Sync {
            source,
            serial,
            prune,
            json,
        }) => {
            let mut store = Store::init(&db_path)?;
            let source = source.build(serial);
            let report = sync::sync(
                &mut store,
                source.as_ref(),
                SyncOptions {
                    prune_missing: prune,
                },
            )?;

            if json {
                print_json(&report)?;
            } else {
                print_sync_report(&report);
            }
            Ok(())
        }
        Some(Commands::Apps { all, by_sdk, json }) => {
            let store = Store::open(&db_path)?;
            let prefs = Preferences::load(store.conn())?;
            let mut options = ViewOptions::from(&prefs);
            options.show_system_apps |= all;
            options.order_by_sdk |= by_sdk;

            let apps = query::latest_versions(store.conn(), options)?;
            if json {
                return print_json(&apps);
            }

            if apps.is_empty() {
                println!("No apps recorded. Run 'sdkwatch sync' first.");
            } else {
                println!("Apps:");
                for summary in &apps {
                    print!(
                        "  {} ({}) SDK {} - {}",
                        summary.app.title,
                        summary.app.package_name,
                        summary.target_sdk,
                        if summary.version_name.is_empty() {
                            "?"
                        } else {
                            summary.version_name.as_str()
                        }
                    );
                    if summary.app.is_system {
                        print!(" [system]");
                    } else if summary.app.is_from_play_store {
                        print!(" [play]");
                    }
                    println!();
                }
                println!("\nTotal: {} app(s)", apps.len());
            }
            Ok(())
        }
        Some(Commands::History { package_name, json }) => {
            let store = Store::open(&db_path)?;
            let app = App::find_by_name(store.conn(), &package_name)?
                .ok_or_else(|| anyhow::anyhow!("Package '{}' is not recorded", package_name))?;

            let records = query::history(store.conn(), &package_name)?;
            if json {
                return print_json(&records);
            }

            println!("History of {} ({}):", app.title, app.package_name);
            for record in &records {
                println!(
                    "  [{}] {} (code {}) SDK {}",
                    format_millis(record.last_update_time),
                    record.version_name,
                    record.version_code,
                    record.target_sdk
                );
            }
            println!("\nTotal: {} version(s)", records.len());
            Ok(())
        }
        Some(Commands::Changes {
            all,
            sdk_only,
            json,
        }) => {
            let store = Store::open(&db_path)?;
            let prefs = Preferences::load(store.conn())?;
            let mut options = ViewOptions::from(&prefs);
            options.show_system_apps |= all;

            let mut entries = query::change_log(store.conn(), options)?;
            if sdk_only {
                entries.retain(|e| e.sdk_changed());
            }
            if json {
                return print_json(&entries);
            }

            if entries.is_empty() {
                println!("No changes recorded.");
            } else {
                println!("Changes:");
                for entry in &entries {
                    print_change(entry);
                }
                println!("\nTotal: {} change(s)", entries.len());
            }
            Ok(())
        }
        Some(Commands::Remove { package_name }) => {
            let store = Store::open(&db_path)?;
            let count = sdkwatch::db::models::VersionRecord::count_for_package(store.conn(), &package_name)?;
            let removed = store.write(|conn| App::delete(conn, &package_name))?;

            if !removed {
                return Err(anyhow::anyhow!("Package '{}' is not recorded", package_name));
            }
            println!("Removed {} ({} version record(s))", package_name, count);
            Ok(())
        }
        Some(Commands::Config { command }) => {
            let store = Store::init(&db_path)?;
            match command {
                ConfigCommands::List => {
                    let prefs = Preferences::load(store.conn())?;
                    for key in PrefKey::ALL {
                        println!("{} = {}", key, prefs.get(key));
                    }
                }
                ConfigCommands::Get { key } => {
                    let key: PrefKey = key.parse()?;
                    println!("{}", Preferences::load(store.conn())?.get(key));
                }
                ConfigCommands::Set { key, value } => {
                    let key: PrefKey = key.parse()?;
                    let prefs = Preferences::set(&store, key, &value)?;
                    println!("{} = {}", key, prefs.get(key));
                    if key == PrefKey::SyncInterval {
                        println!("Effective interval: {}", format_interval(prefs.sync_interval()));
                    }
                }
                ConfigCommands::Reset { key } => {
                    let key: PrefKey = key.parse()?;
                    Preferences::reset(&store, key)?;
                    println!("{} = {}", key, Preferences::load(store.conn())?.get(key));
                }
            }
            Ok(())
        }
        Some(Commands::Watch {
            source,
            serial,
            prune,
        }) => {
            let mut store = Store::init(&db_path)?;
            let source = source.build(serial);
            let prefs = Preferences::load(store.conn())?;

            let mut changes = LiveQuery::change_log(&store, ViewOptions::from(&prefs));
            let mut known: HashSet<String> = HashSet::new();
            if let QueryState::Success(entries) = changes.refresh(&store) {
                unseen_changes(&mut known, entries);
            }

            // Held for the life of the process; the loop ends on Ctrl-C
            let (_shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
            let scheduler = Scheduler::new(
                source.as_ref(),
                SyncOptions {
                    prune_missing: prune,
                },
            );

            println!("Watching {} (Ctrl-C to stop)", source.name());
            scheduler.run(&mut store, &shutdown_rx, |store, result| {
                match result {
                    WorkResult::Skipped => println!("Background sync is disabled"),
                    WorkResult::Failure(e) => println!("Sync failed: {}", e),
                    WorkResult::Success(report) => {
                        println!(
                            "Synchronized {} package(s), {} new version(s)",
                            report.seen, report.new_versions
                        );
                    }
                }

                match changes.poll(store) {
                    Some(QueryState::Success(entries)) => {
                        for entry in unseen_changes(&mut known, entries) {
                            print_change(entry);
                        }
                    }
                    Some(QueryState::Error(e)) => println!("Change log unavailable: {}", e),
                    _ => {}
                }
            })?;
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "sdkwatch", &mut std::io::stdout());
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("sdkwatch v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'sdkwatch --help' for usage information");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sync_requires_exactly_one_source() {
        assert!(Cli::try_parse_from(["sdkwatch", "sync"]).is_err());
        assert!(
            Cli::try_parse_from(["sdkwatch", "sync", "--adb", "--snapshot", "x.json"]).is_err()
        );
        assert!(Cli::try_parse_from(["sdkwatch", "sync", "--snapshot", "x.json"]).is_ok());
    }

    #[test]
    fn test_serial_requires_adb() {
        assert!(
            Cli::try_parse_from(["sdkwatch", "sync", "--snapshot", "x.json", "--serial", "abc"])
                .is_err()
        );
        assert!(Cli::try_parse_from(["sdkwatch", "sync", "--adb", "--serial", "abc"]).is_ok());
    }

    fn change(version_name: &str, target_sdk: i64, version_id: &str) -> query::ChangeLogEntry {
        query::ChangeLogEntry {
            package_name: "com.a".to_string(),
            title: "A".to_string(),
            old_target_sdk: 31,
            new_target_sdk: target_sdk,
            old_version_name: "1.0".to_string(),
            new_version_name: version_name.to_string(),
            old_version_code: 10,
            new_version_code: 10,
            last_update_time: 0,
            new_version_id: version_id.to_string(),
        }
    }

    #[test]
    fn test_unseen_changes_keys_on_version_record() {
        let mut known = HashSet::new();
        let first = vec![change("1.0", 33, "v2")];
        assert_eq!(unseen_changes(&mut known, &first).len(), 1);

        // Same version code, different version name
        let second = vec![change("1.0-hotfix", 33, "v3"), change("1.0", 33, "v2")];
        let fresh = unseen_changes(&mut known, &second);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].new_version_name, "1.0-hotfix");

        assert!(unseen_changes(&mut known, &second).is_empty());
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "-");
        assert_eq!(format_millis(1_709_296_200_000), "2024-03-01 12:30");
    }

    #[test]
    fn test_default_db_path_names_database() {
        assert!(default_db_path().ends_with("sdkwatch.db"));
    }
}
