// build.rs

use clap::{Arg, ArgAction, ArgGroup, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn source_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("snapshot")
            .long("snapshot")
            .value_name("PATH")
            .help("JSON snapshot file (array of package objects)"),
    )
    .arg(
        Arg::new("dumpsys")
            .long("dumpsys")
            .value_name("PATH")
            .help("Captured `dumpsys package packages` output"),
    )
    .arg(
        Arg::new("adb")
            .long("adb")
            .action(ArgAction::SetTrue)
            .help("Query a connected device through adb"),
    )
    .group(
        ArgGroup::new("source")
            .args(["snapshot", "dumpsys", "adb"])
            .required(true),
    )
    .arg(
        Arg::new("serial")
            .short('s')
            .long("serial")
            .requires("adb")
            .help("Device serial when several are connected (with --adb)"),
    )
    .arg(
        Arg::new("prune")
            .long("prune")
            .action(ArgAction::SetTrue)
            .help("Forget packages that are no longer installed"),
    )
}

fn json_flag() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Print JSON instead of text")
}

fn build_cli() -> Command {
    Command::new("sdkwatch")
        .version(env!("CARGO_PKG_VERSION"))
        .author("sdkwatch Contributors")
        .about("Track target SDK and version changes of installed Android apps")
        .subcommand_required(false)
        .arg(
            Arg::new("db_path")
                .short('d')
                .long("db-path")
                .value_name("PATH")
                .global(true)
                .help("Database path (default: <data dir>/sdkwatch/sdkwatch.db)"),
        )
        .subcommand(Command::new("init").about("Initialize the sdkwatch database"))
        .subcommand(
            source_args(
                Command::new("sync").about("Record the current version of every installed package"),
            )
            .arg(json_flag()),
        )
        .subcommand(
            Command::new("apps")
                .about("List apps with their latest target SDK")
                .arg(
                    Arg::new("all")
                        .short('a')
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Include system apps"),
                )
                .arg(
                    Arg::new("by_sdk")
                        .long("by-sdk")
                        .action(ArgAction::SetTrue)
                        .help("Sort by target SDK"),
                )
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("history")
                .about("Show the recorded versions of one app")
                .arg(Arg::new("package_name").required(true).help("Package name"))
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("changes")
                .about("Show version and target SDK changes, newest first")
                .arg(
                    Arg::new("all")
                        .short('a')
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Include system apps"),
                )
                .arg(
                    Arg::new("sdk_only")
                        .long("sdk-only")
                        .action(ArgAction::SetTrue)
                        .help("Only show entries where the target SDK changed"),
                )
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("remove")
                .about("Forget an app and its recorded history")
                .arg(Arg::new("package_name").required(true).help("Package name")),
        )
        .subcommand(
            Command::new("config")
                .about("Read or change preferences")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("Show every preference"))
                .subcommand(
                    Command::new("get")
                        .about("Show one preference")
                        .arg(Arg::new("key").required(true)),
                )
                .subcommand(
                    Command::new("set")
                        .about("Change one preference")
                        .arg(Arg::new("key").required(true))
                        .arg(Arg::new("value").required(true)),
                )
                .subcommand(
                    Command::new("reset")
                        .about("Restore one preference to its default")
                        .arg(Arg::new("key").required(true)),
                ),
        )
        .subcommand(source_args(
            Command::new("watch").about("Sync periodically, printing changes as they are detected"),
        ))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("sdkwatch.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
