//! tlx: feed JSON-lines telemetry records through the transmission
//! pipeline and inspect its state.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use tlx_common::TelemetryRecord;
use tlx_config::{load_config, ConfigError, LoadedConfig};
use tlx_core::channel::{ChannelError, TelemetryChannel};
use tlx_core::exit_codes::ExitCode;
use tlx_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use tlx_store::DiskStore;
use tracing::{debug, warn};

/// Buffered, retrying telemetry exporter
#[derive(Parser)]
#[command(name = "tlx")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send JSON-lines records from a file or stdin
    Send(SendArgs),

    /// Inspect the overflow store
    Store(StoreArgs),

    /// Configuration management
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Input file (stdin when omitted)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Seconds to wait for in-flight sends at end of input
    #[arg(long, default_value_t = 10)]
    stop_timeout_secs: u64,
}

#[derive(Args, Debug)]
struct StoreArgs {
    #[command(subcommand)]
    command: StoreCommands,
}

#[derive(Subcommand, Debug)]
enum StoreCommands {
    /// Print entry count, bytes used and capacity
    Status,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the resolved configuration
    Show,
}

/// One input line. `time` defaults to now.
#[derive(Debug, Deserialize)]
struct InputRecord {
    name: String,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    properties: BTreeMap<String, Value>,
}

impl From<InputRecord> for TelemetryRecord {
    fn from(input: InputRecord) -> Self {
        let time = input.time.unwrap_or_else(Utc::now);
        input
            .properties
            .into_iter()
            .fold(TelemetryRecord::at(input.name, time), |record, (key, value)| {
                record.with_property(key, value)
            })
    }
}

fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env(cli.global.log_level, cli.global.log_format);
    init_logging(&log_config);

    let exit_code = match &cli.command {
        Commands::Send(args) => run_send(&cli.global, args),
        Commands::Store(args) => match args.command {
            StoreCommands::Status => run_store_status(&cli.global),
        },
        Commands::Config(args) => match args.command {
            ConfigCommands::Show => run_config_show(&cli.global),
        },
    };

    std::process::exit(exit_code.as_i32());
}

fn load(global: &GlobalOpts) -> Result<LoadedConfig, ExitCode> {
    load_config(global.config.as_deref()).map_err(|e| output_config_error(&e))
}

fn run_send(global: &GlobalOpts, args: &SendArgs) -> ExitCode {
    let loaded = match load(global) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => match File::open(path) {
            Ok(file) => Box::new(BufReader::new(file)),
            Err(e) => {
                return output_error(
                    ExitCode::IoError,
                    &format!("cannot open {}: {}", path.display(), e),
                )
            }
        },
        None => Box::new(BufReader::new(io::stdin())),
    };

    let channel = match TelemetryChannel::<TelemetryRecord>::from_config(&loaded.config) {
        Ok(channel) => channel,
        Err(e) => return output_channel_error(&e),
    };

    let mut skipped = 0u64;
    let mut read_error = None;
    for (n, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                read_error = Some(e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<InputRecord>(&line) {
            Ok(input) => channel.send(input.into()),
            Err(e) => {
                skipped += 1;
                warn!(line = n + 1, error = %e, "skipping malformed record");
            }
        }
    }

    let settled = channel.stop(Duration::from_secs(args.stop_timeout_secs));
    let summary = serde_json::json!({
        "status": if read_error.is_some() { "error" } else { "ok" },
        "records": channel.records_sent(),
        "skipped": skipped,
        "settled": settled,
        "policy": channel.policy_state().label(),
        "store": channel.store_stats(),
    });
    print_json(&summary);

    match read_error {
        Some(e) => output_error(ExitCode::IoError, &format!("reading input failed: {e}")),
        None => ExitCode::Clean,
    }
}

fn run_store_status(global: &GlobalOpts) -> ExitCode {
    let loaded = match load(global) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    let config = &loaded.config;
    let dir = config.storage_dir();
    match DiskStore::open(&dir, config.storage_capacity_bytes()) {
        Ok(store) => {
            print_json(&serde_json::json!({
                "path": dir,
                "stats": store.stats(),
            }));
            ExitCode::Clean
        }
        Err(e) => output_error(
            ExitCode::IoError,
            &format!("cannot open store {}: {}", dir.display(), e),
        ),
    }
}

fn run_config_show(global: &GlobalOpts) -> ExitCode {
    let loaded = match load(global) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    debug!(source = %loaded.source, "configuration resolved");
    print_json(&serde_json::json!({
        "source": loaded.source.to_string(),
        "path": loaded.path,
        "storage_dir": loaded.config.storage_dir(),
        "config": loaded.config,
    }));
    ExitCode::Clean
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed to render output: {e}"),
    }
}

fn output_error(code: ExitCode, message: &str) -> ExitCode {
    let response = serde_json::json!({
        "status": "error",
        "error": {
            "code": code.code_name(),
            "message": message,
        }
    });
    match serde_json::to_string_pretty(&response) {
        Ok(text) => eprintln!("{text}"),
        Err(_) => eprintln!("error: {message}"),
    }
    code
}

fn output_config_error(error: &ConfigError) -> ExitCode {
    let exit_code = match error {
        ConfigError::Io { source, .. } if source.kind() != io::ErrorKind::NotFound => {
            ExitCode::IoError
        }
        _ => ExitCode::ArgsError,
    };
    output_error(exit_code, &error.to_string())
}

fn output_channel_error(error: &ChannelError) -> ExitCode {
    match error {
        ChannelError::Config(e) => output_config_error(e),
        ChannelError::Configuration(e) => output_error(ExitCode::ArgsError, &e.to_string()),
        ChannelError::Store(e) => output_error(ExitCode::IoError, &e.to_string()),
        ChannelError::Spawn(e) => output_error(ExitCode::InternalError, &e.to_string()),
    }
}
