use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use logsweep::{
    cleaner::Cleaner,
    config::{AppConfig, FileConfigSource, PeriodType, RetentionSource, ScheduleSource},
    observability::{self, TracingGuard},
    retention::{PROGRESS_TIME_FORMAT, ProgressKind, ProgressReceiver, ProgressSink},
};

/// CLI arguments for logsweep
#[derive(Parser, Debug)]
#[command(version, about = "Scheduled log retention", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults to ./logsweep.toml, then
    /// ~/.config/logsweep/logsweep.toml, if either exists)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Delete expired log files now
    Run {
        #[command(flatten)]
        retention: RetentionArgs,
    },
    /// Start a recurring cleanup plan and run until interrupted
    Schedule {
        #[command(flatten)]
        retention: RetentionArgs,
        #[command(flatten)]
        schedule: ScheduleArgs,
    },
    /// Initialize a new configuration file
    Init {
        /// Path to create the config file (defaults to ~/.config/logsweep/logsweep.toml)
        #[arg(short, long)]
        output: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Validate the configuration and print the resolved settings
    Check {
        #[command(flatten)]
        retention: RetentionArgs,
        #[command(flatten)]
        schedule: ScheduleArgs,
    },
}

#[derive(clap::Args, Debug)]
struct RetentionArgs {
    /// Base directory holding one subdirectory per site
    #[arg(long)]
    path: Option<String>,
    /// Delete files last modified more than this many days ago
    #[arg(long)]
    expire_days: Option<String>,
}

#[derive(clap::Args, Debug)]
struct ScheduleArgs {
    /// daily, weekly or monthly
    #[arg(long)]
    period: Option<PeriodType>,
    /// Weekday for weekly plans (name or 0-6, Sunday = 0)
    #[arg(long)]
    weekday: Option<String>,
    /// Day of month for monthly plans (1-29)
    #[arg(long)]
    day: Option<u32>,
    /// Time of day, HH:MM with minutes in steps of 5
    #[arg(long)]
    at: Option<String>,
}

/// Commented default configuration written by `logsweep init`.
fn default_config_toml() -> &'static str {
    r#"# logsweep configuration

[retention]
# Directory with one subdirectory per site, e.g. W3SVC1, W3SVC2
# base_path = "/var/log/iis/LogFiles"
# Files last modified more than this many days ago are deleted
expire_days = 30

[schedule]
# daily, weekly or monthly
period = "daily"
# weekly only: name or index 0-6 with Sunday = 0
# weekday = "monday"
# monthly only: 1-29
# day = 1
# HH:MM, minutes in steps of 5
time = "03:10"

[observability.logging]
level = "info"
format = "compact"

[observability.logging.file]
enabled = true
directory = "logs"
rotation = "daily"
"#
}

/// Get the default config directory path.
fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("logsweep"))
}

/// Get the default config file path.
fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("logsweep.toml"))
}

/// Resolve the config path. `None` means no file is in use and built-in
/// defaults apply.
fn resolve_config_path(explicit_path: Option<&str>) -> Result<Option<PathBuf>, String> {
    if let Some(path) = explicit_path {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(format!("Config file not found: {}", path.display()));
        }
        return Ok(Some(path));
    }

    let cwd_config = PathBuf::from("logsweep.toml");
    if cwd_config.exists() {
        return Ok(Some(cwd_config));
    }

    if let Some(default_path) = default_config_path()
        && default_path.exists()
    {
        return Ok(Some(default_path));
    }

    Ok(None)
}

/// Load the config file, exiting with an error message on failure.
fn load_config(explicit_path: Option<&str>) -> (AppConfig, Option<PathBuf>) {
    let config_path = match resolve_config_path(explicit_path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let Some(path) = config_path else {
        return (AppConfig::default(), None);
    };

    match AppConfig::from_file(&path) {
        Ok(config) => (config, Some(path)),
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &AppConfig) -> TracingGuard {
    match observability::init_tracing(&config.observability) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Command::Run { retention } => {
            run_clean(args.config.as_deref(), retention).await;
        }
        Command::Schedule {
            retention,
            schedule,
        } => {
            run_schedule(args.config.as_deref(), retention, schedule).await;
        }
        Command::Init { output, force } => {
            run_init_default(output, force);
        }
        Command::Check {
            retention,
            schedule,
        } => {
            run_check(args.config.as_deref(), retention, schedule);
        }
    }
}

/// Print progress lines in the order they were emitted until every sink is gone.
async fn render_progress(mut receiver: ProgressReceiver) {
    while let Some(event) = receiver.recv().await {
        if matches!(event.kind, ProgressKind::Started { .. }) {
            println!();
        }
        println!("{}", event.render());
    }
}

/// Clean once and exit.
async fn run_clean(explicit_config_path: Option<&str>, args: RetentionArgs) {
    let (config, _) = load_config(explicit_config_path);

    let retention = match config
        .retention
        .with_overrides(args.path.as_deref(), args.expire_days.as_deref())
        .resolve()
    {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let tracing_guard = init_tracing(&config);

    let (sink, receiver) = ProgressSink::channel();
    let renderer = tokio::spawn(render_progress(receiver));
    let cleaner = Cleaner::new(sink);

    let outcome = match cleaner.clean_now(retention) {
        Ok(handle) => match handle.await {
            Ok(result) => {
                tracing::debug!(
                    succeeded = result.success_count,
                    failed = result.fail_count,
                    "Cleanup finished"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Cleanup task failed");
                Err(e.to_string())
            }
        },
        Err(e) => Err(e.to_string()),
    };

    drop(cleaner);
    if let Err(e) = renderer.await {
        tracing::error!(error = %e, "Progress renderer failed");
    }

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        drop(tracing_guard);
        std::process::exit(1);
    }
}

/// Arm the plan and run until Ctrl-C or SIGTERM.
async fn run_schedule(
    explicit_config_path: Option<&str>,
    retention: RetentionArgs,
    schedule: ScheduleArgs,
) {
    let (config, config_path) = load_config(explicit_config_path);

    let source = Arc::new(
        FileConfigSource::new(config_path)
            .with_overrides(retention.path, retention.expire_days)
            .with_schedule_overrides(schedule.period, schedule.weekday, schedule.day, schedule.at),
    );
    let checked = source
        .current_schedule()
        .and_then(|_| source.current())
        .and_then(|_| Ok(config.schedule.poll_interval()?));
    let poll_interval = match checked {
        Ok(poll_interval) => poll_interval,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let tracing_guard = init_tracing(&config);

    let (sink, receiver) = ProgressSink::channel();
    let renderer = tokio::spawn(render_progress(receiver));
    let cleaner = Cleaner::new(sink);

    let outcome = match cleaner.start_plan(source.clone(), poll_interval, source) {
        Ok(plan) => {
            println!(
                "plan started at {} ({})",
                plan.activated_at().format(PROGRESS_TIME_FORMAT),
                plan.schedule()
            );
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, waiting for the plan to stop...");
            plan.stop().await;
            Ok(())
        }
        Err(e) => Err(e),
    };

    drop(cleaner);
    if let Err(e) = renderer.await {
        tracing::error!(error = %e, "Progress renderer failed");
    }

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        drop(tracing_guard);
        std::process::exit(1);
    }
}

/// Print the resolved configuration.
fn run_check(explicit_config_path: Option<&str>, retention: RetentionArgs, schedule: ScheduleArgs) {
    let (config, config_path) = load_config(explicit_config_path);

    match &config_path {
        Some(path) => println!("config file:   {}", path.display()),
        None => println!("config file:   none, using defaults"),
    }

    let mut ok = true;

    match config
        .retention
        .with_overrides(retention.path.as_deref(), retention.expire_days.as_deref())
        .resolve()
    {
        Ok(r) => {
            println!("base path:     {}", r.base_path.display());
            println!("expire days:   {}", r.expire_days);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ok = false;
        }
    }

    let section = config.schedule.with_overrides(
        schedule.period,
        schedule.weekday.as_deref(),
        schedule.day,
        schedule.at.as_deref(),
    );
    match section.resolve() {
        Ok(s) => println!("schedule:      {}", s),
        Err(e) => {
            eprintln!("Error: {}", e);
            ok = false;
        }
    }
    match section.poll_interval() {
        Ok(p) => println!("poll interval: {}s", p.as_secs()),
        Err(e) => {
            eprintln!("Error: {}", e);
            ok = false;
        }
    }

    let file = &config.observability.logging.file;
    if file.enabled {
        println!(
            "log file:      {} ({:?})",
            file.directory.join(&file.prefix).display(),
            file.rotation
        );
    } else {
        println!("log file:      disabled");
    }

    if !ok {
        std::process::exit(1);
    }
}

/// Create a default configuration file.
fn run_init_default(output: Option<String>, force: bool) {
    let Some(output_path) = output.map(PathBuf::from).or_else(default_config_path) else {
        eprintln!("Could not determine default config path. Please specify one with --output.");
        std::process::exit(1);
    };

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(&output_path, default_config_toml()) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("Set [retention] base_path, then run:");
    println!("  logsweep check --config {}", output_path.display());
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
