//! CLI binary for upkeep.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use upkeep::scheduler::{Daemon, NagOutcome, StatusReport};
use upkeep::{RunCoordinator, RunOutcome, TriggerEvent, UpkeepConfig, upkeep_dirs};

/// Upkeep: throttled, idle-aware system maintenance.
#[derive(Parser)]
#[command(name = "upkeep", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the state record and lock files.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Run the timer, idle-poll and nag loops until interrupted.
    Daemon {
        /// Directory for the daily-rolling log file.
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Log to stderr only.
        #[arg(long)]
        no_file_log: bool,
    },

    /// Evaluate one trigger (scheduled, pre-suspend, idle-poll, manual).
    Trigger {
        /// The trigger event.
        event: TriggerEvent,
    },

    /// Run maintenance now if it is due (same as `trigger manual`).
    Run,

    /// Deliver the first-run or overdue notification if one is due.
    Nag,

    /// Show the maintenance state and what would happen next.
    Status {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Inspect or create the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default configuration.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let file_log_dir = match &cli.command {
        Command::Daemon {
            log_dir,
            no_file_log: false,
        } => Some(log_dir.clone().unwrap_or_else(upkeep_dirs::logs_dir)),
        _ => None,
    };
    let _log_guard = init_tracing(file_log_dir.as_deref())?;

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(UpkeepConfig::default_config_path);
    let state_dir = cli.state_dir.clone().unwrap_or_else(upkeep_dirs::state_dir);

    match cli.command {
        Command::Config { action } => config_command(action, &config_path),
        Command::Daemon { .. } => {
            let config = load_config(&config_path)?;
            let coordinator = Arc::new(RunCoordinator::from_config(&config, &state_dir));
            run_daemon(coordinator, &config).await
        }
        Command::Trigger { event } => match coordinator(&config_path, &state_dir) {
            Ok(coordinator) => run_trigger(&coordinator, event).await,
            Err(e) if event == TriggerEvent::PreSuspend => {
                error!(event = %event, "{e:#}");
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => Err(e),
        },
        Command::Run => {
            run_trigger(&coordinator(&config_path, &state_dir)?, TriggerEvent::Manual).await
        }
        Command::Nag => run_nag(&coordinator(&config_path, &state_dir)?).await,
        Command::Status { json } => print_status(&coordinator(&config_path, &state_dir)?, json),
    }
}

fn load_config(path: &Path) -> anyhow::Result<UpkeepConfig> {
    UpkeepConfig::load_or_default(path)
        .with_context(|| format!("cannot load config {}", path.display()))
}

fn coordinator(config_path: &Path, state_dir: &Path) -> anyhow::Result<RunCoordinator> {
    Ok(RunCoordinator::from_config(&load_config(config_path)?, state_dir))
}

/// Initialise tracing to stderr, plus a daily-rolling file under `log_dir`.
fn init_tracing(
    log_dir: Option<&Path>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("upkeep=info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(dir) = log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create log directory {}", dir.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "upkeep.log"));
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();
    Ok(Some(guard))
}

/// Token cancelled on Ctrl+C.
fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });
    cancel
}

async fn run_daemon(
    coordinator: Arc<RunCoordinator>,
    config: &UpkeepConfig,
) -> anyhow::Result<ExitCode> {
    let daemon = Daemon::new(coordinator, ctrl_c_token()).configured(config)?;
    daemon.run().await;
    Ok(ExitCode::SUCCESS)
}

async fn run_trigger(
    coordinator: &RunCoordinator,
    event: TriggerEvent,
) -> anyhow::Result<ExitCode> {
    let cancel = ctrl_c_token();
    let result = coordinator.handle_trigger(event, &cancel).await;

    // The sleep transition must never be held up by our exit status.
    if event == TriggerEvent::PreSuspend {
        match &result {
            Ok(outcome) => println!("{outcome}"),
            Err(e) => error!(event = %event, "trigger evaluation failed: {e}"),
        }
        return Ok(ExitCode::SUCCESS);
    }

    let outcome = result?;
    println!("{outcome}");
    Ok(match outcome {
        RunOutcome::Completed { .. } | RunOutcome::Skipped(_) => ExitCode::SUCCESS,
        RunOutcome::Failed(_) | RunOutcome::Incomplete | RunOutcome::Cancelled => ExitCode::FAILURE,
    })
}

async fn run_nag(coordinator: &RunCoordinator) -> anyhow::Result<ExitCode> {
    let outcome = coordinator.check_nag().await?;
    println!("{outcome}");
    Ok(match outcome {
        NagOutcome::Failed(_) => ExitCode::FAILURE,
        NagOutcome::Quiet | NagOutcome::Busy | NagOutcome::Delivered(_) => ExitCode::SUCCESS,
    })
}

fn print_status(coordinator: &RunCoordinator, json: bool) -> anyhow::Result<ExitCode> {
    let report = coordinator.status()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_status(&report));
    }
    Ok(ExitCode::SUCCESS)
}

fn render_status(report: &StatusReport) -> String {
    let stamp = |at: Option<chrono::DateTime<chrono::Utc>>| {
        at.map_or_else(|| "never".to_owned(), |at| at.to_rfc3339())
    };
    let next_due = if report.is_due {
        "now".to_owned()
    } else {
        stamp(report.next_due_at)
    };
    let overdue = report.overdue_for_secs.map_or_else(
        || "no".to_owned(),
        |secs| {
            upkeep::scheduler::nag::describe_duration(std::time::Duration::from_secs(secs))
        },
    );
    let pending = report
        .pending_notice
        .map_or_else(|| "none".to_owned(), |kind| kind.to_string());

    format!(
        "last run:          {}\n\
         next due:          {next_due}\n\
         overdue:           {overdue}\n\
         last reminder:     {}\n\
         first-run notice:  {}\n\
         pending notice:    {pending}\n",
        stamp(report.state.last_run_at),
        stamp(report.state.last_nag_at),
        if report.state.first_run_notice_shown {
            "shown"
        } else {
            "not shown"
        },
    )
}

fn config_command(action: ConfigAction, path: &Path) -> anyhow::Result<ExitCode> {
    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            UpkeepConfig::default().save_to_file(path)?;
            println!("wrote {}", path.display());
        }
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(&load_config(path)?)?);
        }
    }
    Ok(ExitCode::SUCCESS)
}
