//! Focustimer - crash-safe Pomodoro timer
//!
//! CLI entry point. Each invocation recovers persisted state, runs one
//! command, and shuts the timer down again; `run` and `resume` keep the
//! process alive until the session ends or is paused with Ctrl-C.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, bail};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use focustimer::cli::{Cli, Command, OutputFormat, format_clock};
use focustimer::{App, Config, ConfigProvider, EventKind, RecoveryOutcome, SessionKind, SessionSnapshot, TimerEvent, TimerState};
use sessionstore::StoreError;

fn setup_logging(log_dir: &Path, cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    fs::create_dir_all(log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level_str = cli_log_level.or(config_log_level);
    let level = match level_str.map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // Every command is a short-lived process; keep earlier runs
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("focustimer.log"))
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.to_string_lossy().into_owned();
    }

    setup_logging(
        &config.storage.log_dir(),
        cli.log_level.as_deref(),
        config.log_level.as_deref(),
    )
    .context("Failed to setup logging")?;

    let app = match App::start(&config).await {
        Ok(app) => app,
        Err(e) if is_locked(&e) => {
            bail!(
                "Another ft process is using {}. Control the session from there, or stop it first.",
                config.storage.data_dir
            );
        }
        Err(e) => return Err(e),
    };
    report_recovery(&app);

    debug!(command = ?cli.command, "main: dispatching command");
    let result = dispatch(&app, &config, cli.command).await;
    app.shutdown().await.context("Failed to shut down cleanly")?;
    result
}

fn is_locked(e: &eyre::Report) -> bool {
    e.chain()
        .any(|cause| matches!(cause.downcast_ref::<StoreError>(), Some(StoreError::Locked(_))))
}

async fn dispatch(app: &App, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Run { kind, minutes } => {
            debug!(%kind, ?minutes, "main: matched Run command");
            cmd_run(app, config, kind, minutes).await
        }
        Command::Resume => {
            debug!("main: matched Resume command");
            cmd_resume(app).await
        }
        Command::Pause => {
            debug!("main: matched Pause command");
            let snapshot = app.engine().pause().await?;
            if snapshot.state == TimerState::Paused {
                println!("{} at {}", "Paused".yellow(), progress(&snapshot));
            } else {
                println!("{} Session already complete", "✓".green().bold());
            }
            Ok(())
        }
        Command::Cancel => {
            debug!("main: matched Cancel command");
            let record = app.engine().cancel().await?;
            if record.completed {
                println!("{} {} session already complete", "✓".green().bold(), record.kind);
                return Ok(());
            }
            println!(
                "{} {} session after {}",
                "Cancelled".red(),
                record.kind,
                format_clock(record.accumulated_elapsed_ms)
            );
            Ok(())
        }
        Command::Interrupt => {
            debug!("main: matched Interrupt command");
            let snapshot = app.engine().record_interruption().await?;
            let count = snapshot.session.as_ref().map_or(0, |s| s.interruptions);
            println!("Interruptions this session: {}", count);
            Ok(())
        }
        Command::Status { format } => {
            debug!(?format, "main: matched Status command");
            cmd_status(app, format).await
        }
        Command::History { limit, format } => {
            debug!(limit, ?format, "main: matched History command");
            cmd_history(app, limit, format).await
        }
    }
}

/// Recovery notices go to stderr so JSON output stays parseable
fn report_recovery(app: &App) {
    let report = app.recovery();
    match report.outcome {
        RecoveryOutcome::CrashPaused => {
            if let Some(session) = &report.session {
                eprintln!(
                    "{} Your {} session stopped unexpectedly at {} of {}. It is paused.",
                    "!".yellow().bold(),
                    session.kind,
                    format_clock(session.accumulated_elapsed_ms),
                    format_clock(session.planned_duration_ms)
                );
                eprintln!("  Run `ft resume` to continue or `ft cancel` to discard it.");
            }
        }
        RecoveryOutcome::Completed => {
            if let Some(session) = &report.session {
                eprintln!("{} Your {} session finished while ft was not running.", "✓".green(), session.kind);
            }
        }
        RecoveryOutcome::CorruptDiscarded => {
            eprintln!("{} Stored session was unreadable and has been discarded.", "!".yellow().bold());
        }
        RecoveryOutcome::NothingToRecover | RecoveryOutcome::Resumed | RecoveryOutcome::ArchiveFinished => {}
    }
}

async fn cmd_run(app: &App, config: &Config, kind: SessionKind, minutes: Option<u64>) -> Result<()> {
    debug!(%kind, ?minutes, "cmd_run: called");
    let current = app.engine().snapshot().await?;
    if current.session.is_some() {
        bail!(
            "A session is already {}. Use `ft resume` or `ft cancel` first.",
            current.state
        );
    }

    let events = app.events().subscribe();
    let planned_ms = match minutes {
        Some(minutes) => minutes.saturating_mul(60_000),
        None => config.timer.planned_duration(kind),
    };
    let snapshot = app.engine().start(kind, planned_ms).await?;
    println!("{} {} session ({})", "Started".green().bold(), kind, format_clock(planned_ms));
    watch(app, snapshot, events).await
}

async fn cmd_resume(app: &App) -> Result<()> {
    debug!("cmd_resume: called");
    let events = app.events().subscribe();
    let current = app.engine().snapshot().await?;
    let snapshot = match current.state {
        TimerState::Paused => {
            let snapshot = app.engine().resume().await?;
            println!("{} at {}", "Resumed".green().bold(), progress(&snapshot));
            snapshot
        }
        TimerState::Running => {
            debug!("cmd_resume: session already running, attaching");
            current
        }
        state => bail!("Nothing to resume (timer is {})", state),
    };
    watch(app, snapshot, events).await
}

/// Count the session down until it completes or Ctrl-C pauses it
async fn watch(app: &App, mut snapshot: SessionSnapshot, mut events: broadcast::Receiver<TimerEvent>) -> Result<()> {
    debug!("watch: called");
    let Some(session_id) = snapshot.session.as_ref().map(|s| s.id.clone()) else {
        return Ok(());
    };
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                snapshot = app.engine().snapshot().await?;
                if snapshot.state != TimerState::Running {
                    println!();
                    println!("Session is {}", snapshot.state);
                    return Ok(());
                }
                print!("\r{} remaining ", format_clock(snapshot.remaining_ms));
                std::io::stdout().flush().ok();
            }

            event = events.recv() => match event {
                Ok(event) if event.session_id == session_id => match event.kind {
                    EventKind::Completed => {
                        println!();
                        println!("{} Session complete", "✓".green().bold());
                        return Ok(());
                    }
                    EventKind::Error(notice) => {
                        println!();
                        eprintln!("{} {}", "!".yellow().bold(), notice);
                    }
                    _ => {}
                },
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "watch: event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },

            _ = tokio::signal::ctrl_c() => {
                info!("watch: interrupted, pausing session");
                let snapshot = app.engine().pause().await?;
                println!();
                if snapshot.state == TimerState::Paused {
                    println!("{} at {}. Run `ft resume` to continue.", "Paused".yellow(), progress(&snapshot));
                } else {
                    println!("{} Session complete", "✓".green().bold());
                }
                return Ok(());
            }
        }
    }
}

async fn cmd_status(app: &App, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_status: called");
    let snapshot = app.engine().snapshot().await?;

    match format {
        OutputFormat::Json => {
            debug!("cmd_status: format is Json");
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        OutputFormat::Text => {
            debug!("cmd_status: format is Text");
            println!("Timer: {}", snapshot.state);
            if let Some(session) = &snapshot.session {
                println!("Session: {} ({})", session.id, session.kind);
                println!("Progress: {}", progress(&snapshot));
                if let Some(target) = snapshot.target_completion_time {
                    println!("Ends at: {}", target.with_timezone(&chrono::Local).format("%H:%M:%S"));
                }
                println!("Interruptions: {}", session.interruptions);
            }
            if snapshot.degraded {
                println!("{}", "Background scheduling unavailable; timing only while ft runs".yellow());
            }
            if snapshot.unpersisted {
                println!("{}", "Some changes are not yet saved".yellow());
            }
        }
    }

    Ok(())
}

async fn cmd_history(app: &App, limit: usize, format: OutputFormat) -> Result<()> {
    debug!(limit, ?format, "cmd_history: called");
    let history = app.engine().history().await?;
    let entries: Vec<_> = history.entries().iter().take(limit).collect();

    match format {
        OutputFormat::Json => {
            debug!("cmd_history: format is Json");
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Text => {
            debug!("cmd_history: format is Text");
            if entries.is_empty() {
                println!("No sessions yet.");
                return Ok(());
            }
            for record in entries {
                let outcome = if record.completed {
                    "completed".green()
                } else {
                    "cancelled".red()
                };
                println!(
                    "{}  {:<11}  {}  {} / {}",
                    record.start_time.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
                    record.kind.to_string(),
                    outcome,
                    format_clock(record.accumulated_elapsed_ms),
                    format_clock(record.planned_duration_ms)
                );
            }
        }
    }

    Ok(())
}

fn progress(snapshot: &SessionSnapshot) -> String {
    let planned = snapshot.session.as_ref().map_or(0, |s| s.planned_duration_ms);
    format!("{} of {}", format_clock(snapshot.elapsed_ms), format_clock(planned))
}

