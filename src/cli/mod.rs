//! CLI command handling
//!
//! Runs each command against a fresh application session and formats the
//! output.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use colored::Colorize;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::Receiver;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::connection::{ConnectionConfig, ConnectionStats, LogEntry, LogKind, ProtocolKind};
use crate::session::AppSession;
use crate::testing::{load_scenario, report};

/// Options shared by every command
pub struct CliContext {
    pub config: Config,
    /// Explicit `--config` path, if one was given
    pub config_path: Option<PathBuf>,
    pub verbose: bool,
}

/// Dispatch a CLI command
///
/// Returns whether the command succeeded; a scenario that ran but did not
/// pass is `Ok(false)`.
pub async fn dispatch(command: Commands, ctx: CliContext) -> Result<bool> {
    match command {
        Commands::Run {
            scenario,
            vars,
            json,
        } => {
            let mut doc = load_scenario(&scenario)?;
            doc.variables.extend(vars);

            let verbose = ctx.verbose;
            let session = AppSession::new(ctx.config);
            let runner = session.runner();
            let runner = if json {
                runner
            } else {
                report::print_header(&doc);
                runner.on_action(move |result| report::print_action(result, verbose))
            };

            let stop = runner.stop_handle();
            let interrupt = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Stopping after the current action...");
                    stop.stop();
                }
            });

            let result = runner.run(&doc).await;
            interrupt.abort();
            session.shutdown().await;
            let result = result?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                report::print_summary(&result, verbose);
            }
            Ok(result.is_passed())
        }

        Commands::Validate { scenario } => {
            let doc = load_scenario(&scenario)?;
            println!(
                "{} {} ({} action{})",
                "✓".green(),
                doc.name.bold(),
                doc.actions.len(),
                if doc.actions.len() == 1 { "" } else { "s" }
            );
            for (i, action) in doc.actions.iter().enumerate() {
                match &action.description {
                    Some(description) => {
                        println!("  {}. {} - {}", i + 1, action.kind.name(), description)
                    }
                    None => println!("  {}. {}", i + 1, action.kind.name()),
                }
            }
            Ok(true)
        }

        Commands::Watch {
            url,
            stomp,
            token,
            headers,
            subscriptions,
            send,
            destination,
            listen,
        } => {
            let protocol = if stomp {
                ProtocolKind::Framed
            } else {
                ProtocolKind::Raw
            };
            let mut config = ConnectionConfig::new(url, protocol)
                .with_headers(headers.into_iter().collect());
            if let Some(token) = token {
                config = config.with_token(token);
            }

            let session = AppSession::new(ctx.config);
            let mut events = session.log().subscribe();
            let outcome = watch(
                &session,
                &mut events,
                config,
                &subscriptions,
                send.as_deref(),
                destination.as_deref(),
                Duration::from_secs(listen),
            )
            .await;

            session.shutdown().await;
            drain(&mut events);
            print_stats(&session.stats());
            outcome.map(|()| true)
        }

        Commands::Config { init } => {
            let explicit = ctx.config_path.is_some();
            let path = ctx.config_path.or_else(Config::default_path);

            if init {
                let Some(path) = &path else {
                    return Err(Error::Config(
                        "Could not determine a configuration directory".to_string(),
                    ));
                };
                if path.exists() {
                    println!("Configuration already exists at {}", path.display());
                } else {
                    if !explicit {
                        paths::ensure_config_dir()?;
                    }
                    std::fs::write(path, Config::default().to_toml()?)?;
                    println!("Wrote default configuration to {}", path.display());
                }
                return Ok(true);
            }

            match &path {
                Some(path) if path.exists() => println!("# {}", path.display()),
                Some(path) => println!("# {} (not found, using defaults)", path.display()),
                None => println!("# no configuration directory, using defaults"),
            }
            print!("{}", ctx.config.to_toml()?);
            Ok(true)
        }
    }
}

/// Connect, subscribe, send, then print traffic for the listen window
async fn watch(
    session: &AppSession,
    events: &mut Receiver<LogEntry>,
    config: ConnectionConfig,
    subscriptions: &[String],
    send: Option<&str>,
    destination: Option<&str>,
    listen: Duration,
) -> Result<()> {
    let connection = session.connection();

    let connected = connection.connect(config).await;
    drain(events);
    connected?;

    for destination in subscriptions {
        connection.subscribe(destination)?;
    }
    if let Some(payload) = send {
        connection.send_message(payload, destination, &BTreeMap::new())?;
    }
    drain(events);

    let window = tokio::time::sleep(listen);
    tokio::pin!(window);
    loop {
        tokio::select! {
            _ = &mut window => break,
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(entry) => print_entry(&entry),
                Err(RecvError::Lagged(skipped)) => {
                    println!("{}", format!("... {} log entries skipped", skipped).dimmed())
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

/// Print whatever is already queued without waiting
fn drain(events: &mut Receiver<LogEntry>) {
    loop {
        match events.try_recv() {
            Ok(entry) => print_entry(&entry),
            Err(TryRecvError::Lagged(skipped)) => {
                println!("{}", format!("... {} log entries skipped", skipped).dimmed())
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

fn print_entry(entry: &LogEntry) {
    let time = entry.timestamp.format("%H:%M:%S%.3f").to_string();
    let kind = format!("{:<11}", entry.kind);
    let kind = match entry.kind {
        LogKind::Error => kind.red(),
        LogKind::Sent => kind.cyan(),
        LogKind::Message => kind.green(),
        LogKind::Subscribe | LogKind::Unsubscribe => kind.yellow(),
        LogKind::Info => kind.normal(),
    };

    let mut lines = entry.message.lines();
    println!("{} {} {}", time.dimmed(), kind, lines.next().unwrap_or_default());
    for line in lines {
        println!("{:>25} {}", "", line);
    }
}

fn print_stats(stats: &ConnectionStats) {
    println!("\n{}", "Statistics:".cyan());
    println!(
        "  Sent:     {} message(s), {} bytes",
        stats.messages_sent, stats.bytes_sent
    );
    println!(
        "  Received: {} message(s), {} bytes",
        stats.messages_received, stats.bytes_received
    );
    println!("  Errors:   {}", stats.errors);
    if stats.reconnect_attempts > 0 {
        println!("  Reconnects: {}", stats.reconnect_attempts);
    }
}
