//! Interactview - live viewer for interactsh interaction logs
//!
//! CLI entry point: serves the viewer or talks to a running one.

use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result, eyre};
use tokio::net::TcpListener;
use tracing::{debug, info};

use interactview::cache::EventCache;
use interactview::cli::{Cli, Command, OutputFormat, generate_after_help, get_log_path};
use interactview::client::{ApiClient, ControlResponse, base_url_from_bind};
use interactview::config::Config;
use interactview::event::CanonicalEvent;
use interactview::runtime;
use interactview::server::{AppState, ControlRequest, run_server};
use interactview::supervisor::{StatusReport, Supervisor};
use interactview::tail::{ensure_source_file, spawn_ingest};

fn parse_level(level_str: Option<&str>) -> tracing::Level {
    match level_str.map(|s| s.to_uppercase()) {
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
    }
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>, to_file: bool) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    // Priority: CLI --log-level > config file > default (INFO)
    let level = parse_level(cli_log_level.or(config_log_level));
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    if to_file {
        let log_path = get_log_path();
        if let Some(log_dir) = log_path.parent() {
            fs::create_dir_all(log_dir).context("Failed to create log directory")?;
        }
        let log_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .context("Failed to open log file")?;

        tracing_subscriber::fmt()
            .with_writer(log_file)
            .with_ansi(false)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    }

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Build command with dynamic after_help that shows runtime checks
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    let command = cli.command.unwrap_or(Command::Serve);

    // Client commands keep the terminal for their output; only serve logs to stderr
    let to_file = cli.log_file || !matches!(command, Command::Serve);
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref(), to_file)
        .context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let url = cli.url.clone().unwrap_or_else(|| base_url_from_bind(&config.server.bind));

    debug!(?command, "main: dispatching command");
    match command {
        Command::Serve => cmd_serve(&config).await,
        Command::Start {
            force,
            no_truncate,
            server,
        } => {
            let request = ControlRequest {
                force: Some(force),
                truncate: Some(!no_truncate),
                server,
            };
            let response = ApiClient::new(url)?.start(&request).await?;
            print_control(&response);
            Ok(())
        }
        Command::Stop => {
            ApiClient::new(url)?.stop().await?;
            println!("Producer stopped");
            Ok(())
        }
        Command::Restart { no_truncate, server } => {
            let request = ControlRequest {
                force: Some(true),
                truncate: Some(!no_truncate),
                server,
            };
            let response = ApiClient::new(url)?.restart(&request).await?;
            print_control(&response);
            Ok(())
        }
        Command::Status { format } => {
            let status = ApiClient::new(url)?.status().await?;
            print_status(&status, &format)
        }
        Command::Last { lines, format } => {
            let events = ApiClient::new(url)?.last().await?;
            let skip = events.len().saturating_sub(lines);
            for event in &events[skip..] {
                print_event(event, &format)?;
            }
            Ok(())
        }
        Command::Tail { format } => {
            let mut failure = None;
            ApiClient::new(url)?
                .follow(|event| {
                    if failure.is_none()
                        && let Err(e) = print_event(&event, &format)
                    {
                        failure = Some(e);
                    }
                })
                .await?;
            failure.map_or(Ok(()), Err)
        }
    }
}

/// Run ingestion, the HTTP server and the supervisor until interrupted
async fn cmd_serve(config: &Config) -> Result<()> {
    debug!("cmd_serve: called");
    let source_file = config.source_file();
    ensure_source_file(&source_file)
        .await
        .context(format!("Failed to create source file {}", source_file.display()))?;

    let cache = Arc::new(EventCache::new(config.ingest.cache_capacity));
    cache.warm_up(&source_file, config.ingest.warmup_lines).await;
    let ingest = spawn_ingest(source_file.clone(), cache.clone(), config.ingest.poll_interval());

    let producer = runtime::from_config(&config.producer, &config.data.dir, &source_file);
    let supervisor =
        Arc::new(Supervisor::new(producer, cache.clone(), config).context("Invalid payload pattern in configuration")?);
    let state = AppState::new(cache, supervisor.clone(), config);

    let bind = config.bind_addr()?;
    let listener = TcpListener::bind(bind).await.map_err(|error| {
        if error.kind() == ErrorKind::AddrInUse {
            eyre!("Failed to bind {bind}: address already in use. Stop the other viewer or set server.bind / IV_BIND")
        } else {
            eyre!("Failed to bind {bind}: {error}")
        }
    })?;

    println!("interactview running at http://{}", bind);
    println!("tailing {}", source_file.display());

    run_server(listener, state, shutdown_signal()).await?;

    supervisor.shutdown().await;
    ingest.abort();
    info!("Viewer stopped");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn print_control(response: &ControlResponse) {
    if let Some(message) = &response.message {
        println!("{}", message);
    }
    match &response.payload {
        Some(payload) => println!("Payload: {}", payload.green()),
        None => println!("Payload: {}", "not yet known".dimmed()),
    }
}

fn print_status(status: &StatusReport, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(status)?);
        }
        OutputFormat::Text => {
            let state = if status.running {
                "running".green()
            } else {
                "stopped".red()
            };
            println!("Producer: {}", state);
            println!("Payload:  {}", status.payload.as_deref().unwrap_or("-"));
            match status.started_at {
                Some(started) => println!("Started:  {}", started.to_rfc3339()),
                None => println!("Started:  -"),
            }
            if !status.log_tail.is_empty() {
                println!();
                println!("Recent log:");
                for line in &status.log_tail {
                    println!("  {}", line);
                }
            }
        }
    }
    Ok(())
}

fn print_event(event: &CanonicalEvent, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
        OutputFormat::Text => {
            let when = DateTime::<Utc>::from_timestamp(event.timestamp as i64, 0)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| event.timestamp.to_string());
            let detail = match (&event.dns, &event.http) {
                (_, Some(http)) => format!("{} {}", http.method, http.path),
                (Some(dns), None) => format!("{} {}", dns.qtype, dns.qname),
                (None, None) => String::new(),
            };
            println!(
                "{} {:<5} {:<18} {} {}",
                when.dimmed(),
                event.protocol.cyan(),
                event.source,
                event.host,
                detail
            );
        }
    }
    Ok(())
}
