//! Arena Runner
//!
//! Single-binary service that:
//! 1. Loads the account store and configuration
//! 2. Runs one session unit per account against the remote game service
//! 3. Aggregates unit status into a live view and a durable history file
//! 4. Optionally serves /health and /metrics
//!
//! Account maintenance subcommands (`accounts`, `reset-progress`,
//! `clear-entitlement`) operate on the store file and exit.

mod admin;
mod config;
mod error;
mod metrics;
mod orchestrator;
mod status;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use arena_accounts::{Account, AccountStore};
use arena_session::{ExitReason, UnitReport};
use pacing::RateLimiter;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::HttpTransport;
use uuid::Uuid;

use crate::admin::AdminState;
use crate::config::Config;
use crate::orchestrator::{Orchestrator, UnitDeps};
use crate::status::StatusBoard;

/// What the binary was asked to do.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run,
    Accounts,
    ResetProgress(String),
    ClearEntitlement(String),
}

/// Parsed command line: `[--config <path>] [run | accounts | reset-progress <id> | clear-entitlement <id>]`.
#[derive(Debug, PartialEq, Eq)]
struct Cli {
    config: Option<String>,
    command: Command,
}

fn parse_args(args: &[String]) -> std::result::Result<Cli, String> {
    let mut config = None;
    let mut positional = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let path = iter.next().ok_or("--config requires a path")?;
            config = Some(path.clone());
        } else {
            positional.push(arg.as_str());
        }
    }

    let command = match positional.as_slice() {
        [] | ["run"] => Command::Run,
        ["accounts"] => Command::Accounts,
        ["reset-progress", id] => Command::ResetProgress(id.to_string()),
        ["clear-entitlement", id] => Command::ClearEntitlement(id.to_string()),
        ["reset-progress"] | ["clear-entitlement"] => {
            return Err(format!("{} requires an account id", positional[0]));
        }
        other => return Err(format!("unrecognized arguments: {}", other.join(" "))),
    };
    Ok(Cli { config, command })
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs go to stderr so they never interleave with the live view on stdout.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args).map_err(anyhow::Error::msg)?;

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let store = AccountStore::load(config.pool.accounts_file.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load accounts from {}",
                config.pool.accounts_file.display()
            )
        })?;

    match cli.command {
        Command::Run => run(config, store).await,
        Command::Accounts => {
            print!("{}", account_table(&store.accounts().await));
            Ok(())
        }
        Command::ResetProgress(id) => {
            let account = store
                .reset_progress(&id)
                .await
                .with_context(|| format!("failed to reset progress of {id}"))?;
            println!("{}: progress reset ({})", account.id, account.progress.describe());
            Ok(())
        }
        Command::ClearEntitlement(id) => {
            let account = store
                .clear_entitlement(&id)
                .await
                .with_context(|| format!("failed to clear entitlement of {id}"))?;
            println!("{}: entitlement cleared", account.id);
            Ok(())
        }
    }
}

async fn run(config: Config, store: AccountStore) -> Result<()> {
    let prometheus = metrics::install_recorder();
    let run_id = Uuid::new_v4();
    let started_at = Instant::now();

    info!(
        run_id = %run_id,
        base_url = %config.remote.base_url,
        accounts = store.len().await,
        concurrency = config.pool.concurrency,
        max_cycles = config.session.max_cycles,
        "starting arena-runner"
    );

    let board = Arc::new(
        StatusBoard::open(&config.status, run_id)
            .await
            .with_context(|| {
                format!(
                    "failed to open history file {}",
                    config.status.history_file.display()
                )
            })?,
    );
    let store = Arc::new(store);
    let transport =
        HttpTransport::new(&config.http_settings()).context("failed to build HTTP transport")?;

    let deps = UnitDeps {
        transport: Arc::new(transport),
        limiter: Arc::new(RateLimiter::new(config.pacing.clone())),
        retry: config.retry.clone(),
        base_url: config.remote.base_url.clone(),
        session: Arc::new(config.session.clone()),
        checkpoint: store.clone(),
        reporter: board.clone(),
    };
    let mut orchestrator = Orchestrator::new(deps, config.start_stagger());

    let admin_shutdown = CancellationToken::new();
    let admin_server = match &config.admin {
        Some(admin) => {
            let state = AdminState {
                board: board.clone(),
                live_units: orchestrator.live_units(),
                prometheus,
                started_at,
            };
            let app = admin::build_router(state, admin.max_connections);
            let listener = TcpListener::bind(admin.listen_addr)
                .await
                .with_context(|| format!("failed to bind admin listener to {}", admin.listen_addr))?;
            info!(addr = %admin.listen_addr, "admin listener ready");
            let shutdown = admin_shutdown.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await
            }))
        }
        None => None,
    };

    let started = orchestrator
        .start(store.accounts().await, config.pool.concurrency)
        .context("failed to start session units")?;
    if started == 0 {
        warn!("no runnable accounts");
    }

    let finished = tokio::select! {
        reports = orchestrator.wait() => Some(reports),
        _ = shutdown_signal() => None,
    };
    let reports = match finished {
        Some(reports) => reports,
        None => orchestrator.stop(config.shutdown_timeout()).await,
    };

    summarize(&reports);
    board.stop().await;

    admin_shutdown.cancel();
    if let Some(server) = admin_server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "admin server error"),
            Err(e) => error!(error = %e, "admin server task panicked"),
        }
    }

    info!(run_id = %run_id, uptime_secs = started_at.elapsed().as_secs(), "shutdown complete");
    Ok(())
}

fn summarize(reports: &[UnitReport]) {
    for report in reports {
        metrics::record_unit_exit(&report.exit);
        let progress = &report.account.progress;
        match &report.exit {
            ExitReason::Failed(reason) => {
                error!(account_id = %report.account.id, reason = %reason, "unit failed");
            }
            exit => info!(
                account_id = %report.account.id,
                exit = %exit,
                cycles = report.runtime.cycles_completed,
                matches = report.matches_played,
                total_sessions = progress.total_sessions,
                total_wins = progress.total_wins,
                "unit summary"
            ),
        }
    }
    let quarantined = reports
        .iter()
        .filter(|r| matches!(r.exit, ExitReason::Quarantined(_)))
        .count();
    info!(units = reports.len(), quarantined, "run finished");
}

/// One row per account: name, status, entitlement, open-cycle progress, totals.
fn account_table(accounts: &[Account]) -> String {
    let mut out = format!(
        "{:<20} {:<12} {:<11} {:<28} {:>8} {:>6} {:>6}\n",
        "ACCOUNT", "STATUS", "ENTITLED", "PROGRESS", "SESSIONS", "GAMES", "WINS"
    );
    for account in accounts {
        out.push_str(&format!(
            "{:<20} {:<12} {:<11} {:<28} {:>8} {:>6} {:>6}\n",
            account.label(),
            account.status.as_str(),
            if account.has_entitlement { "yes" } else { "no" },
            account.progress.describe(),
            account.progress.total_sessions,
            account.progress.total_games,
            account.progress.total_wins,
        ));
    }
    out
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
