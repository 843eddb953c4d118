//! SETTLER — bet settlement and bankroll reconciliation engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the store, result provider, oracle and ledger together, then
//! either runs one command or serves the API and sweeps pending wagers
//! on a timer until Ctrl+C.
//!
//! Usage:
//!   settler [--config PATH]                   run the daemon
//!   settler sweep                             settle every user once
//!   settler settle <user>                     settle one user once
//!   settler set-bet <user> <wager> <won|lost> operator override

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use settler::config::{self, StorageBackend};
use settler::data::{FootballClient, ResultProvider};
use settler::engine::{BankrollLedger, MarketInterpreter, SettlementOrchestrator};
use settler::llm::{PerplexityClient, VerificationOracle};
use settler::server::{self, ServerState};
use settler::storage::{KvStore, MemoryStore, SqliteStore};
use settler::types::Resolution;

const BANNER: &str = r#"
 ___  ___ _____ _____ _     ___ ___
/ __|| __|_   _|_   _| |   | __| _ \
\__ \| _|  | |   | | | |__ | _||   /
|___/|___| |_|   |_| |____||___|_|_\

  Bet settlement & bankroll reconciliation
  v0.1.0
"#;

/// Bet settlement and bankroll reconciliation engine.
#[derive(Parser, Debug)]
#[command(name = "settler", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "SETTLER_CONFIG", default_value = "config.toml")]
    config: String,

    /// One-shot command. Without one, run the daemon.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Settle every user with pending wagers once.
    Sweep,
    /// Settle one user's pending wagers once.
    Settle { user: String },
    /// Operator override: force a wager to won or lost.
    SetBet {
        user: String,
        wager: String,
        #[arg(value_parser = parse_resolution)]
        resolution: Resolution,
    },
}

fn parse_resolution(s: &str) -> Result<Resolution, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let cfg = config::AppConfig::load(&cli.config)?;

    init_logging();

    if cli.command.is_none() {
        println!("{BANNER}");
    }
    info!(
        name = %cfg.settler.name,
        sweep_interval_secs = cfg.settler.sweep_interval_secs,
        storage = ?cfg.storage.backend,
        "SETTLER starting up"
    );

    // -- Initialise components -------------------------------------------

    let store: Arc<dyn KvStore> = match cfg.storage.backend {
        StorageBackend::Sqlite => Arc::new(SqliteStore::connect(&cfg.storage.url).await?),
        StorageBackend::Memory => {
            warn!("Using in-memory storage, nothing will persist");
            Arc::new(MemoryStore::new())
        }
    };

    let provider_key = config::AppConfig::resolve_secret(&cfg.provider.api_key_env);
    if provider_key.is_none() {
        warn!(
            env = %cfg.provider.api_key_env,
            "No football API key, structured lookups disabled"
        );
    }
    let provider: Arc<dyn ResultProvider> = Arc::new(FootballClient::new(
        &cfg.provider.host,
        provider_key,
        cfg.provider.timeout(),
    )?);

    let oracle: Option<Arc<dyn VerificationOracle>> = if !cfg.oracle.enabled {
        info!("Oracle disabled in config");
        None
    } else if let Some(key) = config::AppConfig::resolve_secret(&cfg.oracle.api_key_env) {
        let client = PerplexityClient::new(
            &cfg.oracle.api_url,
            key,
            Some(cfg.oracle.model.clone()),
            cfg.oracle.timeout(),
            cfg.oracle.max_retries,
        )?;
        Some(Arc::new(client) as Arc<dyn VerificationOracle>)
    } else {
        warn!(env = %cfg.oracle.api_key_env, "No oracle API key, oracle disabled");
        None
    };

    info!(
        store = store.name(),
        provider = provider.name(),
        oracle = oracle.as_ref().map(|o| o.model_name()).unwrap_or("none"),
        "Components ready"
    );

    let ledger = Arc::new(BankrollLedger::new(store, cfg.ledger.clone()));
    let orchestrator = Arc::new(
        SettlementOrchestrator::new(
            ledger,
            provider,
            oracle,
            MarketInterpreter::new(cfg.interpreter.default_goal_line),
        )
        .with_concurrency(cfg.settler.wager_concurrency, cfg.settler.user_concurrency),
    );

    // -- One-shot commands -----------------------------------------------

    match cli.command {
        Some(Command::Sweep) => {
            let sweep = orchestrator.settle_all().await?;
            for report in &sweep.reports {
                print_report_details(report.user.as_str(), &report.details());
            }
            return Ok(());
        }
        Some(Command::Settle { user }) => {
            let report = orchestrator.settle_user(&user).await?;
            print_report_details(&user, &report.details());
            return Ok(());
        }
        Some(Command::SetBet {
            user,
            wager,
            resolution,
        }) => {
            let outcome = orchestrator.settle_manually(&user, &wager, resolution).await?;
            println!("{user} {wager}: {outcome:?}");
            return Ok(());
        }
        None => {}
    }

    // -- Server ----------------------------------------------------------

    let admin_token = config::AppConfig::resolve_secret(&cfg.server.admin_token_env);
    if admin_token.is_none() {
        warn!(env = %cfg.server.admin_token_env, "No admin token, admin routes disabled");
    }
    let state = Arc::new(ServerState::new(orchestrator, admin_token));

    if cfg.server.enabled {
        server::spawn_server(state.clone(), cfg.server.port).await?;
    }

    // -- Main loop -------------------------------------------------------

    let sweep_interval = Duration::from_secs(cfg.settler.sweep_interval_secs.max(1));
    let mut interval = tokio::time::interval(sweep_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.settler.sweep_interval_secs,
        "Entering sweep loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_sweep(&state).await;
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!("SETTLER shut down cleanly.");
    Ok(())
}

/// One scheduled sweep. Failures are logged and the loop carries on.
async fn run_sweep(state: &ServerState) {
    match state.orchestrator.settle_all().await {
        Ok(sweep) => {
            for report in sweep.reports {
                state.record(report).await;
            }
        }
        Err(e) => error!(error = %e, "Sweep failed, continuing to next"),
    }
}

fn print_report_details(user: &str, details: &[String]) {
    println!("{user}:");
    for line in details {
        println!("  {line}");
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("settler=info"));

    let json_logging = std::env::var("SETTLER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_runs_daemon() {
        let cli = Cli::try_parse_from(["settler", "--config", "prod.toml"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, "prod.toml");
    }

    #[test]
    fn test_set_bet_parses_resolution() {
        let cli = Cli::try_parse_from(["settler", "set-bet", "u1", "b1", "Won"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::SetBet {
                user: "u1".into(),
                wager: "b1".into(),
                resolution: Resolution::Won,
            })
        );

        let cli = Cli::try_parse_from(["settler", "set-bet", "u1", "b1", "loss"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::SetBet { resolution: Resolution::Lost, .. })
        ));
    }

    #[test]
    fn test_set_bet_rejects_unknown_resolution() {
        assert!(Cli::try_parse_from(["settler", "set-bet", "u1", "b1", "void"]).is_err());
        assert!(Cli::try_parse_from(["settler", "set-bet", "u1", "b1"]).is_err());
    }

    #[test]
    fn test_settle_takes_user() {
        let cli = Cli::try_parse_from(["settler", "settle", "u42"]).unwrap();
        assert_eq!(cli.command, Some(Command::Settle { user: "u42".into() }));
        assert!(Cli::try_parse_from(["settler", "settle"]).is_err());
    }
}
