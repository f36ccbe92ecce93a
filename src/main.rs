mod api;
mod config;
mod control;
mod jobs;
mod reports;
mod scheduler;
mod source;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::signal;

use control::Automation;

#[derive(Parser)]
#[command(
    name = "stockwatch",
    version,
    about = "Scheduled backups, reports and stock alerts for an inventory service"
)]
struct Cli {
    #[arg(
        short,
        long,
        env = "STOCKWATCH_CONFIG",
        default_value = "~/.stockwatch/config.toml"
    )]
    config: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and serve the control API until Ctrl-C
    Run,
    /// Write a default config and create the data directories
    Init,
    /// Take a snapshot backup now
    Backup,
    /// Generate all reports now
    Reports,
    /// Evaluate stock alerts now
    Alerts,
    /// Prune old logs and reports, verify backups
    Maintenance,
    /// Show the scheduler status of a running server
    Status {
        /// API server URL
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        url: String,
        /// Auth token (or STOCKWATCH_API_KEY env)
        #[arg(long, env = "STOCKWATCH_API_KEY")]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Init => {
            let path = config::init_config_dir(&cli.config).await?;
            tracing::info!("Initialized {}", path.display());
        }
        Commands::Run => run(&cli.config).await?,
        Commands::Backup => {
            let automation = load_automation(&cli.config)?;
            print_payload(&automation.run_backup_now().await)?;
        }
        Commands::Reports => {
            let automation = load_automation(&cli.config)?;
            print_payload(&automation.run_reports_now().await)?;
        }
        Commands::Alerts => {
            let automation = load_automation(&cli.config)?;
            print_payload(&automation.run_alerts_now().await)?;
        }
        Commands::Maintenance => {
            let automation = load_automation(&cli.config)?;
            print_payload(&automation.run_maintenance_now().await)?;
        }
        Commands::Status { url, token } => status(&url, token.as_deref()).await?,
    }
    Ok(())
}

fn load_automation(config_path: &str) -> Result<Automation> {
    let cfg = config::load(config_path)?;
    config::ensure_dirs(&cfg.storage)?;
    Automation::from_config(&cfg)
}

fn print_payload(payload: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(payload)?);
    if payload["status"] == "error" {
        anyhow::bail!("Job failed");
    }
    Ok(())
}

async fn run(config_path: &str) -> Result<()> {
    let cfg = config::load(config_path)?;
    config::ensure_dirs(&cfg.storage)?;

    if cfg.api.api_key.is_none() {
        if is_localhost(&cfg.api.bind) {
            tracing::warn!("API authentication disabled (localhost-only)");
        } else {
            anyhow::bail!(
                "API authentication required for non-localhost binding '{}'. Set [api] api_key.",
                cfg.api.bind
            );
        }
    }

    let automation = Arc::new(Automation::from_config(&cfg)?);
    let started = automation.start_scheduler();
    if started["status"] == "error" {
        anyhow::bail!("Scheduler failed to start: {}", started["error"]);
    }

    let state = api::AppState {
        automation: automation.clone(),
        api_key: cfg.api.api_key.clone(),
    };
    let listener = tokio::net::TcpListener::bind(&cfg.api.bind).await?;
    tracing::info!("stockwatch listening on {}", cfg.api.bind);

    let served = axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
        })
        .await;

    tracing::info!("Shutting down");
    let stopped = tokio::task::spawn_blocking(move || automation.stop_scheduler()).await?;
    tracing::info!("Scheduler: {}", stopped["status"]);
    served?;
    Ok(())
}

async fn status(url: &str, token: Option<&str>) -> Result<()> {
    let client = reqwest::Client::new();
    let mut req = client.get(format!("{url}/scheduler/status"));
    if let Some(t) = token {
        req = req.header("Authorization", format!("Bearer {t}"));
    }
    let resp = req.send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("API error: {} {}", resp.status(), resp.text().await?);
    }
    let body: Value = resp.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Whether the API listens on loopback only, so it may run without a key.
fn is_localhost(bind: &str) -> bool {
    if let Ok(addr) = bind.parse::<std::net::SocketAddr>() {
        return addr.ip().is_loopback();
    }
    bind.rsplit_once(':').is_some_and(|(host, _)| host == "localhost")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthenticated_bind_must_be_loopback() {
        for bind in ["127.0.0.1:8000", "[::1]:8000", "localhost:8000"] {
            assert!(is_localhost(bind), "{bind}");
        }
        for bind in ["0.0.0.0:8000", "10.0.0.5:8000", "localhost.example.com:8000", "localhost", ""] {
            assert!(!is_localhost(bind), "{bind}");
        }
    }

    #[test]
    fn test_cli_defaults_to_run() {
        let cli = Cli::try_parse_from(["stockwatch"]).unwrap();
        assert!(cli.command.is_none());
        let cli = Cli::try_parse_from(["stockwatch", "status", "--url", "http://x:1"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Status { ref url, .. }) if url == "http://x:1"));
    }
}
