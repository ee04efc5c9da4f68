use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use echo_core::ObjectKey;
use echo_kubehub::{KubeResolver, KubeStore};
use echo_reconcile::{Outcome, Reconciler, ReconcilerConfig};
use tracing::info;

mod dispatch;

#[derive(Parser, Debug)]
#[command(name = "echo-controller", version, about = "Republish a field of any object into Echo status")]
struct Cli {
    /// Output format (one-shot commands)
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace to watch, or of the object to reconcile (default: all / current context)
    #[arg(long = "ns", env = "ECHO_NAMESPACE", global = true)]
    namespace: Option<String>,

    /// Extra passes after a status write conflict (overrides ECHO_CONFLICT_RETRIES)
    #[arg(long = "conflict-retries", global = true)]
    conflict_retries: Option<u32>,

    /// Requeue delay for recoverable failures, seconds (overrides ECHO_REQUEUE_SECS)
    #[arg(long = "requeue-secs", global = true)]
    requeue_secs: Option<u64>,

    /// Requeue delay for fatal failures, seconds (overrides ECHO_FATAL_REQUEUE_SECS)
    #[arg(long = "fatal-requeue-secs", global = true)]
    fatal_requeue_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch Echo objects and keep their status in sync
    Run,
    /// Run a single reconciliation pass and print the outcome
    Reconcile {
        /// Object key, "ns/name" or "name"
        key: String,
    },
}

impl Cli {
    fn reconciler_config(&self) -> ReconcilerConfig {
        let mut cfg = ReconcilerConfig::from_env();
        if let Some(n) = self.conflict_retries { cfg.conflict_retries = n; }
        if let Some(s) = self.requeue_secs { cfg.requeue_after = Duration::from_secs(s); }
        if let Some(s) = self.fatal_requeue_secs { cfg.fatal_requeue_after = Duration::from_secs(s); }
        cfg
    }
}

fn init_tracing() {
    let env = std::env::var("ECHO_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("ECHO_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid ECHO_METRICS_ADDR; expected host:port");
        }
    }
}

fn describe(key: &ObjectKey, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Deleted => format!("{}: not found, nothing to do", key),
        Outcome::Unchanged => format!("{}: up to date", key),
        Outcome::Updated { resource_version } => {
            format!("{}: status updated (resourceVersion {})", key, resource_version.as_deref().unwrap_or("?"))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let cfg = cli.reconciler_config();
    info!(conflict_retries = cfg.conflict_retries, requeue = ?cfg.requeue_after, fatal_requeue = ?cfg.fatal_requeue_after, "config loaded");

    let client = echo_kubehub::connect().await?;
    let reconciler = Reconciler::new(
        Arc::new(KubeStore::new(client.clone())),
        Arc::new(KubeResolver::new(client.clone())),
        cfg,
    );

    match &cli.command {
        Commands::Run => dispatch::run(client, cli.namespace.as_deref(), reconciler).await?,
        Commands::Reconcile { key } => {
            let mut key = ObjectKey::from_str(key).with_context(|| format!("parsing object key {:?}", key))?;
            if key.namespace.is_none() {
                key.namespace = cli.namespace.clone();
            }
            info!(echo = %key, "reconcile invoked");
            match reconciler.reconcile(&key).await {
                Ok(outcome) => match cli.output {
                    Output::Human => println!("{}", describe(&key, &outcome)),
                    Output::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
                },
                Err(e) => {
                    if cli.output == Output::Json {
                        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "error": e }))?);
                    }
                    let hint = if e.is_recoverable() { "retry later" } else { "fix the Echo spec or cluster access" };
                    return Err(anyhow!("reconcile {} failed: {} ({})", key, e, hint));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config() {
        let cli = Cli::parse_from(["echo-controller", "--conflict-retries", "9", "--requeue-secs", "2", "run"]);
        let cfg = cli.reconciler_config();
        assert_eq!(cfg.conflict_retries, 9);
        assert_eq!(cfg.requeue_after, Duration::from_secs(2));
        assert!(matches!(cli.command, Commands::Run));
    }

    #[test]
    fn reconcile_subcommand_takes_key() {
        let cli = Cli::parse_from(["echo-controller", "-o", "json", "reconcile", "default/e1"]);
        assert_eq!(cli.output, Output::Json);
        match cli.command {
            Commands::Reconcile { key } => assert_eq!(key, "default/e1"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn describe_outcomes() {
        let key = ObjectKey::new(Some("default"), "e1");
        assert_eq!(describe(&key, &Outcome::Unchanged), "default/e1: up to date");
        assert_eq!(
            describe(&key, &Outcome::Updated { resource_version: Some("42".into()) }),
            "default/e1: status updated (resourceVersion 42)"
        );
    }
}
