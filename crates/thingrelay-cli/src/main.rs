//! ThingRelay server.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};

use thingrelay_adapters::{http, ws, HttpService, WsService};
use thingrelay_core::config::{LogConfig, RelayConfig};
use thingrelay_core::subjects::{SMPP_SUBJECT, SMTP_SUBJECT};
use thingrelay_core::{InMemoryThings, SharedThings};
use thingrelay_downlinks::{
    DownlinkExecutor, DownlinkRepository, DownlinkScheduler, DownlinkService, ReqwestClient,
};
use thingrelay_messaging::{brokers, PubSub, PubSubClient, SharedPubSub};
use thingrelay_notifiers::{
    NotifierConsumer, NotifierRepository, SmppNotifier, SmtpNotifier, WebhookConsumer,
    WebhookRepository, WebhookSender,
};
use thingrelay_rules::{AlarmConsumer, AlarmRepository, RuleRepository, RulesConsumer};
use thingrelay_storage::open_backend;

const CLIENT_ID: &str = "thingrelay";

/// ThingRelay - multi-protocol IoT message relay.
#[derive(Parser, Debug)]
#[command(name = "thingrelay")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file. Defaults plus environment overrides when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the relay.
    Serve,
    /// Load and validate the configuration, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Serve => {
            init_logging(&config.log);
            serve(config).await
        }
        Command::CheckConfig => {
            println!("Configuration OK");
            println!("  broker:    {:?} {}", config.broker.kind, config.broker.url);
            println!("  storage:   {}", config.storage.path);
            println!("  http:      {}", config.http.listen);
            println!("  smtp:      {}", enabled(config.smtp.enabled()));
            println!("  smpp:      {}", enabled(config.smpp.enabled()));
            println!("  things:    {}", config.things.len());
            Ok(())
        }
    }
}

fn enabled(on: bool) -> &'static str {
    if on {
        "enabled"
    } else {
        "disabled"
    }
}

fn load_config(path: Option<&Path>) -> Result<RelayConfig> {
    match path {
        Some(path) => RelayConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let mut config = RelayConfig::default();
            config.apply_env();
            config.validate()?;
            Ok(config)
        }
    }
}

fn init_logging(log: &LogConfig) {
    // RUST_LOG wins over the configured filter.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log.filter));

    if log.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

async fn serve(config: RelayConfig) -> Result<()> {
    let backend = open_backend(&config.storage).context("Failed to open storage")?;
    let things: SharedThings = Arc::new(InMemoryThings::from_records(
        config.things.clone(),
        config.users.clone(),
    ));

    let broker = brokers::connect(&config.broker, CLIENT_ID)
        .await
        .context("Failed to connect to broker")?;
    let pubsub = Arc::new(PubSub::with_timeout(broker, config.broker.ack_timeout()));

    Arc::new(RulesConsumer::new(pubsub.clone()).with_repository(RuleRepository::new(backend.clone())))
        .start(pubsub.as_ref())
        .await?;
    Arc::new(AlarmConsumer::new(things.clone(), AlarmRepository::new(backend.clone())))
        .start(pubsub.as_ref())
        .await?;

    if config.smtp.enabled() {
        let notifier = Arc::new(SmtpNotifier::new(&config.smtp)?);
        Arc::new(NotifierConsumer::new(
            SMTP_SUBJECT,
            notifier,
            NotifierRepository::smtp(backend.clone()),
        ))
        .start(pubsub.as_ref())
        .await?;
    } else {
        warn!("SMTP notifier disabled, no host configured");
    }
    if config.smpp.enabled() {
        let notifier = Arc::new(SmppNotifier::new(config.smpp.clone()));
        Arc::new(NotifierConsumer::new(
            SMPP_SUBJECT,
            notifier,
            NotifierRepository::smpp(backend.clone()),
        ))
        .start(pubsub.as_ref())
        .await?;
    } else {
        warn!("SMPP notifier disabled, no system id configured");
    }
    Arc::new(WebhookConsumer::new(
        WebhookRepository::new(backend.clone()),
        WebhookSender::default(),
    ))
    .start(pubsub.as_ref())
    .await?;

    let executor = DownlinkExecutor::new(things.clone(), pubsub.clone(), Arc::new(ReqwestClient::default()))
        .with_config(&config.downlinks);
    let scheduler = Arc::new(DownlinkScheduler::new(Arc::new(executor)));
    let downlinks = DownlinkService::new(
        things.clone(),
        DownlinkRepository::new(backend.clone()),
        scheduler.clone(),
    );
    downlinks.load_and_schedule_tasks().await?;

    let bus: SharedPubSub = pubsub.clone();
    let app = http::router(Arc::new(HttpService::new(things.clone(), pubsub.clone())))
        .merge(ws::router(Arc::new(WsService::new(things, bus))));

    let listener = TcpListener::bind(&config.http.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.http.listen))?;
    info!("ThingRelay listening on {}", config.http.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop();
    pubsub.close().await?;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[broker]
kind = "memory"

[storage]
path = ":memory:"

[http]
listen = "127.0.0.1:9000"
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.http.listen, "127.0.0.1:9000");
        assert!(config.storage.is_memory());
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = load_config(Some(Path::new("/nonexistent/thingrelay.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/thingrelay.toml"));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["thingrelay", "serve", "--config", "relay.toml"]).unwrap();
        assert!(matches!(args.command, Command::Serve));
        assert_eq!(args.config, Some(PathBuf::from("relay.toml")));
    }
}
