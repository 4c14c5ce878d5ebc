use clap::{Parser, ValueEnum};
use portfleet::admin_api::AdminApiServer;
use portfleet::config::ServiceConfig;
use portfleet::control::RuleService;
use portfleet::store::JsonFileStore;
use portfleet::FleetManager;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "portfleet", version, about = "Runtime-managed fleet of per-port HTTP reverse proxies")]
struct Args {
    /// YAML service configuration file
    #[arg(short, long, env = "PORTFLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Admin API port
    #[arg(long, env = "PORTFLEET_ADMIN_PORT")]
    admin_port: Option<u16>,

    /// Admin API bind host
    #[arg(long, env = "PORTFLEET_ADMIN_HOST")]
    admin_host: Option<String>,

    /// Host the proxy listeners bind to
    #[arg(long, env = "PORTFLEET_BIND_HOST")]
    bind_host: Option<String>,

    /// JSON rule file
    #[arg(long, env = "PORTFLEET_RULES")]
    rules: Option<PathBuf>,

    /// Number of request log entries kept in memory
    #[arg(long, env = "PORTFLEET_LOG_CAPACITY")]
    log_capacity: Option<usize>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info", env = "PORTFLEET_LOG_LEVEL")]
    log_level: String,

    #[arg(long, value_enum, default_value = "text", env = "PORTFLEET_LOG_FORMAT")]
    log_format: LogFormat,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_file(path)?,
            None => ServiceConfig::default(),
        };
        if let Some(port) = self.admin_port {
            config.admin.port = port;
        }
        if let Some(host) = &self.admin_host {
            config.admin.host = host.clone();
        }
        if let Some(host) = &self.bind_host {
            config.proxy.bind_host = host.clone();
        }
        if let Some(path) = &self.rules {
            config.rules_path = path.clone();
        }
        if let Some(capacity) = self.log_capacity {
            config.log_capacity = capacity;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(args: &Args) {
    // RUST_LOG wins over --log-level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "portfleet={level},hyper=warn,rustls=warn",
            level = args.log_level
        ))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match args.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let config = args.load_config()?;
    info!(
        "Starting portfleet v{} (rules: {:?})",
        env!("CARGO_PKG_VERSION"),
        config.rules_path
    );

    let fleet = Arc::new(FleetManager::from_config(&config)?);
    let store = Arc::new(JsonFileStore::new(&config.rules_path));
    let service = Arc::new(RuleService::new(store, fleet));

    let report = service.initialize().await?;
    if !report.is_clean() {
        warn!("{} rules could not be started", report.failures.len());
    }

    let admin = AdminApiServer::new(config.admin_addr()?, Arc::clone(&service))
        .bind()
        .await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let admin_task = tokio::spawn(admin.serve(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let _ = shutdown_tx.send(true);
    service.shutdown().await;
    match admin_task.await {
        Ok(Err(e)) => error!("Admin API failed: {}", e),
        Err(e) => error!("Admin API task failed: {}", e),
        Ok(Ok(())) => {}
    }
    Ok(())
}
