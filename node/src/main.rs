use anyhow::{Context, Result};
use clap::{Arg, Command};
use config::{Config, File as ConfigFile};
use pidgate_gateway::{serve_admin, serve_public, GatewayState};
use pidgate_resolver::{EngineConfig, ResolutionEngine};
use pidgate_rewrite::{RedirectEngine, RuleTable};
use pidgate_store::SledRecordStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const PIDGATE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone)]
struct AppConfig {
    public_addr: String,
    admin_addr: String,
    db_path: PathBuf,
    mount: String,
    rules_path: Option<PathBuf>,
    default_ttl: u32,
    store_timeout_secs: u64,
    log_level: String,
    log_format: String,
}

impl AppConfig {
    /// TOML file (when given) layered under `PIDGATE_*` environment
    /// overrides; every key has a serviceable default.
    fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }

        builder = builder.add_source(config::Environment::with_prefix("PIDGATE"));
        let config = builder.build()?;

        let rules_path = get_string_value(&config, &["RULES_PATH", "rules.path"]).map(PathBuf::from);

        Ok(Self {
            public_addr: get_string_value(&config, &["PUBLIC_ADDR", "server.public_addr"])
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            admin_addr: get_string_value(&config, &["ADMIN_ADDR", "server.admin_addr"])
                .unwrap_or_else(|| "127.0.0.1:8081".to_string()),
            db_path: get_string_value(&config, &["DB_PATH", "storage.db_path"])
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/pidgate.db")),
            mount: get_string_value(&config, &["MOUNT", "server.mount"])
                .unwrap_or_else(|| "handle".to_string()),
            rules_path,
            default_ttl: get_int_value(&config, &["DEFAULT_TTL", "resolver.default_ttl"])
                .unwrap_or(86_400) as u32,
            store_timeout_secs: get_int_value(
                &config,
                &["STORE_TIMEOUT_SECS", "resolver.store_timeout_secs"],
            )
            .unwrap_or(5) as u64,
            log_level: get_string_value(&config, &["LOG_LEVEL", "log.level"])
                .unwrap_or_else(|| "info".to_string()),
            log_format: get_string_value(&config, &["LOG_FORMAT", "log.format"])
                .unwrap_or_else(|| "pretty".to_string()),
        })
    }
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| config.get_string(key).ok())
}

fn get_int_value(config: &Config, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| config.get_int(key).ok())
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("pidgate-node")
        .version(PIDGATE_VERSION)
        .about("Persistent identifier resolution and legacy-path redirect gateway")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("Path to a TOML configuration file"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let config = AppConfig::load(config_path.as_ref())?;
    init_logging(&config);

    info!(version = PIDGATE_VERSION, "starting pidgate node");

    let store = Arc::new(
        SledRecordStore::new(&config.db_path)
            .with_context(|| format!("failed to open record store at {}", config.db_path.display()))?,
    );
    let resolution = ResolutionEngine::new(
        store,
        EngineConfig {
            default_ttl: config.default_ttl,
            store_timeout: Duration::from_secs(config.store_timeout_secs),
        },
    );

    let table = Arc::new(RuleTable::new());
    match &config.rules_path {
        Some(path) => {
            table
                .load_file(path)
                .with_context(|| format!("failed to load rule file {}", path.display()))?;
            info!(rules = table.snapshot().len(), source = %path.display(), "rule table loaded");
        }
        None => warn!("no rule file configured; redirect table starts empty"),
    }

    let state = Arc::new(GatewayState {
        resolution,
        redirect: RedirectEngine::new(table),
        mount: config.mount.clone(),
        rule_source: config.rules_path.clone(),
        start_time: Instant::now(),
    });

    let public_state = state.clone();
    let public_addr = config.public_addr.clone();
    let mut public_task = tokio::spawn(async move { serve_public(public_state, &public_addr).await });

    let admin_state = state.clone();
    let admin_addr = config.admin_addr.clone();
    let mut admin_task = tokio::spawn(async move { serve_admin(admin_state, &admin_addr).await });

    info!("public surface at http://{}", config.public_addr);
    info!("administrative surface at http://{}", config.admin_addr);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = &mut public_task => {
            result.context("public surface task panicked")??;
        }
        result = &mut admin_task => {
            result.context("administrative surface task panicked")??;
        }
    }

    public_task.abort();
    admin_task.abort();
    info!("pidgate node stopped");
    Ok(())
}
