use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mdx_server::config::ServerConfig;
use mdx_server::registry::DictionaryRegistry;
use mdx_server::server;

fn init_tracing(config: &ServerConfig) {
    let level = if config.debug {
        "debug"
    } else {
        match config.log_level.as_str() {
            "DEBUG" => "debug",
            "WARNING" => "warn",
            "ERROR" | "CRITICAL" => "error",
            _ => "info",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[actix_web::main]
async fn main() -> Result<()> {
    let config_path =
        std::env::var("MDX_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let mut config = ServerConfig::from_file(Path::new(&config_path))
        .with_context(|| format!("loading {config_path}"))?;
    config.apply_env_overrides()?;
    config.validate()?;

    init_tracing(&config);
    info!(config = %config_path, "starting mdx-server");

    config.auto_discover_dictionaries();
    let registry = DictionaryRegistry::from_config(&config);
    if registry.loaded_count() == 0 {
        bail!(
            "no dictionaries could be loaded from {:?}",
            config.dict_directory
        );
    }
    info!(dictionaries = registry.loaded_count(), "registry ready");

    server::run(config, registry).await.context("server error")?;
    Ok(())
}
