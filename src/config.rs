//! Server configuration: a JSON document, overridden by `MDX_`-prefixed
//! environment variables, validated before anything starts.

use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MdxError, Result};

/// One registered dictionary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub route: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    pub debug: bool,

    // Directory settings
    pub dict_directory: String,
    pub resource_directory: String,

    // Multi-dictionary settings; BTreeMap keeps registration order stable
    pub dictionaries: BTreeMap<String, DictConfig>,

    // Performance settings
    pub cache_enabled: bool,
    pub max_word_length: usize,

    // Logging settings
    pub log_level: String,
    pub log_file: Option<String>,

    // Concurrency settings
    pub server_type: String,
    pub max_threads: usize,
    pub request_queue_size: u32,
    pub connection_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8000,
            debug: false,
            dict_directory: "dict".to_string(),
            resource_directory: "mdx".to_string(),
            dictionaries: BTreeMap::new(),
            cache_enabled: true,
            max_word_length: 100,
            log_level: "INFO".to_string(),
            log_file: None,
            server_type: "threaded".to_string(),
            max_threads: 20,
            request_queue_size: 50,
            connection_timeout: 30,
        }
    }
}

impl ServerConfig {
    /// Load from a JSON file. A missing file yields the defaults; a file
    /// that does not parse is a hard error.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| MdxError::InvalidInput(format!("invalid config {}: {e}", path.display())))?;
        Ok(config)
    }

    /// Apply `MDX_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = env::var("MDX_HOST") {
            self.host = host;
        }
        if let Ok(port) = env::var("MDX_PORT") {
            self.port = port
                .parse()
                .map_err(|_| MdxError::InvalidInput(format!("MDX_PORT: {port:?}")))?;
        }
        if let Ok(debug) = env::var("MDX_DEBUG") {
            self.debug = debug.to_lowercase() == "true";
        }
        if let Ok(dir) = env::var("MDX_DICT_DIR") {
            self.dict_directory = dir;
        }
        if let Ok(dir) = env::var("MDX_RESOURCE_DIR") {
            self.resource_directory = dir;
        }
        if let Ok(cache) = env::var("MDX_CACHE") {
            self.cache_enabled = cache.to_lowercase() == "true";
        }
        if let Ok(len) = env::var("MDX_MAX_WORD_LENGTH") {
            self.max_word_length = len
                .parse()
                .map_err(|_| MdxError::InvalidInput(format!("MDX_MAX_WORD_LENGTH: {len:?}")))?;
        }
        if let Ok(level) = env::var("MDX_LOG_LEVEL") {
            self.log_level = level.to_uppercase();
        }
        if let Ok(file) = env::var("MDX_LOG_FILE") {
            self.log_file = Some(file);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(MdxError::InvalidInput(format!(
                "invalid port number: {}",
                self.port
            )));
        }
        if self.max_word_length < 1 {
            return Err(MdxError::InvalidInput(
                "max_word_length must be positive".to_string(),
            ));
        }
        if !["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"]
            .contains(&self.log_level.as_str())
        {
            return Err(MdxError::InvalidInput(format!(
                "invalid log level: {}",
                self.log_level
            )));
        }
        if !["simple", "threaded", "gunicorn"].contains(&self.server_type.as_str()) {
            return Err(MdxError::InvalidInput(format!(
                "invalid server type: {}",
                self.server_type
            )));
        }
        if self.max_threads < 1 {
            return Err(MdxError::InvalidInput(
                "max_threads must be positive".to_string(),
            ));
        }
        if self.request_queue_size < 1 {
            return Err(MdxError::InvalidInput(
                "request_queue_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Scan the dictionary directory for `*.mdx` files when nothing is
    /// configured. The filename stem becomes the id and the route; an id of
    /// `default` takes the empty route.
    pub fn auto_discover_dictionaries(&mut self) {
        if !self.dictionaries.is_empty() {
            return;
        }
        let dir = Path::new(&self.dict_directory);
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("mdx") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let id = stem.to_string();
            let route = if id == "default" {
                String::new()
            } else {
                id.clone()
            };
            self.dictionaries.insert(
                id.clone(),
                DictConfig {
                    name: title_case(&id.replace('_', " ")),
                    path: path.to_string_lossy().into_owned(),
                    route,
                    enabled: true,
                },
            );
        }
        info!(count = self.dictionaries.len(), "auto-discovered dictionaries");
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
