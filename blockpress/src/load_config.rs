/// `load_config` module: loads the static YAML configuration and injects secrets from the environment.
///
/// The YAML file carries no credentials. It has four sections, all optional:
/// - `source`: Notion API base URL, API version and listing page size
/// - `publish`: WeChat API base URL and whether drafts are submitted for publication
/// - `server`: HTTP port and scheduler interval
/// - `sync`: the core [`SyncConfig`] (delays, retry policies, media limits, schema)
///
/// Secrets and identifiers are read from the environment after parsing:
/// `NOTION_API_KEY`, `NOTION_DATABASE_ID`, `WECHAT_ACCESS_TOKEN`, and the optional
/// `FALLBACK_MEDIA_ID` and `PORT`.
///
/// # Errors
/// All errors use `anyhow::Error` and name the file or variable at fault.
use anyhow::{anyhow, Context, Result};
use blockpress_core::config::SyncConfig;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

pub const NOTION_API_KEY: &str = "NOTION_API_KEY";
pub const NOTION_DATABASE_ID: &str = "NOTION_DATABASE_ID";
pub const WECHAT_ACCESS_TOKEN: &str = "WECHAT_ACCESS_TOKEN";
pub const FALLBACK_MEDIA_ID: &str = "FALLBACK_MEDIA_ID";
pub const PORT: &str = "PORT";

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    pub api_base: String,
    pub notion_version: String,
    #[serde(skip)]
    pub api_key: String,
    #[serde(skip)]
    pub database_id: String,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            api_base: "https://api.notion.com/v1".to_string(),
            notion_version: "2022-06-28".to_string(),
            api_key: String::new(),
            database_id: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PublishSection {
    pub api_base: String,
    /// Submit each draft for publication. When false, articles stay as drafts.
    pub submit: bool,
    #[serde(skip)]
    pub access_token: String,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            api_base: "https://api.weixin.qq.com".to_string(),
            submit: true,
            access_token: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
    /// Seconds between scheduled runs; 0 disables the scheduler.
    pub schedule_interval_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 8080,
            schedule_interval_secs: 3600,
        }
    }
}

/// Loads a static YAML config file and injects the required secrets from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let mut config: CliConfig = if config_content.trim().is_empty() {
        serde_yaml::from_str("{}")?
    } else {
        match serde_yaml::from_str(&config_content) {
            Ok(conf) => conf,
            Err(e) => {
                error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
                return Err(anyhow!("Failed to parse config YAML: {e}"));
            }
        }
    };
    info!(config_path = ?path_ref, "Parsed config YAML successfully");

    config.source.api_key = required_env(NOTION_API_KEY)?;
    config.source.database_id = required_env(NOTION_DATABASE_ID)?;
    config.publish.access_token = required_env(WECHAT_ACCESS_TOKEN)?;

    if let Some(media_id) = optional_env(FALLBACK_MEDIA_ID) {
        config.sync.media.cover_fallback = media_id;
    }
    if config.sync.media.cover_fallback.is_empty() {
        warn!("No fallback cover configured; documents without a usable cover may be rejected by the platform");
    }

    if let Some(port) = optional_env(PORT) {
        config.server.port = port
            .parse()
            .with_context(|| format!("{PORT} must be a port number, got {port:?}"))?;
    }

    config.sync.trace_loaded();
    Ok(config)
}

fn required_env(name: &str) -> Result<String> {
    match optional_env(name) {
        Some(value) => Ok(value),
        None => {
            error!(variable = name, "Required environment variable missing");
            Err(anyhow!("environment variable {name} must be set"))
        }
    }
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
