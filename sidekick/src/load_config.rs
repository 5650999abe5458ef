/// `load_config` module: reads the static YAML settings file and injects the
/// Notion API key from the environment.
///
/// # Accepted YAML
/// ```yaml
/// database: ./sidekick.sqlite3
/// media_root: ./media
/// media_url: /media/        # optional
/// notion:
///   databases:
///     - collection: newsletter.Post
///       database_id: 0f6c3c2e8b5d4d1c9a7e2b3f4c5d6e7f
/// ```
///
/// The API key never lives in the file; it is read from `NOTION_API_KEY`
/// (a `.env` file is honoured by the binary).
use anyhow::Result;
use serde::Deserialize;
use sidekick_core::config::NotionConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const API_KEY_ENV: &str = "NOTION_API_KEY";

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    /// SQLite database file, created on first use.
    pub database: PathBuf,
    /// Root directory for mirrored media.
    pub media_root: PathBuf,
    #[serde(default = "default_media_url")]
    pub media_url: String,
    #[serde(default)]
    pub notion: NotionConfig,
}

fn default_media_url() -> String {
    "/media/".to_string()
}

/// Loads a static YAML config file (no secrets) and injects the API key
/// from the environment when it is set.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let mut config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.is_empty() => config.notion.api_key = key,
        _ => warn!("{API_KEY_ENV} is not set; commands that reach Notion will fail"),
    }
    config.notion.trace_loaded();

    Ok(config)
}
