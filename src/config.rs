use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::chunked::{DEFAULT_DESTINATION, DEFAULT_MAX_ATTEMPTS};
use crate::error::OasisError;
use crate::time::{ChunkSize, DEFAULT_TIMEZONE};

pub const DEFAULT_CONFIG_FILE: &str = "oasis.json";
pub const DEFAULT_BACKOFF_MS: u64 = 1000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub catalog: Option<PathBuf>,
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub backoff_ms: Option<u64>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub default_chunk_size: Option<ChunkSize>,
    #[serde(default)]
    pub chunk_sizes: BTreeMap<String, ChunkSize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub timezone: Tz,
    pub base_url: Option<String>,
    pub catalog: Catalog,
    pub download_dir: PathBuf,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub request_timeout: Duration,
    pub default_chunk_size: ChunkSize,
    pub chunk_sizes: BTreeMap<String, ChunkSize>,
}

impl ResolvedConfig {
    /// The per-call window ceiling for `report_name`.
    pub fn chunk_size_for(&self, report_name: &str) -> ChunkSize {
        self.chunk_sizes
            .get(report_name)
            .copied()
            .unwrap_or(self.default_chunk_size)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist; the default file is optional.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, OasisError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| OasisError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| OasisError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, OasisError> {
        let timezone = match config.timezone {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| OasisError::ConfigParse(format!("unknown timezone {name}")))?,
            None => DEFAULT_TIMEZONE,
        };
        let catalog = match &config.catalog {
            Some(path) => Catalog::from_path(path)?,
            None => Catalog::embedded()?,
        };
        let max_attempts = config.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(OasisError::ConfigParse(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            timezone,
            base_url: config.base_url,
            catalog,
            download_dir: config
                .download_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DESTINATION)),
            max_attempts,
            backoff: Duration::from_millis(config.backoff_ms.unwrap_or(DEFAULT_BACKOFF_MS)),
            request_timeout: Duration::from_secs(
                config
                    .request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            default_chunk_size: config.default_chunk_size.unwrap_or_default(),
            chunk_sizes: config.chunk_sizes,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_follow_the_service() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.timezone, DEFAULT_TIMEZONE);
        assert_eq!(resolved.max_attempts, 10);
        assert_eq!(resolved.backoff, Duration::from_secs(1));
        assert_eq!(resolved.download_dir, PathBuf::from("caiso_downloads"));
        assert_eq!(resolved.chunk_size_for("PRC_LMP"), ChunkSize::days(1).unwrap());
    }

    #[test]
    fn per_report_chunk_sizes_override_the_default() {
        let config: Config = serde_json::from_str(
            r#"{"default_chunk_size": "2d", "chunk_sizes": {"PRC_INTVL_LMP": "1h"}}"#,
        )
        .unwrap();
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.chunk_size_for("PRC_INTVL_LMP"), ChunkSize::hours(1).unwrap());
        assert_eq!(resolved.chunk_size_for("PRC_LMP"), ChunkSize::days(2).unwrap());
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let config = Config {
            timezone: Some("Pacific/Atlantis".to_string()),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(OasisError::ConfigParse(_))
        );
    }
}
