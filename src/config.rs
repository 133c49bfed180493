use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::Upstream;
use crate::error::KiraError;
use crate::ratelimit::{RateLimitOverride, RateLimitTable};
use crate::store::FileStore;

pub const DEFAULT_CONFIG_FILE: &str = "kira-ga.json";

pub const ENV_BIOCYC_USERNAME: &str = "BIOCYC_USERNAME";
pub const ENV_BIOCYC_PASSWORD: &str = "BIOCYC_PASSWORD";
pub const ENV_ELEVATED_RATE_KEY: &str = "NCBI_API_KEY";
pub const ENV_STORE_DIR: &str = "KIRA_GA_STORE";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub store_dir: Option<String>,
    #[serde(default)]
    pub elevated_rate_key: Option<String>,
    #[serde(default)]
    pub biocyc: Option<BioCycCredentials>,
    #[serde(default)]
    pub rate_limits: BTreeMap<String, RateLimitOverride>,
}

#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BioCycCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BioCycCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BioCycCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub biocyc: Option<BioCycCredentials>,
    pub elevated_rate_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub store_dir: Option<Utf8PathBuf>,
    pub credentials: Credentials,
    pub rate_limits: RateLimitTable,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the optional config file and overlays the process environment.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config = Self::read(path)?;
        Self::resolve_with_env(config, |name| std::env::var(name).ok())
    }

    fn read(path: Option<&str>) -> Result<Config, KiraError> {
        let config_path = match path {
            Some(value) => PathBuf::from(value),
            None => {
                let cwd = std::env::current_dir()
                    .map_err(|_| KiraError::ConfigRead(PathBuf::from(".")))?;
                let default = cwd.join(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Config::default());
                }
                default
            }
        };
        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse(err.to_string()))
    }

    pub fn resolve_with_env<E>(config: Config, env: E) -> Result<ResolvedConfig, KiraError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let schema_version = config.schema_version.unwrap_or(1);
        let non_empty = |name: &str| env(name).filter(|value| !value.trim().is_empty());

        let biocyc = match (non_empty(ENV_BIOCYC_USERNAME), non_empty(ENV_BIOCYC_PASSWORD)) {
            (Some(username), Some(password)) => Some(BioCycCredentials { username, password }),
            _ => config.biocyc,
        };
        let elevated_rate_key = non_empty(ENV_ELEVATED_RATE_KEY).or(config.elevated_rate_key);

        let mut rate_limits = RateLimitTable::default();
        for (name, value) in config.rate_limits {
            let api: Upstream = name
                .parse()
                .map_err(|_| KiraError::ConfigParse(format!("unknown upstream in rate_limits: {name}")))?;
            rate_limits = rate_limits.with_override(api, value);
        }
        if elevated_rate_key.is_some() {
            tracing::info!("elevated-rate credential present, raising request rates");
            rate_limits = rate_limits.with_elevated_rate();
        }

        let store_dir = non_empty(ENV_STORE_DIR)
            .or(config.store_dir)
            .map(Utf8PathBuf::from)
            .or_else(FileStore::default_root);

        Ok(ResolvedConfig {
            schema_version,
            store_dir,
            credentials: Credentials {
                biocyc,
                elevated_rate_key,
            },
            rate_limits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_file_credentials() {
        let config = Config {
            biocyc: Some(BioCycCredentials {
                username: "file@example.org".to_string(),
                password: "file".to_string(),
            }),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_with_env(config, |name| match name {
            ENV_BIOCYC_USERNAME => Some("env@example.org".to_string()),
            ENV_BIOCYC_PASSWORD => Some("secret".to_string()),
            _ => None,
        })
        .unwrap();
        let biocyc = resolved.credentials.biocyc.unwrap();
        assert_eq!(biocyc.username, "env@example.org");
        assert!(!format!("{biocyc:?}").contains("secret"));
    }

    #[test]
    fn elevated_key_raises_rates() {
        let resolved = ConfigLoader::resolve_with_env(Config::default(), |name| {
            (name == ENV_ELEVATED_RATE_KEY).then(|| "key".to_string())
        })
        .unwrap();
        assert_eq!(resolved.rate_limits.get(Upstream::Ncbi).requests_per_second, 10.0);
    }
}
