use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::LazyLock};
use url::Url;

use crate::error::SettingsError;

pub const CONFIG_FILE: &str = "config.toml";
pub const ENV_PREFIX: &str = "BANKING_";

pub static CONFIG: LazyLock<Config> = LazyLock::new(|| {
    Config::load(CONFIG_FILE).unwrap_or_else(|e| panic!("FATAL: invalid configuration: {e}"))
});

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub basic: BasicConfig,
    pub database: DatabaseConfig,
    pub encryption: EncryptionConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub listen_addr: String,
    pub loglevel: String,
    /// Key granted the `Administrator` role.
    pub admin_key: Option<String>,
    pub access_keys: Vec<AccessKey>,
}

/// An API key and the role it acts as.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessKey {
    pub key: String,
    pub role: String,
}

impl std::fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKey")
            .field("key", &"<redacted>")
            .field("role", &self.role)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// URL-safe base64 Fernet key. Takes precedence over `key_file`.
    pub key: Option<String>,
    pub key_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
    pub requests_per_minute: u32,
    pub user_agent: String,
    pub proxy: Option<Url>,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            loglevel: "info".to_string(),
            admin_key: None,
            access_keys: Vec::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/banking.sqlite".to_string(),
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key: None,
            key_file: PathBuf::from("data/encryption.key"),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            timeout_secs: 15,
            requests_per_minute: 10,
            user_agent: format!("banking-settings/{}", env!("CARGO_PKG_VERSION")),
            proxy: None,
        }
    }
}

impl Config {
    /// Defaults, then `path` (if present), then `BANKING_*` env vars with
    /// `__` separating sections, e.g. `BANKING_DATABASE__URL`.
    pub fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(path: &str) -> Result<Self, SettingsError> {
        Ok(Self::figment(path).extract()?)
    }
}
