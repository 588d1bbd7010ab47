//! Runtime configuration: JSON file, then environment, then flags.

use std::fmt;
use std::path::{Path, PathBuf};

use reveille_core::util::normalize_text_option;
use reveille_core::SyncConfig;
use serde::{Deserialize, Serialize};

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "config.json";
const DB_FILE_NAME: &str = "reveille.db";

pub const ENV_HUB_URL: &str = "REVEILLE_HUB_URL";
pub const ENV_AUTH_TOKEN: &str = "REVEILLE_AUTH_TOKEN";
pub const ENV_USER_ID: &str = "REVEILLE_USER_ID";
pub const ENV_DB_PATH: &str = "REVEILLE_DB_PATH";

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CliConfig {
    pub hub_url: Option<String>,
    pub auth_token: Option<String>,
    pub user_id: Option<String>,
    pub device_name: Option<String>,
    pub db_path: Option<PathBuf>,
    pub sync: SyncConfig,
}

impl fmt::Debug for CliConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliConfig")
            .field("hub_url", &self.hub_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "<redacted>"),
            )
            .field("user_id", &self.user_id)
            .field("device_name", &self.device_name)
            .field("db_path", &self.db_path)
            .field("sync", &self.sync)
            .finish()
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("reveille").join(CONFIG_FILE_NAME))
}

pub fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("reveille").join(DB_FILE_NAME))
}

impl CliConfig {
    /// Load the config file at `explicit`, or the default location.
    ///
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, CliError> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(CliError::Config(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                Self::load_from_path(path)
            }
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load_from_path(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&raw).map_err(|error| {
            CliError::Config(format!("failed to parse {}: {error}", path.display()))
        })?;
        config.normalize();
        config.sync.validate()?;
        Ok(config)
    }

    /// Override fields from `lookup` (normally the process environment)
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = normalize_text_option(lookup(ENV_HUB_URL)) {
            self.hub_url = Some(value);
        }
        if let Some(value) = normalize_text_option(lookup(ENV_AUTH_TOKEN)) {
            self.auth_token = Some(value);
        }
        if let Some(value) = normalize_text_option(lookup(ENV_USER_ID)) {
            self.user_id = Some(value);
        }
        if let Some(value) = normalize_text_option(lookup(ENV_DB_PATH)) {
            self.db_path = Some(PathBuf::from(value));
        }
    }

    pub fn apply_flags(&mut self, hub_url: Option<String>, db_path: Option<PathBuf>) {
        if let Some(value) = normalize_text_option(hub_url) {
            self.hub_url = Some(value);
        }
        if let Some(path) = db_path {
            self.db_path = Some(path);
        }
    }

    pub fn resolve_db_path(&self) -> Result<PathBuf, CliError> {
        self.db_path
            .clone()
            .or_else(default_db_path)
            .ok_or_else(|| CliError::Config("cannot resolve a data directory; pass --db-path".to_string()))
    }

    fn normalize(&mut self) {
        self.hub_url = normalize_text_option(self.hub_url.take());
        self.auth_token = normalize_text_option(self.auth_token.take());
        self.user_id = normalize_text_option(self.user_id.take());
        self.device_name = normalize_text_option(self.device_name.take());
    }
}
