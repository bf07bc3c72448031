use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::auth::PolicyConfig;
use crate::storage::{Backend, StoreConfig};

pub const DB_PATH_ENV: &str = "PODHUB_DB_PATH";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PodhubConfig {
    pub db_path: PathBuf,
    pub backend: Backend,
    pub log_level: String,
    pub policy: PolicyConfig,
}

impl Default for PodhubConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("podhub.db"),
            backend: Backend::Sled,
            log_level: "info".to_string(),
            policy: PolicyConfig::default(),
        }
    }
}

impl PodhubConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&text)
    }

    /// `PODHUB_DB_PATH` wins over the file value.
    pub fn apply_env(mut self) -> Self {
        if let Ok(path) = std::env::var(DB_PATH_ENV) {
            if !path.trim().is_empty() {
                self.db_path = PathBuf::from(path);
            }
        }
        self
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig { backend: self.backend, path: self.db_path.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = PodhubConfig::from_toml_str(
            r#"
            backend = "memory"

            [policy]
            claim_roles = ["editor", "host"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.backend, Backend::Memory);
        assert_eq!(cfg.db_path, PathBuf::from("podhub.db"));
        assert_eq!(cfg.policy.claim_roles, vec!["editor", "host"]);
        assert_eq!(cfg.policy.admin_roles, vec!["admin"]);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(matches!(PodhubConfig::from_toml_str("backend = \"postgres\""), Err(ConfigError::Parse(_))));
    }

    // The only test that touches the process environment.
    #[test]
    fn db_path_env_overrides_file() {
        let file = PodhubConfig::from_toml_str("db_path = \"from-file.db\"").unwrap();

        std::env::set_var(DB_PATH_ENV, "   ");
        assert_eq!(file.clone().apply_env().db_path, PathBuf::from("from-file.db"));

        std::env::set_var(DB_PATH_ENV, "/var/lib/podhub/env.db");
        let cfg = file.clone().apply_env();
        std::env::remove_var(DB_PATH_ENV);

        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/podhub/env.db"));
        assert_eq!(cfg.store_config().path, PathBuf::from("/var/lib/podhub/env.db"));
        assert_eq!(file.apply_env().db_path, PathBuf::from("from-file.db"));
    }

    #[test]
    fn missing_file() {
        let err = PodhubConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
