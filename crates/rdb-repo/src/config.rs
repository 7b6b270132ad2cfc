use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use rdb_store::validate_component;
use rdb_txn::TxnConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Repository settings, usually loaded from a TOML file.
///
/// ```toml
/// base_ref = "main"
/// process_name = "crm-sync"
/// default_ttl_ms = 300000
/// commit_prefix = "crm"
///
/// [ttl_ms]
/// Interactions = 60000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Ref that holds committed data.
    pub base_ref: String,
    /// Names the lock sentinel written by this process.
    pub process_name: String,
    /// Cache TTL for containers without an override.
    pub default_ttl_ms: u64,
    /// Per-container cache TTL overrides.
    pub ttl_ms: BTreeMap<String, u64>,
    /// Prefix for commit messages and change request titles.
    pub commit_prefix: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        let txn = TxnConfig::default();
        Self {
            base_ref: txn.base_ref,
            process_name: txn.process_name,
            default_ttl_ms: 300_000,
            ttl_ms: BTreeMap::new(),
            commit_prefix: txn.commit_prefix,
        }
    }
}

impl RepoConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.base_ref.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "base_ref".into(),
                reason: "must not be empty".into(),
            });
        }
        validate_component(&self.process_name).map_err(|e| ConfigError::Invalid {
            field: "process_name".into(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Cache TTL for `container`.
    pub fn ttl_for(&self, container: &str) -> Duration {
        let ms = self
            .ttl_ms
            .get(container)
            .copied()
            .unwrap_or(self.default_ttl_ms);
        Duration::from_millis(ms)
    }

    /// Settings for the lock and branch layer.
    pub fn txn_config(&self) -> TxnConfig {
        TxnConfig {
            base_ref: self.base_ref.clone(),
            process_name: self.process_name.clone(),
            commit_prefix: self.commit_prefix.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config() {
        let c = RepoConfig::default();
        assert_eq!(c.base_ref, "main");
        assert_eq!(c.process_name, "rdb");
        assert_eq!(c.ttl_for("Companies"), Duration::from_secs(300));
        assert_eq!(c.txn_config(), TxnConfig::default());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = RepoConfig::from_toml_str(
            r#"
            process_name = "crm-sync"

            [ttl_ms]
            Interactions = 60000
            "#,
        )
        .unwrap();
        assert_eq!(c.base_ref, "main");
        assert_eq!(c.process_name, "crm-sync");
        assert_eq!(c.ttl_for("Interactions"), Duration::from_secs(60));
        assert_eq!(c.ttl_for("Companies"), Duration::from_secs(300));
        assert_eq!(c.txn_config().process_name, "crm-sync");
    }

    #[test]
    fn rejects_bad_process_name() {
        let err = RepoConfig::from_toml_str(r#"process_name = "a/b""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "process_name"));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = RepoConfig::from_toml_str("base_ref = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_ref = \"production\"").unwrap();
        let c = RepoConfig::from_path(file.path()).unwrap();
        assert_eq!(c.base_ref, "production");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RepoConfig::from_path(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
