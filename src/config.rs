//! Environment-based configuration
//!
//! Environment variables (all optional):
//! - LABELHOUSE_DATABASE: target database (default: metrics)
//! - LABELHOUSE_CLUSTER: cluster for ON CLUSTER and Distributed (default: monitor)
//! - LABELHOUSE_COLUMN_PREFIX: label column prefix (default: col_)
//! - LABELHOUSE_BATCH_SIZE: samples per flush cycle (default: 8192)
//! - LABELHOUSE_BATCH_TIMEOUT_MS: max wait for a full batch (default: 1000)
//! - LABELHOUSE_GROUP_PARALLELISM: metric groups committed concurrently (default: 1)

use crate::schema::RESERVED_COLUMNS;
use crate::{Config, Error, Result};
use std::time::Duration;

impl Config {
    /// Build a configuration from `LABELHOUSE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(database) = non_empty(&lookup, "LABELHOUSE_DATABASE") {
            config.schema.database = database;
        }
        if let Some(cluster) = non_empty(&lookup, "LABELHOUSE_CLUSTER") {
            config.schema.cluster = cluster;
        }
        if let Some(prefix) = lookup("LABELHOUSE_COLUMN_PREFIX") {
            config.schema.column_prefix = prefix.trim().to_string();
        }
        if let Some(size) = parse_usize(&lookup, "LABELHOUSE_BATCH_SIZE")? {
            config.dispatcher.batch_size = size;
        }
        if let Some(ms) = parse_usize(&lookup, "LABELHOUSE_BATCH_TIMEOUT_MS")? {
            config.dispatcher.batch_timeout = Duration::from_millis(ms as u64);
        }
        if let Some(parallelism) = parse_usize(&lookup, "LABELHOUSE_GROUP_PARALLELISM")? {
            config.dispatcher.group_parallelism = parallelism;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would generate invalid or colliding schemas.
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.schema.database) {
            return Err(Error::Config(format!(
                "database '{}' is not a valid identifier",
                self.schema.database
            )));
        }
        if !is_identifier(&self.schema.cluster) {
            return Err(Error::Config(format!(
                "cluster '{}' is not a valid identifier",
                self.schema.cluster
            )));
        }
        // Label keys are identifiers, so an empty prefix could yield e.g. `ts`.
        let prefix = &self.schema.column_prefix;
        if prefix.is_empty() || !is_identifier(prefix) || RESERVED_COLUMNS.contains(&prefix.as_str())
        {
            return Err(Error::Config(format!(
                "column prefix '{}' must be a non-empty identifier",
                prefix
            )));
        }
        if self.dispatcher.batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".to_string()));
        }
        if self.dispatcher.group_parallelism == 0 {
            return Err(Error::Config(
                "group parallelism must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_identifier(raw: &str) -> bool {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_usize<F>(lookup: &F, name: &str) -> Result<Option<usize>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = non_empty(lookup, name) else {
        return Ok(None);
    };
    raw.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::Config(format!("{name} must be a non-negative integer, got '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.schema.database, "metrics");
        assert_eq!(config.schema.column_prefix, "col_");
        assert_eq!(config.dispatcher.batch_size, 8192);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("LABELHOUSE_DATABASE", "prom"),
            ("LABELHOUSE_CLUSTER", "edge"),
            ("LABELHOUSE_COLUMN_PREFIX", "ch_"),
            ("LABELHOUSE_BATCH_SIZE", "100"),
            ("LABELHOUSE_BATCH_TIMEOUT_MS", "250"),
            ("LABELHOUSE_GROUP_PARALLELISM", "4"),
        ]))
        .unwrap();

        assert_eq!(config.schema.database, "prom");
        assert_eq!(config.schema.cluster, "edge");
        assert_eq!(config.schema.column_prefix, "ch_");
        assert_eq!(config.dispatcher.batch_size, 100);
        assert_eq!(config.dispatcher.batch_timeout, Duration::from_millis(250));
        assert_eq!(config.dispatcher.group_parallelism, 4);
    }

    #[test]
    fn test_rejects_bad_values() {
        for vars in [
            [("LABELHOUSE_BATCH_SIZE", "lots")],
            [("LABELHOUSE_BATCH_SIZE", "0")],
            [("LABELHOUSE_GROUP_PARALLELISM", "0")],
            [("LABELHOUSE_COLUMN_PREFIX", "")],
            [("LABELHOUSE_DATABASE", "my-db")],
        ] {
            let err = Config::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{vars:?} gave {err}");
        }
    }
}
