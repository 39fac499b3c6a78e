//! Runtime settings.
//!
//! Resolution order: built-in defaults, then `AUGUR_*` environment
//! variables, then command-line flags (applied by the binary).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::consts::{API_KEY_ENV, DEFAULT_MODEL, default_cache_db_path, default_instructions_dir};

/// Default per-capability timeout.
pub const DEFAULT_CAPABILITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Default lifetime of finished runs in the status store.
pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default bound on in-memory cached reports.
pub const DEFAULT_CACHE_CAPACITY: u64 = 1024;

/// Where finished reports are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CacheBackend {
    /// Process memory, lost on restart.
    Memory,
    /// SQLite file, survives restarts.
    Sqlite,
}

impl FromStr for CacheBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Ok(CacheBackend::Memory),
            "sqlite" => Ok(CacheBackend::Sqlite),
            other => bail!("unknown cache backend: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub model: String,
    pub api_key: Option<String>,
    pub instructions_dir: PathBuf,
    pub cache_backend: CacheBackend,
    /// Bound for the in-memory cache. `None` is unbounded.
    pub cache_capacity: Option<u64>,
    pub cache_db: PathBuf,
    pub capability_timeout: Option<Duration>,
    /// How long finished runs stay pollable. `None` keeps them forever.
    pub status_ttl: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            instructions_dir: default_instructions_dir(),
            cache_backend: CacheBackend::Memory,
            cache_capacity: Some(DEFAULT_CACHE_CAPACITY),
            cache_db: default_cache_db_path(),
            capability_timeout: Some(DEFAULT_CAPABILITY_TIMEOUT),
            status_ttl: Some(DEFAULT_STATUS_TTL),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable source. Empty values are
    /// treated as unset. Zero disables a timeout, TTL or capacity.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut settings = Self::default();

        if let Some(model) = var("AUGUR_MODEL") {
            settings.model = model;
        }
        settings.api_key = var(API_KEY_ENV);
        if let Some(dir) = var("AUGUR_INSTRUCTIONS_DIR") {
            settings.instructions_dir = PathBuf::from(dir);
        }
        if let Some(backend) = var("AUGUR_CACHE") {
            settings.cache_backend = backend.parse()?;
        }
        if let Some(capacity) = var("AUGUR_CACHE_CAPACITY") {
            settings.cache_capacity = non_zero(parse_number("AUGUR_CACHE_CAPACITY", &capacity)?);
        }
        if let Some(path) = var("AUGUR_CACHE_DB") {
            settings.cache_db = PathBuf::from(path);
        }
        if let Some(secs) = var("AUGUR_CAPABILITY_TIMEOUT_SECS") {
            settings.capability_timeout =
                seconds(parse_number("AUGUR_CAPABILITY_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = var("AUGUR_STATUS_TTL_SECS") {
            settings.status_ttl = seconds(parse_number("AUGUR_STATUS_TTL_SECS", &secs)?);
        }
        Ok(settings)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a non-negative integer, got {value:?}"))
}

/// `None` for zero.
pub fn non_zero(value: u64) -> Option<u64> {
    (value > 0).then_some(value)
}

/// Whole seconds as a duration, `None` for zero.
pub fn seconds(value: u64) -> Option<Duration> {
    non_zero(value).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert!(settings.api_key.is_none());
        assert_eq!(settings.cache_backend, CacheBackend::Memory);
        assert_eq!(settings.cache_capacity, Some(DEFAULT_CACHE_CAPACITY));
        assert_eq!(settings.capability_timeout, Some(DEFAULT_CAPABILITY_TIMEOUT));
        assert_eq!(settings.status_ttl, Some(DEFAULT_STATUS_TTL));
    }

    #[test]
    fn env_overrides_defaults() {
        let settings = Settings::from_lookup(lookup(&[
            ("AUGUR_MODEL", "claude-opus-4-20250514"),
            (API_KEY_ENV, "sk-test"),
            ("AUGUR_INSTRUCTIONS_DIR", "/srv/instructions"),
            ("AUGUR_CACHE", "sqlite"),
            ("AUGUR_CACHE_DB", "/tmp/reports.db"),
            ("AUGUR_CACHE_CAPACITY", "10"),
            ("AUGUR_CAPABILITY_TIMEOUT_SECS", "30"),
            ("AUGUR_STATUS_TTL_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(settings.model, "claude-opus-4-20250514");
        assert_eq!(settings.api_key.as_deref(), Some("sk-test"));
        assert_eq!(settings.instructions_dir, PathBuf::from("/srv/instructions"));
        assert_eq!(settings.cache_backend, CacheBackend::Sqlite);
        assert_eq!(settings.cache_db, PathBuf::from("/tmp/reports.db"));
        assert_eq!(settings.cache_capacity, Some(10));
        assert_eq!(settings.capability_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.status_ttl, Some(Duration::from_secs(60)));
    }

    #[test]
    fn zero_disables_limits() {
        let settings = Settings::from_lookup(lookup(&[
            ("AUGUR_CACHE_CAPACITY", "0"),
            ("AUGUR_CAPABILITY_TIMEOUT_SECS", "0"),
            ("AUGUR_STATUS_TTL_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(settings.cache_capacity, None);
        assert_eq!(settings.capability_timeout, None);
        assert_eq!(settings.status_ttl, None);
    }

    #[test]
    fn empty_values_are_ignored() {
        let settings =
            Settings::from_lookup(lookup(&[("AUGUR_MODEL", ""), (API_KEY_ENV, "  ")])).unwrap();
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn invalid_number_is_an_error() {
        let err = Settings::from_lookup(lookup(&[("AUGUR_STATUS_TTL_SECS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("AUGUR_STATUS_TTL_SECS"));
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let err = Settings::from_lookup(lookup(&[("AUGUR_CACHE", "redis")])).unwrap_err();
        assert!(err.to_string().contains("redis"));
    }
}
