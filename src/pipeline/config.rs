//! Run configuration from environment variables
//!
//! Environment variables (all optional):
//! - `TOMOFLOW_OUTPUT` (default: tomography_output) - output base name, no extension
//! - `TOMOFLOW_BACKEND` (default: sqlite) - `sqlite` or `jsonl`
//! - `TOMOFLOW_EVENTS` (default: 1000)
//! - `TOMOFLOW_WORKERS` (default: 1) - more than one runs the sharded pipeline
//! - `TOMOFLOW_SEED` (default: 12345)
//! - `TOMOFLOW_PRIMARY` (default: mu-)
//! - `TOMOFLOW_CELLS_PER_SIDE` (default: 8)
//! - `TOMOFLOW_FLUSH_POLICY` (default: event-index) - `event-index` or `rows:<N>`
//! - `TOMOFLOW_CHANNEL_BUFFER` (default: 10000) - sink channel capacity in messages

use super::scheduler::FlushPolicyKind;
use crate::sink::BackendType;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub output_base: PathBuf,
    pub backend: BackendType,
    pub events: u32,
    pub workers: usize,
    pub seed: u64,
    pub primary_particle: String,
    pub cells_per_side: u32,
    pub flush_policy: FlushPolicyKind,
    pub channel_buffer: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_base: PathBuf::from("tomography_output"),
            backend: BackendType::Sqlite,
            events: 1000,
            workers: 1,
            seed: 12345,
            primary_particle: "mu-".to_string(),
            cells_per_side: 8,
            flush_policy: FlushPolicyKind::EventIndex,
            channel_buffer: 10_000,
        }
    }
}

impl RunConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let output_base = lookup("TOMOFLOW_OUTPUT")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_base);

        let backend = match lookup("TOMOFLOW_BACKEND") {
            Some(value) => value.parse::<BackendType>()?,
            None => defaults.backend,
        };

        let events = parse_var(&lookup, "TOMOFLOW_EVENTS", defaults.events)?;
        let workers = parse_var(&lookup, "TOMOFLOW_WORKERS", defaults.workers)?;
        let seed = parse_var(&lookup, "TOMOFLOW_SEED", defaults.seed)?;
        let cells_per_side = parse_var(&lookup, "TOMOFLOW_CELLS_PER_SIDE", defaults.cells_per_side)?;
        let channel_buffer = parse_var(&lookup, "TOMOFLOW_CHANNEL_BUFFER", defaults.channel_buffer)?;

        let primary_particle = lookup("TOMOFLOW_PRIMARY").unwrap_or(defaults.primary_particle);

        let flush_policy = match lookup("TOMOFLOW_FLUSH_POLICY") {
            Some(value) => parse_flush_policy(&value)?,
            None => defaults.flush_policy,
        };

        let config = Self {
            output_base,
            backend,
            events,
            workers,
            seed,
            primary_particle,
            cells_per_side,
            flush_policy,
            channel_buffer,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidValue(
                "TOMOFLOW_WORKERS must be at least 1".to_string(),
            ));
        }
        if self.cells_per_side == 0 {
            return Err(ConfigError::InvalidValue(
                "TOMOFLOW_CELLS_PER_SIDE must be at least 1".to_string(),
            ));
        }
        if self.channel_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "TOMOFLOW_CHANNEL_BUFFER must be at least 1".to_string(),
            ));
        }
        if self.primary_particle.is_empty() {
            return Err(ConfigError::InvalidValue(
                "TOMOFLOW_PRIMARY cannot be empty".to_string(),
            ));
        }
        if self.events > i32::MAX as u32 {
            return Err(ConfigError::InvalidValue(format!(
                "TOMOFLOW_EVENTS must fit a 32-bit event id, got {}",
                self.events
            )));
        }
        Ok(())
    }

    /// `--backend <sqlite|jsonl>` from the command line, if present.
    pub fn parse_backend_from_args() -> Option<BackendType> {
        let args: Vec<String> = env::args().collect();
        backend_from_args(&args)
    }
}

fn backend_from_args(args: &[String]) -> Option<BackendType> {
    let idx = args.iter().position(|x| x == "--backend")?;
    match args.get(idx + 1).map(|s| s.as_str()) {
        Some("sqlite") => Some(BackendType::Sqlite),
        Some("jsonl") => Some(BackendType::Jsonl),
        other => {
            log::warn!("Ignoring unknown --backend value {:?}", other);
            None
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", key, raw))),
        None => Ok(default),
    }
}

fn parse_flush_policy(value: &str) -> Result<FlushPolicyKind, ConfigError> {
    let value = value.trim();
    if value == "event-index" {
        return Ok(FlushPolicyKind::EventIndex);
    }

    match value.strip_prefix("rows:").map(|n| n.parse::<usize>()) {
        Some(Ok(max_rows)) if max_rows > 0 => Ok(FlushPolicyKind::BufferedRows(max_rows)),
        _ => Err(ConfigError::InvalidValue(format!(
            "TOMOFLOW_FLUSH_POLICY={} (expected event-index or rows:<N>)",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        // Test: Default configuration when no variables are set
        let config = RunConfig::from_lookup(|_| None).unwrap();

        assert_eq!(config.output_base, PathBuf::from("tomography_output"));
        assert_eq!(config.backend, BackendType::Sqlite);
        assert_eq!(config.events, 1000);
        assert_eq!(config.workers, 1);
        assert_eq!(config.seed, 12345);
        assert_eq!(config.primary_particle, "mu-");
        assert_eq!(config.cells_per_side, 8);
        assert_eq!(config.flush_policy, FlushPolicyKind::EventIndex);
        assert_eq!(config.channel_buffer, 10_000);
    }

    #[test]
    fn test_custom_config() {
        let config = RunConfig::from_lookup(lookup_from(&[
            ("TOMOFLOW_OUTPUT", "/tmp/run7"),
            ("TOMOFLOW_BACKEND", "jsonl"),
            ("TOMOFLOW_EVENTS", "250"),
            ("TOMOFLOW_WORKERS", "4"),
            ("TOMOFLOW_FLUSH_POLICY", "rows:5000"),
        ]))
        .unwrap();

        assert_eq!(config.output_base, PathBuf::from("/tmp/run7"));
        assert_eq!(config.backend, BackendType::Jsonl);
        assert_eq!(config.events, 250);
        assert_eq!(config.workers, 4);
        assert_eq!(config.flush_policy, FlushPolicyKind::BufferedRows(5000));
    }

    #[test]
    fn test_invalid_values_rejected() {
        for pairs in [
            [("TOMOFLOW_EVENTS", "many")],
            [("TOMOFLOW_WORKERS", "0")],
            [("TOMOFLOW_BACKEND", "parquet")],
            [("TOMOFLOW_FLUSH_POLICY", "rows:0")],
            [("TOMOFLOW_FLUSH_POLICY", "hourly")],
        ] {
            assert!(
                matches!(
                    RunConfig::from_lookup(lookup_from(&pairs)),
                    Err(ConfigError::InvalidValue(_))
                ),
                "{:?} should be rejected",
                pairs
            );
        }
    }

    #[test]
    fn test_backend_flag() {
        let args: Vec<String> = ["tomoflow_run", "--backend", "jsonl"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(backend_from_args(&args), Some(BackendType::Jsonl));

        let args = vec!["tomoflow_run".to_string()];
        assert_eq!(backend_from_args(&args), None);
    }
}
