// Copyright (c) 2023 University of New Hampshire
// SPDX-License-Identifier: MIT

//! Runtime configuration (SPEC_FULL.md §10.4), grounded directly on
//! `config/src/lib.rs`'s `LibLaaSConfig`/`LoggingConfig`/`CONFIG`/`settings()`
//! shape, trimmed to the fields this engine actually reads.

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub level: i32,

    #[serde(default = "default_prune")]
    pub prune: bool,

    #[serde(default)]
    pub output: Option<String>,

    #[serde(default)]
    pub library_paths: Vec<String>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_workers() -> usize {
    4
}

fn default_prune() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            workers: default_workers(),
            level: 0,
            prune: default_prune(),
            output: None,
            library_paths: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
    Off,
}

impl<'de> Deserialize<'de> for LoggingLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = String::deserialize(deserializer)?;
        Ok(match v.to_uppercase().as_str() {
            "ERROR" => Self::Error,
            "WARN" => Self::Warn,
            "INFO" => Self::Info,
            "DEBUG" => Self::Debug,
            "TRACE" => Self::Trace,
            "OFF" => Self::Off,
            other => Err(serde::de::Error::custom(format!(
                "unknown log level `{other}`"
            )))?,
        })
    }
}

impl From<LoggingLevel> for LevelFilter {
    fn from(value: LoggingLevel) -> Self {
        match value {
            LoggingLevel::Error => LevelFilter::ERROR,
            LoggingLevel::Warn => LevelFilter::WARN,
            LoggingLevel::Info => LevelFilter::INFO,
            LoggingLevel::Debug => LevelFilter::DEBUG,
            LoggingLevel::Trace => LevelFilter::TRACE,
            LoggingLevel::Off => LevelFilter::OFF,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub log_file: Option<String>,

    #[serde(default)]
    pub max_level: LoggingLevel,
}

static CONFIG: once_cell::sync::Lazy<Settings> = once_cell::sync::Lazy::new(|| {
    let path = std::env::var("ENGINE_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    if !std::path::Path::new(&path).exists() {
        return Settings::default();
    }
    config::Config::builder()
        .add_source(config::File::with_name(&path))
        .build()
        .expect("couldn't load config file")
        .try_deserialize()
        .expect("couldn't load config file, invalid format")
});

/// The process-wide configuration, loaded once from `$ENGINE_CONFIG`
/// (default `config.yaml`) if present, falling back to defaults otherwise —
/// unlike the teacher, a missing config file isn't fatal since every field
/// here has a sensible default.
pub fn settings() -> &'static Settings {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_standalone() {
        let s = Settings::default();
        assert_eq!(s.workers, 4);
        assert!(s.prune);
    }
}
