// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration.
//!
//! Values come from an optional TOML file (`REDUB_CONFIG`) with
//! `REDUB_*` environment variables taking precedence. In production mode
//! the initial admin credentials are mandatory and startup fails without
//! them.

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// File-format view of the configuration; every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    port: Option<u16>,
    state_dir: Option<PathBuf>,
    media_root: Option<PathBuf>,
    min_free_space_gb: Option<f64>,
    jwt_secret: Option<String>,
    jwt_expires_secs: Option<u64>,
    admin_username: Option<String>,
    admin_password: Option<String>,
    download_concurrency: Option<u32>,
    dubbing_concurrency: Option<u32>,
    muxing_concurrency: Option<u32>,
    default_target_lang: Option<String>,
    default_container: Option<String>,
    default_format_preset: Option<String>,
    ducking_level: Option<f64>,
    normalization_lufs: Option<f64>,
    production: Option<bool>,
}

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Control API listen port.
    pub port: u16,
    /// Journal, snapshot, lock and log location.
    pub state_dir: PathBuf,
    /// Filesystem root for `incomplete/` and `complete/`.
    pub media_root: PathBuf,
    /// Creation rejected below this much free space.
    pub min_free_space_gb: f64,
    pub jwt_secret: String,
    pub jwt_expires_secs: u64,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub download_concurrency: u32,
    pub dubbing_concurrency: u32,
    pub muxing_concurrency: u32,
    pub default_target_lang: String,
    pub default_container: String,
    pub default_format_preset: String,
    pub ducking_level: f64,
    pub normalization_lufs: f64,
    /// Strict mode: admin credentials required at startup.
    pub production: bool,
}

impl Config {
    /// Load from `REDUB_CONFIG` (if set) and the `REDUB_*` environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var_os("REDUB_CONFIG") {
            Some(path) => {
                let path = PathBuf::from(path);
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file)
    }

    fn resolve(file: ConfigFile) -> Result<Self, ConfigError> {
        let config = Self {
            port: env_parse("REDUB_PORT")?.or(file.port).unwrap_or(8750),
            state_dir: env_path("REDUB_STATE_DIR")
                .or(file.state_dir)
                .or_else(default_state_dir)
                .ok_or(ConfigError::Missing("state_dir"))?,
            media_root: env_path("REDUB_MEDIA_ROOT")
                .or(file.media_root)
                .ok_or(ConfigError::Missing("media_root"))?,
            min_free_space_gb: env_parse("REDUB_MIN_FREE_SPACE_GB")?
                .or(file.min_free_space_gb)
                .unwrap_or(5.0),
            jwt_secret: env_string("REDUB_JWT_SECRET")
                .or(file.jwt_secret)
                .ok_or(ConfigError::Missing("jwt_secret"))?,
            jwt_expires_secs: env_parse("REDUB_JWT_EXPIRES_SECS")?
                .or(file.jwt_expires_secs)
                .unwrap_or(86_400),
            admin_username: env_string("REDUB_ADMIN_USERNAME").or(file.admin_username),
            admin_password: env_string("REDUB_ADMIN_PASSWORD").or(file.admin_password),
            download_concurrency: env_parse("REDUB_DOWNLOAD_CONCURRENCY")?
                .or(file.download_concurrency)
                .unwrap_or(1),
            dubbing_concurrency: env_parse("REDUB_DUBBING_CONCURRENCY")?
                .or(file.dubbing_concurrency)
                .unwrap_or(2),
            muxing_concurrency: env_parse("REDUB_MUXING_CONCURRENCY")?
                .or(file.muxing_concurrency)
                .unwrap_or(1),
            default_target_lang: env_string("REDUB_DEFAULT_TARGET_LANG")
                .or(file.default_target_lang)
                .unwrap_or_else(|| "ru".to_string()),
            default_container: env_string("REDUB_DEFAULT_CONTAINER")
                .or(file.default_container)
                .unwrap_or_else(|| "mp4".to_string()),
            default_format_preset: env_string("REDUB_DEFAULT_FORMAT_PRESET")
                .or(file.default_format_preset)
                .unwrap_or_else(|| "best".to_string()),
            ducking_level: env_parse("REDUB_DUCKING_LEVEL")?
                .or(file.ducking_level)
                .unwrap_or(0.3),
            normalization_lufs: env_parse("REDUB_NORMALIZATION_LUFS")?
                .or(file.normalization_lufs)
                .unwrap_or(-16.0),
            production: env_parse("REDUB_PRODUCTION")?
                .or(file.production)
                .unwrap_or(false),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.ducking_level) {
            return Err(ConfigError::Invalid {
                key: "ducking_level",
                message: format!("must be within 0..=1, got {}", self.ducking_level),
            });
        }
        if self.dubbing_concurrency == 0 || self.muxing_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "concurrency",
                message: "queue concurrency must be at least 1".to_string(),
            });
        }
        // Do not guess at admin credentials in production: both or fail.
        if self.production && (self.admin_username.is_none() || self.admin_password.is_none()) {
            return Err(ConfigError::Missing(
                "admin_username/admin_password (required in production)",
            ));
        }
        Ok(())
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("redubd.pid")
    }

    pub fn log_path(&self) -> PathBuf {
        self.state_dir.join("redubd.log")
    }
}

fn env_string(key: &'static str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_path(key: &'static str) -> Option<PathBuf> {
    env_string(key).map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
            key,
            message: e.to_string(),
        }),
    }
}

/// `$XDG_STATE_HOME/redub` or `~/.local/state/redub`.
fn default_state_dir() -> Option<PathBuf> {
    if let Some(xdg) = env_path("XDG_STATE_HOME") {
        return Some(xdg.join("redub"));
    }
    env_path("HOME").map(|home| home.join(".local/state/redub"))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
