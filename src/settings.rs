// src/settings.rs
//
// Hot-reloadable disk settings.
//
// A DiskSettings value is never mutated: a reload builds a fresh snapshot and
// swaps it into the SettingsHolder. Operations grab an Arc<DiskSettings> once
// when they start and keep it for their whole life.

use arc_swap::ArcSwap;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;

use crate::constants::{
    DEFAULT_MAX_SINGLE_DOWNLOAD_RETRIES, DEFAULT_MAX_SINGLE_PART_UPLOAD_SIZE,
    DEFAULT_MAX_SINGLE_READ_RETRIES, DEFAULT_MIN_BYTES_FOR_SEEK, DEFAULT_THREAD_POOL_SIZE,
    ENV_PREFIX,
};
use crate::error::DiskError;

/// Immutable settings snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSettings {
    /// Upper bound for one staged block, in bytes.
    pub max_single_part_upload_size: usize,
    /// Forward seeks shorter than this are served by reading and discarding.
    pub min_bytes_for_seek: u64,
    /// Attempts for reading from an open download stream.
    pub max_single_read_retries: usize,
    /// Attempts for (re)opening a ranged download.
    pub max_single_download_retries: usize,
    /// Size of the asynchronous read pool.
    pub thread_pool_size: usize,
}

impl Default for DiskSettings {
    fn default() -> Self {
        Self {
            max_single_part_upload_size: DEFAULT_MAX_SINGLE_PART_UPLOAD_SIZE,
            min_bytes_for_seek: DEFAULT_MIN_BYTES_FOR_SEEK,
            max_single_read_retries: DEFAULT_MAX_SINGLE_READ_RETRIES,
            max_single_download_retries: DEFAULT_MAX_SINGLE_DOWNLOAD_RETRIES,
            thread_pool_size: DEFAULT_THREAD_POOL_SIZE,
        }
    }
}

impl DiskSettings {
    /// Build a snapshot from configuration, filling unset values with defaults.
    pub fn from_config(cfg: &DiskConfig) -> Result<Self, DiskError> {
        let defaults = Self::default();
        let settings = Self {
            max_single_part_upload_size: cfg
                .max_single_part_upload_size
                .unwrap_or(defaults.max_single_part_upload_size),
            min_bytes_for_seek: cfg.min_bytes_for_seek.unwrap_or(defaults.min_bytes_for_seek),
            max_single_read_retries: cfg
                .max_single_read_retries
                .unwrap_or(defaults.max_single_read_retries),
            max_single_download_retries: cfg
                .max_single_download_retries
                .unwrap_or(defaults.max_single_download_retries),
            thread_pool_size: cfg.thread_pool_size.unwrap_or(defaults.thread_pool_size),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), DiskError> {
        if self.max_single_part_upload_size == 0 {
            return Err(DiskError::Configuration(
                "max_single_part_upload_size must be > 0".into(),
            ));
        }
        if self.max_single_read_retries == 0 {
            return Err(DiskError::Configuration(
                "max_single_read_retries must be >= 1".into(),
            ));
        }
        if self.max_single_download_retries == 0 {
            return Err(DiskError::Configuration(
                "max_single_download_retries must be >= 1".into(),
            ));
        }
        if self.thread_pool_size == 0 {
            return Err(DiskError::Configuration("thread_pool_size must be >= 1".into()));
        }
        Ok(())
    }
}

/// Configuration surface for one disk. Unset fields fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    pub max_single_part_upload_size: Option<usize>,
    pub min_bytes_for_seek: Option<u64>,
    pub max_single_read_retries: Option<usize>,
    pub max_single_download_retries: Option<usize>,
    pub thread_pool_size: Option<usize>,
}

impl DiskConfig {
    /// Read `BLOBDISK_<DISK>_<FIELD>` variables from the process environment.
    pub fn from_env(disk_name: &str) -> Result<Self, DiskError> {
        Self::from_lookup(disk_name, |key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(disk_name: &str, lookup: F) -> Result<Self, DiskError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = env_prefix(disk_name);
        let get = |field: &str| lookup(&format!("{prefix}_{}", field.to_ascii_uppercase()));

        Ok(Self {
            max_single_part_upload_size: parse_opt(
                get("max_single_part_upload_size"),
                "max_single_part_upload_size",
            )?,
            min_bytes_for_seek: parse_opt(get("min_bytes_for_seek"), "min_bytes_for_seek")?,
            max_single_read_retries: parse_opt(
                get("max_single_read_retries"),
                "max_single_read_retries",
            )?,
            max_single_download_retries: parse_opt(
                get("max_single_download_retries"),
                "max_single_download_retries",
            )?,
            thread_pool_size: parse_opt(get("thread_pool_size"), "thread_pool_size")?,
        })
    }
}

fn env_prefix(disk_name: &str) -> String {
    let disk: String = disk_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{ENV_PREFIX}_{disk}")
}

fn parse_opt<T: FromStr>(raw: Option<String>, field: &str) -> Result<Option<T>, DiskError> {
    match raw {
        None => Ok(None),
        Some(s) => s
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| DiskError::Configuration(format!("{field}: cannot parse '{s}'"))),
    }
}

/// Atomically swappable holder of the active settings snapshot.
pub struct SettingsHolder {
    current: ArcSwap<DiskSettings>,
}

impl SettingsHolder {
    pub fn new(settings: DiskSettings) -> Self {
        Self { current: ArcSwap::from_pointee(settings) }
    }

    /// Snapshot for one operation; later reloads do not affect it.
    pub fn get(&self) -> Arc<DiskSettings> {
        self.current.load_full()
    }

    pub fn set(&self, settings: DiskSettings) {
        self.current.store(Arc::new(settings));
    }
}

impl std::fmt::Debug for SettingsHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SettingsHolder").field(&*self.current.load()).finish()
    }
}
