//! Configuration management for GeoNet
//!
//! Handles loading and layering of configuration files for:
//! - Configured region codes and the default bootstrap region
//! - AWS profile and image owner id
//! - Connection retry policy
//! - Local data directory for persisted state

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as Yaml;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GeoNetError, Result};
use crate::timez::{resolve_timezone, Timezone};
use crate::utils::{expand_tilde, user_data_dir};

/// System wide configuration, read first
pub const SYSTEM_CONFIG: &str = "/etc/geonet.yml";

pub const REGIONS_FILE: &str = "regions.json";
pub const INSTANCES_FILE: &str = "instances.json";

/// AWS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSettings {
    /// Region used for bootstrap calls such as listing regions
    pub region: String,
    pub profile: Option<String>,
    /// Image owner filter applied to image listings
    pub owner_id: Option<String>,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            profile: None,
            owner_id: None,
        }
    }
}

/// Per-region connection retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            attempts: 4,
            backoff_ms: 500,
        }
    }
}

impl ConnectionSettings {
    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// Main configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub debug: bool,
    pub timezone: String,
    pub instance_type: String,
    pub regions: Vec<String>,
    pub aws: AwsSettings,
    pub connection: ConnectionSettings,
    pub data_dir: Option<String>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            debug: false,
            timezone: "UTC".to_string(),
            instance_type: "t2.micro".to_string(),
            regions: vec![
                "us-east-1".to_string(),
                "us-east-2".to_string(),
                "us-west-1".to_string(),
                "us-west-2".to_string(),
            ],
            aws: AwsSettings::default(),
            connection: ConnectionSettings::default(),
            data_dir: None,
        }
    }
}

/// Application configuration, constructed once and shared by reference
#[derive(Debug, Clone)]
pub struct AppConfig {
    config: ConfigFile,
    timezone: Timezone,
    sources: Vec<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the standard search path and the environment
    pub fn load() -> Result<Self> {
        let mut paths = vec![PathBuf::from(SYSTEM_CONFIG)];
        paths.push(user_data_dir().join("config.yml"));
        Self::load_from(&paths, |key| std::env::var(key).ok())
    }

    /// Layer every existing file in `paths` over the defaults; later files win.
    ///
    /// `env` resolves environment overrides, so callers can isolate tests
    /// from the process environment.
    pub fn load_from<F>(paths: &[PathBuf], env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = serde_yaml::to_value(ConfigFile::default())?;
        let mut sources = Vec::new();

        for path in paths.iter().filter(|p| p.exists()) {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let layer: Yaml = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            merge_yaml(&mut merged, layer);
            sources.push(path.clone());
        }

        let mut config: ConfigFile = serde_yaml::from_value(merged)?;
        apply_env(&mut config, env);
        Self::build(config, sources)
    }

    /// Parse a single YAML document layered over the defaults
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut merged = serde_yaml::to_value(ConfigFile::default())?;
        merge_yaml(&mut merged, serde_yaml::from_str(content)?);
        Self::build(serde_yaml::from_value(merged)?, Vec::new())
    }

    pub fn from_file(config: ConfigFile) -> Result<Self> {
        Self::build(config, Vec::new())
    }

    fn build(config: ConfigFile, sources: Vec<PathBuf>) -> Result<Self> {
        let timezone = resolve_timezone(&config.timezone)?;
        Ok(Self {
            config,
            timezone,
            sources,
        })
    }

    /// Fail fast on configuration the rest of the tool cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.config.regions.is_empty() {
            return Err(GeoNetError::Configuration(
                "no regions configured: set `regions` or GEONET_REGIONS".to_string(),
            ));
        }
        if self.config.aws.region.trim().is_empty() {
            return Err(GeoNetError::Configuration(
                "no default AWS region configured".to_string(),
            ));
        }
        if self.config.connection.attempts == 0 {
            return Err(GeoNetError::Configuration(
                "connection.attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn file(&self) -> &ConfigFile {
        &self.config
    }

    /// Files that contributed to this configuration, in load order
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn debug(&self) -> bool {
        self.config.debug
    }

    pub fn timezone(&self) -> Timezone {
        self.timezone
    }

    pub fn instance_type(&self) -> &str {
        &self.config.instance_type
    }

    pub fn regions(&self) -> &[String] {
        &self.config.regions
    }

    pub fn is_configured(&self, region: &str) -> bool {
        self.config.regions.iter().any(|r| r == region)
    }

    pub fn aws(&self) -> &AwsSettings {
        &self.config.aws
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.config.aws.owner_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn connection(&self) -> ConnectionSettings {
        self.config.connection
    }

    pub fn data_dir(&self) -> PathBuf {
        match &self.config.data_dir {
            Some(dir) => expand_tilde(dir),
            None => user_data_dir(),
        }
    }

    pub fn regions_path(&self) -> PathBuf {
        self.data_dir().join(REGIONS_FILE)
    }

    pub fn instances_path(&self) -> PathBuf {
        self.data_dir().join(INSTANCES_FILE)
    }

    /// Override the configured regions
    pub fn with_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.regions = regions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_data_dir(mut self, dir: &Path) -> Self {
        self.config.data_dir = Some(dir.to_string_lossy().into_owned());
        self
    }

    pub fn with_connection(mut self, connection: ConnectionSettings) -> Self {
        self.config.connection = connection;
        self
    }

    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.config.aws.owner_id = Some(owner_id.into());
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config: ConfigFile::default(),
            timezone: Timezone::utc(),
            sources: Vec::new(),
        }
    }
}

fn apply_env<F>(config: &mut ConfigFile, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(regions) = env("GEONET_REGIONS") {
        config.regions = regions
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(region) = env("GEONET_AWS_REGION") {
        config.aws.region = region;
    }
    if let Some(profile) = env("AWS_PROFILE") {
        config.aws.profile = Some(profile);
    }
    if let Some(owner) = env("GEONET_OWNER_ID") {
        config.aws.owner_id = Some(owner);
    }
    if let Some(dir) = env("GEONET_DATA") {
        config.data_dir = Some(dir);
    }
}

/// Recursively merge `overlay` into `base`; mappings merge key by key,
/// anything else replaces.
fn merge_yaml(base: &mut Yaml, overlay: Yaml) {
    match (base, overlay) {
        (Yaml::Mapping(base), Yaml::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (_, Yaml::Null) => {}
        (base, overlay) => *base = overlay,
    }
}
