//! Server configuration, read from `config.json` when present.

use crate::cache::TileCacheConfig;
use crate::geometry::{Bounds, Plane};
use crate::restriction::SlopeSet;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Largest viewport radius whose `(2r + 1)^2` window cells fit a `u32` index.
pub const MAX_VIEWPORT_RADIUS: i32 = 32_767;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config: {0}")]
    Io(#[from] io::Error),

    #[error("Could not parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlopePreset {
    Standard,
    Extended,
}

/// Either a preset name or an explicit list of `[dx, dy]` directions.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SlopeConfig {
    Preset(SlopePreset),
    Custom(SlopeSet),
}

impl SlopeConfig {
    pub fn resolve(&self) -> SlopeSet {
        match self {
            SlopeConfig::Preset(SlopePreset::Standard) => SlopeSet::standard(),
            SlopeConfig::Preset(SlopePreset::Extended) => SlopeSet::extended(),
            SlopeConfig::Custom(set) => set.clone(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    /// Inclusive coordinate range on both axes.
    pub world_min: i32,
    pub world_max: i32,
    pub tile_size: u32,
    pub cache_ttl_secs: u64,
    pub cache_refresh_secs: u64,
    pub cache_max_entries: usize,
    /// Client-side cache lifetime advertised with each tile.
    pub tile_max_age_secs: u16,
    /// Durable tile directory; tiles stay in memory only when unset.
    pub tile_dir: Option<PathBuf>,
    pub save_file: PathBuf,
    pub viewport_radius: i32,
    pub slopes: SlopeConfig,
    /// Treat an empty marker set as a single marker at the world origin.
    pub seed_world_origin: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: "0.0.0.0:2532".to_string(),
            world_min: -1000,
            world_max: 1000,
            tile_size: 64,
            cache_ttl_secs: 30,
            cache_refresh_secs: 20,
            cache_max_entries: 1024,
            tile_max_age_secs: 10,
            tile_dir: Some(PathBuf::from("tiles")),
            save_file: PathBuf::from("save.dat"),
            viewport_radius: 16,
            slopes: SlopeConfig::Preset(SlopePreset::Standard),
            seed_world_origin: true,
        }
    }
}

impl Config {
    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let config = if path.exists() {
            let contents = fs::read_to_string(path)?;
            serde_json::from_str(&contents)?
        } else {
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.world_min > self.world_max {
            return Err(ConfigError::Invalid(format!(
                "world_min {} exceeds world_max {}",
                self.world_min, self.world_max
            )));
        }
        if self.tile_size == 0 || self.tile_size > 4096 {
            return Err(ConfigError::Invalid(format!("tile_size {} out of range", self.tile_size)));
        }
        if self.cache_refresh_secs > self.cache_ttl_secs {
            return Err(ConfigError::Invalid(
                "cache_refresh_secs must not exceed cache_ttl_secs".to_string(),
            ));
        }
        if self.cache_max_entries == 0 {
            return Err(ConfigError::Invalid("cache_max_entries must be positive".to_string()));
        }
        let span = i64::from(self.world_max) - i64::from(self.world_min);
        if span >= i64::from(i32::MAX) {
            return Err(ConfigError::Invalid(format!("world span {} is too wide", span)));
        }
        if self.viewport_radius < 0 {
            return Err(ConfigError::Invalid("viewport_radius must not be negative".to_string()));
        }
        let max_radius = span.min(i64::from(MAX_VIEWPORT_RADIUS));
        if i64::from(self.viewport_radius) > max_radius {
            return Err(ConfigError::Invalid(format!(
                "viewport_radius {} exceeds the limit {}",
                self.viewport_radius, max_radius
            )));
        }
        if self.slopes.resolve().is_empty() {
            return Err(ConfigError::Invalid("slope set is empty".to_string()));
        }
        Ok(())
    }

    pub fn plane(&self) -> Plane {
        Plane::new(
            Bounds::new(self.world_min, self.world_min, self.world_max, self.world_max),
            self.tile_size,
        )
    }

    pub fn cache(&self) -> TileCacheConfig {
        TileCacheConfig {
            ttl: Duration::from_secs(self.cache_ttl_secs),
            refresh_after: Duration::from_secs(self.cache_refresh_secs),
            max_entries: self.cache_max_entries,
            tile_size: self.tile_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.plane().bounds, Bounds::new(-1000, -1000, 1000, 1000));
        assert_eq!(config.cache().ttl, Duration::from_secs(30));
        assert_eq!(config.slopes.resolve(), SlopeSet::standard());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:2532");
    }

    #[test]
    fn test_partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "tile_size": 32, "slopes": "extended", "tile_dir": null }"#).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.tile_size, 32);
        assert_eq!(config.slopes.resolve(), SlopeSet::extended());
        assert!(config.tile_dir.is_none());
        assert_eq!(config.world_max, 1000);
    }

    #[test]
    fn test_custom_slopes() {
        let config: Config = serde_json::from_str(r#"{ "slopes": [[1, 0], [3, 1]] }"#).unwrap();
        assert_eq!(config.slopes.resolve().len(), 2);
    }

    #[test]
    fn test_rejects_inconsistent_values() {
        let config = Config {
            cache_refresh_secs: 40,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config {
            world_min: 10,
            world_max: -10,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_viewport_radius_bounded_by_world() {
        let config = Config {
            viewport_radius: 2000,
            ..Config::default()
        };
        config.validate().unwrap();

        let config = Config {
            viewport_radius: 5000,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config {
            world_min: -100_000,
            world_max: 100_000,
            viewport_radius: MAX_VIEWPORT_RADIUS + 1,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            world_min: i32::MIN,
            world_max: i32::MAX,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
