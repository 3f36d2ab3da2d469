use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use scout_index::coverage_index::DEFAULT_COVERAGE_LEVEL;
use scout_index::models::{TypeConfig, TypeInfo, DEFAULT_INDEX_LEVEL};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub global: GlobalConfig,
    #[serde(default)]
    pub types: Vec<TypeInfo>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GlobalConfig {
    pub output_dir: PathBuf,
    #[serde(default = "default_coverage_level")]
    pub coverage_level: u32,
    #[serde(default = "default_index_level")]
    pub default_index_level: u32,
}

fn default_coverage_level() -> u32 {
    DEFAULT_COVERAGE_LEVEL
}

fn default_index_level() -> u32 {
    DEFAULT_INDEX_LEVEL
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Type configuration with the global default level filled in
    pub fn type_config(&self) -> Result<TypeConfig> {
        let types = self
            .types
            .iter()
            .cloned()
            .map(|mut t| {
                if t.index_level.is_none() {
                    t.index_level = Some(self.global.default_index_level);
                }
                t
            })
            .collect();
        TypeConfig::new(types).context("Invalid type definitions")
    }
}
