//! Configuration of [`HyperGrid`](super::HyperGrid).
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`HyperGrid`](super::HyperGrid).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct HyperGridConfig {
    /// Number of grid dimensions.
    pub ndim: usize,

    /// Number of positions per dimension.
    pub height: usize,

    /// Base reward, granted everywhere.
    pub r0: f32,

    /// Reward of the outer plateau band.
    #[serde(default = "default_r1")]
    pub r1: f32,

    /// Reward of the inner mode band.
    #[serde(default = "default_r2")]
    pub r2: f32,
}

fn default_r1() -> f32 {
    0.5
}

fn default_r2() -> f32 {
    2.0
}

impl Default for HyperGridConfig {
    fn default() -> Self {
        Self {
            ndim: 2,
            height: 8,
            r0: 0.1,
            r1: default_r1(),
            r2: default_r2(),
        }
    }
}

impl HyperGridConfig {
    /// Sets the number of grid dimensions.
    pub fn ndim(mut self, ndim: usize) -> Self {
        self.ndim = ndim;
        self
    }

    /// Sets the number of positions per dimension.
    pub fn height(mut self, height: usize) -> Self {
        self.height = height;
        self
    }

    /// Sets the base reward.
    pub fn r0(mut self, r0: f32) -> Self {
        self.r0 = r0;
        self
    }

    /// Sets the reward of the outer plateau band.
    pub fn r1(mut self, r1: f32) -> Self {
        self.r1 = r1;
        self
    }

    /// Sets the reward of the inner mode band.
    pub fn r2(mut self, r2: f32) -> Self {
        self.r2 = r2;
        self
    }

    /// Constructs [`HyperGridConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`HyperGridConfig`] to YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::HyperGridConfig;
    use tempdir::TempDir;

    #[test]
    fn save_and_load_round_trip() {
        let config = HyperGridConfig::default().ndim(4).height(16).r0(0.001);
        let dir = TempDir::new("hypergrid_config").unwrap();
        let path = dir.path().join("env.yaml");
        config.save(&path).unwrap();
        assert_eq!(HyperGridConfig::load(&path).unwrap(), config);
    }
}
