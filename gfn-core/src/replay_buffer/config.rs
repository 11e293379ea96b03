//! Configuration of [`ReplayBuffer`](super::ReplayBuffer).
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`ReplayBuffer`](super::ReplayBuffer).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ReplayBufferConfig {
    /// Maximum number of stored trajectories.
    pub capacity: usize,

    /// Seed of the sampling RNG.
    pub seed: u64,
}

impl Default for ReplayBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            seed: 42,
        }
    }
}

impl ReplayBufferConfig {
    /// Sets the capacity.
    pub fn capacity(mut self, v: usize) -> Self {
        self.capacity = v;
        self
    }

    /// Sets the sampling seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Constructs [`ReplayBufferConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`ReplayBufferConfig`] to YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(self)?.as_bytes())?;
        Ok(())
    }
}
