//! Configuration of [`Mlp`](super::Mlp).
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Mlp`](super::Mlp).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct MlpConfig {
    /// Input dimension (flattened node size).
    pub in_dim: usize,

    /// Sizes of the hidden layers.
    pub units: Vec<usize>,

    /// Output dimension (number of logits).
    pub out_dim: usize,
}

impl MlpConfig {
    /// Creates a configuration with the given dimensions.
    pub fn new(in_dim: usize, units: Vec<usize>, out_dim: usize) -> Self {
        Self {
            in_dim,
            units,
            out_dim,
        }
    }

    /// Constructs [`MlpConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`MlpConfig`] to YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MlpConfig;
    use tempdir::TempDir;

    #[test]
    fn save_and_load_round_trip() {
        let config = MlpConfig::new(4, vec![256, 256], 5);
        let dir = TempDir::new("mlp_config").unwrap();
        let path = dir.path().join("mlp.yaml");
        config.save(&path).unwrap();
        assert_eq!(MlpConfig::load(&path).unwrap(), config);
    }
}
