//! Configuration of [`Trainer`](super::Trainer).
use anyhow::Result;
use gfn_core::loss::LossConfig;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Trainer`](super::Trainer).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct TrainerConfig {
    /// Objective configuration, validated before training starts.
    pub loss: LossConfig,

    /// Number of optimization iterations.
    pub n_iterations: usize,

    /// Trajectories sampled (and trained on) per iteration.
    pub batch_size: usize,

    /// Learning rate of the policy networks.
    pub lr: f64,

    /// Learning rate of the log-normalizer.
    pub lr_z: f64,

    /// Multiplicative learning-rate decay factor, 1.0 disables it.
    pub schedule: f64,

    /// Iterations between learning-rate decays.
    pub schedule_interval: usize,

    /// Replay buffer capacity, 0 disables replay.
    pub replay_capacity: usize,

    /// Keeps the backward policy fixed to the uniform distribution.
    pub uniform_pb: bool,

    /// Samples forward rollouts at a sharpened temperature.
    pub off_policy: bool,

    /// Seed for the environment and the samplers.
    pub seed: u64,

    /// Hidden layer sizes of the policy networks.
    pub units: Vec<usize>,

    /// Recent terminal states entering the validation pmf.
    pub validation_samples: usize,

    /// Iterations between validations.
    pub validation_interval: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            loss: LossConfig::default(),
            n_iterations: 1000,
            batch_size: 16,
            lr: 1e-3,
            lr_z: 0.1,
            schedule: 1.0,
            schedule_interval: 2000,
            replay_capacity: 0,
            uniform_pb: false,
            off_policy: false,
            seed: 0,
            units: vec![256, 256],
            validation_samples: 200_000,
            validation_interval: 100,
        }
    }
}

impl TrainerConfig {
    /// Sets the objective configuration.
    pub fn loss(mut self, v: LossConfig) -> Self {
        self.loss = v;
        self
    }

    /// Sets the number of iterations.
    pub fn n_iterations(mut self, v: usize) -> Self {
        self.n_iterations = v;
        self
    }

    /// Sets the per-iteration batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Sets the policy learning rate.
    pub fn lr(mut self, v: f64) -> Self {
        self.lr = v;
        self
    }

    /// Sets the log-normalizer learning rate.
    pub fn lr_z(mut self, v: f64) -> Self {
        self.lr_z = v;
        self
    }

    /// Sets the learning-rate decay factor.
    pub fn schedule(mut self, v: f64) -> Self {
        self.schedule = v;
        self
    }

    /// Sets the iterations between decays.
    pub fn schedule_interval(mut self, v: usize) -> Self {
        self.schedule_interval = v;
        self
    }

    /// Sets the replay buffer capacity.
    pub fn replay_capacity(mut self, v: usize) -> Self {
        self.replay_capacity = v;
        self
    }

    /// Sets whether the backward policy stays uniform.
    pub fn uniform_pb(mut self, v: bool) -> Self {
        self.uniform_pb = v;
        self
    }

    /// Enables tempered off-policy sampling.
    pub fn off_policy(mut self, v: bool) -> Self {
        self.off_policy = v;
        self
    }

    /// Sets the seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Sets the hidden layer sizes.
    pub fn units(mut self, v: Vec<usize>) -> Self {
        self.units = v;
        self
    }

    /// Sets the validation sample window.
    pub fn validation_samples(mut self, v: usize) -> Self {
        self.validation_samples = v;
        self
    }

    /// Sets the validation interval.
    pub fn validation_interval(mut self, v: usize) -> Self {
        self.validation_interval = v;
        self
    }

    /// Constructs [`TrainerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`TrainerConfig`] to YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::TrainerConfig;
    use gfn_core::loss::{Baseline, LossConfig, LossMode};
    use tempdir::TempDir;

    #[test]
    fn save_and_load_round_trip() {
        let config = TrainerConfig::default()
            .loss(
                LossConfig::default()
                    .mode(LossMode::ForwardKl)
                    .baseline(Baseline::Local)
                    .reweight(true),
            )
            .n_iterations(200)
            .replay_capacity(64)
            .off_policy(true);
        let dir = TempDir::new("trainer_config").unwrap();
        let path = dir.path().join("trainer.yaml");
        config.save(&path).unwrap();
        assert_eq!(TrainerConfig::load(&path).unwrap(), config);
    }
}
