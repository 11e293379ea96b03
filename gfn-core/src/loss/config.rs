//! Configuration of the training objective.
use crate::error::GfnError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
    str::FromStr,
};

/// Objective used to turn trajectory scores into a training signal.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LossMode {
    /// Trajectory balance: `(score + logZ)^2`.
    Tb,
    /// Forward KL divergence.
    ForwardKl,
    /// Reverse KL divergence.
    ReverseKl,
    /// Reward-weighted sleep/wake update.
    Rws,
    /// Reverse reward-weighted update.
    ReverseRws,
}

impl FromStr for LossMode {
    type Err = GfnError;

    fn from_str(s: &str) -> Result<Self, GfnError> {
        match s {
            "tb" => Ok(Self::Tb),
            "forward_kl" => Ok(Self::ForwardKl),
            "reverse_kl" => Ok(Self::ReverseKl),
            "rws" => Ok(Self::Rws),
            "reverse_rws" => Ok(Self::ReverseRws),
            other => Err(GfnError::InvalidLossConfig(format!(
                "unknown loss mode {:?}",
                other
            ))),
        }
    }
}

/// Baseline subtracted from the detached score in the KL-style objectives.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Baseline {
    /// No baseline.
    None,
    /// The batch-mean score.
    Local,
    /// The negated current log-normalizer estimate.
    Global,
}

impl FromStr for Baseline {
    type Err = GfnError;

    fn from_str(s: &str) -> Result<Self, GfnError> {
        match s {
            "none" => Ok(Self::None),
            "local" => Ok(Self::Local),
            "global" => Ok(Self::Global),
            other => Err(GfnError::InvalidLossConfig(format!(
                "unknown baseline {:?}",
                other
            ))),
        }
    }
}

/// Combinations of (mode, sample_from_reward, reweight) that are
/// mathematically invalid and rejected before training starts.
const DISALLOWED: [(LossMode, bool, bool); 3] = [
    (LossMode::Tb, true, true),
    (LossMode::ForwardKl, true, true),
    (LossMode::ReverseKl, true, false),
];

/// Configuration of [`TrajectoryLoss`](super::TrajectoryLoss).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct LossConfig {
    /// Objective formulation.
    pub mode: LossMode,

    /// Baseline for the detached score.
    pub baseline: Baseline,

    /// Importance-reweight per-trajectory terms by `softmax(±score)`.
    pub reweight: bool,

    /// Whether trajectories are drawn backward from reward-distributed
    /// terminal states rather than forward from the policy.
    pub sample_from_reward: bool,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            mode: LossMode::Tb,
            baseline: Baseline::None,
            reweight: false,
            sample_from_reward: false,
        }
    }
}

impl LossConfig {
    /// Sets the objective mode.
    pub fn mode(mut self, v: LossMode) -> Self {
        self.mode = v;
        self
    }

    /// Sets the baseline kind.
    pub fn baseline(mut self, v: Baseline) -> Self {
        self.baseline = v;
        self
    }

    /// Enables or disables reweighting.
    pub fn reweight(mut self, v: bool) -> Self {
        self.reweight = v;
        self
    }

    /// Declares the sample source.
    pub fn sample_from_reward(mut self, v: bool) -> Self {
        self.sample_from_reward = v;
        self
    }

    /// Rejects invalid (mode, sample_from_reward, reweight) combinations.
    pub fn validate(&self) -> Result<(), GfnError> {
        let key = (self.mode, self.sample_from_reward, self.reweight);
        if DISALLOWED.contains(&key) {
            return Err(GfnError::InvalidLossConfig(format!(
                "mode {:?} with sample_from_reward={} and reweight={}",
                self.mode, self.sample_from_reward, self.reweight
            )));
        }
        Ok(())
    }

    /// Constructs [`LossConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`LossConfig`] to YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(self)?.as_bytes())?;
        Ok(())
    }
}
