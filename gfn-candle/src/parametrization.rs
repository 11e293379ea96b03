//! Bundle of forward policy, backward policy and log-normalizer.
use crate::{LogZ, MlpConfig, NeuralEstimator, PolicyEstimator, UniformEstimator};
use anyhow::Result;
use candle_core::{DType, Device, Var};
use candle_nn::{VarBuilder, VarMap};
use serde::{Deserialize, Serialize};

/// Configuration of [`TbParametrization`].
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TbParametrizationConfig {
    /// Flattened node size.
    pub state_dim: usize,

    /// Number of forward actions, the terminate action included.
    pub n_actions: usize,

    /// Hidden layer sizes shared by both policy networks.
    pub units: Vec<usize>,

    /// Keeps the backward policy fixed to the uniform distribution.
    pub uniform_pb: bool,
}

impl TbParametrizationConfig {
    /// Creates a configuration with two-hidden-layer policies.
    pub fn new(state_dim: usize, n_actions: usize) -> Self {
        Self {
            state_dim,
            n_actions,
            units: vec![256, 256],
            uniform_pb: false,
        }
    }

    /// Sets the hidden layer sizes.
    pub fn units(mut self, units: Vec<usize>) -> Self {
        self.units = units;
        self
    }

    /// Sets whether the backward policy stays uniform.
    pub fn uniform_pb(mut self, uniform_pb: bool) -> Self {
        self.uniform_pb = uniform_pb;
        self
    }
}

/// Policy networks and log-normalizer of a trajectory-balance style learner.
///
/// The forward policy emits `n_actions` logits, the backward policy
/// `n_actions - 1` (there is no backward counterpart of the terminate
/// action). The log-normalizer lives outside the policy variable map so the
/// two can be driven by separate optimizers.
pub struct TbParametrization {
    pf: PolicyEstimator,
    pb: PolicyEstimator,
    logz: LogZ,
    varmap: VarMap,
}

impl TbParametrization {
    /// Builds the networks on the given device.
    pub fn build(config: &TbParametrizationConfig, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let pf = PolicyEstimator::Neural(NeuralEstimator::build(
            vs.pp("pf"),
            MlpConfig::new(config.state_dim, config.units.clone(), config.n_actions),
        )?);
        let pb = if config.uniform_pb {
            PolicyEstimator::Uniform(UniformEstimator::new(config.n_actions - 1))
        } else {
            PolicyEstimator::Neural(NeuralEstimator::build(
                vs.pp("pb"),
                MlpConfig::new(config.state_dim, config.units.clone(), config.n_actions - 1),
            )?)
        };
        let logz = LogZ::new(device)?;
        Ok(Self {
            pf,
            pb,
            logz,
            varmap,
        })
    }

    /// The forward policy.
    pub fn pf(&self) -> &PolicyEstimator {
        &self.pf
    }

    /// The backward policy.
    pub fn pb(&self) -> &PolicyEstimator {
        &self.pb
    }

    /// The log-normalizer.
    pub fn logz(&self) -> &LogZ {
        &self.logz
    }

    /// All policy network variables, excluding the log-normalizer.
    pub fn policy_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }
}

#[cfg(test)]
mod tests {
    use super::{TbParametrization, TbParametrizationConfig};
    use candle_core::{DType, Device, Tensor};
    use gfn_core::LogitsEstimator;

    #[test]
    fn policies_emit_expected_logit_widths() {
        let device = Device::Cpu;
        let config = TbParametrizationConfig::new(2, 3).units(vec![8]);
        let p = TbParametrization::build(&config, &device).unwrap();
        let states = Tensor::zeros((4, 2), DType::F32, &device).unwrap();
        assert_eq!(p.pf().logits(&states).unwrap().dims(), &[4, 3]);
        assert_eq!(p.pb().logits(&states).unwrap().dims(), &[4, 2]);
        assert!(!p.policy_vars().is_empty());
    }

    #[test]
    fn uniform_pb_has_no_extra_variables() {
        let device = Device::Cpu;
        let neural = TbParametrization::build(
            &TbParametrizationConfig::new(2, 3).units(vec![8]),
            &device,
        )
        .unwrap();
        let uniform = TbParametrization::build(
            &TbParametrizationConfig::new(2, 3).units(vec![8]).uniform_pb(true),
            &device,
        )
        .unwrap();
        assert!(uniform.policy_vars().len() < neural.policy_vars().len());
    }
}
