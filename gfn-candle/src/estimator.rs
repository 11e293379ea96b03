//! Logit estimators and the learned log-normalizer.
use crate::{Mlp, MlpConfig};
use anyhow::Result;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarBuilder;
use gfn_core::LogitsEstimator;

/// An MLP over flattened nodes.
pub struct NeuralEstimator {
    mlp: Mlp,
}

impl NeuralEstimator {
    /// Builds the estimator on the variable store.
    pub fn build(vs: VarBuilder, config: MlpConfig) -> Result<Self> {
        Ok(Self {
            mlp: Mlp::build(vs, config)?,
        })
    }
}

impl LogitsEstimator for NeuralEstimator {
    fn logits(&self, states: &Tensor) -> Result<Tensor> {
        let flat = states.contiguous()?.flatten_from(1)?;
        self.mlp.forward(&flat)
    }
}

/// A constant uniform distribution over `out_dim` actions.
///
/// Commonly used as an untrained backward policy.
pub struct UniformEstimator {
    out_dim: usize,
}

impl UniformEstimator {
    /// A uniform estimator over `out_dim` actions.
    pub fn new(out_dim: usize) -> Self {
        Self { out_dim }
    }
}

impl LogitsEstimator for UniformEstimator {
    fn logits(&self, states: &Tensor) -> Result<Tensor> {
        let n = states.dim(0)?;
        Ok(Tensor::zeros(
            (n, self.out_dim),
            DType::F32,
            states.device(),
        )?)
    }
}

/// A policy head that is either neural or uniform.
pub enum PolicyEstimator {
    /// Backed by an MLP.
    Neural(NeuralEstimator),
    /// Constant uniform logits.
    Uniform(UniformEstimator),
}

impl LogitsEstimator for PolicyEstimator {
    fn logits(&self, states: &Tensor) -> Result<Tensor> {
        match self {
            Self::Neural(e) => e.logits(states),
            Self::Uniform(e) => e.logits(states),
        }
    }
}

/// The learned scalar log-normalizer.
pub struct LogZ {
    var: Var,
}

impl LogZ {
    /// A log-normalizer initialized to zero.
    pub fn new(device: &Device) -> Result<Self> {
        Ok(Self {
            var: Var::from_tensor(&Tensor::new(0f32, device)?)?,
        })
    }

    /// The parameter as a tensor participating in the graph.
    pub fn as_tensor(&self) -> &Tensor {
        self.var.as_tensor()
    }

    /// The optimizable variable.
    pub fn var(&self) -> &Var {
        &self.var
    }

    /// Current estimate of log Z.
    pub fn value(&self) -> Result<f32> {
        Ok(self.var.as_tensor().to_scalar::<f32>()?)
    }
}
