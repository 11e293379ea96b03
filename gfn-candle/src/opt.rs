//! Optimizers.
use anyhow::Result;
use candle_core::{backprop::GradStore, Tensor, Var};
use candle_nn::{AdamW, Optimizer as _, ParamsAdamW};
use candle_optimisers::adam::{Adam, ParamsAdam};
use serde::{Deserialize, Serialize};

/// Configuration of optimizer for training policy networks and the
/// log-normalizer.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum OptimizerConfig {
    /// AdamW optimizer.
    AdamW {
        /// Learning rate.
        lr: f64,
        #[serde(default = "default_beta1")]
        /// First moment decay.
        beta1: f64,
        #[serde(default = "default_beta2")]
        /// Second moment decay.
        beta2: f64,
        #[serde(default = "default_eps")]
        /// Numerical stability constant.
        eps: f64,
        #[serde(default = "default_weight_decay")]
        /// Decoupled weight decay.
        weight_decay: f64,
    },

    /// Adam optimizer.
    Adam {
        /// Learning rate.
        lr: f64,
    },
}

fn default_beta1() -> f64 {
    ParamsAdamW::default().beta1
}

fn default_beta2() -> f64 {
    ParamsAdamW::default().beta2
}

fn default_eps() -> f64 {
    ParamsAdamW::default().eps
}

fn default_weight_decay() -> f64 {
    ParamsAdamW::default().weight_decay
}

impl OptimizerConfig {
    /// Constructs the optimizer over the given variables.
    pub fn build(&self, vars: Vec<Var>) -> Result<Optimizer> {
        match &self {
            OptimizerConfig::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => {
                let params = ParamsAdamW {
                    lr: *lr,
                    beta1: *beta1,
                    beta2: *beta2,
                    eps: *eps,
                    weight_decay: *weight_decay,
                };
                let opt = AdamW::new(vars, params)?;
                Ok(Optimizer::AdamW(opt))
            }
            OptimizerConfig::Adam { lr } => {
                let params = ParamsAdam {
                    lr: *lr,
                    ..ParamsAdam::default()
                };
                let opt = Adam::new(vars, params)?;
                Ok(Optimizer::Adam(opt))
            }
        }
    }

}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam { lr: 1e-3 }
    }
}

/// Optimizers.
pub enum Optimizer {
    /// AdamW optimizer.
    AdamW(AdamW),

    /// Adam optimizer.
    Adam(Adam),
}

impl Optimizer {
    /// Applies a backward pass then an update step.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        match self {
            Self::AdamW(opt) => Ok(opt.backward_step(loss)?),
            Self::Adam(opt) => Ok(opt.backward_step(loss)?),
        }
    }

    /// Applies an update step from precomputed gradients.
    ///
    /// Lets several optimizers consume gradients of a single backward pass,
    /// each over its own variable set.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Self::AdamW(opt) => Ok(opt.step(grads)?),
            Self::Adam(opt) => Ok(opt.step(grads)?),
        }
    }

    /// Current learning rate.
    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::AdamW(opt) => opt.learning_rate(),
            Self::Adam(opt) => opt.learning_rate(),
        }
    }

    /// Overrides the learning rate, for schedules.
    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::AdamW(opt) => opt.set_learning_rate(lr),
            Self::Adam(opt) => opt.set_learning_rate(lr),
        }
    }
}
