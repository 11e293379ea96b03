#![warn(missing_docs)]
//! Candle-backed estimators for GFlowNet training.
//!
//! Implements the [`gfn_core::LogitsEstimator`] contract with an MLP and a
//! uniform (untrained) variant, the learned scalar log-normalizer, the
//! trajectory-balance parametrization bundle, and optimizer wrappers.
mod estimator;
mod mlp;
mod opt;
mod parametrization;

pub use estimator::{LogZ, NeuralEstimator, PolicyEstimator, UniformEstimator};
pub use mlp::{Mlp, MlpConfig};
pub use opt::{Optimizer, OptimizerConfig};
pub use parametrization::{TbParametrization, TbParametrizationConfig};
