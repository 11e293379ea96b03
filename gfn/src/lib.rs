#![warn(missing_docs)]
//! Training driver for GFlowNets on the hypergrid environment.
//!
//! Wires the core containers and samplers, the candle-backed estimators and
//! the hypergrid environment into a training loop with periodic validation
//! against the exact target distribution.
mod trainer;
mod validate;

pub use trainer::{Trainer, TrainerConfig};
pub use validate::{validate, ValidationInfo};
