//! Multilayer perceptron emitting logits.
mod base;
mod config;

pub use base::Mlp;
pub use config::MlpConfig;
