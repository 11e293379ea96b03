#![warn(missing_docs)]
//! The hypergrid benchmark environment.
//!
//! Nodes are points of a `ndim`-dimensional grid of side `height`. Each
//! forward action increments one coordinate, the last action terminates.
//! The reward is a three-tier indicator landscape with modes near the
//! corners, which makes the target distribution multimodal while its exact
//! probability mass function stays computable by enumeration.
mod base;
mod config;

pub use base::HyperGrid;
pub use config::HyperGridConfig;
