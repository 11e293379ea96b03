//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
///
/// All variants are detected eagerly, at construction or pre-flight time,
/// except [`GfnError::NonTermination`], which is raised mid-rollout. None of
/// them is recoverable by retrying under identical parameters.
#[derive(Error, Debug)]
pub enum GfnError {
    /// Invalid combination of loss mode, sample source and reweighting.
    #[error("invalid loss configuration: {0}")]
    InvalidLossConfig(String),

    /// Tensor shape mismatch.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// A rollout exceeded its step bound before all trajectories reached
    /// the sink state.
    #[error("rollout exceeded {max_steps} steps without all trajectories terminating")]
    NonTermination {
        /// The step bound that was exceeded.
        max_steps: usize,
    },

    /// Sampling was requested from a replay buffer with zero occupancy.
    #[error("cannot sample {requested} trajectories from an empty replay buffer")]
    EmptyBuffer {
        /// Number of trajectories that was requested.
        requested: usize,
    },
}
