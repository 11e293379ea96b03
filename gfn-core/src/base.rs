//! Traits for the collaborators of the core: environments and policies.
mod env;
mod estimator;

pub use env::Env;
pub use estimator::LogitsEstimator;

/// Direction in which trajectories are built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// From the root state towards terminal states.
    Forward,
    /// From a terminal (or intermediate) state back to the root.
    Backward,
}
