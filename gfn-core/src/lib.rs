#![warn(missing_docs)]
//! Core building blocks for training generative flow networks.
//!
//! A generative flow network (GFlowNet) learns a forward policy that builds
//! objects step by step along a DAG of states, together with a backward
//! policy and a scalar log-normalizer, so that complete objects are sampled
//! proportionally to an unnormalized reward.
//!
//! This crate provides the pieces that are independent of any concrete
//! environment or neural backend:
//!
//! * [`States`]: a batched container of DAG nodes with action-validity masks.
//! * [`Trajectories`]: a padded batch of root-to-terminal paths.
//! * [`TrajectoriesSampler`] and [`ActionsSampler`]: batched rollouts under a
//!   stochastic policy, forward or backward.
//! * [`ReplayBuffer`]: bounded storage of past trajectories for off-policy
//!   reuse.
//! * [`loss`]: trajectory-balance and KL-style objectives.
//!
//! Environments implement the [`Env`] trait; policies implement
//! [`LogitsEstimator`].
pub mod error;
pub mod loss;
pub mod replay_buffer;

mod base;
pub use base::{Direction, Env, LogitsEstimator};

mod states;
pub use states::States;

mod trajectories;
pub use trajectories::Trajectories;

mod sampler;
pub use sampler::{ActionsSampler, TrajectoriesSampler};

pub use error::GfnError;
pub use replay_buffer::{ReplayBuffer, ReplayBufferConfig};

#[cfg(test)]
pub(crate) mod testing;
