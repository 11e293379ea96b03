//! Environment contract.
use anyhow::Result;
use candle_core::{Device, Tensor};

/// A DAG environment, seen by the core as a bundle of capabilities.
///
/// An environment fixes one node shape and one action space at configuration
/// time. Nodes are represented as `f32` tensors of shape
/// `batch_shape ++ state_shape`. Action `n_actions() - 1` is the reserved
/// terminate action: taking it moves a node to the sink sentinel. The
/// backward action space has `n_actions() - 1` entries, since terminating
/// has no backward analogue; backward action `i` undoes forward action `i`.
///
/// The mask, step and reward methods all operate on flattened node batches
/// of shape `(n, state_shape...)`.
pub trait Env {
    /// Configuration of the environment.
    type Config: Clone;

    /// Builds an environment with a given random seed.
    fn build(config: &Self::Config, seed: u64) -> Result<Self>
    where
        Self: Sized;

    /// Device on which node tensors live.
    fn device(&self) -> &Device;

    /// Size of the forward action space, including the terminate action.
    fn n_actions(&self) -> usize;

    /// Trailing shape of a single node.
    fn state_shape(&self) -> &[usize];

    /// The root sentinel, a single node of shape [`Env::state_shape`].
    fn s0(&self) -> &Tensor;

    /// The sink sentinel, shaped like [`Env::s0`] but never equal to it.
    fn sf(&self) -> &Tensor;

    /// Produces `n` valid random nodes, shape `(n, state_shape...)`.
    fn random_states(&self, n: usize) -> Result<Tensor>;

    /// Forward action-validity mask, `u8` of shape `(n, n_actions)`.
    ///
    /// An entry is nonzero iff the action is legal from that node. For a
    /// non-sink node at least the terminate action must be legal. Entries
    /// for sink nodes are unspecified.
    fn forward_masks(&self, states: &Tensor) -> Result<Tensor>;

    /// Backward action-validity mask, `u8` of shape `(n, n_actions - 1)`.
    fn backward_masks(&self, states: &Tensor) -> Result<Tensor>;

    /// Applies forward actions to a node batch, returning the successors.
    ///
    /// `actions` is a `u32` tensor of shape `(n,)`. The terminate action
    /// maps a node to the sink sentinel.
    fn step(&self, states: &Tensor, actions: &Tensor) -> Result<Tensor>;

    /// Applies backward actions to a node batch, returning the predecessors.
    fn backward_step(&self, states: &Tensor, actions: &Tensor) -> Result<Tensor>;

    /// Log-reward of terminal nodes, `f32` of shape `(n,)`.
    ///
    /// Rewards are only ever handled in log-space by the core.
    fn log_reward(&self, states: &Tensor) -> Result<Tensor>;
}
