//! Policy contract.
use anyhow::Result;
use candle_core::Tensor;

/// A policy head mapping a node batch to unnormalized action logits.
///
/// The input has shape `(n, state_shape...)`. Forward policies emit
/// `n_actions` logits per node, backward policies `n_actions - 1`. The
/// mapping can be backed by a neural module or be a constant (uniform)
/// distribution; the core does not care which.
pub trait LogitsEstimator {
    /// Computes logits for a batch of nodes.
    fn logits(&self, states: &Tensor) -> Result<Tensor>;
}
