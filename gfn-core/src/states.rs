//! Batched container of DAG nodes.
use crate::{error::GfnError, Env};
use anyhow::Result;
use candle_core::{DType, Tensor, D};

/// A batch of DAG nodes with per-node flags and action-validity masks.
///
/// Nodes are stored as one `f32` tensor of shape
/// `batch_shape ++ state_shape`, where `batch_shape` may have more than one
/// dimension (e.g. `(step, trajectory)` inside [`crate::Trajectories`]).
/// `is_initial` and `is_sink` flag nodes equal to the environment's root and
/// sink sentinels. The masks reflect exactly the actions the environment
/// declares legal from each node and are recomputed whenever the nodes
/// change; they are never accepted from outside.
#[derive(Debug)]
pub struct States {
    /// Node batch, shape `batch_shape ++ state_shape`.
    pub states: Tensor,
    /// Leading (batch) dimensions of `states`.
    pub batch_shape: Vec<usize>,
    /// `u8` flag over `batch_shape`: node equals the root sentinel.
    pub is_initial: Tensor,
    /// `u8` flag over `batch_shape`: node equals the sink sentinel.
    pub is_sink: Tensor,
    /// `u8` mask of shape `batch_shape ++ [n_actions]`.
    pub forward_masks: Tensor,
    /// `u8` mask of shape `batch_shape ++ [n_actions - 1]`.
    pub backward_masks: Tensor,
}

/// Tiles a single flattened node over a batch, shape `(n, k)`.
fn tile_node(node: &Tensor, n: usize) -> Result<Tensor> {
    Ok(node.flatten_all()?.unsqueeze(0)?.repeat((n, 1))?)
}

/// Elementwise equality with a sentinel, reduced over the node dimensions.
///
/// `flat` has shape `(n, k)`; returns a `u8` tensor of shape `(n,)`.
fn node_eq(flat: &Tensor, node: &Tensor) -> Result<Tensor> {
    let n = flat.dim(0)?;
    let sentinel = tile_node(node, n)?;
    let eq = flat.eq(&sentinel)?.to_dtype(DType::F32)?;
    Ok(eq.min(D::Minus1)?.to_dtype(DType::U8)?)
}

impl States {
    /// A batch of root-sentinel nodes broadcast over `batch_shape`.
    pub fn initial<E: Env>(env: &E, batch_shape: &[usize]) -> Result<Self> {
        let n: usize = batch_shape.iter().product();
        let shape: Vec<usize> = batch_shape
            .iter()
            .chain(env.state_shape().iter())
            .copied()
            .collect();
        let states = tile_node(env.s0(), n)?.reshape(shape)?;
        let is_initial = Tensor::ones(batch_shape, DType::U8, env.device())?;
        let is_sink = Tensor::zeros(batch_shape, DType::U8, env.device())?;
        let (forward_masks, backward_masks) = Self::masks(env, &states, batch_shape)?;
        Ok(Self {
            states,
            batch_shape: batch_shape.to_vec(),
            is_initial,
            is_sink,
            forward_masks,
            backward_masks,
        })
    }

    /// A batch of environment-supplied random nodes.
    ///
    /// Flags are derived by equality against the sentinels, not assumed.
    pub fn random<E: Env>(env: &E, batch_shape: &[usize]) -> Result<Self> {
        let n: usize = batch_shape.iter().product();
        let shape: Vec<usize> = batch_shape
            .iter()
            .chain(env.state_shape().iter())
            .copied()
            .collect();
        let states = env.random_states(n)?.reshape(shape)?;
        Self::from_tensor(env, states)
    }

    /// Wraps an externally supplied node tensor.
    ///
    /// The trailing dimensions must match the environment's node shape.
    /// Flags and masks are always re-derived.
    pub fn from_tensor<E: Env>(env: &E, states: Tensor) -> Result<Self> {
        let dims = states.dims().to_vec();
        let state_ndim = env.state_shape().len();
        if dims.len() < state_ndim || dims[dims.len() - state_ndim..] != *env.state_shape() {
            return Err(GfnError::Shape(format!(
                "node tensor of shape {:?} does not end with state shape {:?}",
                dims,
                env.state_shape()
            ))
            .into());
        }
        let batch_shape = dims[..dims.len() - state_ndim].to_vec();
        let flat = Self::flatten(&states, &batch_shape, env.state_shape())?;
        let flat2 = flat.flatten_from(1)?;
        let is_initial = node_eq(&flat2, env.s0())?.reshape(batch_shape.clone())?;
        let is_sink = node_eq(&flat2, env.sf())?.reshape(batch_shape.clone())?;
        let (forward_masks, backward_masks) = Self::masks(env, &states, &batch_shape)?;
        Ok(Self {
            states,
            batch_shape,
            is_initial,
            is_sink,
            forward_masks,
            backward_masks,
        })
    }

    /// Recomputes the action-validity masks from the current nodes.
    pub fn update_masks<E: Env>(&mut self, env: &E) -> Result<()> {
        let (forward_masks, backward_masks) = Self::masks(env, &self.states, &self.batch_shape)?;
        self.forward_masks = forward_masks;
        self.backward_masks = backward_masks;
        Ok(())
    }

    /// Appends `other` along the leading batch dimension.
    ///
    /// Used to accumulate the set of terminal states observed across
    /// training iterations. Fails if the trailing shapes differ.
    pub fn extend<E: Env>(&mut self, env: &E, other: &States) -> Result<()> {
        if self.batch_shape.len() != other.batch_shape.len()
            || self.batch_shape[1..] != other.batch_shape[1..]
        {
            return Err(GfnError::Shape(format!(
                "cannot extend batch shape {:?} with {:?}",
                self.batch_shape, other.batch_shape
            ))
            .into());
        }
        self.states = Tensor::cat(&[&self.states, &other.states], 0)?;
        self.is_initial = Tensor::cat(&[&self.is_initial, &other.is_initial], 0)?;
        self.is_sink = Tensor::cat(&[&self.is_sink, &other.is_sink], 0)?;
        self.batch_shape[0] += other.batch_shape[0];
        self.update_masks(env)
    }

    /// Selects batch elements along dimension `dim`.
    pub fn select_batch(&self, dim: usize, ixs: &[usize]) -> Result<States> {
        let ixs: Vec<u32> = ixs.iter().map(|&ix| ix as u32).collect();
        let n = ixs.len();
        let ixs = Tensor::from_vec(ixs, (n,), self.states.device())?;
        let mut batch_shape = self.batch_shape.clone();
        batch_shape[dim] = ixs.dim(0)?;
        Ok(States {
            states: self.states.index_select(&ixs, dim)?,
            batch_shape,
            is_initial: self.is_initial.index_select(&ixs, dim)?,
            is_sink: self.is_sink.index_select(&ixs, dim)?,
            forward_masks: self.forward_masks.index_select(&ixs, dim)?,
            backward_masks: self.backward_masks.index_select(&ixs, dim)?,
        })
    }

    /// Number of nodes in the batch.
    pub fn n_states(&self) -> usize {
        self.batch_shape.iter().product()
    }

    /// Nodes reshaped to `(n, state_shape...)`.
    pub fn flat_states<E: Env>(&self, env: &E) -> Result<Tensor> {
        Self::flatten(&self.states, &self.batch_shape, env.state_shape())
    }

    fn flatten(states: &Tensor, batch_shape: &[usize], state_shape: &[usize]) -> Result<Tensor> {
        let n: usize = batch_shape.iter().product();
        let mut shape = vec![n];
        shape.extend_from_slice(state_shape);
        Ok(states.contiguous()?.reshape(shape)?)
    }

    fn masks<E: Env>(
        env: &E,
        states: &Tensor,
        batch_shape: &[usize],
    ) -> Result<(Tensor, Tensor)> {
        let flat = Self::flatten(states, batch_shape, env.state_shape())?;
        let mut fwd_shape = batch_shape.to_vec();
        fwd_shape.push(env.n_actions());
        let mut bwd_shape = batch_shape.to_vec();
        bwd_shape.push(env.n_actions() - 1);
        let forward = env.forward_masks(&flat)?.reshape(fwd_shape)?;
        let backward = env.backward_masks(&flat)?.reshape(bwd_shape)?;
        Ok((forward, backward))
    }
}
