//! Test support: a one-dimensional chain environment and fixed policies.
use crate::{Env, LogitsEstimator};
use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::cell::RefCell;

/// A chain of `length` nodes `[0], [1], ..., [length - 1]`.
///
/// Action 0 moves one step right, action 1 terminates. The log-reward of a
/// node `[x]` is `0.1 * x + 0.3`, so the root's log-reward is nonzero.
#[derive(Debug)]
pub struct LineEnv {
    length: usize,
    device: Device,
    s0: Tensor,
    sf: Tensor,
    state_shape: Vec<usize>,
    rng: RefCell<StdRng>,
}

impl LineEnv {
    pub fn new(length: usize) -> Self {
        let device = Device::Cpu;
        let s0 = Tensor::zeros((1,), DType::F32, &device).unwrap();
        let sf = Tensor::full(f32::NEG_INFINITY, (1,), &device).unwrap();
        Self {
            length,
            device,
            s0,
            sf,
            state_shape: vec![1],
            rng: RefCell::new(StdRng::seed_from_u64(0)),
        }
    }

    pub const LOG_REWARD_OFFSET: f32 = 0.3;
}

impl Env for LineEnv {
    type Config = usize;

    fn build(config: &usize, _seed: u64) -> Result<Self> {
        Ok(Self::new(*config))
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn n_actions(&self) -> usize {
        2
    }

    fn state_shape(&self) -> &[usize] {
        &self.state_shape
    }

    fn s0(&self) -> &Tensor {
        &self.s0
    }

    fn sf(&self) -> &Tensor {
        &self.sf
    }

    fn random_states(&self, n: usize) -> Result<Tensor> {
        let mut rng = self.rng.borrow_mut();
        let xs: Vec<f32> = (0..n)
            .map(|_| rng.gen_range(0..self.length) as f32)
            .collect();
        Ok(Tensor::from_vec(xs, (n, 1), &self.device)?)
    }

    fn forward_masks(&self, states: &Tensor) -> Result<Tensor> {
        let can_right = states.lt((self.length - 1) as f64)?;
        let can_exit = Tensor::ones(can_right.dims(), DType::U8, &self.device)?;
        Ok(Tensor::cat(&[&can_right, &can_exit], D::Minus1)?)
    }

    fn backward_masks(&self, states: &Tensor) -> Result<Tensor> {
        Ok(states.gt(0f64)?)
    }

    fn step(&self, states: &Tensor, actions: &Tensor) -> Result<Tensor> {
        let xs = states.to_vec2::<f32>()?;
        let acts = actions.to_vec1::<u32>()?;
        let next: Vec<f32> = xs
            .iter()
            .zip(acts.iter())
            .map(|(x, &a)| if a == 1 { f32::NEG_INFINITY } else { x[0] + 1.0 })
            .collect();
        Ok(Tensor::from_vec(next, (acts.len(), 1), &self.device)?)
    }

    fn backward_step(&self, states: &Tensor, _actions: &Tensor) -> Result<Tensor> {
        let xs = states.to_vec2::<f32>()?;
        let prev: Vec<f32> = xs.iter().map(|x| x[0] - 1.0).collect();
        Ok(Tensor::from_vec(prev, (xs.len(), 1), &self.device)?)
    }

    fn log_reward(&self, states: &Tensor) -> Result<Tensor> {
        let xs = states.to_vec2::<f32>()?;
        let lr: Vec<f32> = xs
            .iter()
            .map(|x| 0.1 * x[0] + Self::LOG_REWARD_OFFSET)
            .collect();
        Ok(Tensor::from_vec(lr, (xs.len(),), &self.device)?)
    }
}

/// Emits the same logits row for every node.
pub struct ConstLogits {
    row: Vec<f32>,
}

impl ConstLogits {
    pub fn new(row: Vec<f32>) -> Self {
        Self { row }
    }

    /// Uniform over `n` actions.
    pub fn uniform(n: usize) -> Self {
        Self { row: vec![0.0; n] }
    }
}

impl LogitsEstimator for ConstLogits {
    fn logits(&self, states: &Tensor) -> Result<Tensor> {
        let n = states.dim(0)?;
        let mut data = Vec::with_capacity(n * self.row.len());
        for _ in 0..n {
            data.extend_from_slice(&self.row);
        }
        Ok(Tensor::from_vec(
            data,
            (n, self.row.len()),
            states.device(),
        )?)
    }
}
