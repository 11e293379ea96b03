use super::HyperGridConfig;
use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use gfn_core::Env;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::cell::RefCell;

/// The hypergrid environment.
///
/// A node is a point `(x_0, ..., x_{ndim-1})` with `0 <= x_d < height`.
/// Forward action `d < ndim` increments coordinate `d`, action `ndim`
/// terminates. The reward of a terminal node is
/// `r0 + r1 * [all |x_d / (height-1) - 0.5| in (0.25, 0.5]]
///     + r2 * [all |x_d / (height-1) - 0.5| in (0.3, 0.4)]`.
pub struct HyperGrid {
    config: HyperGridConfig,
    device: Device,
    s0: Tensor,
    sf: Tensor,
    state_shape: Vec<usize>,
    rng: RefCell<StdRng>,
}

impl HyperGrid {
    fn reward_of(&self, node: &[f32]) -> f32 {
        let c = &self.config;
        let mut outer = true;
        let mut inner = true;
        for &x in node {
            let ax = (x / (c.height - 1) as f32 - 0.5).abs();
            outer &= ax > 0.25;
            inner &= ax > 0.3 && ax < 0.4;
        }
        let mut r = c.r0;
        if outer {
            r += c.r1;
        }
        if inner {
            r += c.r2;
        }
        r
    }

    /// Number of grid points.
    pub fn n_states(&self) -> usize {
        self.config.height.pow(self.config.ndim as u32)
    }

    /// The flat index of a node, consistent with [`HyperGrid::all_states`].
    pub fn state_index(&self, node: &[f32]) -> usize {
        let height = self.config.height;
        node.iter()
            .fold(0usize, |acc, &x| acc * height + x as usize)
    }

    /// Every grid point, shape `(n_states, ndim)`, in index order.
    pub fn all_states(&self) -> Result<Tensor> {
        let c = &self.config;
        let n = self.n_states();
        let mut data = Vec::with_capacity(n * c.ndim);
        for i in 0..n {
            let mut rem = i;
            let mut node = vec![0f32; c.ndim];
            for d in (0..c.ndim).rev() {
                node[d] = (rem % c.height) as f32;
                rem /= c.height;
            }
            data.extend_from_slice(&node);
        }
        Ok(Tensor::from_vec(data, (n, c.ndim), &self.device)?)
    }

    /// Log of the true partition function, by enumeration.
    pub fn log_partition(&self) -> Result<f32> {
        let all = self.all_states()?.to_vec2::<f32>()?;
        let total: f32 = all.iter().map(|node| self.reward_of(node)).sum();
        Ok(total.ln())
    }

    /// The target probability mass function over all grid points.
    ///
    /// Entry `i` is the normalized reward of the node with flat index `i`.
    pub fn true_dist_pmf(&self) -> Result<Vec<f32>> {
        let all = self.all_states()?.to_vec2::<f32>()?;
        let mut pmf: Vec<f32> = all.iter().map(|node| self.reward_of(node)).collect();
        let total: f32 = pmf.iter().sum();
        for p in pmf.iter_mut() {
            *p /= total;
        }
        Ok(pmf)
    }
}

impl Env for HyperGrid {
    type Config = HyperGridConfig;

    fn build(config: &HyperGridConfig, seed: u64) -> Result<Self> {
        let device = Device::Cpu;
        let s0 = Tensor::zeros((config.ndim,), DType::F32, &device)?;
        let sf = Tensor::full(f32::NEG_INFINITY, (config.ndim,), &device)?;
        Ok(Self {
            config: config.clone(),
            device,
            s0,
            sf,
            state_shape: vec![config.ndim],
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
        })
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn n_actions(&self) -> usize {
        self.config.ndim + 1
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
        let c = &self.config;
        let mut rng = self.rng.borrow_mut();
        let data: Vec<f32> = (0..n * c.ndim)
            .map(|_| rng.gen_range(0..c.height) as f32)
            .collect();
        Ok(Tensor::from_vec(data, (n, c.ndim), &self.device)?)
    }

    fn forward_masks(&self, states: &Tensor) -> Result<Tensor> {
        let can_increment = states.lt((self.config.height - 1) as f64)?;
        let n = states.dim(0)?;
        let can_exit = Tensor::ones((n, 1), DType::U8, &self.device)?;
        Ok(Tensor::cat(&[&can_increment, &can_exit], D::Minus1)?)
    }

    fn backward_masks(&self, states: &Tensor) -> Result<Tensor> {
        Ok(states.gt(0f64)?)
    }

    fn step(&self, states: &Tensor, actions: &Tensor) -> Result<Tensor> {
        let ndim = self.config.ndim;
        let xs = states.to_vec2::<f32>()?;
        let acts = actions.to_vec1::<u32>()?;
        let mut next = Vec::with_capacity(acts.len() * ndim);
        for (node, &a) in xs.iter().zip(acts.iter()) {
            if a as usize == ndim {
                next.extend(std::iter::repeat(f32::NEG_INFINITY).take(ndim));
            } else {
                let mut node = node.clone();
                node[a as usize] += 1.0;
                next.extend_from_slice(&node);
            }
        }
        Ok(Tensor::from_vec(next, (acts.len(), ndim), &self.device)?)
    }

    fn backward_step(&self, states: &Tensor, actions: &Tensor) -> Result<Tensor> {
        let ndim = self.config.ndim;
        let xs = states.to_vec2::<f32>()?;
        let acts = actions.to_vec1::<u32>()?;
        let mut prev = Vec::with_capacity(acts.len() * ndim);
        for (node, &a) in xs.iter().zip(acts.iter()) {
            let mut node = node.clone();
            node[a as usize] -= 1.0;
            prev.extend_from_slice(&node);
        }
        Ok(Tensor::from_vec(prev, (acts.len(), ndim), &self.device)?)
    }

    fn log_reward(&self, states: &Tensor) -> Result<Tensor> {
        let xs = states.to_vec2::<f32>()?;
        let lr: Vec<f32> = xs.iter().map(|node| self.reward_of(node).ln()).collect();
        Ok(Tensor::from_vec(lr, (xs.len(),), &self.device)?)
    }
}

#[cfg(test)]
mod tests {
    use super::{HyperGrid, HyperGridConfig};
    use candle_core::Tensor;
    use gfn_core::Env;

    fn grid() -> HyperGrid {
        HyperGrid::build(&HyperGridConfig::default().ndim(2).height(8).r0(0.1), 0).unwrap()
    }

    #[test]
    fn masks_respect_grid_bounds() {
        let env = grid();
        let states =
            Tensor::from_vec(vec![0f32, 0.0, 7.0, 3.0, 7.0, 7.0], (3, 2), env.device()).unwrap();
        let fwd = env.forward_masks(&states).unwrap().to_vec2::<u8>().unwrap();
        assert_eq!(fwd[0], vec![1, 1, 1]);
        assert_eq!(fwd[1], vec![0, 1, 1]);
        assert_eq!(fwd[2], vec![0, 0, 1]);
        let bwd = env
            .backward_masks(&states)
            .unwrap()
            .to_vec2::<u8>()
            .unwrap();
        assert_eq!(bwd[0], vec![0, 0]);
        assert_eq!(bwd[1], vec![1, 1]);
    }

    #[test]
    fn reward_tiers() {
        let env = grid();
        // Center of the grid: base reward only.
        let center = Tensor::from_vec(vec![3f32, 4.0], (1, 2), env.device()).unwrap();
        let lr = env.log_reward(&center).unwrap().to_vec1::<f32>().unwrap();
        assert!((lr[0] - 0.1f32.ln()).abs() < 1e-6);
        // A corner: outer band only, |x/7 - 0.5| = 0.5.
        let corner = Tensor::from_vec(vec![0f32, 7.0], (1, 2), env.device()).unwrap();
        let lr = env.log_reward(&corner).unwrap().to_vec1::<f32>().unwrap();
        assert!((lr[0] - 0.6f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn inner_band_hits_all_tiers() {
        // height 16: x = 2 gives |2/15 - 0.5| = 11/30, inside (0.3, 0.4).
        let env =
            HyperGrid::build(&HyperGridConfig::default().ndim(2).height(16).r0(0.1), 0).unwrap();
        let node = Tensor::from_vec(vec![2f32, 13.0], (1, 2), env.device()).unwrap();
        let lr = env.log_reward(&node).unwrap().to_vec1::<f32>().unwrap();
        assert!((lr[0] - 2.6f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn step_and_backward_step_are_inverse() {
        let env = grid();
        let states = Tensor::from_vec(vec![1f32, 2.0, 4.0, 0.0], (2, 2), env.device()).unwrap();
        let actions = Tensor::from_vec(vec![0u32, 1], (2,), env.device()).unwrap();
        let next = env.step(&states, &actions).unwrap();
        assert_eq!(
            next.to_vec2::<f32>().unwrap(),
            vec![vec![2.0, 2.0], vec![4.0, 1.0]]
        );
        let back = env.backward_step(&next, &actions).unwrap();
        assert_eq!(
            back.to_vec2::<f32>().unwrap(),
            states.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn terminate_action_maps_to_sink() {
        let env = grid();
        let states = Tensor::from_vec(vec![1f32, 2.0], (1, 2), env.device()).unwrap();
        let actions = Tensor::from_vec(vec![2u32], (1,), env.device()).unwrap();
        let next = env.step(&states, &actions).unwrap();
        assert!(next.to_vec2::<f32>().unwrap()[0]
            .iter()
            .all(|x| x.is_infinite()));
    }

    #[test]
    fn pmf_sums_to_one_and_matches_indexing() {
        let env = grid();
        let pmf = env.true_dist_pmf().unwrap();
        assert_eq!(pmf.len(), 64);
        let total: f32 = pmf.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        let all = env.all_states().unwrap().to_vec2::<f32>().unwrap();
        for (i, node) in all.iter().enumerate() {
            assert_eq!(env.state_index(node), i);
        }
    }
}
