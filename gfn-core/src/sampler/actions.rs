//! Single-step masked action sampling.
use crate::{Direction, Env, LogitsEstimator, States};
use anyhow::{Context, Result};
use candle_core::{Tensor, D};
use candle_nn::ops::log_softmax;
use rand::{distributions::WeightedIndex, prelude::Distribution, rngs::StdRng, SeedableRng};

/// Samples one discrete action per state under a masked policy.
///
/// Logits from the estimator are restricted to the currently valid actions
/// by additive negative-infinity masking before normalization, so invalid
/// actions receive exactly zero probability mass. An optional temperature
/// rescales the logits before masking, for off-policy exploration.
pub struct ActionsSampler {
    direction: Direction,
    temperature: f64,
    rng: StdRng,
}

impl ActionsSampler {
    /// A sampler for the given direction with temperature 1.
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            temperature: 1.0,
            rng: StdRng::seed_from_u64(42),
        }
    }

    /// Sets the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Seeds the sampler's RNG.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// The direction this sampler rolls out in.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Samples one action per state in a flat batch.
    ///
    /// Returns the chosen action indices and their log-probabilities under
    /// the temperature-adjusted policy.
    pub fn sample<E: Env, P: LogitsEstimator>(
        &mut self,
        env: &E,
        estimator: &P,
        states: &States,
    ) -> Result<(Vec<u32>, Vec<f32>)> {
        let flat = states.flat_states(env)?;
        let logits = estimator.logits(&flat)?;
        let masks = match self.direction {
            Direction::Forward => &states.forward_masks,
            Direction::Backward => &states.backward_masks,
        };
        let scaled = logits.affine(1.0 / self.temperature, 0.0)?;
        let neg_inf = Tensor::full(f32::NEG_INFINITY, scaled.dims(), scaled.device())?;
        let masked = masks.where_cond(&scaled, &neg_inf)?;
        let logprobs = log_softmax(&masked, D::Minus1)?;
        let probs = logprobs.exp()?.to_vec2::<f32>()?;
        let logprobs = logprobs.to_vec2::<f32>()?;

        let mut actions = Vec::with_capacity(probs.len());
        let mut chosen = Vec::with_capacity(probs.len());
        for (i, row) in probs.iter().enumerate() {
            let dist = WeightedIndex::new(row)
                .context("no valid action to sample; mask is all-false for a non-sink state")?;
            let a = dist.sample(&mut self.rng);
            actions.push(a as u32);
            chosen.push(logprobs[i][a]);
        }
        Ok((actions, chosen))
    }
}
