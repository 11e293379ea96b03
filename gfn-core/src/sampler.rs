//! Batched trajectory rollouts under a stochastic policy.
mod actions;

pub use actions::ActionsSampler;

use crate::{error::GfnError, Direction, Env, LogitsEstimator, States, Trajectories};
use anyhow::Result;
use candle_core::{IndexOp, Tensor};
use log::debug;

/// Default hard bound on rollout length.
const DEFAULT_MAX_STEPS: usize = 1000;

/// Drives a policy to produce batches of complete trajectories.
///
/// In forward mode, rollouts start at the root sentinel and finish when each
/// trajectory takes the terminate action. In backward mode (determined by
/// the [`ActionsSampler`]'s direction), rollouts start from a supplied batch
/// of states and finish when each trajectory reaches the root. All
/// trajectories in a batch are stepped synchronously; finished ones are
/// removed from the active set and padded with the sink sentinel and the
/// dummy action.
///
/// The sampler accumulates sampling-time log-probabilities only for
/// diagnostics. Losses recompute log-probabilities from the returned
/// trajectories, so sampling may use a temperature or a different policy
/// than the one being trained.
pub struct TrajectoriesSampler<E: Env> {
    env: E,
    actions_sampler: ActionsSampler,
    max_steps: usize,
}

impl<E: Env> TrajectoriesSampler<E> {
    /// Creates a sampler over `env` driven by `actions_sampler`.
    pub fn new(env: E, actions_sampler: ActionsSampler) -> Self {
        Self {
            env,
            actions_sampler,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Overrides the hard step bound.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// The wrapped environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Samples `n` trajectories from the root.
    pub fn sample<P: LogitsEstimator>(&mut self, estimator: &P, n: usize) -> Result<Trajectories> {
        let start = States::initial(&self.env, &[n])?;
        self.sample_trajectories(estimator, start)
    }

    /// Rolls out complete trajectories from a supplied starting batch.
    ///
    /// Exceeding the step bound before every trajectory terminates is fatal:
    /// it indicates a non-terminating environment or policy, and retrying
    /// under identical weights would reproduce the failure.
    pub fn sample_trajectories<P: LogitsEstimator>(
        &mut self,
        estimator: &P,
        start: States,
    ) -> Result<Trajectories> {
        if start.batch_shape.len() != 1 {
            return Err(GfnError::Shape(format!(
                "rollouts start from a flat batch of states, got batch shape {:?}",
                start.batch_shape
            ))
            .into());
        }
        let n = start.n_states();
        let direction = self.actions_sampler.direction();
        let exit = (self.env.n_actions() - 1) as u32;
        let dummy = self.env.n_actions() as u32;
        let s0_flat = self.env.s0().flatten_all()?.to_vec1::<f32>()?;
        let sf_node = self.env.sf().clone();

        let mut cur: Vec<Tensor> = (0..n)
            .map(|i| start.states.i(i))
            .collect::<candle_core::Result<_>>()?;
        let mut done: Vec<Option<usize>> = vec![None; n];
        let mut state_rows: Vec<Tensor> = vec![Tensor::stack(&cur, 0)?];
        let mut action_rows: Vec<Vec<u32>> = Vec::new();
        let mut cum_logprob = vec![0f32; n];

        for t in 0.. {
            if direction == Direction::Backward {
                // A trajectory is finished once it sits at the root.
                for i in 0..n {
                    if done[i].is_none() && node_equals(&cur[i], &s0_flat)? {
                        done[i] = Some(t);
                        cur[i] = sf_node.clone();
                    }
                }
            }
            let active: Vec<usize> = (0..n).filter(|&i| done[i].is_none()).collect();
            if active.is_empty() {
                break;
            }
            if t >= self.max_steps {
                return Err(GfnError::NonTermination {
                    max_steps: self.max_steps,
                }
                .into());
            }

            let nodes: Vec<Tensor> = active.iter().map(|&i| cur[i].clone()).collect();
            let batch = Tensor::stack(&nodes, 0)?;
            let sub = States::from_tensor(&self.env, batch.clone())?;
            let (acts, logprobs) = self.actions_sampler.sample(&self.env, estimator, &sub)?;
            let actions_t =
                Tensor::from_vec(acts.clone(), (acts.len(),), self.env.device())?;
            let successors = match direction {
                Direction::Forward => self.env.step(&batch, &actions_t)?,
                Direction::Backward => self.env.backward_step(&batch, &actions_t)?,
            };

            let mut row = vec![dummy; n];
            for (j, &i) in active.iter().enumerate() {
                row[i] = acts[j];
                cum_logprob[i] += logprobs[j];
                cur[i] = successors.i(j)?;
                if direction == Direction::Forward && acts[j] == exit {
                    // env.step maps the terminate action to the sink.
                    done[i] = Some(t);
                }
            }
            action_rows.push(row);
            state_rows.push(Tensor::stack(&cur, 0)?);
        }

        // Keep at least one padded step so the containers are never empty.
        if action_rows.is_empty() {
            action_rows.push(vec![dummy; n]);
            state_rows.push(Tensor::stack(&vec![sf_node; n], 0)?);
        }

        let when_is_done: Vec<usize> = done.into_iter().map(|d| d.unwrap_or(0)).collect();
        let max_length = action_rows.len();
        debug!(
            "rolled out {} trajectories over {} steps, mean sampling logprob {:.4}",
            n,
            max_length,
            cum_logprob.iter().sum::<f32>() / n.max(1) as f32
        );

        let states = States::from_tensor(&self.env, Tensor::stack(&state_rows, 0)?)?;
        let actions = Tensor::from_vec(
            action_rows.into_iter().flatten().collect::<Vec<u32>>(),
            (max_length, n),
            self.env.device(),
        )?;
        let log_rewards = match direction {
            Direction::Forward => {
                let mut terminals = Vec::with_capacity(n);
                for (i, &d) in when_is_done.iter().enumerate() {
                    terminals.push(state_rows_node(&states, d, i)?);
                }
                Some(self.env.log_reward(&Tensor::stack(&terminals, 0)?)?)
            }
            Direction::Backward => None,
        };
        Trajectories::new(
            states,
            actions,
            when_is_done,
            log_rewards,
            direction == Direction::Backward,
        )
    }
}

fn node_equals(node: &Tensor, reference: &[f32]) -> Result<bool> {
    Ok(node.flatten_all()?.to_vec1::<f32>()? == reference)
}

fn state_rows_node(states: &States, row: usize, col: usize) -> Result<Tensor> {
    Ok(states.states.i((row, col))?)
}
