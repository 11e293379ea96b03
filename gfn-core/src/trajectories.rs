//! Batched container of variable-length trajectories.
use crate::{error::GfnError, Env, States};
use anyhow::Result;
use candle_core::{IndexOp, Tensor};

/// A batch of `n` trajectories padded to a common maximum length.
///
/// `states` holds the visited nodes with batch shape
/// `(max_length + 1, n)`, step-major. For trajectory `i`,
/// `when_is_done[i]` is the index of its terminal node: rows
/// `0..=when_is_done[i]` are the real path and later rows hold the sink
/// sentinel. In forward trajectories the terminate action is recorded at
/// step `when_is_done[i]`; every step after a trajectory has finished holds
/// the reserved dummy action `n_actions`.
///
/// Backward-built trajectories (`is_backward == true`) store the path
/// terminal-first and backward actions instead; they must be run through
/// [`Trajectories::revert_backward_trajectories`] before being consumed by
/// forward-oriented losses.
#[derive(Debug)]
pub struct Trajectories {
    /// Visited nodes, batch shape `(max_length + 1, n)`.
    pub states: States,
    /// Actions taken, `u32` of shape `(max_length, n)`.
    pub actions: Tensor,
    /// Per-trajectory index of the terminal node.
    pub when_is_done: Vec<usize>,
    /// Cached log-reward of each trajectory's terminal node.
    pub log_rewards: Option<Tensor>,
    /// Whether the trajectories were built terminal-first.
    pub is_backward: bool,
}

impl Trajectories {
    /// Assembles a container, validating the shape invariants.
    pub fn new(
        states: States,
        actions: Tensor,
        when_is_done: Vec<usize>,
        log_rewards: Option<Tensor>,
        is_backward: bool,
    ) -> Result<Self> {
        if states.batch_shape.len() != 2 {
            return Err(GfnError::Shape(format!(
                "trajectory states must have a (steps, trajectories) batch shape, got {:?}",
                states.batch_shape
            ))
            .into());
        }
        let (rows, n) = (states.batch_shape[0], states.batch_shape[1]);
        let max_length = rows - 1;
        if actions.dims() != [max_length, n] {
            return Err(GfnError::Shape(format!(
                "actions of shape {:?} do not match {} steps over {} trajectories",
                actions.dims(),
                max_length,
                n
            ))
            .into());
        }
        if when_is_done.len() != n || when_is_done.iter().any(|&d| d > max_length) {
            return Err(GfnError::Shape(format!(
                "when_is_done {:?} inconsistent with {} trajectories of at most {} steps",
                when_is_done, n, max_length
            ))
            .into());
        }
        Ok(Self {
            states,
            actions,
            when_is_done,
            log_rewards,
            is_backward,
        })
    }

    /// Number of trajectories in the batch.
    pub fn n_trajectories(&self) -> usize {
        self.states.batch_shape[1]
    }

    /// Padded number of steps.
    pub fn max_length(&self) -> usize {
        self.states.batch_shape[0] - 1
    }

    /// The terminal node of each trajectory, shape `(n, state_shape...)`.
    pub fn terminal_nodes(&self) -> Result<Tensor> {
        let mut rows = Vec::with_capacity(self.n_trajectories());
        for (i, &d) in self.when_is_done.iter().enumerate() {
            rows.push(self.states.states.i((d, i))?.unsqueeze(0)?);
        }
        Ok(Tensor::cat(&rows, 0)?)
    }

    /// The terminal node of each trajectory as a [`States`] batch.
    pub fn last_states<E: Env>(&self, env: &E) -> Result<States> {
        States::from_tensor(env, self.terminal_nodes()?)
    }

    /// Selects a subset of trajectories by index.
    pub fn index_select(&self, ixs: &[usize]) -> Result<Trajectories> {
        let states = self.states.select_batch(1, ixs)?;
        let idx: Vec<u32> = ixs.iter().map(|&ix| ix as u32).collect();
        let idx_len = idx.len();
        let idx = Tensor::from_vec(idx, (idx_len,), self.actions.device())?;
        let actions = self.actions.index_select(&idx, 1)?;
        let when_is_done = ixs.iter().map(|&ix| self.when_is_done[ix]).collect();
        let log_rewards = match &self.log_rewards {
            Some(lr) => Some(lr.index_select(&idx, 0)?),
            None => None,
        };
        Ok(Trajectories {
            states,
            actions,
            when_is_done,
            log_rewards,
            is_backward: self.is_backward,
        })
    }

    /// Concatenates trajectory batches, re-padding to the longest.
    pub fn cat<E: Env>(env: &E, items: &[&Trajectories]) -> Result<Trajectories> {
        if items.is_empty() {
            return Err(GfnError::Shape("cannot concatenate zero trajectory batches".into()).into());
        }
        let is_backward = items[0].is_backward;
        if items.iter().any(|t| t.is_backward != is_backward) {
            return Err(GfnError::Shape(
                "cannot concatenate forward and backward trajectories".into(),
            )
            .into());
        }
        let max_length = items.iter().map(|t| t.max_length()).max().unwrap();
        let mut state_parts = Vec::with_capacity(items.len());
        let mut action_parts = Vec::with_capacity(items.len());
        let mut when_is_done = Vec::new();
        let mut log_reward_parts = Vec::with_capacity(items.len());
        for t in items {
            state_parts.push(t.padded_state_rows(env, max_length + 1)?);
            action_parts.push(t.padded_action_rows(env, max_length)?);
            when_is_done.extend_from_slice(&t.when_is_done);
            if let Some(lr) = &t.log_rewards {
                log_reward_parts.push(lr.clone());
            }
        }
        let states = States::from_tensor(env, Tensor::cat(&state_parts, 1)?)?;
        let actions = Tensor::cat(&action_parts, 1)?;
        let log_rewards = if log_reward_parts.len() == items.len() {
            Some(Tensor::cat(&log_reward_parts, 0)?)
        } else {
            None
        };
        Trajectories::new(states, actions, when_is_done, log_rewards, is_backward)
    }

    /// Converts backward-built trajectories into forward order.
    ///
    /// The resulting container visits the same nodes root-first, with the
    /// forward action at step `t` recovered from the backward action at step
    /// `when_is_done - 1 - t` and the terminate action appended at step
    /// `when_is_done`. Lengths are preserved.
    pub fn revert_backward_trajectories<E: Env>(&self, env: &E) -> Result<Trajectories> {
        if !self.is_backward {
            return Err(GfnError::Shape(
                "revert_backward_trajectories expects backward trajectories".into(),
            )
            .into());
        }
        let exit = (env.n_actions() - 1) as u32;
        let dummy = env.n_actions() as u32;
        let max_length = self.when_is_done.iter().copied().max().unwrap_or(0) + 1;
        let states = self.reversed_state_rows(env, max_length + 1)?;
        let old_actions = self.actions.to_vec2::<u32>()?;
        let n = self.n_trajectories();
        let mut actions = vec![dummy; max_length * n];
        for (i, &k) in self.when_is_done.iter().enumerate() {
            for t in 0..k {
                actions[t * n + i] = old_actions[k - 1 - t][i];
            }
            actions[k * n + i] = exit;
        }
        let actions = Tensor::from_vec(actions, (max_length, n), env.device())?;
        // The forward terminal node is the backward batch's starting node.
        let start = self.states.states.i(0)?.contiguous()?;
        let log_rewards = Some(env.log_reward(&start)?);
        let states = States::from_tensor(env, states)?;
        Trajectories::new(states, actions, self.when_is_done.clone(), log_rewards, false)
    }

    /// Converts forward trajectories into backward order.
    ///
    /// Inverse of [`Trajectories::revert_backward_trajectories`]: the
    /// terminate action is dropped and the node sequence is reversed.
    pub fn to_backward<E: Env>(&self, env: &E) -> Result<Trajectories> {
        if self.is_backward {
            return Err(GfnError::Shape(
                "to_backward expects forward trajectories".into(),
            )
            .into());
        }
        let dummy = env.n_actions() as u32;
        let max_length = self.when_is_done.iter().copied().max().unwrap_or(0).max(1);
        let states = self.reversed_state_rows(env, max_length + 1)?;
        let old_actions = self.actions.to_vec2::<u32>()?;
        let n = self.n_trajectories();
        let mut actions = vec![dummy; max_length * n];
        for (i, &k) in self.when_is_done.iter().enumerate() {
            for t in 0..k {
                actions[t * n + i] = old_actions[k - 1 - t][i];
            }
        }
        let actions = Tensor::from_vec(actions, (max_length, n), env.device())?;
        let states = States::from_tensor(env, states)?;
        Trajectories::new(states, actions, self.when_is_done.clone(), None, true)
    }

    /// Node rows with the per-trajectory real path reversed, sink-padded.
    fn reversed_state_rows<E: Env>(&self, env: &E, rows: usize) -> Result<Tensor> {
        let n = self.n_trajectories();
        let sf = env.sf().unsqueeze(0)?;
        let mut row_tensors = Vec::with_capacity(rows);
        for t in 0..rows {
            let mut cols = Vec::with_capacity(n);
            for (i, &k) in self.when_is_done.iter().enumerate() {
                if t <= k {
                    cols.push(self.states.states.i((k - t, i))?.unsqueeze(0)?);
                } else {
                    cols.push(sf.clone());
                }
            }
            row_tensors.push(Tensor::cat(&cols, 0)?.unsqueeze(0)?);
        }
        Ok(Tensor::cat(&row_tensors, 0)?)
    }

    fn padded_state_rows<E: Env>(&self, env: &E, rows: usize) -> Result<Tensor> {
        let cur_rows = self.states.batch_shape[0];
        if rows == cur_rows {
            return Ok(self.states.states.clone());
        }
        let n = self.n_trajectories();
        let pad_rows = rows - cur_rows;
        let sf = env.sf().flatten_all()?.unsqueeze(0)?.unsqueeze(0)?;
        let pad = sf.repeat((pad_rows, n, 1))?;
        let mut shape = vec![pad_rows, n];
        shape.extend_from_slice(env.state_shape());
        let pad = pad.reshape(shape)?;
        Ok(Tensor::cat(&[&self.states.states, &pad], 0)?)
    }

    fn padded_action_rows<E: Env>(&self, env: &E, rows: usize) -> Result<Tensor> {
        let cur_rows = self.max_length();
        if rows == cur_rows {
            return Ok(self.actions.clone());
        }
        let n = self.n_trajectories();
        let dummy = env.n_actions() as u32;
        let pad = Tensor::full(dummy, (rows - cur_rows, n), env.device())?;
        Ok(Tensor::cat(&[&self.actions, &pad], 0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::Trajectories;
    use crate::testing::LineEnv;
    use crate::{Env, States};
    use candle_core::Tensor;

    const INF: f32 = f32::NEG_INFINITY;

    /// Two forward trajectories on the line: `[0]->[1]->[2]` terminated at
    /// step 2, and an immediate termination at the root.
    fn forward_pair(env: &LineEnv) -> Trajectories {
        let nodes = vec![
            0.0, 0.0, // step 0
            1.0, INF, // step 1
            2.0, INF, // step 2
            INF, INF, // step 3
        ];
        let states = Tensor::from_vec(nodes, (4, 2, 1), env.device()).unwrap();
        let states = States::from_tensor(env, states).unwrap();
        let actions = Tensor::from_vec(vec![0u32, 1, 0, 2, 1, 2], (3, 2), env.device()).unwrap();
        Trajectories::new(states, actions, vec![2, 0], None, false).unwrap()
    }

    #[test]
    fn terminal_nodes_follow_when_is_done() {
        let env = LineEnv::new(4);
        let trajectories = forward_pair(&env);
        let last = trajectories.terminal_nodes().unwrap();
        assert_eq!(last.to_vec2::<f32>().unwrap(), vec![vec![2.0], vec![0.0]]);
        let last = trajectories.last_states(&env).unwrap();
        assert_eq!(last.is_initial.to_vec1::<u8>().unwrap(), vec![0, 1]);
    }

    #[test]
    fn index_select_keeps_columns() {
        let env = LineEnv::new(4);
        let trajectories = forward_pair(&env);
        let sub = trajectories.index_select(&[1]).unwrap();
        assert_eq!(sub.n_trajectories(), 1);
        assert_eq!(sub.when_is_done, vec![0]);
        assert_eq!(
            sub.states.states.to_vec3::<f32>().unwrap()[0],
            vec![vec![0.0]]
        );
    }

    #[test]
    fn revert_backward_trajectories_rebuilds_forward_path() {
        let env = LineEnv::new(4);
        // Built from [2] back to the root: rows [2], [1], [0].
        let nodes = vec![2.0f32, 1.0, 0.0];
        let states = Tensor::from_vec(nodes, (3, 1, 1), env.device()).unwrap();
        let states = States::from_tensor(&env, states).unwrap();
        let actions = Tensor::from_vec(vec![0u32, 0], (2, 1), env.device()).unwrap();
        let backward = Trajectories::new(states, actions, vec![2], None, true).unwrap();

        let forward = backward.revert_backward_trajectories(&env).unwrap();
        assert!(!forward.is_backward);
        assert_eq!(forward.when_is_done, vec![2]);
        let rows = forward.states.states.to_vec3::<f32>().unwrap();
        assert_eq!(rows[0], vec![vec![0.0]]);
        assert_eq!(rows[1], vec![vec![1.0]]);
        assert_eq!(rows[2], vec![vec![2.0]]);
        assert_eq!(rows[3], vec![vec![INF]]);
        assert_eq!(
            forward.actions.to_vec2::<u32>().unwrap(),
            vec![vec![0], vec![0], vec![1]]
        );
        // Terminal node is [2], so the cached log-reward is 0.1 * 2 + 0.3.
        let lr = forward.log_rewards.as_ref().unwrap();
        assert!((lr.to_vec1::<f32>().unwrap()[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn reversal_round_trip_preserves_paths() {
        let env = LineEnv::new(4);
        let forward = forward_pair(&env);
        let backward = forward.to_backward(&env).unwrap();
        let again = backward.revert_backward_trajectories(&env).unwrap();
        assert_eq!(again.when_is_done, forward.when_is_done);
        for (i, &k) in forward.when_is_done.iter().enumerate() {
            for t in 0..=k + 1 {
                let a = forward.states.states.to_vec3::<f32>().unwrap()[t][i].clone();
                let b = again.states.states.to_vec3::<f32>().unwrap()[t][i].clone();
                assert_eq!(a, b, "trajectory {} row {}", i, t);
            }
            let a = forward.actions.to_vec2::<u32>().unwrap();
            let b = again.actions.to_vec2::<u32>().unwrap();
            for t in 0..=k {
                assert_eq!(a[t][i], b[t][i]);
            }
        }
    }

    #[test]
    fn cat_pads_to_common_length() {
        let env = LineEnv::new(4);
        let long = forward_pair(&env);
        let nodes = vec![0.0, INF];
        let states = Tensor::from_vec(nodes, (2, 1, 1), env.device()).unwrap();
        let states = States::from_tensor(&env, states).unwrap();
        let actions = Tensor::from_vec(vec![1u32], (1, 1), env.device()).unwrap();
        let short = Trajectories::new(states, actions, vec![0], None, false).unwrap();

        let all = Trajectories::cat(&env, &[&long, &short]).unwrap();
        assert_eq!(all.n_trajectories(), 3);
        assert_eq!(all.max_length(), 3);
        assert_eq!(all.when_is_done, vec![2, 0, 0]);
        let acts = all.actions.to_vec2::<u32>().unwrap();
        // The short trajectory is padded with the dummy action.
        assert_eq!(acts[0][2], 1);
        assert_eq!(acts[1][2], 2);
        assert_eq!(acts[2][2], 2);
        // Its padded rows hold the sink sentinel.
        let rows = all.states.states.to_vec3::<f32>().unwrap();
        assert_eq!(rows[2][2], vec![INF]);
        assert_eq!(rows[3][2], vec![INF]);
    }
}
