//! Trajectory objectives: trajectory balance and KL-style divergences.
mod config;

pub use config::{Baseline, LossConfig, LossMode};

use crate::{error::GfnError, Env, LogitsEstimator, Trajectories};
use anyhow::Result;
use candle_core::{DType, IndexOp, Tensor, D};
use candle_nn::ops::{log_softmax, softmax};

/// Result of one objective evaluation.
pub struct LossOutput {
    /// Scalar policy loss, carrying gradient for the policy parameters
    /// (and for logZ in trajectory-balance mode).
    pub loss: Tensor,
    /// Scalar regression loss fitting the log-normalizer,
    /// `(score.detach() + logZ)^2`. Its gradient reaches only logZ.
    pub loss_z: Tensor,
    /// Detached per-trajectory scores, for monitoring.
    pub scores: Tensor,
}

/// Computes log-probabilities and losses for batches of trajectories.
///
/// Log-probabilities are recomputed from the trajectories under the given
/// estimators rather than reused from sampling time, so sampling may be
/// tempered or off-policy while gradients are taken under the true policy.
#[derive(Debug)]
pub struct TrajectoryLoss<'a, E: Env> {
    env: &'a E,
    config: LossConfig,
}

impl<'a, E: Env> TrajectoryLoss<'a, E> {
    /// Creates the loss layer, validating the configuration eagerly.
    pub fn new(env: &'a E, config: LossConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { env, config })
    }

    /// The validated configuration.
    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    /// Per-trajectory `(logPF, logPB, score)` with gradient flow.
    ///
    /// `logPF` sums, over the steps before the terminal node, the
    /// log-probability the forward policy assigns to the action taken;
    /// `logPB` does the same for the backward policy evaluated at each
    /// successor node. `score = logPF - logPB - log_reward`, so a
    /// zero-length trajectory scores exactly `-log_reward(s0)`.
    pub fn get_scores<PF, PB>(
        &self,
        pf: &PF,
        pb: &PB,
        trajectories: &Trajectories,
    ) -> Result<(Tensor, Tensor, Tensor)>
    where
        PF: LogitsEstimator,
        PB: LogitsEstimator,
    {
        if trajectories.is_backward {
            return Err(GfnError::Shape(
                "losses consume forward trajectories; revert backward ones first".into(),
            )
            .into());
        }
        let env = self.env;
        let device = env.device();
        let n = trajectories.n_trajectories();
        let n_actions = env.n_actions();
        let done = &trajectories.when_is_done;
        let actions = trajectories.actions.to_vec2::<u32>()?;
        let state_numel: usize = env.state_shape().iter().product();
        let s0_tile = env
            .s0()
            .flatten_all()?
            .unsqueeze(0)?
            .repeat((n, 1))?;

        let mut logpf = Tensor::zeros((n,), DType::F32, device)?;
        let mut logpb = Tensor::zeros((n,), DType::F32, device)?;
        let max_real = done.iter().copied().max().unwrap_or(0);

        for t in 0..max_real {
            let active: Vec<u8> = done.iter().map(|&d| u8::from(t < d)).collect();
            if active.iter().all(|&a| a == 0) {
                continue;
            }
            let weight = Tensor::from_vec(
                active.iter().map(|&a| a as f32).collect::<Vec<f32>>(),
                (n,),
                device,
            )?;
            let active = Tensor::from_vec(active, (n,), device)?;
            // Actions of padded steps are clamped to 0; their contribution
            // is zeroed by `weight` below.
            let step_actions: Vec<u32> = (0..n)
                .map(|i| if t < done[i] { actions[t][i] } else { 0 })
                .collect();
            let idx = Tensor::from_vec(step_actions, (n, 1), device)?;

            let chosen_pf = self.step_logprob(
                pf,
                &trajectories.states.states.i(t)?,
                &trajectories.states.forward_masks.i(t)?,
                &active,
                &idx,
                &s0_tile,
                state_numel,
                n_actions,
            )?;
            logpf = (logpf + (chosen_pf * &weight)?)?;

            // The backward policy scores the reverse move from the
            // successor node, under the successor's backward mask.
            let chosen_pb = self.step_logprob(
                pb,
                &trajectories.states.states.i(t + 1)?,
                &trajectories.states.backward_masks.i(t + 1)?,
                &active,
                &idx,
                &s0_tile,
                state_numel,
                n_actions - 1,
            )?;
            logpb = (logpb + (chosen_pb * &weight)?)?;
        }

        let log_rewards = match &trajectories.log_rewards {
            Some(lr) => lr.clone(),
            None => env.log_reward(&trajectories.terminal_nodes()?)?,
        };
        let scores = ((&logpf - &logpb)? - &log_rewards)?;
        Ok((logpf, logpb, scores))
    }

    /// Evaluates the configured objective on a trajectory batch.
    ///
    /// `logz` is the scalar log-normalizer parameter; it receives gradient
    /// from `loss` only in trajectory-balance mode, and from `loss_z`
    /// always.
    pub fn compute<PF, PB>(
        &self,
        pf: &PF,
        pb: &PB,
        trajectories: &Trajectories,
        logz: &Tensor,
    ) -> Result<LossOutput>
    where
        PF: LogitsEstimator,
        PB: LogitsEstimator,
    {
        let (logpf, logpb, scores) = self.get_scores(pf, pb, trajectories)?;
        let detached = scores.detach();
        let baseline = match self.config.baseline {
            Baseline::None => Tensor::zeros((), DType::F32, self.env.device())?,
            Baseline::Local => detached.mean_all()?,
            Baseline::Global => logz.detach().neg()?,
        };
        let advantage = detached.broadcast_sub(&baseline)?;
        let weights = if self.config.reweight {
            let w = if self.config.sample_from_reward {
                softmax(&detached, 0)?
            } else {
                softmax(&detached.neg()?, 0)?
            };
            Some(w)
        } else {
            None
        };

        let sfr = self.config.sample_from_reward;
        let per_trajectory = match self.config.mode {
            LossMode::Tb => scores.broadcast_add(logz)?.sqr()?,
            LossMode::ForwardKl => {
                let mut l = ((logpb.mul(&advantage))?.neg()? - &logpf)?;
                if let Some(w) = &weights {
                    l = (l * w)?;
                }
                l
            }
            LossMode::ReverseKl => ((logpf.mul(&advantage))? - &logpb)?,
            LossMode::Rws => {
                let mut loss_pf = logpf.neg()?;
                if let (false, Some(w)) = (sfr, &weights) {
                    loss_pf = (loss_pf * w)?;
                }
                let mut loss_pb = logpb.neg()?;
                if let (true, Some(w)) = (sfr, &weights) {
                    loss_pb = (loss_pb * w)?;
                }
                (loss_pf + loss_pb)?
            }
            LossMode::ReverseRws => {
                let mut loss_pf = logpf.mul(&advantage)?;
                if let (true, Some(w)) = (sfr, &weights) {
                    loss_pf = (loss_pf * w)?;
                }
                let mut loss_pb = logpb.mul(&advantage)?.neg()?;
                if let (false, Some(w)) = (sfr, &weights) {
                    loss_pb = (loss_pb * w)?;
                }
                (loss_pf + loss_pb)?
            }
        };
        let loss = per_trajectory.mean_all()?;
        let loss_z = detached.broadcast_add(logz)?.sqr()?.mean_all()?;
        Ok(LossOutput {
            loss,
            loss_z,
            scores: detached,
        })
    }

    /// Log-probability of the recorded action at one step, for all
    /// trajectories at once.
    ///
    /// Padded steps have their node replaced by the root sentinel and their
    /// mask forced all-valid so `log_softmax` stays finite; the caller
    /// zeroes their contribution.
    #[allow(clippy::too_many_arguments)]
    fn step_logprob<P: LogitsEstimator>(
        &self,
        policy: &P,
        nodes: &Tensor,
        masks: &Tensor,
        active: &Tensor,
        action_idx: &Tensor,
        s0_tile: &Tensor,
        state_numel: usize,
        n_logits: usize,
    ) -> Result<Tensor> {
        let device = self.env.device();
        let n = active.dim(0)?;
        let flat = nodes.contiguous()?.reshape((n, state_numel))?;
        let node_mask = active.unsqueeze(1)?.repeat((1, state_numel))?;
        let mut shape = vec![n];
        shape.extend_from_slice(self.env.state_shape());
        let nodes_eff = node_mask.where_cond(&flat, s0_tile)?.reshape(shape)?;

        let mask_eff = {
            let ones = Tensor::ones((n, n_logits), DType::U8, device)?;
            let active_rows = active.unsqueeze(1)?.repeat((1, n_logits))?;
            active_rows.where_cond(&masks.contiguous()?, &ones)?
        };
        let logits = policy.logits(&nodes_eff)?;
        let neg_inf = Tensor::full(f32::NEG_INFINITY, (n, n_logits), device)?;
        let masked = mask_eff.where_cond(&logits, &neg_inf)?;
        let logprobs = log_softmax(&masked, D::Minus1)?;
        Ok(logprobs.gather(action_idx, D::Minus1)?.squeeze(D::Minus1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::{LossConfig, LossMode, TrajectoryLoss};
    use crate::testing::{ConstLogits, LineEnv};
    use crate::{Env, GfnError, States, Trajectories};
    use candle_core::Tensor;

    const INF: f32 = f32::NEG_INFINITY;

    fn uniform_policies() -> (ConstLogits, ConstLogits) {
        (ConstLogits::uniform(2), ConstLogits::uniform(1))
    }

    /// `[0] -> [1] -> terminate`, padded to two steps.
    fn one_move_trajectory(env: &LineEnv) -> Trajectories {
        let nodes = vec![0.0, 1.0, INF];
        let states = Tensor::from_vec(nodes, (3, 1, 1), env.device()).unwrap();
        let states = States::from_tensor(env, states).unwrap();
        let actions = Tensor::from_vec(vec![0u32, 1], (2, 1), env.device()).unwrap();
        Trajectories::new(states, actions, vec![1], None, false).unwrap()
    }

    fn immediate_trajectory(env: &LineEnv) -> Trajectories {
        let nodes = vec![0.0, INF];
        let states = Tensor::from_vec(nodes, (2, 1, 1), env.device()).unwrap();
        let states = States::from_tensor(env, states).unwrap();
        let actions = Tensor::from_vec(vec![1u32], (1, 1), env.device()).unwrap();
        Trajectories::new(states, actions, vec![0], None, false).unwrap()
    }

    #[test]
    fn invalid_configuration_fails_before_any_sampling() {
        let env = LineEnv::new(3);
        let config = LossConfig::default()
            .mode(LossMode::Tb)
            .sample_from_reward(true)
            .reweight(true);
        let err = TrajectoryLoss::new(&env, config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GfnError>(),
            Some(GfnError::InvalidLossConfig(_))
        ));
    }

    #[test]
    fn immediate_termination_scores_minus_log_reward() {
        let env = LineEnv::new(3);
        let loss = TrajectoryLoss::new(&env, LossConfig::default()).unwrap();
        let (pf, pb) = uniform_policies();
        let trajectories = immediate_trajectory(&env);
        let (logpf, logpb, scores) = loss.get_scores(&pf, &pb, &trajectories).unwrap();
        assert_eq!(logpf.to_vec1::<f32>().unwrap(), vec![0.0]);
        assert_eq!(logpb.to_vec1::<f32>().unwrap(), vec![0.0]);
        let score = scores.to_vec1::<f32>().unwrap()[0];
        assert!((score - (-LineEnv::LOG_REWARD_OFFSET)).abs() < 1e-6);
    }

    #[test]
    fn scores_match_hand_computation() {
        let env = LineEnv::new(3);
        let loss = TrajectoryLoss::new(&env, LossConfig::default()).unwrap();
        let (pf, pb) = uniform_policies();
        let trajectories = one_move_trajectory(&env);
        let (logpf, logpb, scores) = loss.get_scores(&pf, &pb, &trajectories).unwrap();
        // One real step from the root, both actions legal: ln(1/2).
        let expected_pf = 0.5f32.ln();
        assert!((logpf.to_vec1::<f32>().unwrap()[0] - expected_pf).abs() < 1e-6);
        // The successor [1] has a single legal backward move: ln(1).
        assert!((logpb.to_vec1::<f32>().unwrap()[0]).abs() < 1e-6);
        let expected = expected_pf - (0.1 + LineEnv::LOG_REWARD_OFFSET);
        assert!((scores.to_vec1::<f32>().unwrap()[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn tb_loss_is_squared_shifted_score() {
        let env = LineEnv::new(3);
        let loss = TrajectoryLoss::new(&env, LossConfig::default()).unwrap();
        let (pf, pb) = uniform_policies();
        let trajectories = one_move_trajectory(&env);
        let logz = Tensor::new(0.25f32, env.device()).unwrap();
        let out = loss.compute(&pf, &pb, &trajectories, &logz).unwrap();
        let score = out.scores.to_vec1::<f32>().unwrap()[0];
        let expected = (score + 0.25).powi(2);
        assert!((out.loss.to_scalar::<f32>().unwrap() - expected).abs() < 1e-5);
        let expected_z = (score + 0.25).powi(2);
        assert!((out.loss_z.to_scalar::<f32>().unwrap() - expected_z).abs() < 1e-5);
    }

    #[test]
    fn kl_losses_are_finite_with_baselines_and_weights() {
        let env = LineEnv::new(3);
        let (pf, pb) = uniform_policies();
        let logz = Tensor::new(0f32, env.device()).unwrap();
        let trajectories = one_move_trajectory(&env);
        for (mode, baseline) in [
            (LossMode::ForwardKl, super::Baseline::Local),
            (LossMode::ReverseKl, super::Baseline::Global),
            (LossMode::Rws, super::Baseline::None),
            (LossMode::ReverseRws, super::Baseline::Local),
        ] {
            let config = LossConfig::default()
                .mode(mode)
                .baseline(baseline)
                .reweight(mode != LossMode::ReverseKl);
            let loss = TrajectoryLoss::new(&env, config).unwrap();
            let out = loss.compute(&pf, &pb, &trajectories, &logz).unwrap();
            assert!(out.loss.to_scalar::<f32>().unwrap().is_finite());
        }
    }

    #[test]
    fn backward_trajectories_are_rejected() {
        let env = LineEnv::new(3);
        let loss = TrajectoryLoss::new(&env, LossConfig::default()).unwrap();
        let (pf, pb) = uniform_policies();
        let backward = one_move_trajectory(&env).to_backward(&env).unwrap();
        let err = loss.get_scores(&pf, &pb, &backward).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GfnError>(),
            Some(GfnError::Shape(_))
        ));
    }
}
