//! The training loop.
mod config;

pub use config::TrainerConfig;

use crate::validate::{validate, ValidationInfo};
use anyhow::Result;
use candle_core::Tensor;
use gfn_candle::{Optimizer, OptimizerConfig, TbParametrization, TbParametrizationConfig};
use gfn_core::{
    loss::{LossMode, TrajectoryLoss},
    ActionsSampler, Direction, Env, ReplayBuffer, ReplayBufferConfig, States,
    TrajectoriesSampler,
};
use gfn_hypergrid::{HyperGrid, HyperGridConfig};
use log::{debug, info};
use rand::{distributions::WeightedIndex, prelude::Distribution, rngs::StdRng, SeedableRng};

/// Logits divisor used for exploratory rollouts when off-policy sampling is
/// enabled. Below 1, sampling is sharper than the trained policy.
const OFF_POLICY_TEMPERATURE: f64 = 0.1;

/// Trains a GFlowNet on the hypergrid environment.
///
/// Each iteration samples a batch of trajectories (forward from the policy,
/// or backward from reward-distributed terminal states), optionally routes
/// it through a replay buffer, evaluates the configured objective and takes
/// one step of each optimizer. The log-normalizer has its own optimizer fed
/// by the regression loss; in trajectory-balance mode it additionally
/// receives the policy-loss gradient, at its own learning rate.
pub struct Trainer {
    config: TrainerConfig,
    env: HyperGrid,
    parametrization: TbParametrization,
    sampler: TrajectoriesSampler<HyperGrid>,
    validation_sampler: Option<TrajectoriesSampler<HyperGrid>>,
    reward_dist: Option<(Tensor, WeightedIndex<f32>)>,
    replay_buffer: Option<ReplayBuffer>,
    opt_policy: Optimizer,
    opt_z: Optimizer,
    opt_logz_tb: Option<Optimizer>,
    visited: Option<States>,
    rng: StdRng,
}

impl Trainer {
    /// Builds the trainer, rejecting invalid objective configurations
    /// before any sampling happens.
    pub fn build(config: TrainerConfig, env_config: &HyperGridConfig) -> Result<Self> {
        config.loss.validate()?;
        let env = HyperGrid::build(env_config, config.seed)?;
        let parametrization = TbParametrization::build(
            &TbParametrizationConfig::new(env_config.ndim, env.n_actions())
                .units(config.units.clone())
                .uniform_pb(config.uniform_pb),
            env.device(),
        )?;

        let sample_from_reward = config.loss.sample_from_reward;
        let actions_sampler = if sample_from_reward {
            ActionsSampler::new(Direction::Backward).with_seed(config.seed)
        } else if config.off_policy {
            ActionsSampler::new(Direction::Forward)
                .with_temperature(OFF_POLICY_TEMPERATURE)
                .with_seed(config.seed)
        } else {
            ActionsSampler::new(Direction::Forward).with_seed(config.seed)
        };
        let sampler =
            TrajectoriesSampler::new(HyperGrid::build(env_config, config.seed)?, actions_sampler);
        let validation_sampler = if sample_from_reward {
            // The visited-states metric still needs on-policy forward
            // rollouts when training trajectories come from the reward.
            Some(TrajectoriesSampler::new(
                HyperGrid::build(env_config, config.seed.wrapping_add(1))?,
                ActionsSampler::new(Direction::Forward).with_seed(config.seed.wrapping_add(1)),
            ))
        } else {
            None
        };
        let reward_dist = if sample_from_reward {
            let pmf = env.true_dist_pmf()?;
            Some((env.all_states()?, WeightedIndex::new(&pmf)?))
        } else {
            None
        };

        let replay_buffer = (config.replay_capacity > 0).then(|| {
            ReplayBuffer::build(
                &ReplayBufferConfig::default()
                    .capacity(config.replay_capacity)
                    .seed(config.seed),
            )
        });

        let opt_policy =
            OptimizerConfig::Adam { lr: config.lr }.build(parametrization.policy_vars())?;
        let opt_z = OptimizerConfig::Adam { lr: config.lr_z }
            .build(vec![parametrization.logz().var().clone()])?;
        let opt_logz_tb = match config.loss.mode {
            LossMode::Tb => Some(
                OptimizerConfig::Adam { lr: config.lr_z }
                    .build(vec![parametrization.logz().var().clone()])?,
            ),
            _ => None,
        };

        let rng = StdRng::seed_from_u64(config.seed.wrapping_add(2));
        Ok(Self {
            config,
            env,
            parametrization,
            sampler,
            validation_sampler,
            reward_dist,
            replay_buffer,
            opt_policy,
            opt_z,
            opt_logz_tb,
            visited: None,
            rng,
        })
    }

    /// The trained parameters.
    pub fn parametrization(&self) -> &TbParametrization {
        &self.parametrization
    }

    /// Runs the configured number of iterations.
    ///
    /// Returns the metrics of the last validation, if any ran.
    pub fn train(&mut self) -> Result<Option<ValidationInfo>> {
        let loss_layer = TrajectoryLoss::new(&self.env, self.config.loss.clone())?;
        let batch_size = self.config.batch_size;
        let mut last_info = None;

        for i in 0..self.config.n_iterations {
            let mut validation_trajectories = None;
            let trajectories = match (&self.reward_dist, &mut self.validation_sampler) {
                (Some((all_states, dist)), Some(validation_sampler)) => {
                    let ixs: Vec<u32> = (0..batch_size)
                        .map(|_| dist.sample(&mut self.rng) as u32)
                        .collect();
                    let idx = Tensor::from_vec(ixs, (batch_size,), self.env.device())?;
                    let start =
                        States::from_tensor(&self.env, all_states.index_select(&idx, 0)?)?;
                    let backward = self
                        .sampler
                        .sample_trajectories(self.parametrization.pb(), start)?;
                    validation_trajectories =
                        Some(validation_sampler.sample(self.parametrization.pf(), batch_size)?);
                    backward.revert_backward_trajectories(&self.env)?
                }
                _ => self.sampler.sample(self.parametrization.pf(), batch_size)?,
            };

            let training = match &mut self.replay_buffer {
                Some(buffer) => {
                    buffer.add(&trajectories)?;
                    buffer.sample(&self.env, batch_size)?
                }
                None => trajectories,
            };

            let out = loss_layer.compute(
                self.parametrization.pf(),
                self.parametrization.pb(),
                &training,
                self.parametrization.logz().as_tensor(),
            )?;
            self.opt_z.backward_step(&out.loss_z)?;
            let grads = out.loss.backward()?;
            self.opt_policy.step(&grads)?;
            if let Some(opt) = &mut self.opt_logz_tb {
                opt.step(&grads)?;
            }

            let last = match &validation_trajectories {
                Some(v) => v.last_states(&self.env)?,
                None => training.last_states(&self.env)?,
            };
            match &mut self.visited {
                Some(states) => states.extend(&self.env, &last)?,
                None => self.visited = Some(last),
            }

            let loss_value = out.loss.to_scalar::<f32>()?;
            if i % self.config.validation_interval == 0 {
                if let Some(visited) = &self.visited {
                    let info = validate(
                        &self.env,
                        visited,
                        self.config.validation_samples,
                        self.parametrization.logz().value()?,
                    )?;
                    info!(
                        "iteration {}: loss {:.6}, l1_dist {:.6}, logz_diff {:.4}, states_visited {}",
                        i,
                        loss_value,
                        info.l1_dist,
                        info.logz_diff,
                        (i + 1) * batch_size
                    );
                    last_info = Some(info);
                }
            } else {
                debug!("iteration {}: loss {:.6}", i, loss_value);
            }

            if self.config.schedule != 1.0 && (i + 1) % self.config.schedule_interval == 0 {
                let lr = self.opt_policy.learning_rate() * self.config.schedule;
                self.opt_policy.set_learning_rate(lr);
                let lr_z = self.opt_z.learning_rate() * self.config.schedule;
                self.opt_z.set_learning_rate(lr_z);
                if let Some(opt) = &mut self.opt_logz_tb {
                    let lr = opt.learning_rate() * self.config.schedule;
                    opt.set_learning_rate(lr);
                }
            }
        }
        Ok(last_info)
    }
}

#[cfg(test)]
mod tests {
    use super::{Trainer, TrainerConfig};
    use gfn_core::loss::{Baseline, LossConfig, LossMode};
    use gfn_hypergrid::HyperGridConfig;

    fn small_env() -> HyperGridConfig {
        HyperGridConfig::default().ndim(2).height(4).r0(0.1)
    }

    fn small_trainer(loss: LossConfig) -> TrainerConfig {
        TrainerConfig::default()
            .loss(loss)
            .n_iterations(8)
            .batch_size(8)
            .units(vec![16])
            .validation_interval(4)
            .validation_samples(1000)
            .seed(3)
    }

    #[test]
    fn tb_training_runs_and_validates() {
        let config = small_trainer(LossConfig::default());
        let mut trainer = Trainer::build(config, &small_env()).unwrap();
        let info = trainer.train().unwrap().unwrap();
        assert!(info.l1_dist.is_finite());
        assert!(trainer.parametrization().logz().value().unwrap().is_finite());
    }

    #[test]
    fn replayed_forward_kl_training_runs() {
        let loss = LossConfig::default()
            .mode(LossMode::ForwardKl)
            .baseline(Baseline::Local)
            .reweight(true);
        let config = small_trainer(loss).replay_capacity(32).off_policy(true);
        let mut trainer = Trainer::build(config, &small_env()).unwrap();
        assert!(trainer.train().unwrap().is_some());
    }

    #[test]
    fn reward_sampled_rws_training_runs() {
        let loss = LossConfig::default()
            .mode(LossMode::Rws)
            .sample_from_reward(true)
            .reweight(true);
        let config = small_trainer(loss).uniform_pb(true);
        let mut trainer = Trainer::build(config, &small_env()).unwrap();
        assert!(trainer.train().unwrap().is_some());
    }

    #[test]
    fn invalid_objective_fails_at_build_time() {
        let loss = LossConfig::default()
            .mode(LossMode::ReverseKl)
            .sample_from_reward(true)
            .reweight(false);
        let config = small_trainer(loss);
        assert!(Trainer::build(config, &small_env()).is_err());
    }
}
