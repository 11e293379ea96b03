use anyhow::Result;
use clap::Parser;
use gfn::{Trainer, TrainerConfig};
use gfn_core::loss::{Baseline, LossConfig, LossMode};
use gfn_hypergrid::HyperGridConfig;
use log::info;

/// Trains a GFlowNet on the hypergrid environment.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Number of grid dimensions.
    #[arg(long, default_value_t = 4)]
    ndim: usize,

    /// Number of positions per dimension.
    #[arg(long, default_value_t = 8)]
    height: usize,

    /// Base reward of the hypergrid.
    #[arg(long, default_value_t = 0.1)]
    r0: f32,

    /// Trajectories per iteration.
    #[arg(long, default_value_t = 16)]
    batch_size: usize,

    /// Number of optimization iterations.
    #[arg(long, default_value_t = 1000)]
    n_iterations: usize,

    /// Policy learning rate.
    #[arg(long, default_value_t = 0.001)]
    lr: f64,

    /// Log-normalizer learning rate.
    #[arg(long, default_value_t = 0.1)]
    lr_z: f64,

    /// Learning-rate decay factor, 1.0 disables the schedule.
    #[arg(long, default_value_t = 1.0)]
    schedule: f64,

    /// Replay buffer capacity, 0 disables replay.
    #[arg(long, default_value_t = 0)]
    replay_buffer_size: usize,

    /// Baseline: none, local or global.
    #[arg(long, default_value = "none")]
    baseline: Baseline,

    /// Random seed.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Keep the backward policy uniform instead of learning it.
    #[arg(long, default_value_t = false)]
    uniform_pb: bool,

    /// Sample forward rollouts at a sharpened temperature.
    #[arg(long, default_value_t = false)]
    off_policy: bool,

    /// Objective: tb, forward_kl, reverse_kl, rws or reverse_rws.
    #[arg(long, default_value = "tb")]
    mode: LossMode,

    /// Recent terminal states used to estimate the empirical pmf.
    #[arg(long, default_value_t = 200_000)]
    validation_samples: usize,

    /// Iterations between validations.
    #[arg(long, default_value_t = 100)]
    validation_interval: usize,

    /// Draw terminal states from the reward and roll backward.
    #[arg(long, default_value_t = false)]
    sample_from_reward: bool,

    /// Importance-reweight per-trajectory loss terms.
    #[arg(long, default_value_t = false)]
    reweight: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    let args = Args::parse();
    info!("{:?}", args);

    let env_config = HyperGridConfig::default()
        .ndim(args.ndim)
        .height(args.height)
        .r0(args.r0);
    let loss = LossConfig::default()
        .mode(args.mode)
        .baseline(args.baseline)
        .reweight(args.reweight)
        .sample_from_reward(args.sample_from_reward);
    let config = TrainerConfig::default()
        .loss(loss)
        .n_iterations(args.n_iterations)
        .batch_size(args.batch_size)
        .lr(args.lr)
        .lr_z(args.lr_z)
        .schedule(args.schedule)
        .replay_capacity(args.replay_buffer_size)
        .uniform_pb(args.uniform_pb)
        .off_policy(args.off_policy)
        .seed(args.seed)
        .validation_samples(args.validation_samples)
        .validation_interval(args.validation_interval);

    let mut trainer = Trainer::build(config, &env_config)?;
    if let Some(info) = trainer.train()? {
        info!(
            "finished: l1_dist {:.6}, logz_diff {:.4} over {} samples",
            info.l1_dist, info.logz_diff, info.n_samples
        );
    }
    Ok(())
}
