//! Validation against the exact target distribution.
use anyhow::Result;
use gfn_core::States;
use gfn_hypergrid::HyperGrid;

/// Validation metrics of one checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationInfo {
    /// Mean absolute difference between the empirical and true pmf.
    pub l1_dist: f32,
    /// Absolute error of the learned log-normalizer.
    pub logz_diff: f32,
    /// Number of terminal states the empirical pmf was built from.
    pub n_samples: usize,
}

/// Compares the empirical distribution of visited terminal states with the
/// exact target pmf.
///
/// At most the `n_samples` most recently visited states enter the empirical
/// pmf, so early off-distribution samples age out of the metric.
pub fn validate(
    env: &HyperGrid,
    visited: &States,
    n_samples: usize,
    logz: f32,
) -> Result<ValidationInfo> {
    let nodes = visited.flat_states(env)?.to_vec2::<f32>()?;
    let skip = nodes.len().saturating_sub(n_samples);
    let mut counts = vec![0f32; env.n_states()];
    for node in &nodes[skip..] {
        counts[env.state_index(node)] += 1.0;
    }
    let used = nodes.len() - skip;
    let true_pmf = env.true_dist_pmf()?;
    let l1_dist = if used == 0 {
        true_pmf.iter().map(|p| p.abs()).sum::<f32>() / true_pmf.len() as f32
    } else {
        counts
            .iter()
            .zip(true_pmf.iter())
            .map(|(c, p)| (c / used as f32 - p).abs())
            .sum::<f32>()
            / true_pmf.len() as f32
    };
    let logz_diff = (logz - env.log_partition()?).abs();
    Ok(ValidationInfo {
        l1_dist,
        logz_diff,
        n_samples: used,
    })
}
