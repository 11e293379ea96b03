//! Bounded storage of past trajectories for off-policy reuse.
mod config;

pub use config::ReplayBufferConfig;

use crate::{error::GfnError, Env, Trajectories};
use anyhow::Result;
use rand::{rngs::StdRng, RngCore, SeedableRng};

/// A fixed-capacity ring buffer of trajectories.
///
/// Insertion beyond capacity evicts the oldest entries. Sampling draws
/// uniformly at random with replacement from the current contents.
pub struct ReplayBuffer {
    capacity: usize,
    i: usize,
    size: usize,
    slots: Vec<Option<Trajectories>>,
    rng: StdRng,
}

impl ReplayBuffer {
    /// Builds an empty buffer from its configuration.
    pub fn build(config: &ReplayBufferConfig) -> Self {
        Self {
            capacity: config.capacity,
            i: 0,
            size: 0,
            slots: (0..config.capacity).map(|_| None).collect(),
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// Number of trajectories currently stored.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the buffer holds no trajectories.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Inserts a batch of trajectories, evicting oldest-first past capacity.
    pub fn add(&mut self, trajectories: &Trajectories) -> Result<()> {
        if self.capacity == 0 {
            return Ok(());
        }
        for j in 0..trajectories.n_trajectories() {
            let single = trajectories.index_select(&[j])?;
            self.slots[self.i] = Some(single);
            self.i = (self.i + 1) % self.capacity;
            if self.size < self.capacity {
                self.size += 1;
            }
        }
        Ok(())
    }

    /// Draws `n` stored trajectories uniformly at random with replacement.
    pub fn sample<E: Env>(&mut self, env: &E, n: usize) -> Result<Trajectories> {
        if self.size == 0 {
            return Err(GfnError::EmptyBuffer { requested: n }.into());
        }
        let ixs: Vec<usize> = (0..n)
            .map(|_| (self.rng.next_u32() as usize) % self.size)
            .collect();
        let picked: Vec<&Trajectories> = ixs
            .iter()
            .map(|&ix| self.slots[ix].as_ref().expect("occupied slot"))
            .collect();
        Trajectories::cat(env, &picked)
    }
}
