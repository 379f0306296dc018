use crate::config::{ConfigError, MutationConfig};
use crate::driver::{MutationReport, mutate_frames};
use log::{debug, warn};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::collections::TryReserveError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InstanceError {
    #[error("Failed to allocate a {capacity}-byte mutation buffer: {source}")]
    Allocation {
        capacity: usize,
        #[source]
        source: TryReserveError,
    },
    #[error("Invalid mutation config: {0}")]
    Config(#[from] ConfigError),
}

/// A stateful frame mutator handle: an owned fixed-capacity buffer plus its own generator.
///
/// Each instance is seeded explicitly, so two instances built from the same seed produce
/// the same sequence of outputs for the same inputs, and instances never share state.
/// The slice returned by [`MutatorInstance::fuzz`] borrows the internal buffer and is
/// overwritten by the next call.
pub struct MutatorInstance {
    config: MutationConfig,
    rng: ChaCha8Rng,
    buffer: Vec<u8>,
    len: usize,
    last_report: MutationReport,
}

impl MutatorInstance {
    /// Creates an instance with the default configuration (see [`MutationConfig::default`]).
    pub fn init(seed: u64) -> Result<Self, InstanceError> {
        Self::with_config(seed, MutationConfig::default())
    }

    /// Creates an instance, allocating the whole buffer capacity up front.
    ///
    /// Allocation failure is reported instead of aborting, and no instance is produced.
    pub fn with_config(seed: u64, config: MutationConfig) -> Result<Self, InstanceError> {
        if let Err(e) = config.validate() {
            warn!("Rejecting mutator config {config:?}: {e}");
            return Err(e.into());
        }

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(config.capacity)
            .map_err(|source| InstanceError::Allocation {
                capacity: config.capacity,
                source,
            })?;
        buffer.resize(config.capacity, 0);

        debug!(
            "Initialized frame mutator: seed {seed}, capacity {}, mutation p {}, swap p {}",
            config.capacity, config.mutation_probability, config.swap_probability
        );
        Ok(Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            buffer,
            len: 0,
            last_report: MutationReport::default(),
        })
    }

    pub fn config(&self) -> &MutationConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Statistics of the most recent [`MutatorInstance::fuzz`] or [`MutatorInstance::mutate`] call.
    pub fn last_report(&self) -> MutationReport {
        self.last_report
    }

    /// Output of the most recent call.
    pub fn output(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    /// Mutable view of the most recent output, for hosts that take ownership of the bytes
    /// until the next call (AFL's `out_buf`).
    pub fn output_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..self.len]
    }

    /// Copies `input` into the internal buffer, truncated to `max_output_len` and the
    /// capacity, and runs one mutation pass over it.
    ///
    /// `supplementary` is the host's second test case (AFL's `add_buf`); frame mutation
    /// does not use it.
    pub fn fuzz(&mut self, input: &[u8], _supplementary: &[u8], max_output_len: usize) -> &[u8] {
        self.mutate(input, max_output_len);
        self.output()
    }

    /// Same as [`MutatorInstance::fuzz`] without the supplementary input, returning the pass report.
    pub fn mutate(&mut self, input: &[u8], max_output_len: usize) -> MutationReport {
        let len = input.len().min(max_output_len).min(self.buffer.len());
        self.buffer[..len].copy_from_slice(&input[..len]);
        self.len = len;

        self.last_report = mutate_frames(&mut self.buffer[..len], &self.config, &mut self.rng);
        self.last_report
    }
}
