use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default capacity of a mutator instance's buffer: 10 MiB.
pub const DEFAULT_CAPACITY: usize = 10 * 1_048_576;
/// Mutation and swap probability of the `frame` preset.
pub const FRAME_PRESET_PROBABILITY: f64 = 0.5;
/// Mutation and swap probability of the `read` preset.
pub const READ_PRESET_PROBABILITY: f64 = 0.05;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    ProbabilityOutOfRange { name: &'static str, value: f64 },
    #[error("Buffer capacity must be non-zero")]
    ZeroCapacity,
    #[error("Unknown preset '{0}', expected 'frame' or 'read'")]
    UnknownPreset(String),
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Where the swap partner search begins, relative to the current frame's end.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SwapSearch {
    /// Search from `frame.end + 1`. The frame directly after the current one is
    /// skipped and the partner is the one after it.
    #[default]
    PastBoundary,
    /// Search from `frame.end`, so the directly following frame is eligible.
    AtBoundary,
}

impl SwapSearch {
    /// Offset at which to look for a partner of a frame ending at `frame_end`.
    pub fn start_after(self, frame_end: usize) -> usize {
        match self {
            SwapSearch::PastBoundary => frame_end.saturating_add(1),
            SwapSearch::AtBoundary => frame_end,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct MutationConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_probability")]
    pub mutation_probability: f64,
    #[serde(default = "default_probability")]
    pub swap_probability: f64,
    #[serde(default)]
    pub swap_search: SwapSearch,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_probability() -> f64 {
    FRAME_PRESET_PROBABILITY
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self::frame()
    }
}

impl MutationConfig {
    /// Aggressive preset: half of all frame bytes flipped, swaps attempted half the time.
    pub fn frame() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            mutation_probability: FRAME_PRESET_PROBABILITY,
            swap_probability: FRAME_PRESET_PROBABILITY,
            swap_search: SwapSearch::PastBoundary,
        }
    }

    /// Gentle preset that keeps most frames decodable so deeper read paths are reached.
    pub fn read() -> Self {
        Self {
            mutation_probability: READ_PRESET_PROBABILITY,
            swap_probability: READ_PRESET_PROBABILITY,
            ..Self::frame()
        }
    }

    pub fn preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "frame" => Ok(Self::frame()),
            "read" => Ok(Self::read()),
            other => Err(ConfigError::UnknownPreset(other.to_string())),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_mutation_probability(mut self, probability: f64) -> Self {
        self.mutation_probability = probability;
        self
    }

    pub fn with_swap_probability(mut self, probability: f64) -> Self {
        self.swap_probability = probability;
        self
    }

    /// Sets both the mutation and the swap probability.
    pub fn with_probability(self, probability: f64) -> Self {
        self.with_mutation_probability(probability)
            .with_swap_probability(probability)
    }

    pub fn with_swap_search(mut self, swap_search: SwapSearch) -> Self {
        self.swap_search = swap_search;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_probability("mutation-probability", self.mutation_probability)?;
        check_probability("swap-probability", self.swap_probability)?;
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: MutationConfig = read_toml(path)?;
        config.validate()?;
        Ok(config)
    }
}

fn check_probability(name: &'static str, value: f64) -> Result<(), ConfigError> {
    // NaN fails the range check too.
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ProbabilityOutOfRange { name, value })
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigInputDelivery {
    #[default]
    StdIn,
    /// Input written to a temporary file; `@@` in the command is replaced by its path.
    File,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    #[serde(default)]
    pub target_command: Vec<String>,
    #[serde(default)]
    pub input_delivery: ConfigInputDelivery,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_iterations")]
    pub max_iterations: u64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_crash_dir")]
    pub crash_dir: PathBuf,
}

fn default_timeout_ms() -> u64 {
    2000
}

pub fn default_iterations() -> u64 {
    10_000
}

pub fn default_crash_dir() -> PathBuf {
    PathBuf::from("./.framemut_crashes")
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            target_command: Vec::new(),
            input_delivery: ConfigInputDelivery::default(),
            timeout_ms: default_timeout_ms(),
            max_iterations: default_iterations(),
            seed: 0,
            crash_dir: default_crash_dir(),
        }
    }
}

/// Top-level configuration file: a `[mutation]` table and an optional `[run]` table.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FramemutConfig {
    #[serde(default)]
    pub mutation: MutationConfig,
    #[serde(default)]
    pub run: Option<RunSettings>,
}

impl FramemutConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: FramemutConfig = read_toml(path)?;
        config.mutation.validate()?;
        Ok(config)
    }
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp config");
        file.write_all(content.as_bytes())
            .expect("Failed to write temp config");
        file
    }

    #[test]
    fn presets_differ_only_in_probability() {
        let frame = MutationConfig::frame();
        let read = MutationConfig::read();
        assert_eq!(frame.mutation_probability, 0.5);
        assert_eq!(read.mutation_probability, 0.05);
        assert_eq!(read.swap_probability, 0.05);
        assert_eq!(frame.capacity, read.capacity);
        assert_eq!(frame.swap_search, read.swap_search);
        assert_eq!(MutationConfig::default(), frame);
        assert_eq!(MutationConfig::preset("read").unwrap(), read);
        assert!(matches!(
            MutationConfig::preset("mp4"),
            Err(ConfigError::UnknownPreset(name)) if name == "mp4"
        ));
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(MutationConfig::frame().validate().is_ok());
        assert!(
            MutationConfig::frame()
                .with_probability(0.0)
                .validate()
                .is_ok()
        );
        assert!(
            MutationConfig::frame()
                .with_probability(1.0)
                .validate()
                .is_ok()
        );
        assert!(matches!(
            MutationConfig::frame()
                .with_mutation_probability(1.5)
                .validate(),
            Err(ConfigError::ProbabilityOutOfRange {
                name: "mutation-probability",
                ..
            })
        ));
        assert!(matches!(
            MutationConfig::frame()
                .with_swap_probability(f64::NAN)
                .validate(),
            Err(ConfigError::ProbabilityOutOfRange {
                name: "swap-probability",
                ..
            })
        ));
        assert!(matches!(
            MutationConfig::frame().with_capacity(0).validate(),
            Err(ConfigError::ZeroCapacity)
        ));
    }

    #[test]
    fn swap_search_start_offsets() {
        assert_eq!(SwapSearch::PastBoundary.start_after(10), 11);
        assert_eq!(SwapSearch::AtBoundary.start_after(10), 10);
        assert_eq!(SwapSearch::PastBoundary.start_after(usize::MAX), usize::MAX);
    }

    #[test]
    fn load_mutation_config_with_defaults() {
        let file = write_config(
            r#"
mutation-probability = 0.1
swap-search = "at-boundary"
"#,
        );
        let config = MutationConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.mutation_probability, 0.1);
        assert_eq!(config.swap_probability, FRAME_PRESET_PROBABILITY);
        assert_eq!(config.swap_search, SwapSearch::AtBoundary);
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn load_rejects_unknown_fields_and_invalid_values() {
        let unknown = write_config("mutation-rate = 0.5\n");
        assert!(matches!(
            MutationConfig::load_from_file(unknown.path()),
            Err(ConfigError::Parse { .. })
        ));

        let invalid = write_config("swap-probability = -0.5\n");
        assert!(matches!(
            MutationConfig::load_from_file(invalid.path()),
            Err(ConfigError::ProbabilityOutOfRange { .. })
        ));

        let missing = PathBuf::from("/nonexistent/framemut.toml");
        assert!(matches!(
            MutationConfig::load_from_file(&missing),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn load_full_config_file() {
        let file = write_config(
            r#"
[mutation]
capacity = 4096
mutation-probability = 0.05
swap-probability = 0.0

[run]
target-command = ["./fuzz_mp3dec_ex_read", "@@"]
input-delivery = "file"
timeout-ms = 500
max-iterations = 42
seed = 7
"#,
        );
        let config = FramemutConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.mutation.capacity, 4096);
        assert_eq!(config.mutation.swap_probability, 0.0);

        let run = config.run.expect("run table should be parsed");
        assert_eq!(run.target_command, vec!["./fuzz_mp3dec_ex_read", "@@"]);
        assert!(matches!(run.input_delivery, ConfigInputDelivery::File));
        assert_eq!(run.timeout_ms, 500);
        assert_eq!(run.max_iterations, 42);
        assert_eq!(run.seed, 7);
        assert_eq!(run.crash_dir, default_crash_dir());
    }

    #[test]
    fn empty_config_file_uses_defaults() {
        let file = write_config("");
        let config = FramemutConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.mutation, MutationConfig::default());
        assert!(config.run.is_none());
    }
}
