//! Structure-aware mutation of MPEG-audio style frame streams for fuzzing decoders.
//!
//! The engine locates frames by their synchronization marker, flips bytes inside each
//! frame with a configured probability and occasionally exchanges two frames of equal
//! length. The buffer length never changes and a fixed seed reproduces every output.

pub mod byte_mutator;
pub mod config;
pub mod driver;
pub mod executor;
pub mod input;
pub mod instance;
pub mod scanner;
pub mod swapper;

pub use byte_mutator::mutate_range;
pub use config::{ConfigError, FramemutConfig, MutationConfig, RunSettings, SwapSearch};
pub use driver::{MutationReport, mutate_frames};
pub use executor::{
    CommandExecutor, CommandExecutorConfig, ExecutionStatus, Executor, ExecutorError,
    InProcessExecutor, InputDelivery,
};
pub use input::Input;
pub use instance::{InstanceError, MutatorInstance};
pub use scanner::{Frames, find_next_frame, frame_at, is_sync_marker};
pub use swapper::try_swap_adjacent;
