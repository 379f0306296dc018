//! AFL++ custom mutator entry points.
//!
//! Build as a shared library and point `AFL_CUSTOM_MUTATOR_LIBRARY` at it. The mutator
//! configuration comes from `FRAMEMUT_CONFIG` (path to a TOML file with the
//! `MutationConfig` keys) or `FRAMEMUT_PRESET` (`frame` or `read`), else the defaults.

use framemut_core::{ConfigError, MutationConfig, MutatorInstance};
use log::{error, info};
use std::ffi::{c_uint, c_void};
use std::path::Path;
use std::ptr;
use std::slice;

pub const CONFIG_ENV: &str = "FRAMEMUT_CONFIG";
pub const PRESET_ENV: &str = "FRAMEMUT_PRESET";

/// Picks the mutation config from a variable lookup. A config file wins over a preset.
pub fn resolve_config<F>(lookup: F) -> Result<MutationConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(CONFIG_ENV) {
        return MutationConfig::load_from_file(Path::new(&path));
    }
    match lookup(PRESET_ENV) {
        Some(name) => MutationConfig::preset(&name),
        None => Ok(MutationConfig::default()),
    }
}

/// Borrows `len` bytes at `ptr`, treating a null pointer as empty.
///
/// # Safety
/// A non-null `ptr` must be valid for reads of `len` bytes for `'a`.
unsafe fn bytes_from_raw<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        unsafe { slice::from_raw_parts(ptr, len) }
    }
}

/// Builds an instance from the configuration `lookup` resolves, logging why it could not.
fn create_instance<F>(lookup: F, seed: u64) -> Option<MutatorInstance>
where
    F: Fn(&str) -> Option<String>,
{
    let config = match resolve_config(lookup) {
        Ok(config) => config,
        Err(e) => {
            error!("framemut: {e}");
            return None;
        }
    };

    match MutatorInstance::with_config(seed, config) {
        Ok(instance) => {
            info!("framemut: initialized with seed {seed}, {config:?}");
            Some(instance)
        }
        Err(e) => {
            error!("framemut: {e}");
            None
        }
    }
}

/// Creates a mutator instance seeded with `seed`.
///
/// Returns null if the configuration is invalid or the buffer cannot be allocated; the
/// reason goes to stderr through `env_logger` (`RUST_LOG` adjusts the level).
/// The `afl` state pointer is not used.
#[unsafe(no_mangle)]
pub extern "C" fn afl_custom_init(_afl: *mut c_void, seed: c_uint) -> *mut c_void {
    // The host may already have installed a logger.
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error"))
        .try_init();

    match create_instance(|key| std::env::var(key).ok(), u64::from(seed)) {
        Some(instance) => Box::into_raw(Box::new(instance)).cast(),
        None => ptr::null_mut(),
    }
}

/// Mutates `buf` into the instance's buffer and stores its address in `*out_buf`.
///
/// Returns the output length, `min(buf_size, max_size, capacity)`. The output stays
/// valid until the next call on the same instance or `afl_custom_deinit`.
///
/// # Safety
/// `data` must come from `afl_custom_init` and not be freed. `buf` and `add_buf` must be
/// valid for reads of `buf_size` and `add_buf_size` bytes, and `out_buf` for one write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn afl_custom_fuzz(
    data: *mut c_void,
    buf: *const u8,
    buf_size: usize,
    out_buf: *mut *mut u8,
    add_buf: *const u8,
    add_buf_size: usize,
    max_size: usize,
) -> usize {
    if data.is_null() || out_buf.is_null() {
        return 0;
    }
    let instance = unsafe { &mut *data.cast::<MutatorInstance>() };
    let input = unsafe { bytes_from_raw(buf, buf_size) };
    let supplementary = unsafe { bytes_from_raw(add_buf, add_buf_size) };

    instance.fuzz(input, supplementary, max_size);
    let output = instance.output_mut();
    unsafe { *out_buf = output.as_mut_ptr() };
    output.len()
}

/// Releases an instance created by `afl_custom_init`. Null is ignored.
///
/// # Safety
/// `data` must be null or a pointer from `afl_custom_init` that has not been freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn afl_custom_deinit(data: *mut c_void) {
    if data.is_null() {
        return;
    }
    drop(unsafe { Box::from_raw(data.cast::<MutatorInstance>()) });
}
