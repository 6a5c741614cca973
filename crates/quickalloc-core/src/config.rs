//! Allocator configuration.
//!
//! A [`QuickAllocConfig`] carries every creation parameter of an allocator
//! instance. The built-in defaults are what `create_default` and the global
//! facade use. Values can also be overlaid from the environment:
//! - `QUICKALLOC_POOL_SIZE`, `QUICKALLOC_MIN_BLOCK_SIZE`,
//!   `QUICKALLOC_MAX_BLOCK_SIZE`, `QUICKALLOC_ALIGNMENT`: byte counts, decimal
//!   or `0x` hex, with an optional `k`/`m`/`g` suffix.
//! - `QUICKALLOC_STEPPING`: `linear` or `geometric`.
//! - `QUICKALLOC_FULL_ALIGN`: `1|0|true|false|on|off|yes|no`.
//! - `QUICKALLOC_LOG_LEVEL`: `trace|debug|info|warn|error`.
//!
//! Parsing is loose: a value that does not parse leaves that field at its
//! default instead of failing.

use serde::{Deserialize, Serialize};

use crate::block::MIN_ALIGNMENT;
use crate::error::{AllocError, AllocResult};
use crate::log::AllocatorLogLevel;
use crate::size_class::SteppingMethod;

/// Default arena capacity.
pub const DEFAULT_POOL_SIZE: usize = 16 * 1024 * 1024;
/// Default lower bound for the smallest class.
pub const DEFAULT_MIN_BLOCK_SIZE: usize = 256;
/// Default largest servable payload.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 64 * 1024;
/// Default payload alignment.
pub const DEFAULT_ALIGNMENT: usize = 256;
/// Default lifecycle log ring size.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;
/// Largest supported alignment.
pub const MAX_ALIGNMENT: usize = 1024 * 1024;

/// Creation parameters for one allocator instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuickAllocConfig {
    /// Arena capacity in bytes.
    pub pool_size: usize,
    /// Lower bound of the smallest class (header included).
    pub min_block_size: usize,
    /// Largest payload the instance must be able to serve.
    pub max_block_size: usize,
    /// Growth policy between the two bounds.
    pub stepping: SteppingMethod,
    /// Round every class to a multiple of `alignment`.
    ///
    /// When false the guarantee drops to [`MIN_ALIGNMENT`] and `alignment`
    /// is not used.
    pub full_align: bool,
    /// Target payload alignment (power of two).
    pub alignment: usize,
    /// Lifecycle log ring size; 0 disables recording.
    pub log_capacity: usize,
    /// Minimum level that gets recorded.
    pub log_level: AllocatorLogLevel,
}

impl Default for QuickAllocConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            min_block_size: DEFAULT_MIN_BLOCK_SIZE,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            stepping: SteppingMethod::Linear,
            full_align: true,
            alignment: DEFAULT_ALIGNMENT,
            log_capacity: DEFAULT_LOG_CAPACITY,
            log_level: AllocatorLogLevel::Info,
        }
    }
}

impl QuickAllocConfig {
    /// The explicit `create` parameter set; everything else stays default.
    #[must_use]
    pub fn new(
        pool_size: usize,
        min_block_size: usize,
        max_block_size: usize,
        stepping: SteppingMethod,
        full_align: bool,
    ) -> Self {
        Self {
            pool_size,
            min_block_size,
            max_block_size,
            stepping,
            full_align,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    #[must_use]
    pub fn with_log(mut self, capacity: usize, level: AllocatorLogLevel) -> Self {
        self.log_capacity = capacity;
        self.log_level = level;
        self
    }

    /// Alignment every payload actually gets.
    #[must_use]
    pub const fn effective_alignment(&self) -> usize {
        if self.full_align {
            self.alignment
        } else {
            MIN_ALIGNMENT
        }
    }

    /// Checks the parameters that do not depend on the derived class table.
    pub fn validate(&self) -> AllocResult<()> {
        if self.pool_size == 0 {
            return Err(AllocError::invalid_config("pool_size must be non-zero"));
        }
        if self.min_block_size == 0 || self.max_block_size == 0 {
            return Err(AllocError::invalid_config(
                "min_block_size and max_block_size must be non-zero",
            ));
        }
        if self.min_block_size > self.max_block_size {
            return Err(AllocError::invalid_config(format!(
                "min_block_size ({}) exceeds max_block_size ({})",
                self.min_block_size, self.max_block_size
            )));
        }
        // `alignment` is ignored without full_align.
        if self.full_align
            && (!self.alignment.is_power_of_two()
                || !(MIN_ALIGNMENT..=MAX_ALIGNMENT).contains(&self.alignment))
        {
            return Err(AllocError::invalid_config(format!(
                "alignment {} must be a power of two in [{MIN_ALIGNMENT}, {MAX_ALIGNMENT}]",
                self.alignment
            )));
        }
        Ok(())
    }

    /// Defaults overlaid with `QUICKALLOC_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    ///
    /// Keys are the `QUICKALLOC_*` names listed in the module docs.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let size = |key: &str| lookup(key).as_deref().and_then(parse_size_loose);

        if let Some(v) = size("QUICKALLOC_POOL_SIZE") {
            config.pool_size = v;
        }
        if let Some(v) = size("QUICKALLOC_MIN_BLOCK_SIZE") {
            config.min_block_size = v;
        }
        if let Some(v) = size("QUICKALLOC_MAX_BLOCK_SIZE") {
            config.max_block_size = v;
        }
        if let Some(v) = size("QUICKALLOC_ALIGNMENT") {
            config.alignment = v;
        }
        if let Some(v) = lookup("QUICKALLOC_STEPPING")
            .as_deref()
            .and_then(SteppingMethod::from_str_loose)
        {
            config.stepping = v;
        }
        if let Some(v) = lookup("QUICKALLOC_FULL_ALIGN")
            .as_deref()
            .and_then(parse_bool_loose)
        {
            config.full_align = v;
        }
        if let Some(v) = lookup("QUICKALLOC_LOG_LEVEL")
            .as_deref()
            .and_then(AllocatorLogLevel::from_str_loose)
        {
            config.log_level = v;
        }
        config
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(text: &str) -> AllocResult<Self> {
        serde_json::from_str(text)
            .map_err(|err| AllocError::invalid_config(format!("config json: {err}")))
    }
}

/// Parse a byte count: decimal, `0x` hex, optional `k`/`m`/`g` suffix.
#[must_use]
pub fn parse_size_loose(raw: &str) -> Option<usize> {
    let s = raw.trim().to_ascii_lowercase();
    let mut digits = s.as_str();
    let mut multiplier = 1_usize;
    for (suffix, scale) in [("k", 1_usize << 10), ("m", 1 << 20), ("g", 1 << 30)] {
        let stripped = digits
            .strip_suffix(&format!("{suffix}b"))
            .or_else(|| digits.strip_suffix(suffix));
        if let Some(rest) = stripped {
            digits = rest;
            multiplier = scale;
            break;
        }
    }
    let digits = digits.trim();
    let value = match digits.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<usize>().ok()?,
    };
    value.checked_mul(multiplier)
}

fn parse_bool_loose(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
