//! Dispatch engine configuration.
//!
//! Defaults match the classic INVOKEVIRTUAL inline cache: both speculative
//! tiers enabled and eight polymorphic entries per call site.

use std::env;

use thiserror::Error;

/// Upper bound on polymorphic cache entries per call site.
pub const MAX_CACHE_LIMIT: usize = 8;

/// Configuration for the dispatch engine.
///
/// # Example
///
/// ```ignore
/// use quill_vm::DispatchConfig;
///
/// // Skip hierarchy speculation, go straight to the inline cache
/// let config = DispatchConfig {
///     single_implementor_speculation: false,
///     leaf_method_speculation: false,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    // =========================================================================
    // Inline Cache
    // =========================================================================
    /// Maximum number of receiver types cached per call site.
    ///
    /// Seeing one more distinct type than this makes the call site
    /// megamorphic for good.
    ///
    /// Default: 8
    pub cache_limit: usize,

    // =========================================================================
    // Speculation
    // =========================================================================
    /// Speculate on a single loaded implementor of the declaring type.
    ///
    /// Default: true
    pub single_implementor_speculation: bool,

    /// Speculate that the seed method is never overridden.
    ///
    /// Default: true
    pub leaf_method_speculation: bool,

    // =========================================================================
    // Redefinition
    // =========================================================================
    /// Resolution attempts on the removed-method slow path before giving up
    /// with an internal error.
    ///
    /// Default: 3
    pub max_redefinition_attempts: u32,

    // =========================================================================
    // Debugging
    // =========================================================================
    /// Report call-site state transitions at `info` level instead of `debug`.
    ///
    /// Default: false
    pub trace_transitions: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cache_limit: MAX_CACHE_LIMIT,
            single_implementor_speculation: true,
            leaf_method_speculation: true,
            max_redefinition_attempts: 3,
            trace_transitions: false,
        }
    }
}

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("cache_limit must be in 1..={max}, got {value}")]
    CacheLimit { value: usize, max: usize },

    #[error("max_redefinition_attempts must be at least 1")]
    RedefinitionAttempts,
}

impl DispatchConfig {
    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_limit == 0 || self.cache_limit > MAX_CACHE_LIMIT {
            return Err(ConfigError::CacheLimit {
                value: self.cache_limit,
                max: MAX_CACHE_LIMIT,
            });
        }
        if self.max_redefinition_attempts == 0 {
            return Err(ConfigError::RedefinitionAttempts);
        }
        Ok(())
    }

    /// Defaults with `QUILL_*` environment overrides applied.
    ///
    /// Unparsable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let var = |name: &str| env::var_os(name).map(|v| v.to_string_lossy().into_owned());
        apply_env_overrides(
            Self::default(),
            EnvOverrides {
                cache_limit: var("QUILL_CACHE_LIMIT"),
                single_implementor: var("QUILL_SPECULATE_SINGLE_IMPLEMENTOR"),
                leaf_method: var("QUILL_SPECULATE_LEAF"),
                max_redefinition_attempts: var("QUILL_MAX_REDEFINITION_ATTEMPTS"),
                trace_transitions: var("QUILL_TRACE_TRANSITIONS"),
            },
        )
    }
}

#[derive(Debug, Default)]
struct EnvOverrides {
    cache_limit: Option<String>,
    single_implementor: Option<String>,
    leaf_method: Option<String>,
    max_redefinition_attempts: Option<String>,
    trace_transitions: Option<String>,
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

fn apply_env_overrides(mut config: DispatchConfig, env: EnvOverrides) -> DispatchConfig {
    if let Some(limit) = env.cache_limit.and_then(|v| v.trim().parse().ok()) {
        config.cache_limit = limit;
    }
    if let Some(flag) = env.single_implementor.as_deref().and_then(parse_flag) {
        config.single_implementor_speculation = flag;
    }
    if let Some(flag) = env.leaf_method.as_deref().and_then(parse_flag) {
        config.leaf_method_speculation = flag;
    }
    if let Some(attempts) = env
        .max_redefinition_attempts
        .and_then(|v| v.trim().parse().ok())
    {
        config.max_redefinition_attempts = attempts;
    }
    if let Some(flag) = env.trace_transitions.as_deref().and_then(parse_flag) {
        config.trace_transitions = flag;
    }
    config
}
