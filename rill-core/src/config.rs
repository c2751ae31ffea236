//! Engine Configuration
//!
//! Settings for the interpreter and the scope tree. Configuration can be set
//! programmatically or loaded from environment variables.
//!
//! # Environment Variables
//!
//! All environment variables use the `RILL_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RILL_MAX_STEPS` | Reduction step budget per run (0 = unlimited) | 0 |
//! | `RILL_INTERRUPTIBLE` | Observe interruption signals ("true"/"false") | true |
//! | `RILL_MAX_SCOPE_DEPTH` | Maximum scope nesting depth | 1024 |
//! | `RILL_TRACE_INSTRUCTIONS` | Emit a trace event per reduced instruction | false |
//!
//! # Example
//!
//! ```rust
//! use rill_core::config::EngineConfig;
//!
//! let config = EngineConfig::builder()
//!     .max_steps(Some(1_000_000))
//!     .max_scope_depth(64)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.scope.max_depth, 64);
//! ```

use std::env;

use thiserror::Error;

/// Interpreter configuration.
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// Reduction step budget for one run.
    /// Default: None (unlimited).
    pub max_steps: Option<u64>,

    /// Observe interruption signals at suspension points.
    /// Default: true.
    pub interruptible: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_steps: None,
            interruptible: true,
        }
    }
}

/// Scope tree configuration.
#[derive(Debug, Clone)]
pub struct ScopeConfig {
    /// Maximum nesting depth below the root scope.
    /// Default: 1024.
    pub max_depth: usize,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self { max_depth: 1024 }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Emit a `trace` event for every reduced instruction.
    /// Default: false.
    pub trace_instructions: bool,
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Interpreter configuration.
    pub interpreter: InterpreterConfig,

    /// Scope configuration.
    pub scope: ScopeConfig,

    /// Logging configuration.
    pub log: LogConfig,
}

impl EngineConfig {
    /// Create a new builder for EngineConfig.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    ///
    /// Unset or unparseable variables keep their default values.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = parse_env_u64("RILL_MAX_STEPS") {
            config.interpreter.max_steps = if val > 0 { Some(val) } else { None };
        }

        if let Some(val) = parse_env_bool("RILL_INTERRUPTIBLE") {
            config.interpreter.interruptible = val;
        }

        if let Some(val) = parse_env_usize("RILL_MAX_SCOPE_DEPTH") {
            if val > 0 {
                config.scope.max_depth = val;
            }
        }

        if let Some(val) = parse_env_bool("RILL_TRACE_INSTRUCTIONS") {
            config.log.trace_instructions = val;
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scope.max_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scope.max_depth".into(),
                message: "must be at least 1".into(),
            });
        }

        if self.interpreter.max_steps == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "interpreter.max_steps".into(),
                message: "must be positive; use None for unlimited".into(),
            });
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Error message.
        message: String,
    },
}

/// Builder for EngineConfig.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reduction step budget.
    pub fn max_steps(mut self, steps: Option<u64>) -> Self {
        self.config.interpreter.max_steps = steps;
        self
    }

    /// Enable or disable observation of interruption signals.
    pub fn interruptible(mut self, enabled: bool) -> Self {
        self.config.interpreter.interruptible = enabled;
        self
    }

    /// Set the maximum scope nesting depth.
    pub fn max_scope_depth(mut self, depth: usize) -> Self {
        self.config.scope.max_depth = depth;
        self
    }

    /// Enable or disable per-instruction trace events.
    pub fn trace_instructions(mut self, enabled: bool) -> Self {
        self.config.log.trace_instructions = enabled;
        self
    }

    /// Build the configuration.
    ///
    /// This validates the configuration and returns an error if invalid.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Parse an environment variable as u64.
fn parse_env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Parse an environment variable as usize, rejecting values that do not fit.
fn parse_env_usize(name: &str) -> Option<usize> {
    parse_env_u64(name).and_then(|val| usize::try_from(val).ok())
}

/// Parse an environment variable as bool.
fn parse_env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|s| match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.interpreter.max_steps.is_none());
        assert!(config.interpreter.interruptible);
        assert_eq!(config.scope.max_depth, 1024);
        assert!(!config.log.trace_instructions);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::builder()
            .max_steps(Some(500))
            .interruptible(false)
            .max_scope_depth(8)
            .trace_instructions(true)
            .build()
            .unwrap();

        assert_eq!(config.interpreter.max_steps, Some(500));
        assert!(!config.interpreter.interruptible);
        assert_eq!(config.scope.max_depth, 8);
        assert!(config.log.trace_instructions);
    }

    #[test]
    fn test_builder_validation() {
        assert!(EngineConfig::builder().max_scope_depth(0).build().is_err());
        assert!(EngineConfig::builder().max_steps(Some(0)).build().is_err());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            field: "scope.max_depth".into(),
            message: "must be at least 1".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration for 'scope.max_depth': must be at least 1"
        );
    }

    #[test]
    fn test_parse_env_helpers() {
        env::set_var("RILL_TEST_BOOL", " Yes ");
        env::set_var("RILL_TEST_U64", "42");
        env::set_var("RILL_TEST_BAD", "forty-two");

        assert_eq!(parse_env_bool("RILL_TEST_BOOL"), Some(true));
        assert_eq!(parse_env_u64("RILL_TEST_U64"), Some(42));
        assert_eq!(parse_env_usize("RILL_TEST_U64"), Some(42));
        assert_eq!(parse_env_usize("RILL_TEST_BAD"), None);
        assert_eq!(parse_env_u64("RILL_TEST_BAD"), None);
        assert_eq!(parse_env_bool("RILL_TEST_UNSET_VARIABLE"), None);

        env::remove_var("RILL_TEST_BOOL");
        env::remove_var("RILL_TEST_U64");
        env::remove_var("RILL_TEST_BAD");
    }

    #[test]
    fn test_from_env_with_no_vars() {
        env::remove_var("RILL_MAX_STEPS");
        env::remove_var("RILL_MAX_SCOPE_DEPTH");

        let config = EngineConfig::from_env();
        assert!(config.interpreter.max_steps.is_none());
        assert_eq!(config.scope.max_depth, 1024);
    }
}
