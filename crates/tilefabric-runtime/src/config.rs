//! Run configuration.
//!
//! ```rust
//! use std::time::Duration;
//! use tilefabric_runtime::RunConfig;
//!
//! let config = RunConfig::default().with_timeout(Duration::from_millis(500));
//! assert!(config.verify);
//! ```

use std::env;
use std::time::Duration;

/// Environment variable overriding the deadlock timeout, in milliseconds.
pub const ENV_DEADLOCK_TIMEOUT_MS: &str = "TILEFABRIC_DEADLOCK_TIMEOUT_MS";
/// Environment variable that skips verification before a run when truthy.
pub const ENV_SKIP_VERIFY: &str = "TILEFABRIC_SKIP_VERIFY";
/// Environment variable enabling per-element acquire/release events when truthy.
pub const ENV_TRACE_ELEMENTS: &str = "TILEFABRIC_TRACE_ELEMENTS";

pub const DEFAULT_DEADLOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// How a graph is executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// How long a wait may go without any progress in the run before it fails with `Deadlock`
    pub deadlock_timeout: Duration,
    /// Run the verifier first and refuse invalid graphs
    pub verify: bool,
    /// Emit a debug event for every acquire and release
    pub trace_elements: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            deadlock_timeout: DEFAULT_DEADLOCK_TIMEOUT,
            verify: true,
            trace_elements: false,
        }
    }
}

impl RunConfig {
    /// Defaults overridden by the `TILEFABRIC_*` run variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = env::var(ENV_DEADLOCK_TIMEOUT_MS) {
            match value.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.deadlock_timeout = Duration::from_millis(ms),
                _ => tracing::warn!(variable = ENV_DEADLOCK_TIMEOUT_MS, value = %value, "ignoring invalid timeout"),
            }
        }
        if let Ok(flag) = env::var(ENV_SKIP_VERIFY) {
            config.verify = !parse_flag(&flag);
        }
        if let Ok(flag) = env::var(ENV_TRACE_ELEMENTS) {
            config.trace_elements = parse_flag(&flag);
        }

        config
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadlock_timeout = timeout;
        self
    }

    /// Run without verifying first. Invalid graphs then fail at run time,
    /// typically with `Deadlock`.
    pub fn skip_verification(mut self) -> Self {
        self.verify = false;
        self
    }

    pub fn with_element_tracing(mut self, enabled: bool) -> Self {
        self.trace_elements = enabled;
        self
    }
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1" || value.eq_ignore_ascii_case("yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = RunConfig::default()
            .with_timeout(Duration::from_millis(50))
            .skip_verification()
            .with_element_tracing(true);
        assert_eq!(config.deadlock_timeout, Duration::from_millis(50));
        assert!(!config.verify);
        assert!(config.trace_elements);
    }

    #[test]
    fn flag_parsing() {
        assert!(parse_flag("YES"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("off"));
    }
}
