//! Shared tracing setup for the tilefabric workspace.
//!
//! Binaries, examples and integration tests install their `tracing`
//! subscriber through this crate so that every consumer of the fabric model
//! and executor logs with the same filter resolution and output formats.
//!
//! ```no_run
//! use tilefabric_tracing::{init_global_tracing, TracingConfig};
//!
//! init_global_tracing(&TracingConfig::from_env()).expect("subscriber installs once");
//! ```

pub mod performance;

#[macro_use]
pub mod macros;

use std::env;
use std::error::Error;
use std::fmt;

pub use tracing::{debug, error, info, trace, warn};

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// Environment variable selecting a preset (`local`, `ci`, `debug`).
pub const ENV_PROFILE: &str = "TILEFABRIC_TRACING_PROFILE";
/// Environment variable overriding the filter directives.
pub const ENV_DIRECTIVES: &str = "TILEFABRIC_TRACING_DIRECTIVES";
/// Environment variable selecting the output format (`pretty`, `compact`, `json`).
pub const ENV_FORMAT: &str = "TILEFABRIC_TRACING_FORMAT";
/// Environment variable toggling tile-step span events (`true`/`false`).
pub const ENV_SPAN_EVENTS: &str = "TILEFABRIC_TRACING_SPAN_EVENTS";

/// How the shared subscriber should behave.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Explicit filter directives (e.g. `tilefabric_runtime=debug`). When
    /// absent, `RUST_LOG` is consulted, then [`TracingConfig::default_directive`].
    pub directives: Option<String>,
    /// Directive used when nothing else resolves.
    pub default_directive: String,
    /// Show event targets (module paths).
    pub include_targets: bool,
    /// Show the emitting thread name; useful since every tile runs on its own thread.
    pub include_thread_names: bool,
    /// ANSI colouring.
    pub ansi: bool,
    /// Span lifecycle events to emit.
    pub span_events: FmtSpan,
    /// Formatter output.
    pub output: TracingOutput,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Pretty, coloured output for local development.
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            include_thread_names: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
        }
    }

    /// JSON without colour codes, for CI log collection.
    pub fn for_ci() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            include_thread_names: true,
            ansi: false,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Json,
        }
    }

    /// Compact output with debug directives for the fabric crates and
    /// close events for tile worker spans, for chasing stalls.
    pub fn for_debugging() -> Self {
        Self {
            directives: Some("tilefabric_core=debug,tilefabric_runtime=debug,info".to_string()),
            default_directive: "info".to_string(),
            include_targets: true,
            include_thread_names: true,
            ansi: true,
            span_events: FmtSpan::CLOSE,
            output: TracingOutput::Compact,
        }
    }

    /// Build a configuration from the `TILEFABRIC_TRACING_*` environment.
    pub fn from_env() -> Self {
        let profile = env::var(ENV_PROFILE)
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            "debug" => Self::for_debugging(),
            _ => Self::for_local(),
        };

        if let Ok(directives) = env::var(ENV_DIRECTIVES) {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }

        if let Ok(format) = env::var(ENV_FORMAT) {
            if let Some(parsed) = TracingOutput::from_env_value(&format) {
                config.output = parsed;
                if matches!(config.output, TracingOutput::Json) {
                    config.ansi = false;
                }
            }
        }

        if let Ok(flag) = env::var(ENV_SPAN_EVENTS) {
            config.span_events = if parse_flag(&flag) { FmtSpan::CLOSE } else { FmtSpan::NONE };
        }

        config
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        if let Some(directives) = &self.directives {
            EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
        } else {
            Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive)))
        }
    }
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1" || value.eq_ignore_ascii_case("yes")
}

/// Errors raised while installing the subscriber.
#[derive(Debug)]
pub enum TracingSetupError {
    /// The directive string did not parse.
    InvalidFilter(String),
    /// A global subscriber is already installed.
    SubscriberInit(tracing_subscriber::util::TryInitError),
}

impl fmt::Display for TracingSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracingSetupError::InvalidFilter(msg) => write!(f, "invalid tracing directive: {msg}"),
            TracingSetupError::SubscriberInit(err) => {
                write!(f, "failed to install global tracing subscriber: {err}")
            }
        }
    }
}

impl Error for TracingSetupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TracingSetupError::SubscriberInit(err) => Some(err),
            TracingSetupError::InvalidFilter(_) => None,
        }
    }
}

/// Build a subscriber for the given configuration without installing it.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let filter = config.resolve_filter()?;
    Ok(Registry::default().with(format_layer(config)).with(filter))
}

fn format_layer(config: &TracingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_fmt::layer()
        .with_target(config.include_targets)
        .with_thread_names(config.include_thread_names)
        .with_span_events(config.span_events.clone());

    match config.output {
        TracingOutput::Compact => Box::new(layer.compact().with_ansi(config.ansi)),
        TracingOutput::Pretty => Box::new(layer.pretty().with_ansi(config.ansi)),
        TracingOutput::Json => Box::new(layer.json().with_ansi(false)),
    }
}

/// Install the configured subscriber as the process-wide default.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?
        .try_init()
        .map_err(TracingSetupError::SubscriberInit)
}

/// Install a test-writer subscriber at `debug`, ignoring a second install.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("tilefabric_core=debug,tilefabric_runtime=debug"))
        .try_init();
}

/// Formatter output choices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}
