//! Tracing setup and span helpers.

use crate::context::RunIdentity;
use crate::errors::ReleaseflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Environment variable read for the log filter.
pub const LOG_ENV: &str = "RELEASEFLOW_LOG";

/// Default filter when [`LOG_ENV`] is unset.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = ReleaseflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ReleaseflowError::Config(format!(
                "unknown log format '{other}' (expected text or json)"
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Builds the filter from [`LOG_ENV`], falling back to `default_directive`.
#[must_use]
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Installs the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat, default_directive: &str) -> Result<(), ReleaseflowError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .with_writer(std::io::stderr);

    let result = match format {
        LogFormat::Text => builder.with_target(false).compact().try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    result.map_err(|err| ReleaseflowError::Internal(format!("Cannot install tracing subscriber: {err}")))
}

/// Span covering one run.
#[must_use]
pub fn run_span(identity: &RunIdentity) -> Span {
    tracing::info_span!(
        "run",
        run_number = identity.run_number,
        pipeline_run_id = %identity.pipeline_run_id,
        branch = %identity.trigger.key(),
    )
}

/// Span covering one stage of a run.
#[must_use]
pub fn stage_span(run_number: u64, stage: &str) -> Span {
    tracing::info_span!("stage", run_number, stage = %stage)
}
