#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Curly — run ordered batches of HTTP administrative actions against a server.
//!
//! Each action is a curl-style command template with `${name}` placeholders. A batch
//! runs its actions one after another and, after every failure, consults the
//! error-behavior policy to decide whether to keep going. Modules:
//! - `config`: Batch file models, loader, and schema helpers.
//! - `executor`: Command parsing, HTTP dispatch, the error policy, the runner and its results.
//! - `utils`: Variable resolution and secret redaction.
//!
//! Use `curly::prelude::*` to bring commonly used items into scope quickly.

/// Public module: configuration (models, loader, schema helpers).
pub mod config;
/// Public module: execution engine (runner, policy, HTTP executors, results).
pub mod executor;
/// Public module: utilities (variables, redaction).
pub mod utils;

/// Crate-level constants for consumers that want to inspect package metadata at runtime.
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version (e.g., "0.1.0").
#[inline]
pub const fn version() -> &'static str {
    PKG_VERSION
}

/// Parse a level name (trace|debug|info|warn|error), case-insensitively.
pub fn parse_level(s: &str) -> Option<tracing::Level> {
    use tracing::Level;

    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize tracing (logging) with a reasonable default.
/// - Uses `level` when given, else honors the `RUST_LOG` environment variable.
/// - Falls back to `info` level.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init_tracing(level: Option<&str>) {
    use tracing_subscriber::fmt;

    let level = level
        .map(str::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .and_then(|s| parse_level(&s))
        .unwrap_or(tracing::Level::INFO);

    // Ignore the error if the global subscriber was already set.
    let _ = fmt().with_max_level(level).with_writer(std::io::stderr).try_init();
}

/// A convenient set of exports for most consumers.
///
/// Bring this into scope with:
/// `use curly::prelude::*;`
pub mod prelude {
    // Common result/error handling
    pub use anyhow::{Context, Error, Result, anyhow, bail, ensure};

    // Serialization
    pub use serde::{Deserialize, Serialize};

    // Tracing macros
    pub use tracing::{debug, error, info, instrument, trace, warn};

    pub use tokio_util::sync::CancellationToken;

    pub use crate as curly;
    pub use crate::config::{Action, BatchConfig, ErrorBehavior, GlobalErrorBehavior, ResultType};
    pub use crate::executor::{
        ActionGroupRunner, ActionResult, ClientFactory, DryRunExecutor, HttpExecutor, RunConfig,
        RunSnapshot, RunnerResult,
    };

    // Frequently used internal modules
    pub use crate::{config, executor, utils};
}
