//! Log output for `courtsyncd`.
//!
//! `RUST_LOG` wins when set. Otherwise the chosen level applies to our own
//! crates while the database and HTTP stacks are held at `warn`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter, Layer};

const QUIET_DEPENDENCIES: [&str; 5] = ["surrealdb", "surrealdb_core", "hyper", "reqwest", "rustls"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let mut directives = vec![level.as_str().to_ascii_lowercase()];
    directives.extend(QUIET_DEPENDENCIES.iter().map(|dep| format!("{dep}=warn")));
    directives.join(",")
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Install the global subscriber, reporting whether one was already set.
///
/// JSON lines carry the enclosing `courtsync.run` span (and its `run_id`).
pub fn try_init_tracing(json: bool, level: Level) -> Result<(), TryInitError> {
    let output = if json {
        fmt::layer().json().with_current_span(true).boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };
    tracing_subscriber::registry()
        .with(output.with_filter(env_filter(level)))
        .try_init()
}

/// Install the global subscriber once; later calls are no-ops.
pub fn init_tracing(json: bool, level: Level) {
    let _ = try_init_tracing(json, level);
}
