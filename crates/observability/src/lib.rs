//! Tracing setup and credential redaction shared by the rowguard binaries.

use tracing_subscriber::EnvFilter;

/// Connection-string redaction.
pub mod redact;

pub use redact::mask_dsn;

/// Filter applied when `RUST_LOG` is unset. sqlx's per-statement logging is
/// capped at warn; the applier and runner trace their statements at the
/// level that fits each operation.
const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn";

/// Initialize process-wide tracing: JSON lines on stderr, filtered by
/// `RUST_LOG` with `DEFAULT_DIRECTIVES` as the fallback. Stdout stays
/// reserved for command output.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
