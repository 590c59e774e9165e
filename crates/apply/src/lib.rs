//! `rowguard-apply` — converges a table's enforcement state to match
//! rendered policy definitions.
//!
//! One transaction per table, serialized by an advisory lock on the
//! qualified table name. Enabling row-level security is idempotent; disabling
//! it is never automatic and lives behind an explicit confirmed operation.

pub mod applier;
pub mod plan;

pub use applier::{ApplyError, PolicyApplier};
pub use plan::{ApplyOutcome, PolicyAction, fingerprint, fingerprint_comment, parse_fingerprint};
