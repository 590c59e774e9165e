//! `rowguard-audit` — read-only coverage auditing.
//!
//! Inspects live catalog state (through the [`rowguard_catalog::Catalog`]
//! seam) for enforcement gaps. Never mutates schema state; runs in time
//! proportional to tables × policies.

pub mod auditor;
pub mod finding;

pub use auditor::{AuditError, CoverageAuditor};
pub use finding::{AuditFinding, FindingKind};
