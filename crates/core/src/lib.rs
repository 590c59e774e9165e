//! `rowguard-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! typed identifiers, table references, command/role taxonomies, principals,
//! and schema snapshots shared by every other crate.

pub mod command;
pub mod error;
pub mod id;
pub mod principal;
pub mod schema;
pub mod severity;
pub mod table;

pub use command::{Command, RoleClass};
pub use error::{DomainError, DomainResult};
pub use id::{OrgId, PrincipalId};
pub use principal::Principal;
pub use schema::{SchemaSnapshot, TableProfile};
pub use severity::Severity;
pub use table::{ColumnName, TableRef};
