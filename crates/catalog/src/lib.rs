//! `rowguard-catalog` — read access to the target database's catalog.
//!
//! The [`Catalog`] trait is the seam between everything that reasons about
//! enforcement state (auditor, applier conflict checks, test runner) and the
//! live database. Two implementations:
//!
//! - [`PostgresCatalog`]: reads `pg_class`, `pg_policies`, `pg_index`, and
//!   `information_schema` over a sqlx pool.
//! - [`InMemoryCatalog`]: deterministic test double built with a builder API.

pub mod in_memory;
pub mod postgres;
pub mod retry;
pub mod r#trait;

pub use in_memory::InMemoryCatalog;
pub use postgres::{PostgresCatalog, parse_policy_command};
pub use retry::RetryPolicy;
pub use r#trait::{Catalog, CatalogError, InstalledPolicy, normalize_clause};
