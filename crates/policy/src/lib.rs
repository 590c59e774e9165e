//! `rowguard-policy` — the policy template engine.
//!
//! Pure crate: renders an abstract isolation template plus table parameters
//! into concrete [`PolicyDefinition`]s. No I/O, no side effects; identical
//! input yields byte-identical output. SQL text is produced only through the
//! typed [`Predicate`] tree, with every identifier validated against a
//! [`rowguard_core::SchemaSnapshot`] before rendering.

pub mod definition;
pub mod predicate;
pub mod template;

pub use definition::{PolicyDefinition, PolicyName};
pub use predicate::Predicate;
pub use template::{MembershipRelation, ParentLink, PolicyTemplate, TemplateError, TemplateId};
