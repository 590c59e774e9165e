//! Schema-qualified table and column references.
//!
//! Identifiers are validated at construction so that nothing downstream ever
//! interpolates an unchecked name into SQL text. Rendering to SQL (with
//! quoting) happens only at the applier boundary.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Maximum identifier length accepted (Postgres truncates at 63 bytes).
const MAX_IDENT_LEN: usize = 63;

fn validate_ident(s: &str, what: &str) -> Result<(), DomainError> {
    if s.is_empty() {
        return Err(DomainError::invalid_relation(format!("{what} is empty")));
    }
    if s.len() > MAX_IDENT_LEN {
        return Err(DomainError::invalid_relation(format!(
            "{what} '{s}' exceeds {MAX_IDENT_LEN} bytes"
        )));
    }
    let mut chars = s.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_lowercase() || first == '_') {
        return Err(DomainError::invalid_relation(format!(
            "{what} '{s}' must start with a lowercase letter or underscore"
        )));
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(DomainError::invalid_relation(format!(
            "{what} '{s}' contains characters outside [a-z0-9_]"
        )));
    }
    Ok(())
}

/// A validated column name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnName(String);

impl ColumnName {
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        validate_ident(&name, "column name")?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for safe SQL interpolation.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl core::fmt::Display for ColumnName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ColumnName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A validated, schema-qualified table reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    schema: String,
    name: String,
}

impl TableRef {
    /// Build from explicit schema and table names.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Result<Self, DomainError> {
        let schema = schema.into();
        let name = name.into();
        validate_ident(&schema, "schema name")?;
        validate_ident(&name, "table name")?;
        Ok(Self { schema, name })
    }

    /// Parse `schema.table` or a bare `table` (defaulting to `public`).
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s.split_once('.') {
            Some((schema, name)) => Self::new(schema, name),
            None => Self::new("public", s),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unquoted `schema.table` form (for logs, report keys, lock keys).
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Double-quoted `"schema"."table"` form for safe SQL interpolation.
    pub fn quoted(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.name)
    }
}

impl core::fmt::Display for TableRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

impl FromStr for TableRef {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
