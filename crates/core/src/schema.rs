//! Schema snapshots supplied by the catalog layer.
//!
//! The template engine validates every referenced column against a
//! `SchemaSnapshot` before a predicate is ever rendered, so "unknown column"
//! is a render-time error rather than a runtime surprise.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::table::{ColumnName, TableRef};

/// Per-table enforcement profile derived from the catalog.
///
/// `rls_enabled` is read from the catalog, never stored by this framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableProfile {
    pub table: TableRef,
    /// Column holding the owning principal's id, if the table is owner-scoped.
    pub owner_column: Option<ColumnName>,
    /// Column holding the owning organization's id, if the table is org-scoped.
    pub tenant_column: Option<ColumnName>,
    pub rls_enabled: bool,
}

impl TableProfile {
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            owner_column: None,
            tenant_column: None,
            rls_enabled: false,
        }
    }

    pub fn with_owner_column(mut self, column: ColumnName) -> Self {
        self.owner_column = Some(column);
        self
    }

    pub fn with_tenant_column(mut self, column: ColumnName) -> Self {
        self.tenant_column = Some(column);
        self
    }

    pub fn with_rls_enabled(mut self, enabled: bool) -> Self {
        self.rls_enabled = enabled;
        self
    }

    /// A table is isolation-relevant when it carries a scoping column.
    pub fn is_scoped(&self) -> bool {
        self.owner_column.is_some() || self.tenant_column.is_some()
    }
}

/// Point-in-time snapshot of table shapes, used for render-time validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    tables: BTreeMap<TableRef, BTreeSet<ColumnName>>,
}

impl SchemaSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(
        &mut self,
        table: TableRef,
        columns: impl IntoIterator<Item = ColumnName>,
    ) -> &mut Self {
        self.tables.insert(table, columns.into_iter().collect());
        self
    }

    pub fn contains_table(&self, table: &TableRef) -> bool {
        self.tables.contains_key(table)
    }

    pub fn has_column(&self, table: &TableRef, column: &ColumnName) -> bool {
        self.tables
            .get(table)
            .is_some_and(|cols| cols.contains(column))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableRef> {
        self.tables.keys()
    }

    pub fn columns(&self, table: &TableRef) -> Option<&BTreeSet<ColumnName>> {
        self.tables.get(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(s: &str) -> ColumnName {
        ColumnName::new(s).unwrap()
    }

    #[test]
    fn snapshot_column_lookup() {
        let table = TableRef::parse("documents").unwrap();
        let mut snap = SchemaSnapshot::new();
        snap.add_table(table.clone(), [col("id"), col("user_id")]);

        assert!(snap.contains_table(&table));
        assert!(snap.has_column(&table, &col("user_id")));
        assert!(!snap.has_column(&table, &col("org_id")));
        assert!(!snap.contains_table(&TableRef::parse("missing").unwrap()));
    }

    #[test]
    fn profile_scoping() {
        let table = TableRef::parse("documents").unwrap();
        let bare = TableProfile::new(table.clone());
        assert!(!bare.is_scoped());

        let owned = TableProfile::new(table).with_owner_column(col("user_id"));
        assert!(owned.is_scoped());
    }
}
