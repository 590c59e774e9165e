//! In-memory catalog.
//!
//! Intended for tests/dev. Built once with the builder methods, then shared;
//! reads are deterministic (everything is kept in ordered collections).

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use rowguard_core::{ColumnName, SchemaSnapshot, TableProfile, TableRef};

use crate::r#trait::{Catalog, CatalogError, InstalledPolicy, profile_from_columns};

#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    columns: BTreeMap<TableRef, BTreeSet<ColumnName>>,
    rls_enabled: BTreeMap<TableRef, bool>,
    policies: BTreeMap<TableRef, Vec<InstalledPolicy>>,
    indexes: BTreeMap<TableRef, BTreeSet<ColumnName>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(
        mut self,
        table: TableRef,
        columns: impl IntoIterator<Item = ColumnName>,
        rls_enabled: bool,
    ) -> Self {
        self.columns.insert(table.clone(), columns.into_iter().collect());
        self.rls_enabled.insert(table, rls_enabled);
        self
    }

    pub fn with_policy(mut self, policy: InstalledPolicy) -> Self {
        self.policies
            .entry(policy.table.clone())
            .or_default()
            .push(policy);
        self
    }

    pub fn with_index(mut self, table: TableRef, column: ColumnName) -> Self {
        self.indexes.entry(table).or_default().insert(column);
        self
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn snapshot(&self, schema: &str) -> Result<SchemaSnapshot, CatalogError> {
        let mut snap = SchemaSnapshot::new();
        for (table, columns) in &self.columns {
            if table.schema() == schema {
                snap.add_table(table.clone(), columns.iter().cloned());
            }
        }
        Ok(snap)
    }

    async fn table_profiles(&self, schema: &str) -> Result<Vec<TableProfile>, CatalogError> {
        Ok(self
            .columns
            .iter()
            .filter(|(table, _)| table.schema() == schema)
            .map(|(table, columns)| {
                let rls = self.rls_enabled.get(table).copied().unwrap_or(false);
                profile_from_columns(table.clone(), columns, rls)
            })
            .collect())
    }

    async fn policies(&self, table: &TableRef) -> Result<Vec<InstalledPolicy>, CatalogError> {
        let mut policies = self.policies.get(table).cloned().unwrap_or_default();
        policies.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(policies)
    }

    async fn indexed_columns(
        &self,
        table: &TableRef,
    ) -> Result<BTreeSet<ColumnName>, CatalogError> {
        Ok(self.indexes.get(table).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_core::Command;
    use rowguard_policy::PolicyName;

    fn col(s: &str) -> ColumnName {
        ColumnName::new(s).unwrap()
    }

    #[tokio::test]
    async fn profiles_reflect_column_conventions_and_rls_flag() {
        let docs = TableRef::parse("documents").unwrap();
        let notes = TableRef::parse("notes").unwrap();
        let catalog = InMemoryCatalog::new()
            .with_table(docs.clone(), [col("id"), col("user_id")], true)
            .with_table(notes.clone(), [col("id"), col("body")], false);

        let profiles = catalog.table_profiles("public").await.unwrap();
        assert_eq!(profiles.len(), 2);
        let doc_profile = profiles.iter().find(|p| p.table == docs).unwrap();
        assert!(doc_profile.rls_enabled);
        assert_eq!(doc_profile.owner_column.as_ref().unwrap().as_str(), "user_id");
        let note_profile = profiles.iter().find(|p| p.table == notes).unwrap();
        assert!(!note_profile.is_scoped());
    }

    #[tokio::test]
    async fn policies_come_back_name_ordered() {
        let docs = TableRef::parse("documents").unwrap();
        let policy = |name: &str| InstalledPolicy {
            name: PolicyName::from_catalog(name),
            table: docs.clone(),
            command: Command::Select,
            roles: vec!["authenticated".to_string()],
            permissive: true,
            using_clause: Some("true".to_string()),
            check_clause: None,
        };
        let catalog = InMemoryCatalog::new()
            .with_table(docs.clone(), [col("id")], true)
            .with_policy(policy("z_last"))
            .with_policy(policy("a_first"));

        let policies = catalog.policies(&docs).await.unwrap();
        let names: Vec<&str> = policies.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a_first", "z_last"]);
    }

    #[tokio::test]
    async fn snapshot_filters_by_schema() {
        let pub_t = TableRef::parse("documents").unwrap();
        let app_t = TableRef::parse("app.messages").unwrap();
        let catalog = InMemoryCatalog::new()
            .with_table(pub_t.clone(), [col("id")], false)
            .with_table(app_t.clone(), [col("id")], false);

        let snap = catalog.snapshot("app").await.unwrap();
        assert!(snap.contains_table(&app_t));
        assert!(!snap.contains_table(&pub_t));
    }
}
