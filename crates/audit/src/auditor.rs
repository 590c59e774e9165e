//! The coverage auditor.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{debug, instrument};

use rowguard_catalog::{Catalog, CatalogError, InstalledPolicy};
use rowguard_core::{ColumnName, Command, SchemaSnapshot, TableProfile, TableRef};

use crate::finding::{AuditFinding, FindingKind};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Read-only auditor over a catalog.
///
/// Tables in `exempt` are declared fully public or fully private by the
/// operator; they produce no coverage findings (the catalog cannot express
/// that intent, so it arrives as configuration).
pub struct CoverageAuditor<C> {
    catalog: C,
    exempt: BTreeSet<TableRef>,
}

impl<C: Catalog> CoverageAuditor<C> {
    pub fn new(catalog: C) -> Self {
        Self {
            catalog,
            exempt: BTreeSet::new(),
        }
    }

    pub fn with_exemptions(mut self, exempt: impl IntoIterator<Item = TableRef>) -> Self {
        self.exempt = exempt.into_iter().collect();
        self
    }

    /// Audit every table in a schema. Findings come back in deterministic
    /// order: by table, then kind, then command/column.
    #[instrument(skip(self), err)]
    pub async fn audit_schema(&self, schema: &str) -> Result<Vec<AuditFinding>, AuditError> {
        let profiles = self.catalog.table_profiles(schema).await?;
        let snapshot = self.catalog.snapshot(schema).await?;
        let mut findings = Vec::new();
        for profile in &profiles {
            findings.extend(self.audit_profile(profile, &snapshot).await?);
        }
        findings.sort();
        Ok(findings)
    }

    /// Audit a single table.
    pub async fn audit_table(
        &self,
        profile: &TableProfile,
    ) -> Result<Vec<AuditFinding>, AuditError> {
        let snapshot = self.catalog.snapshot(profile.table.schema()).await?;
        self.audit_profile(profile, &snapshot).await
    }

    async fn audit_profile(
        &self,
        profile: &TableProfile,
        snapshot: &SchemaSnapshot,
    ) -> Result<Vec<AuditFinding>, AuditError> {
        if self.exempt.contains(&profile.table) {
            debug!(table = %profile.table, "table exempt from coverage audit");
            return Ok(Vec::new());
        }

        let mut findings = Vec::new();

        if !profile.rls_enabled {
            if profile.is_scoped() {
                findings.push(AuditFinding::new(
                    profile.table.clone(),
                    FindingKind::MissingIsolation,
                ));
            }
            // Policy coverage on a table with RLS off would be noise; the
            // missing-isolation finding is the actionable one.
            return Ok(findings);
        }

        let policies = self.catalog.policies(&profile.table).await?;

        for command in Command::CONCRETE {
            let covered = policies.iter().any(|p| p.command.covers(command));
            if !covered {
                findings.push(AuditFinding::new(
                    profile.table.clone(),
                    FindingKind::MissingPolicyForCommand { command },
                ));
            }
        }

        let indexed = self.catalog.indexed_columns(&profile.table).await?;
        let candidates = index_candidates(profile, snapshot);
        let mut flagged: BTreeSet<ColumnName> = BTreeSet::new();
        for policy in &policies {
            for column in &candidates {
                if indexed.contains(column) || flagged.contains(column) {
                    continue;
                }
                if policy_mentions_column(policy, column) {
                    flagged.insert(column.clone());
                    findings.push(AuditFinding::new(
                        profile.table.clone(),
                        FindingKind::MissingIndex { column: column.clone() },
                    ));
                }
            }
        }

        Ok(findings)
    }
}

/// Columns worth checking for index support: every column of the table, so a
/// predicate filtering by a non-scoping column (a resource-linked foreign
/// key, say) is caught too. Falls back to the scoping columns when the
/// snapshot does not know the table.
fn index_candidates(profile: &TableProfile, snapshot: &SchemaSnapshot) -> Vec<ColumnName> {
    match snapshot.columns(&profile.table) {
        Some(columns) => columns.iter().cloned().collect(),
        None => profile
            .owner_column
            .iter()
            .chain(profile.tenant_column.iter())
            .cloned()
            .collect(),
    }
}

/// Whole-word search for a column name in a policy's clause texts. Clauses
/// are normalized first: the catalog re-prints them in its own casing and
/// whitespace.
fn policy_mentions_column(policy: &InstalledPolicy, column: &ColumnName) -> bool {
    let mentions = |clause: Option<String>| {
        clause.is_some_and(|text| contains_word(&text, column.as_str()))
    };
    mentions(policy.normalized_using()) || mentions(policy.normalized_check())
}

fn contains_word(text: &str, word: &str) -> bool {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(pos) = text[start..].find(word) {
        let begin = start + pos;
        let end = begin + word.len();
        let before_ok = begin == 0 || !is_ident_byte(bytes[begin - 1]);
        let after_ok = end == bytes.len() || !is_ident_byte(bytes[end]);
        if before_ok && after_ok {
            return true;
        }
        start = begin + 1;
    }
    false
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_catalog::InMemoryCatalog;
    use rowguard_core::RoleClass;
    use rowguard_policy::PolicyName;

    fn col(s: &str) -> ColumnName {
        ColumnName::new(s).unwrap()
    }

    fn docs() -> TableRef {
        TableRef::parse("documents").unwrap()
    }

    fn select_policy(table: &TableRef, command: Command, qual: &str) -> InstalledPolicy {
        InstalledPolicy {
            name: PolicyName::from_catalog(format!("rg_documents_x_{}", command.as_token())),
            table: table.clone(),
            command,
            roles: vec![RoleClass::Authenticated.role_name().to_string()],
            permissive: true,
            using_clause: Some(qual.to_string()),
            check_clause: None,
        }
    }

    #[tokio::test]
    async fn scoped_table_without_rls_is_critical() {
        let catalog =
            InMemoryCatalog::new().with_table(docs(), [col("id"), col("user_id")], false);
        let findings = CoverageAuditor::new(catalog)
            .audit_schema("public")
            .await
            .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::MissingIsolation);
        assert!(findings[0].severity.is_critical());
    }

    #[tokio::test]
    async fn unscoped_table_without_rls_is_clean() {
        let catalog = InMemoryCatalog::new().with_table(docs(), [col("id"), col("body")], false);
        let findings = CoverageAuditor::new(catalog)
            .audit_schema("public")
            .await
            .unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn uncovered_commands_are_flagged_individually() {
        let table = docs();
        let catalog = InMemoryCatalog::new()
            .with_table(table.clone(), [col("id"), col("user_id")], true)
            .with_index(table.clone(), col("user_id"))
            .with_policy(select_policy(&table, Command::Select, "user_id = auth.uid()"));

        let findings = CoverageAuditor::new(catalog)
            .audit_schema("public")
            .await
            .unwrap();
        let commands: Vec<Command> = findings
            .iter()
            .filter_map(|f| match &f.kind {
                FindingKind::MissingPolicyForCommand { command } => Some(*command),
                _ => None,
            })
            .collect();
        assert_eq!(commands, vec![Command::Insert, Command::Update, Command::Delete]);
    }

    #[tokio::test]
    async fn all_policy_covers_every_command() {
        let table = docs();
        let catalog = InMemoryCatalog::new()
            .with_table(table.clone(), [col("id"), col("user_id")], true)
            .with_index(table.clone(), col("user_id"))
            .with_policy(select_policy(&table, Command::All, "user_id = auth.uid()"));

        let findings = CoverageAuditor::new(catalog)
            .audit_schema("public")
            .await
            .unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn unindexed_predicate_column_is_a_warning() {
        let table = docs();
        let catalog = InMemoryCatalog::new()
            .with_table(table.clone(), [col("id"), col("user_id")], true)
            .with_policy(select_policy(&table, Command::All, "user_id = auth.uid()"));

        let findings = CoverageAuditor::new(catalog)
            .audit_schema("public")
            .await
            .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].kind,
            FindingKind::MissingIndex { column: col("user_id") }
        );
        assert_eq!(findings[0].severity, rowguard_core::Severity::Warning);
    }

    #[tokio::test]
    async fn unindexed_foreign_key_predicate_column_is_flagged() {
        // A resource-linked predicate filters by the child's FK column,
        // which is neither the owner nor the tenant column.
        let table = TableRef::parse("messages").unwrap();
        let catalog = InMemoryCatalog::new()
            .with_table(
                table.clone(),
                [col("id"), col("conversation_id")],
                true,
            )
            .with_index(table.clone(), col("id"))
            .with_policy(select_policy(
                &table,
                Command::All,
                "EXISTS (SELECT 1 FROM conversations c WHERE c.id = conversation_id \
                 AND c.user_id = auth.uid())",
            ));

        let findings = CoverageAuditor::new(catalog)
            .audit_schema("public")
            .await
            .unwrap();
        let missing: Vec<_> = findings
            .iter()
            .filter_map(|f| match &f.kind {
                FindingKind::MissingIndex { column } => Some(column.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(missing, vec![col("conversation_id")]);
    }

    #[tokio::test]
    async fn clause_matching_survives_catalog_reprinting() {
        // The catalog re-prints clauses with its own casing and whitespace.
        let table = docs();
        let catalog = InMemoryCatalog::new()
            .with_table(table.clone(), [col("id"), col("user_id")], true)
            .with_policy(select_policy(
                &table,
                Command::All,
                "( USER_ID   =  auth.uid() )",
            ));

        let findings = CoverageAuditor::new(catalog)
            .audit_schema("public")
            .await
            .unwrap();
        assert!(findings.iter().any(|f| matches!(
            &f.kind,
            FindingKind::MissingIndex { column } if column == &col("user_id")
        )));
    }

    #[tokio::test]
    async fn column_mention_requires_word_boundaries() {
        let table = docs();
        // Clause references `other_user_id_col`, not `user_id`.
        let catalog = InMemoryCatalog::new()
            .with_table(table.clone(), [col("id"), col("user_id")], true)
            .with_policy(select_policy(
                &table,
                Command::All,
                "other_user_id_col = auth.uid()",
            ));

        let findings = CoverageAuditor::new(catalog)
            .audit_schema("public")
            .await
            .unwrap();
        assert!(
            !findings
                .iter()
                .any(|f| matches!(f.kind, FindingKind::MissingIndex { .. }))
        );
    }

    #[tokio::test]
    async fn exempt_tables_produce_no_findings() {
        let catalog =
            InMemoryCatalog::new().with_table(docs(), [col("id"), col("user_id")], false);
        let findings = CoverageAuditor::new(catalog)
            .with_exemptions([docs()])
            .audit_schema("public")
            .await
            .unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn auditing_twice_yields_identical_findings() {
        let table = docs();
        let catalog = InMemoryCatalog::new()
            .with_table(table.clone(), [col("id"), col("user_id")], true)
            .with_policy(select_policy(&table, Command::Select, "user_id = auth.uid()"));

        let auditor = CoverageAuditor::new(catalog);
        let a = auditor.audit_schema("public").await.unwrap();
        let b = auditor.audit_schema("public").await.unwrap();
        assert_eq!(a, b);
    }
}
