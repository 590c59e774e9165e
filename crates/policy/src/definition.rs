//! Concrete policy definitions and deterministic naming.

use serde::{Deserialize, Serialize};

use rowguard_core::{ColumnName, Command, RoleClass, TableRef};

use crate::predicate::Predicate;
use crate::template::TemplateId;

/// Postgres truncates identifiers at 63 bytes; truncate deterministically
/// ourselves so the name we track equals the name the catalog stores.
const MAX_POLICY_NAME_LEN: usize = 63;

/// Deterministic policy name derived from template + table + command.
///
/// Re-applying an unchanged template yields the same names, which is what
/// makes the applier's upsert idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyName(String);

impl PolicyName {
    pub fn derive(template: TemplateId, table: &TableRef, command: Command) -> Self {
        let mut name = format!(
            "rg_{}_{}_{}",
            table.name(),
            template.token(),
            command.as_token()
        );
        name.truncate(MAX_POLICY_NAME_LEN);
        Self(name)
    }

    /// Wrap a name observed in the catalog (not necessarily one of ours).
    pub fn from_catalog(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this policy was installed by this framework.
    pub fn is_managed(&self) -> bool {
        self.0.starts_with("rg_")
    }
}

impl core::fmt::Display for PolicyName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully rendered policy, ready for the applier.
///
/// `using` is absent for INSERT (the engine evaluates only `WITH CHECK` on
/// inserts); `check` is present exactly for write commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDefinition {
    pub name: PolicyName,
    pub table: TableRef,
    pub command: Command,
    pub role: RoleClass,
    pub using: Option<Predicate>,
    pub check: Option<Predicate>,
}

impl PolicyDefinition {
    /// Render the `CREATE POLICY` statement.
    pub fn to_create_sql(&self) -> String {
        let mut sql = format!(
            "CREATE POLICY \"{}\" ON {} AS PERMISSIVE FOR {} TO {}",
            self.name,
            self.table.quoted(),
            self.command.as_sql(),
            self.role.role_name(),
        );
        if let Some(using) = &self.using {
            sql.push_str(&format!(" USING ({})", using.to_sql(&self.table)));
        }
        if let Some(check) = &self.check {
            sql.push_str(&format!(" WITH CHECK ({})", check.to_sql(&self.table)));
        }
        sql
    }

    /// Render the `DROP POLICY` statement (used only on explicit force/drop).
    pub fn to_drop_sql(&self) -> String {
        format!(
            "DROP POLICY IF EXISTS \"{}\" ON {}",
            self.name,
            self.table.quoted()
        )
    }

    /// Columns of the protected table filtered by this policy's predicates.
    pub fn predicate_columns(&self) -> Vec<ColumnName> {
        let mut cols: Vec<ColumnName> = self
            .using
            .iter()
            .chain(self.check.iter())
            .flat_map(|p| p.local_columns())
            .collect();
        cols.sort();
        cols.dedup();
        cols
    }
}
