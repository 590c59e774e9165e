//! Audit findings and their remediation text.

use serde::{Deserialize, Serialize};

use rowguard_core::{ColumnName, Command, Severity, TableRef};

/// What kind of enforcement gap was found.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FindingKind {
    /// Row-level security is disabled on a table carrying an ownership or
    /// tenancy column.
    MissingIsolation,
    /// A command has no applicable policy on an isolation-enabled table.
    MissingPolicyForCommand { command: Command },
    /// A predicate column used by an installed policy has no index.
    MissingIndex { column: ColumnName },
}

impl FindingKind {
    pub fn severity(&self) -> Severity {
        match self {
            FindingKind::MissingIsolation => Severity::Critical,
            FindingKind::MissingPolicyForCommand { .. } => Severity::Critical,
            FindingKind::MissingIndex { .. } => Severity::Warning,
        }
    }
}

/// One enforcement gap on one table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuditFinding {
    pub table: TableRef,
    pub kind: FindingKind,
    pub severity: Severity,
    pub remediation: String,
}

impl AuditFinding {
    pub fn new(table: TableRef, kind: FindingKind) -> Self {
        let severity = kind.severity();
        let remediation = remediation_for(&table, &kind);
        Self {
            table,
            kind,
            severity,
            remediation,
        }
    }
}

fn remediation_for(table: &TableRef, kind: &FindingKind) -> String {
    match kind {
        FindingKind::MissingIsolation => format!(
            "enable row-level security on {table} (e.g. `rowguard apply user-isolation {table}`); \
             the table carries a scoping column but enforcement is off"
        ),
        FindingKind::MissingPolicyForCommand { command } => format!(
            "add a {command} policy to {table}; without one, {command} statements are \
             denied for every non-elevated principal (or allowed, if RLS is later disabled)"
        ),
        FindingKind::MissingIndex { column } => format!(
            "create an index on {table}({column}); every policy check on this table \
             scans for '{column}' and will degrade without one"
        ),
    }
}
