//! Pure convergence planning: fingerprints and per-policy actions.
//!
//! The applier stamps every policy it creates with a fingerprint comment
//! (`rowguard:fp:<sha256>` of the rendered DDL). On re-apply the comment is
//! the source of truth for "unchanged": the database re-prints predicate text
//! in its own normal form, so comparing clause strings against our rendering
//! would misreport every policy as drifted.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use rowguard_core::TableRef;
use rowguard_policy::PolicyDefinition;

const FINGERPRINT_PREFIX: &str = "rowguard:fp:";

/// Hex SHA-256 of the rendered `CREATE POLICY` statement.
pub fn fingerprint(def: &PolicyDefinition) -> String {
    let mut hasher = Sha256::new();
    hasher.update(def.to_create_sql().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The comment text stamped onto managed policies.
pub fn fingerprint_comment(fp: &str) -> String {
    format!("{FINGERPRINT_PREFIX}{fp}")
}

/// Extract a fingerprint from a policy comment, if it carries our marker.
pub fn parse_fingerprint(comment: Option<&str>) -> Option<&str> {
    comment?.strip_prefix(FINGERPRINT_PREFIX)
}

/// What the applier should do for one rendered definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyAction {
    /// No policy with this name exists.
    Create,
    /// Same name, same fingerprint: leave it alone.
    Unchanged,
    /// Same name, different or foreign semantics, force requested.
    Replace,
}

/// Decide the action for a definition given the existing policy's comment.
///
/// `existing` is `Some(comment)` when a policy with the definition's name is
/// already installed (`comment` itself may be absent). A same-name policy
/// whose fingerprint differs, or that carries no marker at all (installed
/// outside this framework), is a conflict unless `force` is set.
pub fn plan_policy(
    def: &PolicyDefinition,
    existing: Option<Option<&str>>,
    force: bool,
) -> Result<PolicyAction, String> {
    let Some(comment) = existing else {
        return Ok(PolicyAction::Create);
    };

    match parse_fingerprint(comment) {
        Some(fp) if fp == fingerprint(def) => Ok(PolicyAction::Unchanged),
        Some(_) if force => Ok(PolicyAction::Replace),
        Some(_) => Err(format!(
            "policy '{}' exists with different semantics (fingerprint mismatch); \
             re-run with force to replace it",
            def.name
        )),
        None if force => Ok(PolicyAction::Replace),
        None => Err(format!(
            "policy '{}' exists but was not installed by this framework; \
             re-run with force to replace it",
            def.name
        )),
    }
}

/// Deterministic name for a supporting index on a predicate column.
pub fn index_name(table: &TableRef, column: &str) -> String {
    let mut name = format!("rg_idx_{}_{}", table.name(), column);
    name.truncate(63);
    name
}

/// Result of converging one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub table: TableRef,
    pub created: u32,
    pub unchanged: u32,
    pub replaced: u32,
    pub indexes_created: u32,
}

impl ApplyOutcome {
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            created: 0,
            unchanged: 0,
            replaced: 0,
            indexes_created: 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.replaced == 0 && self.indexes_created == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_core::{ColumnName, Command, RoleClass};
    use rowguard_policy::{PolicyName, Predicate, TemplateId};

    fn definition() -> PolicyDefinition {
        let table = TableRef::parse("documents").unwrap();
        PolicyDefinition {
            name: PolicyName::derive(TemplateId::UserIsolation, &table, Command::Select),
            table,
            command: Command::Select,
            role: RoleClass::Authenticated,
            using: Some(Predicate::OwnerMatch {
                column: ColumnName::new("user_id").unwrap(),
            }),
            check: None,
        }
    }

    #[test]
    fn converged_outcome_is_a_noop() {
        let mut outcome = ApplyOutcome::new(TableRef::parse("documents").unwrap());
        outcome.unchanged = 4;
        assert!(outcome.is_noop());
        outcome.replaced = 1;
        assert!(!outcome.is_noop());
    }

    #[test]
    fn fingerprint_is_stable_and_input_sensitive() {
        let def = definition();
        assert_eq!(fingerprint(&def), fingerprint(&def));

        let mut other = definition();
        other.using = Some(Predicate::OwnerMatch {
            column: ColumnName::new("owner_id").unwrap(),
        });
        assert_ne!(fingerprint(&def), fingerprint(&other));
    }

    #[test]
    fn comment_round_trips() {
        let fp = fingerprint(&definition());
        let comment = fingerprint_comment(&fp);
        assert_eq!(parse_fingerprint(Some(&comment)), Some(fp.as_str()));
        assert_eq!(parse_fingerprint(Some("handwritten note")), None);
        assert_eq!(parse_fingerprint(None), None);
    }

    #[test]
    fn absent_policy_plans_create() {
        assert_eq!(plan_policy(&definition(), None, false).unwrap(), PolicyAction::Create);
    }

    #[test]
    fn matching_fingerprint_plans_unchanged() {
        let def = definition();
        let comment = fingerprint_comment(&fingerprint(&def));
        let action = plan_policy(&def, Some(Some(&comment)), false).unwrap();
        assert_eq!(action, PolicyAction::Unchanged);
    }

    #[test]
    fn drifted_fingerprint_conflicts_without_force() {
        let def = definition();
        let stale = fingerprint_comment("0000");
        assert!(plan_policy(&def, Some(Some(&stale)), false).is_err());
        assert_eq!(
            plan_policy(&def, Some(Some(&stale)), true).unwrap(),
            PolicyAction::Replace
        );
    }

    #[test]
    fn foreign_policy_conflicts_without_force() {
        let def = definition();
        // Existing policy, no marker comment: installed by someone else.
        assert!(plan_policy(&def, Some(None), false).is_err());
        assert_eq!(plan_policy(&def, Some(None), true).unwrap(), PolicyAction::Replace);
    }

    #[test]
    fn index_names_are_bounded() {
        let table = TableRef::parse(&"t".repeat(60)).unwrap();
        let name = index_name(&table, "user_id");
        assert!(name.len() <= 63);
        assert!(name.starts_with("rg_idx_"));
    }
}
