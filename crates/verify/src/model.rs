//! Declared isolation models and the expectations they imply.

use serde::{Deserialize, Serialize};

use rowguard_core::{ColumnName, Command, TableProfile, TableRef};

use crate::scenario::{Expectation, PrincipalSlot, RowOwnership};

/// How a table is declared to isolate its rows.
///
/// The runner derives every scenario expectation from this declaration, not
/// from the installed policies: the point of the exercise is to compare what
/// the policies *do* against what the model *promises*.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationModel {
    /// Rows belong to the principal in `column`.
    Owner { column: ColumnName },
    /// Rows belong to the organization in `column`; access requires
    /// membership recorded in `membership_relation`.
    Tenant {
        column: ColumnName,
        membership_relation: TableRef,
    },
}

impl IsolationModel {
    /// Derive the model from a table's profile. Owner scoping wins when a
    /// table carries both columns: per-user rows are the tighter promise.
    pub fn from_profile(profile: &TableProfile) -> Option<Self> {
        if let Some(column) = &profile.owner_column {
            return Some(IsolationModel::Owner { column: column.clone() });
        }
        profile.tenant_column.as_ref().map(|column| IsolationModel::Tenant {
            column: column.clone(),
            membership_relation: TableRef::new("public", "org_members")
                .expect("static identifiers"),
        })
    }

    /// The scoping column fixtures must populate.
    pub fn scope_column(&self) -> &ColumnName {
        match self {
            IsolationModel::Owner { column } => column,
            IsolationModel::Tenant { column, .. } => column,
        }
    }

    /// Expected outcome for one scenario cell.
    ///
    /// - Elevated (service) principals bypass row checks by convention.
    /// - Anonymous principals are denied everything absent an explicit
    ///   anonymous-read policy (denied means zero rows, not an error).
    /// - Authenticated principals reach their own rows and never foreign ones.
    pub fn expectation(
        &self,
        slot: PrincipalSlot,
        _command: Command,
        ownership: RowOwnership,
    ) -> Expectation {
        match slot {
            PrincipalSlot::Elevated => Expectation::Allow,
            PrincipalSlot::Anonymous => Expectation::Deny,
            PrincipalSlot::UserA | PrincipalSlot::UserB => match ownership {
                RowOwnership::Own => Expectation::Allow,
                RowOwnership::Foreign => Expectation::Deny,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(s: &str) -> ColumnName {
        ColumnName::new(s).unwrap()
    }

    #[test]
    fn owner_scoping_wins_over_tenant() {
        let profile = TableProfile::new(TableRef::parse("documents").unwrap())
            .with_owner_column(col("user_id"))
            .with_tenant_column(col("org_id"));
        let model = IsolationModel::from_profile(&profile).unwrap();
        assert!(matches!(model, IsolationModel::Owner { .. }));
        assert_eq!(model.scope_column().as_str(), "user_id");
    }

    #[test]
    fn unscoped_profile_has_no_model() {
        let profile = TableProfile::new(TableRef::parse("notes").unwrap());
        assert!(IsolationModel::from_profile(&profile).is_none());
    }

    #[test]
    fn expectations_cover_the_matrix() {
        let model = IsolationModel::Owner { column: col("user_id") };
        for command in Command::CONCRETE {
            assert_eq!(
                model.expectation(PrincipalSlot::Elevated, command, RowOwnership::Foreign),
                Expectation::Allow
            );
            assert_eq!(
                model.expectation(PrincipalSlot::Anonymous, command, RowOwnership::Foreign),
                Expectation::Deny
            );
            assert_eq!(
                model.expectation(PrincipalSlot::UserA, command, RowOwnership::Own),
                Expectation::Allow
            );
            assert_eq!(
                model.expectation(PrincipalSlot::UserA, command, RowOwnership::Foreign),
                Expectation::Deny
            );
        }
    }
}
