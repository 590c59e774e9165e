//! Scenario matrix construction and result classification.

use serde::{Deserialize, Serialize};

use rowguard_core::{Command, Principal, Severity, TableRef};

use crate::model::IsolationModel;

/// Position in the principal axis of the matrix.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrincipalSlot {
    Anonymous,
    UserA,
    UserB,
    Elevated,
}

impl PrincipalSlot {
    pub const ALL: [PrincipalSlot; 4] = [
        PrincipalSlot::Anonymous,
        PrincipalSlot::UserA,
        PrincipalSlot::UserB,
        PrincipalSlot::Elevated,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PrincipalSlot::Anonymous => "anonymous",
            PrincipalSlot::UserA => "principal-a",
            PrincipalSlot::UserB => "principal-b",
            PrincipalSlot::Elevated => "elevated-role",
        }
    }

    /// Whether this slot owns fixture rows of its own.
    pub fn has_own_rows(&self) -> bool {
        matches!(self, PrincipalSlot::UserA | PrincipalSlot::UserB)
    }
}

/// Relationship between the acting principal and the target row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RowOwnership {
    Own,
    Foreign,
}

/// What the isolation model says should happen.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expectation {
    Allow,
    Deny,
}

/// What actually happened when the operation ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "observation", rename_all = "lowercase")]
pub enum Observation {
    /// Operation reached `rows` rows.
    Allowed { rows: u64 },
    /// Operation reached zero rows, or was rejected by a policy check.
    Denied,
    /// Operation failed for a reason unrelated to row policy (fixture or
    /// session trouble); the cell proves nothing.
    Inconclusive { reason: String },
}

/// One cell of the scenario matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestScenario {
    pub table: TableRef,
    pub slot: PrincipalSlot,
    #[serde(skip)]
    pub principal: Option<Principal>,
    pub command: Command,
    pub ownership: RowOwnership,
    pub expected: Expectation,
}

impl TestScenario {
    pub fn label(&self) -> String {
        format!(
            "{} {} {:?}-row on {}",
            self.slot.label(),
            self.command,
            self.ownership,
            self.table
        )
    }
}

/// Final status of one scenario.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    Pass,
    Fail,
    Inconclusive,
}

/// A classified scenario outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub scenario: TestScenario,
    pub observed: Observation,
    pub status: ScenarioStatus,
    pub severity: Severity,
    pub detail: String,
}

/// Build the full matrix for one table under its declared model.
///
/// {anonymous, principal-A, principal-B, elevated} × {SELECT, INSERT, UPDATE,
/// DELETE} × {own, foreign}, minus own-row cells for slots that own no rows
/// (anonymous and elevated principals have no rows of their own).
pub fn build_matrix(table: &TableRef, model: &IsolationModel) -> Vec<TestScenario> {
    let mut scenarios = Vec::new();
    for slot in PrincipalSlot::ALL {
        for command in Command::CONCRETE {
            for ownership in [RowOwnership::Own, RowOwnership::Foreign] {
                if ownership == RowOwnership::Own && !slot.has_own_rows() {
                    continue;
                }
                scenarios.push(TestScenario {
                    table: table.clone(),
                    slot,
                    principal: None,
                    command,
                    ownership,
                    expected: model.expectation(slot, command, ownership),
                });
            }
        }
    }
    scenarios
}

/// Classify an observation against its scenario's expectation.
///
/// - Foreign-row operation succeeding where the model demands denial is an
///   isolation breach: severity critical, never downgraded.
/// - Own-row operation denied is a false lockout: severity high.
pub fn classify(scenario: TestScenario, observed: Observation) -> TestResult {
    let (status, severity, detail) = match (&observed, scenario.expected) {
        (Observation::Inconclusive { reason }, _) => (
            ScenarioStatus::Inconclusive,
            Severity::Info,
            format!("inconclusive: {reason}"),
        ),
        (Observation::Allowed { .. }, Expectation::Allow) => {
            (ScenarioStatus::Pass, Severity::Info, "allowed as expected".to_string())
        }
        (Observation::Denied, Expectation::Deny) => {
            (ScenarioStatus::Pass, Severity::Info, "denied as expected".to_string())
        }
        (Observation::Allowed { rows }, Expectation::Deny) => (
            ScenarioStatus::Fail,
            Severity::Critical,
            format!(
                "isolation breach: {} reached {rows} row(s) it must not see",
                scenario.slot.label()
            ),
        ),
        (Observation::Denied, Expectation::Allow) => (
            ScenarioStatus::Fail,
            Severity::High,
            format!(
                "over-restrictive policy: {} was denied its own row",
                scenario.slot.label()
            ),
        ),
    };
    TestResult {
        scenario,
        observed,
        status,
        severity,
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_core::ColumnName;

    fn model() -> IsolationModel {
        IsolationModel::Owner {
            column: ColumnName::new("user_id").unwrap(),
        }
    }

    fn table() -> TableRef {
        TableRef::parse("documents").unwrap()
    }

    #[test]
    fn matrix_has_expected_shape() {
        let scenarios = build_matrix(&table(), &model());
        // 2 slots × 4 commands × 2 ownerships + 2 slots × 4 commands × 1.
        assert_eq!(scenarios.len(), 24);

        let own_cells = scenarios
            .iter()
            .filter(|s| s.ownership == RowOwnership::Own)
            .count();
        assert_eq!(own_cells, 8);
        assert!(
            scenarios
                .iter()
                .filter(|s| s.slot == PrincipalSlot::Anonymous)
                .all(|s| s.ownership == RowOwnership::Foreign)
        );
    }

    #[test]
    fn foreign_row_success_is_critical_breach() {
        let scenario = TestScenario {
            table: table(),
            slot: PrincipalSlot::UserB,
            principal: None,
            command: Command::Select,
            ownership: RowOwnership::Foreign,
            expected: Expectation::Deny,
        };
        let result = classify(scenario, Observation::Allowed { rows: 1 });
        assert_eq!(result.status, ScenarioStatus::Fail);
        assert_eq!(result.severity, Severity::Critical);
        assert!(result.detail.contains("isolation breach"));
    }

    #[test]
    fn own_row_denial_is_high_lockout() {
        let scenario = TestScenario {
            table: table(),
            slot: PrincipalSlot::UserA,
            principal: None,
            command: Command::Update,
            ownership: RowOwnership::Own,
            expected: Expectation::Allow,
        };
        let result = classify(scenario, Observation::Denied);
        assert_eq!(result.status, ScenarioStatus::Fail);
        assert_eq!(result.severity, Severity::High);
        assert!(result.detail.contains("over-restrictive"));
    }

    #[test]
    fn matching_outcomes_pass() {
        let scenario = TestScenario {
            table: table(),
            slot: PrincipalSlot::UserA,
            principal: None,
            command: Command::Select,
            ownership: RowOwnership::Own,
            expected: Expectation::Allow,
        };
        let result = classify(scenario.clone(), Observation::Allowed { rows: 1 });
        assert_eq!(result.status, ScenarioStatus::Pass);

        let scenario = TestScenario {
            expected: Expectation::Deny,
            ownership: RowOwnership::Foreign,
            slot: PrincipalSlot::Anonymous,
            ..scenario
        };
        let result = classify(scenario, Observation::Denied);
        assert_eq!(result.status, ScenarioStatus::Pass);
    }

    #[test]
    fn inconclusive_is_never_a_silent_skip() {
        let scenario = TestScenario {
            table: table(),
            slot: PrincipalSlot::UserA,
            principal: None,
            command: Command::Insert,
            ownership: RowOwnership::Own,
            expected: Expectation::Allow,
        };
        let result = classify(
            scenario,
            Observation::Inconclusive {
                reason: "fixture setup failed".to_string(),
            },
        );
        assert_eq!(result.status, ScenarioStatus::Inconclusive);
        assert!(result.detail.contains("fixture setup failed"));
    }

    /// The concrete case from the isolation contract: `documents(id, user_id)`
    /// with one row owned by A. B selecting it must see zero rows; A must see
    /// one. Any other outcome is critical or high respectively.
    #[test]
    fn documents_concrete_case() {
        let b_foreign = TestScenario {
            table: table(),
            slot: PrincipalSlot::UserB,
            principal: None,
            command: Command::Select,
            ownership: RowOwnership::Foreign,
            expected: model().expectation(
                PrincipalSlot::UserB,
                Command::Select,
                RowOwnership::Foreign,
            ),
        };
        assert_eq!(b_foreign.expected, Expectation::Deny);
        assert_eq!(
            classify(b_foreign.clone(), Observation::Denied).status,
            ScenarioStatus::Pass
        );
        assert_eq!(
            classify(b_foreign, Observation::Allowed { rows: 1 }).severity,
            Severity::Critical
        );

        let a_own = TestScenario {
            table: table(),
            slot: PrincipalSlot::UserA,
            principal: None,
            command: Command::Select,
            ownership: RowOwnership::Own,
            expected: model().expectation(PrincipalSlot::UserA, Command::Select, RowOwnership::Own),
        };
        assert_eq!(a_own.expected, Expectation::Allow);
        assert_eq!(
            classify(a_own.clone(), Observation::Allowed { rows: 1 }).status,
            ScenarioStatus::Pass
        );
        assert_eq!(classify(a_own, Observation::Denied).severity, Severity::High);
    }
}
