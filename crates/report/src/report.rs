//! Merged report model and its JSON form.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use rowguard_audit::AuditFinding;
use rowguard_core::Severity;
use rowguard_verify::{ScenarioStatus, TestResult};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Overall verdict. Critical iff any critical finding or any critical
/// scenario failure is present; critical entries are never filtered out of
/// the artifact.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pass,
    Critical,
}

impl ReportStatus {
    /// Process exit code this status maps to. Usage errors exit 2 and are
    /// decided before a report exists.
    pub fn exit_code(&self) -> u8 {
        match self {
            ReportStatus::Pass => 0,
            ReportStatus::Critical => 1,
        }
    }
}

/// Audit findings and scenario results for one run, merged.
#[derive(Debug, Clone)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub tables_audited: usize,
    pub findings: Vec<AuditFinding>,
    pub results: Vec<TestResult>,
}

impl Report {
    /// Findings are re-sorted for determinism; results keep the matrix order
    /// their batches produced.
    pub fn new(
        tables_audited: usize,
        mut findings: Vec<AuditFinding>,
        results: Vec<TestResult>,
    ) -> Self {
        findings.sort();
        Self {
            generated_at: Utc::now(),
            tables_audited,
            findings,
            results,
        }
    }

    pub fn status(&self) -> ReportStatus {
        if self.critical_count() > 0 {
            ReportStatus::Critical
        } else {
            ReportStatus::Pass
        }
    }

    /// Critical findings plus critical scenario failures.
    pub fn critical_count(&self) -> usize {
        let findings = self
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Critical)
            .count();
        let results = self
            .results
            .iter()
            .filter(|r| r.status == ScenarioStatus::Fail && r.severity == Severity::Critical)
            .count();
        findings + results
    }

    /// Non-critical problems: warning findings plus high-severity scenario
    /// failures (false lockouts).
    pub fn warning_count(&self) -> usize {
        let findings = self
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .count();
        let results = self
            .results
            .iter()
            .filter(|r| r.status == ScenarioStatus::Fail && r.severity == Severity::High)
            .count();
        findings + results
    }

    pub fn passed_scenarios(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == ScenarioStatus::Pass)
            .count()
    }

    pub fn inconclusive_scenarios(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == ScenarioStatus::Inconclusive)
            .count()
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        let doc = ReportDocument {
            status: self.status(),
            generated_at: self.generated_at,
            tables_audited: self.tables_audited,
            critical_count: self.critical_count(),
            warning_count: self.warning_count(),
            findings: &self.findings,
            results: &self.results,
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    pub fn to_markdown(&self) -> String {
        crate::markdown::render(self)
    }
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    status: ReportStatus,
    generated_at: DateTime<Utc>,
    tables_audited: usize,
    critical_count: usize,
    warning_count: usize,
    findings: &'a [AuditFinding],
    results: &'a [TestResult],
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_audit::FindingKind;
    use rowguard_core::{ColumnName, Command, TableRef};
    use rowguard_verify::{
        Expectation, Observation, PrincipalSlot, RowOwnership, TestScenario, classify,
    };

    fn table() -> TableRef {
        TableRef::parse("documents").unwrap()
    }

    fn breach_result() -> TestResult {
        let scenario = TestScenario {
            table: table(),
            slot: PrincipalSlot::UserB,
            principal: None,
            command: Command::Select,
            ownership: RowOwnership::Foreign,
            expected: Expectation::Deny,
        };
        classify(scenario, Observation::Allowed { rows: 1 })
    }

    fn passing_result() -> TestResult {
        let scenario = TestScenario {
            table: table(),
            slot: PrincipalSlot::UserA,
            principal: None,
            command: Command::Select,
            ownership: RowOwnership::Own,
            expected: Expectation::Allow,
        };
        classify(scenario, Observation::Allowed { rows: 1 })
    }

    #[test]
    fn all_clear_exits_zero() {
        let report = Report::new(3, Vec::new(), vec![passing_result()]);
        assert_eq!(report.status(), ReportStatus::Pass);
        assert_eq!(report.status().exit_code(), 0);
        assert_eq!(report.critical_count(), 0);
    }

    #[test]
    fn critical_finding_fails_the_run() {
        let finding = AuditFinding::new(table(), FindingKind::MissingIsolation);
        let report = Report::new(1, vec![finding], Vec::new());
        assert_eq!(report.status(), ReportStatus::Critical);
        assert_eq!(report.status().exit_code(), 1);
    }

    #[test]
    fn isolation_breach_fails_the_run() {
        let report = Report::new(1, Vec::new(), vec![breach_result()]);
        assert_eq!(report.status(), ReportStatus::Critical);
        assert_eq!(report.critical_count(), 1);
    }

    #[test]
    fn warnings_alone_still_pass() {
        let finding = AuditFinding::new(
            table(),
            FindingKind::MissingIndex {
                column: ColumnName::new("user_id").unwrap(),
            },
        );
        let report = Report::new(1, vec![finding], vec![passing_result()]);
        assert_eq!(report.status(), ReportStatus::Pass);
        assert_eq!(report.warning_count(), 1);
    }

    #[test]
    fn inconclusive_scenarios_are_counted_not_failed() {
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
                reason: "fixture setup failed".into(),
            },
        );
        let report = Report::new(1, Vec::new(), vec![result]);
        assert_eq!(report.status(), ReportStatus::Pass);
        assert_eq!(report.inconclusive_scenarios(), 1);
    }

    #[test]
    fn json_document_carries_the_contract_fields() {
        let finding = AuditFinding::new(table(), FindingKind::MissingIsolation);
        let report = Report::new(2, vec![finding], vec![breach_result()]);
        let json: serde_json::Value =
            serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "critical");
        assert_eq!(json["tables_audited"], 2);
        assert_eq!(json["critical_count"], 2);
        assert_eq!(json["warning_count"], 0);
        assert!(json["findings"].is_array());
        assert!(json["results"].is_array());
    }
}
