//! Markdown rendering: per-table sections with remediation hints.

use std::collections::BTreeMap;
use std::fmt::Write;

use rowguard_audit::{AuditFinding, FindingKind};
use rowguard_core::TableRef;
use rowguard_verify::{ScenarioStatus, TestResult};

use crate::report::Report;

pub fn render(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Row-level security report");
    let _ = writeln!(out);
    let _ = writeln!(out, "Generated: {}", report.generated_at.to_rfc3339());
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "**Status: {}** — {} critical, {} warning, {} tables audited",
        match report.status() {
            crate::report::ReportStatus::Pass => "PASS",
            crate::report::ReportStatus::Critical => "CRITICAL",
        },
        report.critical_count(),
        report.warning_count(),
        report.tables_audited,
    );
    let _ = writeln!(out);

    for (table, section) in group_by_table(report) {
        let _ = writeln!(out, "## {table}");
        let _ = writeln!(out);

        if !section.findings.is_empty() {
            let _ = writeln!(out, "### Findings");
            let _ = writeln!(out);
            for finding in &section.findings {
                let _ = writeln!(
                    out,
                    "- **{}** `{}` — {}",
                    finding.severity,
                    kind_label(&finding.kind),
                    finding.remediation,
                );
            }
            let _ = writeln!(out);
        }

        if !section.results.is_empty() {
            let passed = count(&section.results, ScenarioStatus::Pass);
            let failed = count(&section.results, ScenarioStatus::Fail);
            let inconclusive = count(&section.results, ScenarioStatus::Inconclusive);
            let _ = writeln!(out, "### Isolation scenarios");
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "{passed} passed, {failed} failed, {inconclusive} inconclusive."
            );
            for result in &section.results {
                if result.status == ScenarioStatus::Pass {
                    continue;
                }
                let _ = writeln!(
                    out,
                    "- **{}** ({}) {} — {}",
                    status_label(result.status),
                    result.severity,
                    result.scenario.label(),
                    result.detail,
                );
            }
            let _ = writeln!(out);
        }
    }

    out
}

#[derive(Default)]
struct TableSection<'a> {
    findings: Vec<&'a AuditFinding>,
    results: Vec<&'a TestResult>,
}

fn group_by_table(report: &Report) -> BTreeMap<&TableRef, TableSection<'_>> {
    let mut sections: BTreeMap<&TableRef, TableSection<'_>> = BTreeMap::new();
    for finding in &report.findings {
        sections.entry(&finding.table).or_default().findings.push(finding);
    }
    for result in &report.results {
        sections
            .entry(&result.scenario.table)
            .or_default()
            .results
            .push(result);
    }
    sections
}

fn count(results: &[&TestResult], status: ScenarioStatus) -> usize {
    results.iter().filter(|r| r.status == status).count()
}

fn kind_label(kind: &FindingKind) -> &'static str {
    match kind {
        FindingKind::MissingIsolation => "missing-isolation",
        FindingKind::MissingPolicyForCommand { .. } => "missing-policy-for-command",
        FindingKind::MissingIndex { .. } => "missing-index",
    }
}

fn status_label(status: ScenarioStatus) -> &'static str {
    match status {
        ScenarioStatus::Pass => "pass",
        ScenarioStatus::Fail => "fail",
        ScenarioStatus::Inconclusive => "inconclusive",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Report;
    use rowguard_core::{Command, TableRef};
    use rowguard_verify::{Expectation, Observation, PrincipalSlot, RowOwnership, TestScenario, classify};

    #[test]
    fn sections_group_by_table_and_hide_passing_rows() {
        let docs = TableRef::parse("documents").unwrap();
        let notes = TableRef::parse("notes").unwrap();
        let finding = AuditFinding::new(notes.clone(), FindingKind::MissingIsolation);
        let breach = classify(
            TestScenario {
                table: docs.clone(),
                slot: PrincipalSlot::UserB,
                principal: None,
                command: Command::Delete,
                ownership: RowOwnership::Foreign,
                expected: Expectation::Deny,
            },
            Observation::Allowed { rows: 1 },
        );
        let pass = classify(
            TestScenario {
                table: docs.clone(),
                slot: PrincipalSlot::UserA,
                principal: None,
                command: Command::Select,
                ownership: RowOwnership::Own,
                expected: Expectation::Allow,
            },
            Observation::Allowed { rows: 1 },
        );

        let md = Report::new(2, vec![finding], vec![breach, pass]).to_markdown();
        assert!(md.contains("## public.documents"));
        assert!(md.contains("## public.notes"));
        assert!(md.contains("missing-isolation"));
        assert!(md.contains("isolation breach"));
        assert!(md.contains("1 passed, 1 failed, 0 inconclusive."));
        // Passing scenarios are counted but not listed row by row.
        assert!(!md.contains("allowed as expected"));
        assert!(md.contains("**Status: CRITICAL**"));
    }
}
