//! Subcommand implementations.

pub mod apply;
pub mod audit;
pub mod drop;
pub mod run_all;
pub mod test;

use std::fmt;
use std::path::Path;

use rowguard_core::TableRef;
use rowguard_report::Report;

/// Marker attached to bad invocation input discovered after clap has
/// already parsed the command line: unknown templates, missing template
/// arguments, malformed grants, invalid table names. These share clap's
/// exit code rather than the runtime-failure code.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UsageError;

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid usage")
    }
}

impl std::error::Error for UsageError {}

pub(crate) fn usage(err: anyhow::Error) -> anyhow::Error {
    err.context(UsageError)
}

/// 2 for usage and configuration mistakes, 1 for everything else.
pub(crate) fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.chain().any(|cause| cause.is::<UsageError>()) {
        2
    } else {
        1
    }
}

/// Write the full report artifact: Markdown for `.md` paths, JSON otherwise.
pub(crate) fn write_report(report: &Report, path: Option<&Path>) -> anyhow::Result<()> {
    let Some(path) = path else { return Ok(()) };
    let body = if path.extension().is_some_and(|ext| ext == "md") {
        report.to_markdown()
    } else {
        report.to_json()?
    };
    std::fs::write(path, body)
        .map_err(|e| anyhow::anyhow!("failed to write report to {}: {e}", path.display()))
}

/// The one-line stdout summary; full detail lives in the report artifact.
pub(crate) fn summarize(report: &Report) -> String {
    format!(
        "{}: {} tables audited, {} critical, {} warning, {} scenarios passed, {} inconclusive",
        match report.status() {
            rowguard_report::ReportStatus::Pass => "pass",
            rowguard_report::ReportStatus::Critical => "CRITICAL",
        },
        report.tables_audited,
        report.critical_count(),
        report.warning_count(),
        report.passed_scenarios(),
        report.inconclusive_scenarios(),
    )
}

pub(crate) fn parse_tables(values: &[String]) -> anyhow::Result<Vec<TableRef>> {
    values
        .iter()
        .map(|v| Ok(TableRef::parse(v)?))
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_errors_take_the_usage_exit_code() {
        let err = usage(anyhow::anyhow!("resource-linked requires --parent"));
        assert_eq!(exit_code_for(&err), 2);
        // Context layered on top must not hide the classification.
        let err = err.context("apply failed");
        assert_eq!(exit_code_for(&err), 2);
    }

    #[test]
    fn runtime_errors_take_the_failure_exit_code() {
        assert_eq!(exit_code_for(&anyhow::anyhow!("connection reset")), 1);
    }

    #[test]
    fn bad_table_names_are_usage_errors() {
        let err = parse_tables(&["not a table".to_string()]).unwrap_err();
        assert_eq!(exit_code_for(&err), 2);
    }
}
