//! `rowguard audit` — read-only coverage audit.

use std::path::PathBuf;

use clap::Args;
use sqlx::PgPool;

use rowguard_audit::CoverageAuditor;
use rowguard_catalog::{Catalog, PostgresCatalog};
use rowguard_report::Report;

#[derive(Args)]
pub struct AuditArgs {
    /// Schema to audit.
    #[arg(long, default_value = "public")]
    pub schema: String,

    /// Tables declared fully public or private; they produce no findings.
    #[arg(long = "exempt", value_name = "TABLE")]
    pub exempt: Vec<String>,

    /// Write the full report here (.md for Markdown, JSON otherwise).
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

pub async fn execute(args: AuditArgs, pool: PgPool) -> anyhow::Result<u8> {
    let catalog = PostgresCatalog::new(pool.clone());
    let tables_audited = catalog.table_profiles(&args.schema).await?.len();

    let auditor = CoverageAuditor::new(PostgresCatalog::new(pool))
        .with_exemptions(super::parse_tables(&args.exempt)?);
    let findings = auditor.audit_schema(&args.schema).await?;

    let report = Report::new(tables_audited, findings, Vec::new());
    super::write_report(&report, args.report.as_deref())?;
    println!("{}", super::summarize(&report));
    Ok(report.status().exit_code())
}
