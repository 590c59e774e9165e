//! `rowguard run-all` — audit plus isolation tests across a schema.
//!
//! Isolation batches run on a bounded worker pool, one job per table; work
//! within a table stays sequential on its own checked-out connection.

use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use sqlx::PgPool;
use tokio::task::JoinSet;
use tracing::warn;

use rowguard_audit::CoverageAuditor;
use rowguard_catalog::{Catalog, PostgresCatalog};
use rowguard_core::{Severity, TableRef};
use rowguard_report::Report;
use rowguard_verify::{IdentitySeed, IsolationRunner, ScenarioStatus, TestResult};

#[derive(Args)]
pub struct RunAllArgs {
    /// Schema to cover.
    #[arg(long, default_value = "public")]
    pub schema: String,

    /// Print the full JSON report on stdout instead of a one-line summary.
    #[arg(long)]
    pub ci: bool,

    /// Stop scheduling new tables after a critical result; in-flight batches
    /// finish and roll back normally.
    #[arg(long)]
    pub fail_fast: bool,

    /// Write the full report here (.md for Markdown, JSON otherwise).
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Concurrent table batches. Defaults to available parallelism.
    #[arg(long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Tables declared fully public or private; audited as exempt, not tested.
    #[arg(long = "exempt", value_name = "TABLE")]
    pub exempt: Vec<String>,
}

pub fn job_count(args: &RunAllArgs) -> usize {
    args.jobs
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
        .max(1)
}

pub async fn execute(args: RunAllArgs, pool: PgPool) -> anyhow::Result<u8> {
    let jobs = job_count(&args);
    let exempt: BTreeSet<TableRef> = super::parse_tables(&args.exempt)?.into_iter().collect();

    let catalog = PostgresCatalog::new(pool.clone());
    let profiles = catalog.table_profiles(&args.schema).await?;
    let tables_audited = profiles.len();

    let auditor =
        CoverageAuditor::new(PostgresCatalog::new(pool.clone())).with_exemptions(exempt.clone());
    let findings = auditor.audit_schema(&args.schema).await?;
    let mut critical_seen = findings.iter().any(|f| f.severity == Severity::Critical);

    let runner = Arc::new(IsolationRunner::new(Arc::new(pool)));
    let mut queue: VecDeque<_> = profiles
        .into_iter()
        .filter(|p| p.is_scoped() && !exempt.contains(&p.table))
        .collect();
    let mut join: JoinSet<Result<Vec<TestResult>, rowguard_verify::VerifyError>> = JoinSet::new();
    let mut results = Vec::new();

    loop {
        if args.fail_fast && critical_seen && !queue.is_empty() {
            warn!(skipped = queue.len(), "fail-fast: not scheduling remaining tables");
            queue.clear();
        }
        while join.len() < jobs {
            let Some(profile) = queue.pop_front() else { break };
            let runner = Arc::clone(&runner);
            join.spawn(async move { runner.run_table(&profile, &IdentitySeed::default()).await });
        }
        let Some(joined) = join.join_next().await else { break };
        match joined {
            Ok(Ok(batch)) => {
                if batch.iter().any(|r| {
                    r.status == ScenarioStatus::Fail && r.severity == Severity::Critical
                }) {
                    critical_seen = true;
                }
                results.extend(batch);
            }
            Ok(Err(err)) => warn!(error = %err, "table batch failed"),
            Err(err) => warn!(error = %err, "table batch panicked"),
        }
    }

    let report = Report::new(tables_audited, findings, results);
    super::write_report(&report, args.report.as_deref())?;
    if args.ci {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", super::summarize(&report));
    }
    Ok(report.status().exit_code())
}
