//! `rowguard test` — isolation scenarios for one table.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use sqlx::PgPool;

use rowguard_catalog::{Catalog, PostgresCatalog};
use rowguard_core::{OrgId, PrincipalId, TableRef};
use rowguard_report::Report;
use rowguard_verify::{IdentitySeed, IsolationRunner};

#[derive(Args)]
pub struct TestArgs {
    /// Table to test, schema-qualified or bare.
    pub table: String,

    /// Pin principal A's id for reproducible fixtures.
    #[arg(long, value_name = "UUID")]
    pub user_id: Option<String>,

    /// Pin principal A's organization id (tenant-scoped tables).
    #[arg(long, value_name = "UUID")]
    pub org_id: Option<String>,

    /// Write the full report here (.md for Markdown, JSON otherwise).
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

pub async fn execute(args: TestArgs, pool: PgPool) -> anyhow::Result<u8> {
    let table = TableRef::parse(&args.table).map_err(|e| super::usage(e.into()))?;
    let catalog = PostgresCatalog::new(pool.clone());
    let profile = catalog
        .table_profiles(table.schema())
        .await?
        .into_iter()
        .find(|p| p.table == table)
        .with_context(|| format!("table {table} not found"))?;

    let seed = IdentitySeed {
        principal_a: args
            .user_id
            .as_deref()
            .map(PrincipalId::from_str)
            .transpose()
            .map_err(|e| super::usage(e.into()))?,
        org_a: args
            .org_id
            .as_deref()
            .map(OrgId::from_str)
            .transpose()
            .map_err(|e| super::usage(e.into()))?,
    };

    let runner = IsolationRunner::new(Arc::new(pool));
    let results = runner.run_table(&profile, &seed).await?;

    let report = Report::new(1, Vec::new(), results);
    super::write_report(&report, args.report.as_deref())?;
    println!("{}", super::summarize(&report));
    Ok(report.status().exit_code())
}
