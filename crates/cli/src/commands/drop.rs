//! `rowguard drop` — explicit destructive removal of managed policies.

use clap::Args;
use sqlx::PgPool;

use rowguard_apply::PolicyApplier;
use rowguard_core::TableRef;

#[derive(Args)]
pub struct DropArgs {
    /// Table to strip of managed policies.
    pub table: String,

    /// Confirm the destructive operation.
    #[arg(long)]
    pub yes: bool,

    /// Also disable row-level security afterwards. This is the only path in
    /// the tool that disables RLS.
    #[arg(long)]
    pub disable_rls: bool,
}

pub async fn execute(args: DropArgs, pool: PgPool) -> anyhow::Result<u8> {
    let table = TableRef::parse(&args.table).map_err(|e| super::usage(e.into()))?;
    let applier = PolicyApplier::new(pool);

    let dropped = applier.drop_policies(&table, args.yes).await?;
    println!("{table}: {dropped} managed policies dropped");

    if args.disable_rls {
        applier.disable_isolation(&table, args.yes).await?;
        println!("{table}: row-level security disabled");
    }
    Ok(0)
}
