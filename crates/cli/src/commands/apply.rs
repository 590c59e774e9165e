//! `rowguard apply` — render a template and converge tables onto it.

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::Context;
use clap::Args;
use sqlx::PgPool;

use rowguard_apply::PolicyApplier;
use rowguard_catalog::{Catalog, PostgresCatalog};
use rowguard_core::{ColumnName, Command, TableProfile, TableRef};
use rowguard_policy::{MembershipRelation, ParentLink, PolicyTemplate, TemplateId};

#[derive(Args)]
pub struct ApplyArgs {
    /// Template: user-isolation, multi-tenant, role-based, or resource-linked.
    pub template: String,

    /// Tables to converge, schema-qualified or bare (default schema: public).
    #[arg(required = true)]
    pub tables: Vec<String>,

    /// Replace same-named policies whose semantics differ instead of aborting.
    #[arg(long)]
    pub force: bool,

    /// Override the detected ownership column.
    #[arg(long, value_name = "COLUMN")]
    pub owner_column: Option<String>,

    /// Override the detected tenancy column.
    #[arg(long, value_name = "COLUMN")]
    pub tenant_column: Option<String>,

    /// Membership relation backing multi-tenant (default: public.org_members).
    #[arg(long, value_name = "TABLE")]
    pub membership_relation: Option<String>,

    /// Allowed roles per command for role-based, repeatable.
    #[arg(long = "roles", value_name = "CMD=ROLE,...")]
    pub roles: Vec<String>,

    /// JWT claim holding the application role (role-based).
    #[arg(long, default_value = "app_role")]
    pub claim: String,

    /// Parent table for resource-linked.
    #[arg(long, value_name = "TABLE")]
    pub parent: Option<String>,

    /// Parent key column for resource-linked.
    #[arg(long, default_value = "id", value_name = "COLUMN")]
    pub parent_key: String,

    /// Foreign-key column on the child pointing at the parent.
    #[arg(long, value_name = "COLUMN")]
    pub fk_column: Option<String>,

    /// Ownership column on the parent table.
    #[arg(long, default_value = "user_id", value_name = "COLUMN")]
    pub parent_owner_column: String,
}

pub async fn execute(args: ApplyArgs, pool: PgPool) -> anyhow::Result<u8> {
    let template = build_template(&args).map_err(super::usage)?;
    let catalog = PostgresCatalog::new(pool.clone());
    let applier = PolicyApplier::new(pool);

    for table in super::parse_tables(&args.tables)? {
        let snapshot = catalog.snapshot(table.schema()).await?;
        let profile = resolve_profile(&catalog, &table, &args).await?;
        let defs = template.render(&profile, &snapshot)?;
        let outcome = applier.apply(&defs, args.force).await?;
        if outcome.is_noop() {
            println!(
                "{}: already converged ({} policies unchanged)",
                outcome.table, outcome.unchanged,
            );
        } else {
            println!(
                "{}: {} created, {} unchanged, {} replaced, {} indexes created",
                outcome.table,
                outcome.created,
                outcome.unchanged,
                outcome.replaced,
                outcome.indexes_created,
            );
        }
    }
    Ok(0)
}

fn build_template(args: &ApplyArgs) -> anyhow::Result<PolicyTemplate> {
    let id = TemplateId::from_str(&args.template).map_err(|e| anyhow::anyhow!(e))?;
    match id {
        TemplateId::UserIsolation => Ok(PolicyTemplate::UserIsolation),
        TemplateId::MultiTenant => {
            let mut membership = MembershipRelation::conventional();
            if let Some(relation) = &args.membership_relation {
                membership.relation = TableRef::parse(relation)?;
            }
            Ok(PolicyTemplate::MultiTenant { membership })
        }
        TemplateId::RoleBased => {
            let allowed_roles = parse_role_grants(&args.roles)?;
            anyhow::ensure!(
                !allowed_roles.is_empty(),
                "role-based requires at least one --roles CMD=ROLE,... grant"
            );
            Ok(PolicyTemplate::RoleBased {
                claim: args.claim.clone(),
                allowed_roles,
            })
        }
        TemplateId::ResourceLinked => {
            let parent = args
                .parent
                .as_deref()
                .context("resource-linked requires --parent")?;
            let fk_column = args
                .fk_column
                .as_deref()
                .context("resource-linked requires --fk-column")?;
            Ok(PolicyTemplate::ResourceLinked {
                link: ParentLink {
                    parent: TableRef::parse(parent)?,
                    parent_key: ColumnName::new(&args.parent_key)?,
                    fk_column: ColumnName::new(fk_column)?,
                    parent_owner_column: ColumnName::new(&args.parent_owner_column)?,
                },
            })
        }
    }
}

/// `CMD=ROLE,...` grants, e.g. `--roles select=viewer,editor --roles update=editor`.
fn parse_role_grants(grants: &[String]) -> anyhow::Result<BTreeMap<Command, Vec<String>>> {
    let mut allowed: BTreeMap<Command, Vec<String>> = BTreeMap::new();
    for grant in grants {
        let (command, roles) = grant
            .split_once('=')
            .with_context(|| format!("invalid --roles grant '{grant}', expected CMD=ROLE,..."))?;
        let command = parse_command(command)?;
        let roles: Vec<String> = roles
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();
        allowed.entry(command).or_default().extend(roles);
    }
    Ok(allowed)
}

fn parse_command(token: &str) -> anyhow::Result<Command> {
    let token = token.to_ascii_lowercase();
    Command::CONCRETE
        .into_iter()
        .chain([Command::All])
        .find(|c| c.as_token() == token)
        .with_context(|| format!("unknown command '{token}'"))
}

async fn resolve_profile(
    catalog: &PostgresCatalog,
    table: &TableRef,
    args: &ApplyArgs,
) -> anyhow::Result<TableProfile> {
    let mut profile = catalog
        .table_profiles(table.schema())
        .await?
        .into_iter()
        .find(|p| &p.table == table)
        .with_context(|| format!("table {table} not found"))?;
    if let Some(column) = &args.owner_column {
        profile.owner_column = Some(ColumnName::new(column)?);
    }
    if let Some(column) = &args.tenant_column {
        profile.tenant_column = Some(ColumnName::new(column)?);
    }
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_grants_parse_and_merge() {
        let grants = vec![
            "select=viewer,editor".to_string(),
            "update=editor".to_string(),
            "select=auditor".to_string(),
        ];
        let allowed = parse_role_grants(&grants).unwrap();
        assert_eq!(
            allowed[&Command::Select],
            vec!["viewer", "editor", "auditor"]
        );
        assert_eq!(allowed[&Command::Update], vec!["editor"]);
    }

    #[test]
    fn malformed_grants_are_rejected() {
        assert!(parse_role_grants(&["select viewer".to_string()]).is_err());
        assert!(parse_command("truncate").is_err());
        assert_eq!(parse_command("ALL").unwrap(), Command::All);
    }
}
