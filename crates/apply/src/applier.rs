//! Transactional policy applier.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::{PgPool, Postgres, Row, Transaction};
use thiserror::Error;
use tracing::{info, instrument, warn};

use rowguard_core::{ColumnName, TableRef};
use rowguard_policy::PolicyDefinition;

use crate::plan::{
    ApplyOutcome, PolicyAction, fingerprint, fingerprint_comment, index_name, plan_policy,
};

/// Applier operation error.
///
/// `PolicyConflict` requires an explicit force flag to proceed;
/// `ConfirmationRequired` guards destructive operations; `Connection` is the
/// transient class.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("policy conflict on {table}: {detail}")]
    PolicyConflict { table: TableRef, detail: String },

    #[error("refusing destructive operation without confirmation: {0}")]
    ConfirmationRequired(String),

    #[error("definitions in one apply batch must target a single table ({0})")]
    MixedBatch(String),

    #[error("empty definition batch")]
    EmptyBatch,

    #[error("connection failure during {operation}: {message}")]
    Connection { operation: String, message: String },

    #[error("sql error during {operation}: {message}")]
    Sql { operation: String, message: String },
}

impl ApplyError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApplyError::Connection { .. })
    }
}

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_millis(200);

/// Converges one table's enforcement state inside a single transaction.
///
/// Concurrent appliers targeting the same table serialize on
/// `pg_advisory_xact_lock(hashtext(schema.table))`; the lock releases with
/// the transaction on every exit path.
#[derive(Debug, Clone)]
pub struct PolicyApplier {
    pool: Arc<PgPool>,
}

impl PolicyApplier {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Apply rendered definitions to their table, all-or-nothing.
    ///
    /// Steps: advisory lock, enable RLS, upsert policies by deterministic
    /// name, create missing supporting indexes. A same-name policy with
    /// different semantics aborts with `PolicyConflict` unless `force`.
    /// Connection failures retry with bounded backoff; the aborted attempt's
    /// transaction rolled back, so re-running is safe.
    #[instrument(skip(self, defs), fields(definitions = defs.len(), force), err)]
    pub async fn apply(
        &self,
        defs: &[PolicyDefinition],
        force: bool,
    ) -> Result<ApplyOutcome, ApplyError> {
        let mut attempt = 1u32;
        loop {
            match self.apply_once(defs, force).await {
                Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let delay = BASE_DELAY * 2u32.saturating_pow(attempt - 1);
                    warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "apply attempt failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn apply_once(
        &self,
        defs: &[PolicyDefinition],
        force: bool,
    ) -> Result<ApplyOutcome, ApplyError> {
        let table = batch_table(defs)?;
        let mut outcome = ApplyOutcome::new(table.clone());

        let mut tx = self.begin("apply").await?;
        lock_table(&mut tx, &table).await?;

        execute(
            &mut tx,
            "enable_rls",
            &format!("ALTER TABLE {} ENABLE ROW LEVEL SECURITY", table.quoted()),
        )
        .await?;

        let existing = installed_policy_comments(&mut tx, &table).await?;

        for def in defs {
            let known = existing
                .get(def.name.as_str())
                .map(|comment| comment.as_deref());
            let action = plan_policy(def, known, force).map_err(|detail| {
                ApplyError::PolicyConflict {
                    table: table.clone(),
                    detail,
                }
            })?;

            match action {
                PolicyAction::Unchanged => outcome.unchanged += 1,
                PolicyAction::Create => {
                    create_policy(&mut tx, def).await?;
                    outcome.created += 1;
                }
                PolicyAction::Replace => {
                    execute(&mut tx, "drop_policy", &def.to_drop_sql()).await?;
                    create_policy(&mut tx, def).await?;
                    outcome.replaced += 1;
                }
            }
        }

        outcome.indexes_created = ensure_indexes(&mut tx, &table, defs).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        info!(
            table = %table,
            created = outcome.created,
            unchanged = outcome.unchanged,
            replaced = outcome.replaced,
            indexes_created = outcome.indexes_created,
            "policy apply committed"
        );
        Ok(outcome)
    }

    /// Drop every framework-managed policy on `table`.
    ///
    /// Destructive; refuses without confirmation. RLS stays enabled.
    #[instrument(skip(self), fields(table = %table), err)]
    pub async fn drop_policies(&self, table: &TableRef, confirm: bool) -> Result<u32, ApplyError> {
        if !confirm {
            return Err(ApplyError::ConfirmationRequired(format!(
                "dropping managed policies on {table}"
            )));
        }

        let mut tx = self.begin("drop_policies").await?;
        lock_table(&mut tx, table).await?;

        let existing = installed_policy_comments(&mut tx, table).await?;
        let mut dropped = 0u32;
        for name in existing.keys().filter(|n| n.starts_with("rg_")) {
            let sql = format!("DROP POLICY IF EXISTS \"{name}\" ON {}", table.quoted());
            execute(&mut tx, "drop_policy", &sql).await?;
            dropped += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        info!(table = %table, dropped, "managed policies dropped");
        Ok(dropped)
    }

    /// Disable row-level security on `table`.
    ///
    /// Never done implicitly anywhere in the framework; this is the one
    /// explicit path, and it refuses without confirmation.
    #[instrument(skip(self), fields(table = %table), err)]
    pub async fn disable_isolation(
        &self,
        table: &TableRef,
        confirm: bool,
    ) -> Result<(), ApplyError> {
        if !confirm {
            return Err(ApplyError::ConfirmationRequired(format!(
                "disabling row-level security on {table}"
            )));
        }

        let mut tx = self.begin("disable_isolation").await?;
        lock_table(&mut tx, table).await?;
        execute(
            &mut tx,
            "disable_rls",
            &format!("ALTER TABLE {} DISABLE ROW LEVEL SECURITY", table.quoted()),
        )
        .await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        info!(table = %table, "row-level security disabled");
        Ok(())
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, ApplyError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

/// All definitions in a batch must target the same table.
fn batch_table(defs: &[PolicyDefinition]) -> Result<TableRef, ApplyError> {
    let first = defs.first().ok_or(ApplyError::EmptyBatch)?;
    for def in defs {
        if def.table != first.table {
            return Err(ApplyError::MixedBatch(format!(
                "{} and {}",
                first.table, def.table
            )));
        }
    }
    Ok(first.table.clone())
}

/// Serialize appliers per table; released with the transaction.
async fn lock_table(
    tx: &mut Transaction<'_, Postgres>,
    table: &TableRef,
) -> Result<(), ApplyError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(table.qualified())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("advisory_lock", e))?;
    Ok(())
}

/// Policy name → fingerprint comment for everything installed on the table.
async fn installed_policy_comments(
    tx: &mut Transaction<'_, Postgres>,
    table: &TableRef,
) -> Result<BTreeMap<String, Option<String>>, ApplyError> {
    let rows = sqlx::query(
        r#"
        SELECT pol.polname AS name,
               obj_description(pol.oid, 'pg_policy') AS comment
        FROM pg_policy pol
        JOIN pg_class c ON c.oid = pol.polrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1 AND c.relname = $2
        "#,
    )
    .bind(table.schema())
    .bind(table.name())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("read_policies", e))?;

    let mut out = BTreeMap::new();
    for row in rows {
        let name: String = row
            .try_get("name")
            .map_err(|e| map_sqlx_error("read_policies", e))?;
        let comment: Option<String> = row
            .try_get("comment")
            .map_err(|e| map_sqlx_error("read_policies", e))?;
        out.insert(name, comment);
    }
    Ok(out)
}

async fn create_policy(
    tx: &mut Transaction<'_, Postgres>,
    def: &PolicyDefinition,
) -> Result<(), ApplyError> {
    execute(tx, "create_policy", &def.to_create_sql()).await?;
    // Fingerprint is hex, safe inside a literal.
    let comment_sql = format!(
        "COMMENT ON POLICY \"{}\" ON {} IS '{}'",
        def.name,
        def.table.quoted(),
        fingerprint_comment(&fingerprint(def)),
    );
    execute(tx, "comment_policy", &comment_sql).await
}

/// Create one supporting index per unindexed predicate column.
async fn ensure_indexes(
    tx: &mut Transaction<'_, Postgres>,
    table: &TableRef,
    defs: &[PolicyDefinition],
) -> Result<u32, ApplyError> {
    let mut wanted: Vec<ColumnName> = defs.iter().flat_map(|d| d.predicate_columns()).collect();
    wanted.sort();
    wanted.dedup();
    if wanted.is_empty() {
        return Ok(0);
    }

    let rows = sqlx::query(
        r#"
        SELECT a.attname AS column_name
        FROM pg_index i
        JOIN pg_class t ON t.oid = i.indrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = i.indkey[0]
        WHERE n.nspname = $1 AND t.relname = $2
        "#,
    )
    .bind(table.schema())
    .bind(table.name())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("read_indexes", e))?;

    let mut indexed = std::collections::BTreeSet::new();
    for row in rows {
        let name: String = row
            .try_get("column_name")
            .map_err(|e| map_sqlx_error("read_indexes", e))?;
        indexed.insert(name);
    }

    let mut created = 0u32;
    for column in wanted {
        if indexed.contains(column.as_str()) {
            continue;
        }
        let sql = format!(
            "CREATE INDEX \"{}\" ON {} ({})",
            index_name(table, column.as_str()),
            table.quoted(),
            column.quoted(),
        );
        execute(tx, "create_index", &sql).await?;
        created += 1;
    }
    Ok(created)
}

async fn execute(
    tx: &mut Transaction<'_, Postgres>,
    operation: &str,
    sql: &str,
) -> Result<(), ApplyError> {
    sqlx::query(sql)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;
    Ok(())
}

/// Map SQLx errors, classifying pool/IO failures as transient.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ApplyError {
    let operation = operation.to_string();
    match err {
        sqlx::Error::Io(e) => ApplyError::Connection {
            operation,
            message: e.to_string(),
        },
        sqlx::Error::PoolTimedOut => ApplyError::Connection {
            operation,
            message: "pool timed out".to_string(),
        },
        sqlx::Error::PoolClosed => ApplyError::Connection {
            operation,
            message: "pool closed".to_string(),
        },
        sqlx::Error::Database(db_err) => ApplyError::Sql {
            operation,
            message: db_err.message().to_string(),
        },
        other => ApplyError::Sql {
            operation,
            message: other.to_string(),
        },
    }
}
