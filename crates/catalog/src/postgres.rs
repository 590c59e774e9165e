//! Postgres-backed catalog reader.
//!
//! Reads enforcement state from `pg_class`, `pg_policies`, `pg_index`, and
//! `information_schema.columns`. Strictly read-only: every statement here is
//! a SELECT against catalog relations, so only catalog-read privilege is
//! required.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `CatalogError` as follows: pool/IO failures
//! (`Io`, `PoolTimedOut`, `PoolClosed`, `Tls`) become `Connection` (transient,
//! retried with backoff); database-side errors become `Query`; row decoding
//! problems become `Decode`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use rowguard_core::{ColumnName, Command, SchemaSnapshot, TableProfile, TableRef};
use rowguard_policy::PolicyName;

use crate::retry::RetryPolicy;
use crate::r#trait::{Catalog, CatalogError, InstalledPolicy, profile_from_columns};

/// Catalog reader over a sqlx connection pool.
///
/// The pool is shared (`Arc` + sqlx's internal sharing), so this type is
/// cheap to clone and `Send + Sync`.
#[derive(Debug, Clone)]
pub struct PostgresCatalog {
    pool: Arc<PgPool>,
    retry: RetryPolicy,
}

impl PostgresCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Table name → column set for one schema, RLS flags included.
    async fn load_tables(
        &self,
        schema: &str,
    ) -> Result<BTreeMap<TableRef, (BTreeSet<ColumnName>, bool)>, CatalogError> {
        let rows = sqlx::query(
            r#"
            SELECT
                c.relname AS table_name,
                c.relrowsecurity AS rls_enabled,
                a.attname AS column_name
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_attribute a ON a.attrelid = c.oid
            WHERE n.nspname = $1
              AND c.relkind = 'r'
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY c.relname, a.attnum
            "#,
        )
        .bind(schema)
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut tables: BTreeMap<TableRef, (BTreeSet<ColumnName>, bool)> = BTreeMap::new();
        for row in rows {
            let table_name: String = row.try_get("table_name").map_err(decode_err)?;
            let rls_enabled: bool = row.try_get("rls_enabled").map_err(decode_err)?;
            let column_name: String = row.try_get("column_name").map_err(decode_err)?;

            let table = TableRef::new(schema, &table_name)
                .map_err(|e| CatalogError::Decode(e.to_string()))?;
            let column = ColumnName::new(&column_name)
                .map_err(|e| CatalogError::Decode(e.to_string()))?;
            tables
                .entry(table)
                .or_insert_with(|| (BTreeSet::new(), rls_enabled))
                .0
                .insert(column);
        }
        Ok(tables)
    }
}

#[async_trait]
impl Catalog for PostgresCatalog {
    #[instrument(skip(self), err)]
    async fn snapshot(&self, schema: &str) -> Result<SchemaSnapshot, CatalogError> {
        let tables = self
            .retry
            .run("snapshot", || self.load_tables(schema))
            .await?;
        let mut snap = SchemaSnapshot::new();
        for (table, (columns, _)) in tables {
            snap.add_table(table, columns);
        }
        Ok(snap)
    }

    #[instrument(skip(self), err)]
    async fn table_profiles(&self, schema: &str) -> Result<Vec<TableProfile>, CatalogError> {
        let tables = self
            .retry
            .run("table_profiles", || self.load_tables(schema))
            .await?;
        Ok(tables
            .into_iter()
            .map(|(table, (columns, rls_enabled))| {
                profile_from_columns(table, &columns, rls_enabled)
            })
            .collect())
    }

    #[instrument(skip(self), fields(table = %table), err)]
    async fn policies(&self, table: &TableRef) -> Result<Vec<InstalledPolicy>, CatalogError> {
        let rows = self
            .retry
            .run("policies", || async {
                sqlx::query(
                    r#"
                    SELECT
                        policyname,
                        permissive,
                        roles::text[] AS roles,
                        cmd,
                        qual,
                        with_check
                    FROM pg_policies
                    WHERE schemaname = $1 AND tablename = $2
                    ORDER BY policyname
                    "#,
                )
                .bind(table.schema())
                .bind(table.name())
                .fetch_all(&*self.pool)
                .await
                .map_err(map_sqlx_error)
            })
            .await?;

        let mut policies = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("policyname").map_err(decode_err)?;
            let permissive: String = row.try_get("permissive").map_err(decode_err)?;
            let roles: Vec<String> = row.try_get("roles").map_err(decode_err)?;
            let cmd: String = row.try_get("cmd").map_err(decode_err)?;
            let qual: Option<String> = row.try_get("qual").map_err(decode_err)?;
            let with_check: Option<String> = row.try_get("with_check").map_err(decode_err)?;

            policies.push(InstalledPolicy {
                name: PolicyName::from_catalog(name),
                table: table.clone(),
                command: parse_policy_command(&cmd)?,
                roles,
                permissive: permissive.eq_ignore_ascii_case("PERMISSIVE"),
                using_clause: qual,
                check_clause: with_check,
            });
        }
        Ok(policies)
    }

    #[instrument(skip(self), fields(table = %table), err)]
    async fn indexed_columns(
        &self,
        table: &TableRef,
    ) -> Result<BTreeSet<ColumnName>, CatalogError> {
        let rows = self
            .retry
            .run("indexed_columns", || async {
                sqlx::query(
                    r#"
                    SELECT a.attname AS column_name
                    FROM pg_index i
                    JOIN pg_class t ON t.oid = i.indrelid
                    JOIN pg_namespace n ON n.oid = t.relnamespace
                    JOIN pg_attribute a
                        ON a.attrelid = t.oid AND a.attnum = i.indkey[0]
                    WHERE n.nspname = $1 AND t.relname = $2
                    "#,
                )
                .bind(table.schema())
                .bind(table.name())
                .fetch_all(&*self.pool)
                .await
                .map_err(map_sqlx_error)
            })
            .await?;

        let mut columns = BTreeSet::new();
        for row in rows {
            let name: String = row.try_get("column_name").map_err(decode_err)?;
            let column =
                ColumnName::new(&name).map_err(|e| CatalogError::Decode(e.to_string()))?;
            columns.insert(column);
        }
        Ok(columns)
    }
}

/// `pg_policies.cmd` values are the uppercase command words, `ALL` included.
pub fn parse_policy_command(cmd: &str) -> Result<Command, CatalogError> {
    match cmd {
        "SELECT" => Ok(Command::Select),
        "INSERT" => Ok(Command::Insert),
        "UPDATE" => Ok(Command::Update),
        "DELETE" => Ok(Command::Delete),
        "ALL" => Ok(Command::All),
        other => Err(CatalogError::Decode(format!(
            "unrecognized policy command '{other}'"
        ))),
    }
}

/// Map SQLx errors to CatalogError, classifying transient failures.
fn map_sqlx_error(err: sqlx::Error) -> CatalogError {
    match err {
        sqlx::Error::Io(e) => CatalogError::Connection(e.to_string()),
        sqlx::Error::PoolTimedOut => CatalogError::Connection("pool timed out".to_string()),
        sqlx::Error::PoolClosed => CatalogError::Connection("pool closed".to_string()),
        sqlx::Error::Tls(e) => CatalogError::Connection(e.to_string()),
        sqlx::Error::Database(db_err) => CatalogError::Query(db_err.message().to_string()),
        sqlx::Error::RowNotFound => CatalogError::Query("unexpected empty result".to_string()),
        sqlx::Error::ColumnDecode { index, source } => {
            CatalogError::Decode(format!("column {index}: {source}"))
        }
        other => CatalogError::Query(other.to_string()),
    }
}

fn decode_err(err: sqlx::Error) -> CatalogError {
    CatalogError::Decode(err.to_string())
}
