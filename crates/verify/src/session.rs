//! Scoped principal sessions.
//!
//! A scenario runs inside a transaction that impersonates the principal via
//! `SET LOCAL ROLE` and `set_config('request.jwt.claims', ..., true)`. The
//! transaction is rolled back unconditionally, which both discards any write
//! the scenario performed and restores the prior session context on every
//! exit path.

use serde_json::json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use rowguard_core::{ColumnName, Command, Principal, TableRef};
use uuid::Uuid;

use crate::scenario::Observation;

/// Postgres raises `42501 insufficient_privilege` for blocked writes and
/// `44000`-class errors for `WITH CHECK` violations; both mean "the policy
/// said no".
const DENIED_SQLSTATES: [&str; 2] = ["42501", "44000"];

/// A single-use impersonated session over a pooled connection.
pub struct ScopedSession<'a> {
    tx: Transaction<'a, Postgres>,
}

impl<'a> ScopedSession<'a> {
    /// Open a session acting as `principal`.
    ///
    /// The connection is checked out from the pool for the lifetime of the
    /// session and returned when it ends.
    #[instrument(skip(pool, principal), fields(role = %principal.role_class), err)]
    pub async fn open(pool: &'a PgPool, principal: &Principal) -> Result<ScopedSession<'a>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let claims = if principal.is_anonymous() {
            json!({ "role": principal.role_class.role_name() })
        } else {
            json!({
                "sub": principal.id.to_string(),
                "role": principal.role_class.role_name(),
            })
        };
        sqlx::query("SELECT set_config('request.jwt.claims', $1, true)")
            .bind(claims.to_string())
            .execute(&mut *tx)
            .await?;

        // Role names come from the fixed RoleClass set, not user input.
        sqlx::query(&format!("SET LOCAL ROLE {}", principal.role_class.role_name()))
            .execute(&mut *tx)
            .await?;

        Ok(ScopedSession { tx })
    }

    /// Execute one command against a target row, observing the policy's
    /// verdict. Writes are discarded by the rollback in [`Self::close`].
    pub async fn observe(
        &mut self,
        command: Command,
        table: &TableRef,
        scope_column: &ColumnName,
        row_id: Uuid,
        owner_value: Uuid,
    ) -> Observation {
        let result = match command {
            Command::Select => self.observe_select(table, row_id).await,
            Command::Insert => self.observe_insert(table, scope_column, owner_value).await,
            Command::Update => self.observe_update(table, scope_column, row_id).await,
            Command::Delete => self.observe_delete(table, row_id).await,
            Command::All => unreachable!("scenarios are built from concrete commands"),
        };
        match result {
            Ok(observation) => observation,
            Err(err) => classify_error(err),
        }
    }

    async fn observe_select(
        &mut self,
        table: &TableRef,
        row_id: Uuid,
    ) -> Result<Observation, sqlx::Error> {
        let sql = format!("SELECT count(*) AS n FROM {} WHERE \"id\" = $1", table.quoted());
        let row = sqlx::query(&sql).bind(row_id).fetch_one(&mut *self.tx).await?;
        let n: i64 = row.try_get("n")?;
        Ok(rows_to_observation(n as u64))
    }

    async fn observe_insert(
        &mut self,
        table: &TableRef,
        scope_column: &ColumnName,
        owner_value: Uuid,
    ) -> Result<Observation, sqlx::Error> {
        let sql = format!(
            "INSERT INTO {} (\"id\", {}) VALUES ($1, $2)",
            table.quoted(),
            scope_column.quoted(),
        );
        let result = sqlx::query(&sql)
            .bind(Uuid::now_v7())
            .bind(owner_value)
            .execute(&mut *self.tx)
            .await?;
        Ok(rows_to_observation(result.rows_affected()))
    }

    async fn observe_update(
        &mut self,
        table: &TableRef,
        scope_column: &ColumnName,
        row_id: Uuid,
    ) -> Result<Observation, sqlx::Error> {
        // Identity update: verdict without changing data (and rolled back anyway).
        let sql = format!(
            "UPDATE {} SET {col} = {col} WHERE \"id\" = $1",
            table.quoted(),
            col = scope_column.quoted(),
        );
        let result = sqlx::query(&sql).bind(row_id).execute(&mut *self.tx).await?;
        Ok(rows_to_observation(result.rows_affected()))
    }

    async fn observe_delete(
        &mut self,
        table: &TableRef,
        row_id: Uuid,
    ) -> Result<Observation, sqlx::Error> {
        let sql = format!("DELETE FROM {} WHERE \"id\" = $1", table.quoted());
        let result = sqlx::query(&sql).bind(row_id).execute(&mut *self.tx).await?;
        Ok(rows_to_observation(result.rows_affected()))
    }

    /// End the session. Always rolls back: fixture data stays untouched and
    /// the connection's prior identity is restored before it re-enters the
    /// pool.
    pub async fn close(self) -> Result<(), sqlx::Error> {
        self.tx.rollback().await
    }
}

fn rows_to_observation(rows: u64) -> Observation {
    if rows > 0 {
        Observation::Allowed { rows }
    } else {
        Observation::Denied
    }
}

/// A policy rejection is a denial; anything else proves nothing about the
/// policy and must not be reported as one.
fn classify_error(err: sqlx::Error) -> Observation {
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(code) = db_err.code() {
            if DENIED_SQLSTATES.iter().any(|s| code.as_ref().starts_with(s)) {
                return Observation::Denied;
            }
        }
    }
    Observation::Inconclusive {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_counts_map_to_verdicts() {
        assert_eq!(rows_to_observation(0), Observation::Denied);
        assert_eq!(rows_to_observation(3), Observation::Allowed { rows: 3 });
    }
}
