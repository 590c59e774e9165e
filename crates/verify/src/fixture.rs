//! Ephemeral fixtures for scenario batches.
//!
//! Fixture rows are inserted through the framework's own (elevated) pool
//! connection before a table's batch and deleted after it, on every exit
//! path. Cleanup failure is reported as [`VerifyError::FixtureCleanup`] so
//! the caller can log it without it ever masking scenario outcomes.

use sqlx::PgPool;
use tracing::{instrument, warn};
use uuid::Uuid;

use rowguard_core::{ColumnName, TableRef};

use crate::model::IsolationModel;
use crate::runner::VerifyError;
use crate::scenario::PrincipalSlot;

/// One synthetic row: its primary key and the scope value it carries
/// (principal id under owner scoping, org id under tenant scoping).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FixtureRow {
    pub id: Uuid,
    pub scope_value: Uuid,
}

/// Fixture state for one table's batch: a row "owned" by principal A and a
/// row owned by principal B, plus membership rows under tenant scoping.
#[derive(Debug)]
pub struct FixtureGuard {
    pool: PgPool,
    table: TableRef,
    scope_column: ColumnName,
    membership: Option<MembershipFixture>,
    pub row_a: FixtureRow,
    pub row_b: FixtureRow,
}

#[derive(Debug)]
struct MembershipFixture {
    relation: TableRef,
    inserted: Vec<Uuid>,
}

impl FixtureGuard {
    /// Insert fixture rows for a scenario batch.
    ///
    /// `scope_a`/`scope_b` are the scope values of the two user slots:
    /// principal ids under owner scoping, org ids under tenant scoping. Under
    /// tenant scoping, membership rows linking each principal to their org
    /// are inserted as well.
    #[instrument(skip(pool, model), fields(table = %table), err)]
    pub async fn create(
        pool: &PgPool,
        table: &TableRef,
        model: &IsolationModel,
        scope_a: Uuid,
        scope_b: Uuid,
        members: Option<[(Uuid, Uuid); 2]>,
    ) -> Result<Self, VerifyError> {
        let scope_column = model.scope_column();
        let row_a = FixtureRow { id: Uuid::now_v7(), scope_value: scope_a };
        let row_b = FixtureRow { id: Uuid::now_v7(), scope_value: scope_b };

        let mut guard = Self {
            pool: pool.clone(),
            table: table.clone(),
            scope_column: scope_column.clone(),
            membership: None,
            row_a,
            row_b,
        };

        if let (IsolationModel::Tenant { membership_relation, .. }, Some(pairs)) = (model, members)
        {
            let mut inserted = Vec::with_capacity(pairs.len());
            for (org_id, user_id) in pairs {
                match insert_membership(pool, membership_relation, org_id, user_id).await {
                    Ok(id) => inserted.push(id),
                    Err(e) => {
                        // Record what made it in so the sweep covers it.
                        guard.membership = Some(MembershipFixture {
                            relation: membership_relation.clone(),
                            inserted,
                        });
                        if let Err(cleanup) = guard.teardown().await {
                            warn!(
                                error = %cleanup,
                                "cleanup after failed fixture setup also failed"
                            );
                        }
                        return Err(fixture_setup(table, e));
                    }
                }
            }
            guard.membership = Some(MembershipFixture {
                relation: membership_relation.clone(),
                inserted,
            });
        }

        for row in [row_a, row_b] {
            if let Err(e) = insert_row(pool, table, scope_column, row).await {
                // Partial setup: sweep whatever made it in before reporting.
                if let Err(cleanup) = guard.teardown().await {
                    warn!(error = %cleanup, "cleanup after failed fixture setup also failed");
                }
                return Err(fixture_setup(table, e));
            }
        }

        Ok(guard)
    }

    /// The scoping column fixture rows were planted under.
    pub fn scope_column(&self) -> &ColumnName {
        &self.scope_column
    }

    /// The row a slot operates on for "own" scenarios.
    pub fn own_row(&self, slot: PrincipalSlot) -> Option<FixtureRow> {
        match slot {
            PrincipalSlot::UserA => Some(self.row_a),
            PrincipalSlot::UserB => Some(self.row_b),
            PrincipalSlot::Anonymous | PrincipalSlot::Elevated => None,
        }
    }

    /// The row a slot operates on for "foreign" scenarios.
    pub fn foreign_row(&self, slot: PrincipalSlot) -> FixtureRow {
        match slot {
            // B's foreign row is A's; everyone else targets A's row too.
            PrincipalSlot::UserA => self.row_b,
            _ => self.row_a,
        }
    }

    /// Delete everything this guard inserted.
    ///
    /// Called on every exit path of a batch. Errors never mask scenario
    /// results; the caller logs them as warnings.
    #[instrument(skip(self), fields(table = %self.table), err)]
    pub async fn teardown(self) -> Result<(), VerifyError> {
        let mut failures: Vec<String> = Vec::new();

        let sql = format!("DELETE FROM {} WHERE \"id\" = ANY($1)", self.table.quoted());
        let ids = vec![self.row_a.id, self.row_b.id];
        if let Err(e) = sqlx::query(&sql).bind(&ids).execute(&self.pool).await {
            failures.push(format!("rows on {}: {e}", self.table));
        }

        if let Some(membership) = &self.membership {
            let sql = format!(
                "DELETE FROM {} WHERE \"id\" = ANY($1)",
                membership.relation.quoted()
            );
            if let Err(e) = sqlx::query(&sql)
                .bind(&membership.inserted)
                .execute(&self.pool)
                .await
            {
                failures.push(format!("memberships on {}: {e}", membership.relation));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(VerifyError::FixtureCleanup {
                table: self.table.clone(),
                message: failures.join("; "),
            })
        }
    }
}

async fn insert_row(
    pool: &PgPool,
    table: &TableRef,
    scope_column: &ColumnName,
    row: FixtureRow,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        "INSERT INTO {} (\"id\", {}) VALUES ($1, $2)",
        table.quoted(),
        scope_column.quoted(),
    );
    sqlx::query(&sql)
        .bind(row.id)
        .bind(row.scope_value)
        .execute(pool)
        .await?;
    Ok(())
}

/// Insert one `(org_id, user_id)` membership row, returning its id for
/// teardown.
async fn insert_membership(
    pool: &PgPool,
    relation: &TableRef,
    org_id: Uuid,
    user_id: Uuid,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::now_v7();
    let sql = format!(
        "INSERT INTO {} (\"id\", \"org_id\", \"user_id\") VALUES ($1, $2, $3)",
        relation.quoted(),
    );
    sqlx::query(&sql)
        .bind(id)
        .bind(org_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(id)
}

fn fixture_setup(table: &TableRef, err: sqlx::Error) -> VerifyError {
    VerifyError::FixtureSetup {
        table: table.clone(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sqlx::postgres::PgPoolOptions;

    use super::*;

    #[tokio::test]
    async fn setup_failure_surfaces_as_fixture_setup() {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(100))
            .connect_lazy("postgres://rowguard@127.0.0.1:9/unreachable")
            .unwrap();
        let table = TableRef::parse("public.documents").unwrap();
        let model = IsolationModel::Tenant {
            column: ColumnName::new("org_id").unwrap(),
            membership_relation: TableRef::parse("public.org_members").unwrap(),
        };
        let org_a = Uuid::now_v7();
        let org_b = Uuid::now_v7();
        let members = [(org_a, Uuid::now_v7()), (org_b, Uuid::now_v7())];

        // The first membership insert fails; the error must come back as
        // FixtureSetup after the guard has swept its bookkeeping, not as a
        // panic or a bare sqlx error.
        let err = FixtureGuard::create(&pool, &table, &model, org_a, org_b, Some(members))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::FixtureSetup { .. }));
    }
}
