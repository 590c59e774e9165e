//! Batch execution of scenario matrices.

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use rowguard_core::{OrgId, Principal, PrincipalId, TableProfile, TableRef};

use crate::fixture::FixtureGuard;
use crate::model::IsolationModel;
use crate::scenario::{
    Observation, PrincipalSlot, RowOwnership, TestResult, TestScenario, build_matrix, classify,
};
use crate::session::ScopedSession;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("table {0} declares no isolation model (no ownership or tenancy column)")]
    NoIsolationModel(TableRef),
    #[error("fixture setup failed on {table}: {message}")]
    FixtureSetup { table: TableRef, message: String },
    #[error("fixture cleanup failed on {table}: {message}")]
    FixtureCleanup { table: TableRef, message: String },
}

/// Runs one table's scenario batch end to end: fixtures in, every cell
/// executed in its own scoped session, fixtures out on every exit path.
///
/// Batches for a single table run strictly sequentially; callers are free to
/// run different tables' batches concurrently.
pub struct IsolationRunner {
    pool: Arc<PgPool>,
}

/// Optional fixed identities, for reproducible batches. Anything left unset
/// is generated fresh per batch.
#[derive(Debug, Default, Clone)]
pub struct IdentitySeed {
    pub principal_a: Option<PrincipalId>,
    pub org_a: Option<OrgId>,
}

/// The concrete identities filling the matrix's principal slots for one
/// batch, plus the scope values their fixture rows must carry.
struct Identities {
    user_a: Principal,
    user_b: Principal,
    elevated: Principal,
    scope_a: Uuid,
    scope_b: Uuid,
    members: Option<[(Uuid, Uuid); 2]>,
}

impl Identities {
    /// Fresh identities for a batch. Under owner scoping the fixture rows
    /// carry the principals' own ids; under tenant scoping they carry two
    /// distinct org ids and each principal is a member of exactly one.
    fn generate(model: &IsolationModel, seed: &IdentitySeed) -> Self {
        let a = seed.principal_a.unwrap_or_else(PrincipalId::new);
        let b = PrincipalId::new();
        match model {
            IsolationModel::Owner { .. } => Identities {
                user_a: Principal::user(a),
                user_b: Principal::user(b),
                elevated: Principal::service(PrincipalId::new()),
                scope_a: *a.as_uuid(),
                scope_b: *b.as_uuid(),
                members: None,
            },
            IsolationModel::Tenant { .. } => {
                let org_a = seed.org_a.unwrap_or_else(OrgId::new);
                let org_b = OrgId::new();
                Identities {
                    user_a: Principal::member_of(a, [org_a]),
                    user_b: Principal::member_of(b, [org_b]),
                    elevated: Principal::service(PrincipalId::new()),
                    scope_a: *org_a.as_uuid(),
                    scope_b: *org_b.as_uuid(),
                    members: Some([
                        (*org_a.as_uuid(), *a.as_uuid()),
                        (*org_b.as_uuid(), *b.as_uuid()),
                    ]),
                }
            }
        }
    }

    fn principal(&self, slot: PrincipalSlot) -> Principal {
        match slot {
            PrincipalSlot::Anonymous => Principal::anonymous(),
            PrincipalSlot::UserA => self.user_a.clone(),
            PrincipalSlot::UserB => self.user_b.clone(),
            PrincipalSlot::Elevated => self.elevated.clone(),
        }
    }

    /// Scope value an "own"-row write by this slot must carry.
    fn own_scope(&self, slot: PrincipalSlot) -> Option<Uuid> {
        match slot {
            PrincipalSlot::UserA => Some(self.scope_a),
            PrincipalSlot::UserB => Some(self.scope_b),
            PrincipalSlot::Anonymous | PrincipalSlot::Elevated => None,
        }
    }
}

impl IsolationRunner {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Run the full scenario matrix for one table.
    ///
    /// Fixture setup failure does not abort: every cell is reported
    /// inconclusive so the caller still sees the table in the report. Fixture
    /// cleanup failure is logged and never alters scenario results.
    #[instrument(skip(self, profile, seed), fields(table = %profile.table), err)]
    pub async fn run_table(
        &self,
        profile: &TableProfile,
        seed: &IdentitySeed,
    ) -> Result<Vec<TestResult>, VerifyError> {
        let model = IsolationModel::from_profile(profile)
            .ok_or_else(|| VerifyError::NoIsolationModel(profile.table.clone()))?;
        let identities = Identities::generate(&model, seed);
        let scenarios = build_matrix(&profile.table, &model);

        let fixture = match FixtureGuard::create(
            &self.pool,
            &profile.table,
            &model,
            identities.scope_a,
            identities.scope_b,
            identities.members,
        )
        .await
        {
            Ok(fixture) => fixture,
            Err(err) => {
                warn!(table = %profile.table, error = %err, "fixture setup failed; batch inconclusive");
                let reason = err.to_string();
                return Ok(scenarios
                    .into_iter()
                    .map(|s| {
                        classify(s, Observation::Inconclusive { reason: reason.clone() })
                    })
                    .collect());
            }
        };

        let mut results = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            results.push(self.run_scenario(scenario, &identities, &fixture).await);
        }

        if let Err(err) = fixture.teardown().await {
            warn!(table = %profile.table, error = %err, "fixture cleanup failed");
        }

        let failed = results
            .iter()
            .filter(|r| r.status == crate::scenario::ScenarioStatus::Fail)
            .count();
        info!(table = %profile.table, scenarios = results.len(), failed, "batch complete");
        Ok(results)
    }

    async fn run_scenario(
        &self,
        mut scenario: TestScenario,
        identities: &Identities,
        fixture: &FixtureGuard,
    ) -> TestResult {
        let principal = identities.principal(scenario.slot);
        scenario.principal = Some(principal.clone());

        let (row, owner_value) = match scenario.ownership {
            RowOwnership::Own => {
                match (fixture.own_row(scenario.slot), identities.own_scope(scenario.slot)) {
                    (Some(row), Some(scope)) => (row, scope),
                    _ => {
                        // Matrix construction never emits own-row cells for
                        // rowless slots; report rather than panic if it does.
                        return classify(
                            scenario,
                            Observation::Inconclusive {
                                reason: "no own row for this principal slot".to_string(),
                            },
                        );
                    }
                }
            }
            // Foreign writes try to plant rows with someone else's scope value.
            RowOwnership::Foreign => {
                let row = fixture.foreign_row(scenario.slot);
                (row, row.scope_value)
            }
        };

        let mut session = match ScopedSession::open(&self.pool, &principal).await {
            Ok(session) => session,
            Err(err) => {
                return classify(
                    scenario,
                    Observation::Inconclusive {
                        reason: format!("session open failed: {err}"),
                    },
                );
            }
        };

        let observed = session
            .observe(
                scenario.command,
                &scenario.table,
                fixture.scope_column(),
                row.id,
                owner_value,
            )
            .await;

        if let Err(err) = session.close().await {
            warn!(scenario = %scenario.label(), error = %err, "session rollback failed");
        }

        classify(scenario, observed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_core::ColumnName;

    fn col(s: &str) -> ColumnName {
        ColumnName::new(s).unwrap()
    }

    #[test]
    fn owner_identities_scope_by_principal_id() {
        let model = IsolationModel::Owner { column: col("user_id") };
        let ids = Identities::generate(&model, &IdentitySeed::default());
        assert_eq!(ids.scope_a, *ids.user_a.id.as_uuid());
        assert_eq!(ids.scope_b, *ids.user_b.id.as_uuid());
        assert!(ids.members.is_none());
        assert_ne!(ids.scope_a, ids.scope_b);
    }

    #[test]
    fn tenant_identities_scope_by_org_and_record_memberships() {
        let model = IsolationModel::Tenant {
            column: col("org_id"),
            membership_relation: TableRef::parse("org_members").unwrap(),
        };
        let ids = Identities::generate(&model, &IdentitySeed::default());
        let members = ids.members.unwrap();
        assert_eq!(members[0], (ids.scope_a, *ids.user_a.id.as_uuid()));
        assert_eq!(members[1], (ids.scope_b, *ids.user_b.id.as_uuid()));
        assert!(ids.user_a.has_membership(OrgId::from_uuid(ids.scope_a)));
        assert!(!ids.user_a.has_membership(OrgId::from_uuid(ids.scope_b)));
    }

    #[test]
    fn seeded_identities_are_reproducible() {
        let model = IsolationModel::Owner { column: col("user_id") };
        let fixed = PrincipalId::new();
        let seed = IdentitySeed {
            principal_a: Some(fixed),
            org_a: None,
        };
        let ids = Identities::generate(&model, &seed);
        assert_eq!(ids.user_a.id, fixed);
        assert_eq!(ids.scope_a, *fixed.as_uuid());
    }

    #[test]
    fn slot_principals_carry_expected_roles() {
        let model = IsolationModel::Owner { column: col("user_id") };
        let ids = Identities::generate(&model, &IdentitySeed::default());
        assert!(ids.principal(PrincipalSlot::Anonymous).is_anonymous());
        assert_eq!(
            ids.principal(PrincipalSlot::Elevated).role_class,
            rowguard_core::RoleClass::Service
        );
        assert!(ids.own_scope(PrincipalSlot::Anonymous).is_none());
        assert_eq!(ids.own_scope(PrincipalSlot::UserA), Some(ids.scope_a));
    }
}
