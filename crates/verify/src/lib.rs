//! `rowguard-verify` — the isolation test runner.
//!
//! Exercises installed policies under simulated principals: builds the
//! {principal} × {command} × {own-row, foreign-row} scenario matrix, runs each
//! cell inside a scoped (always rolled back) session, and classifies the
//! observed outcome against the expectation implied by the table's isolation
//! model.

pub mod fixture;
pub mod model;
pub mod runner;
pub mod scenario;
pub mod session;

pub use fixture::{FixtureGuard, FixtureRow};
pub use model::IsolationModel;
pub use runner::{IdentitySeed, IsolationRunner, VerifyError};
pub use scenario::{
    Expectation, Observation, PrincipalSlot, RowOwnership, ScenarioStatus, TestResult,
    TestScenario, build_matrix, classify,
};
pub use session::ScopedSession;
