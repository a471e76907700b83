//! Conformance test suite for `GameStore` implementations.
//!
//! A backend-agnostic suite that any `GameStore` can run to verify
//! correctness. It covers:
//!
//! - **Games**: create, load, replace, delete, listing, duplicate detection
//! - **Version validation / OCC**: conflict detection and version accounting
//! - **Teams**: create-or-replace and lookup
//! - **Concurrency**: racing writers against one game, parallel writers on two
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty store for each test:
//!
//! ```ignore
//! use scorebook_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn my_store_conformance() {
//!     let report = run_conformance_suite(|| async { MyStore::new() }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod concurrent;
mod games;
mod teams;
mod version;

use std::fmt;
use std::future::Future;

use scorebook_model::{
    Action, ActionKind, ActiveContext, Game, Lineup, PitchKind, PitchPayload, Player, Rules,
    Team, TeamRecord,
};
use uuid::Uuid;

use crate::GameStore;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "games", "version").
    pub category: String,
    /// Test name (e.g. "create_starts_at_version_0").
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a store.
///
/// The `factory` function is called once per test to create a fresh, empty
/// store, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(games::run_game_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(teams::run_team_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: fixtures with sensible defaults ─────────────────────────────────

fn make_game() -> Game {
    Game::new(
        Uuid::new_v4(),
        Lineup::new("Owls", &["Ada", "Bea", "Cal"]),
        Lineup::new("Hawks", &["Cy", "Di", "Ed"]),
        Rules::default(),
    )
}

fn make_pitch(kind: PitchKind) -> Action {
    Action::new(ActionKind::Pitch(PitchPayload {
        ctx: ActiveContext::new(1, Team::Away, 0, 1),
        pitch: kind,
    }))
}

fn make_team(name: &str) -> TeamRecord {
    TeamRecord {
        id: Uuid::new_v4(),
        name: name.to_string(),
        players: vec![Player::named("Ada"), Player::named("Bea")],
    }
}
