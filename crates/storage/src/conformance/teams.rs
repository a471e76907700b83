use std::future::Future;

use super::{make_team, TestResult};
use crate::{GameStore, StorageError};

pub(super) async fn run_team_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "teams",
            "saved_team_is_readable",
            saved_team_is_readable(factory).await,
        ),
        TestResult::from_result(
            "teams",
            "save_team_replaces_existing",
            save_team_replaces_existing(factory).await,
        ),
        TestResult::from_result(
            "teams",
            "load_missing_team_returns_not_found",
            load_missing_team_returns_not_found(factory).await,
        ),
    ]
}

async fn saved_team_is_readable<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let team = make_team("Owls");
    store
        .save_team(team.clone())
        .await
        .map_err(|e| format!("save: {e}"))?;
    let loaded = store
        .load_team(&team.id)
        .await
        .map_err(|e| format!("load: {e}"))?;
    if loaded != team {
        return Err("loaded team differs".to_string());
    }
    let all = store.list_teams().await.map_err(|e| format!("list: {e}"))?;
    if all.len() != 1 {
        return Err(format!("expected 1 team, got {}", all.len()));
    }
    Ok(())
}

async fn save_team_replaces_existing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut team = make_team("Owls");
    store
        .save_team(team.clone())
        .await
        .map_err(|e| format!("save: {e}"))?;
    team.name = "Night Owls".to_string();
    store
        .save_team(team.clone())
        .await
        .map_err(|e| format!("resave: {e}"))?;

    let all = store.list_teams().await.map_err(|e| format!("list: {e}"))?;
    match all.as_slice() {
        [only] if only.name == "Night Owls" => Ok(()),
        other => Err(format!("expected one renamed team, got {other:?}")),
    }
}

async fn load_missing_team_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let id = make_team("Ghosts").id;
    match store.load_team(&id).await {
        Err(StorageError::TeamNotFound { team_id }) if team_id == id => Ok(()),
        Err(e) => Err(format!("expected TeamNotFound, got {e}")),
        Ok(_) => Err("load of missing team succeeded".to_string()),
    }
}
