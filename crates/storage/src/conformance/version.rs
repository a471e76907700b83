use std::future::Future;

use scorebook_model::PitchKind;

use super::{make_game, make_pitch, TestResult};
use crate::{GameStore, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "version",
            "save_with_correct_version_increments",
            save_with_correct_version_increments(factory).await,
        ),
        TestResult::from_result(
            "version",
            "versions_increment_sequentially",
            versions_increment_sequentially(factory).await,
        ),
        TestResult::from_result(
            "version",
            "stale_version_returns_conflict",
            stale_version_returns_conflict(factory).await,
        ),
        TestResult::from_result(
            "version",
            "conflict_writes_nothing",
            conflict_writes_nothing(factory).await,
        ),
        TestResult::from_result(
            "version",
            "save_missing_returns_not_found",
            save_missing_returns_not_found(factory).await,
        ),
    ]
}

async fn save_with_correct_version_increments<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut game = make_game();
    store
        .create_game(game.clone(), 0)
        .await
        .map_err(|e| format!("create: {e}"))?;

    game.append(make_pitch(PitchKind::Ball))
        .map_err(|e| e.to_string())?;
    let version = store
        .save_game(&game, 0, 0)
        .await
        .map_err(|e| format!("save: {e}"))?;
    if version != 1 {
        return Err(format!("expected version 1, got {version}"));
    }
    let loaded = store
        .load_game(&game.id)
        .await
        .map_err(|e| format!("load: {e}"))?;
    if loaded.version != 1 || loaded.game.actions.len() != 1 {
        return Err(format!(
            "expected version 1 with 1 action, got version {} with {}",
            loaded.version,
            loaded.game.actions.len()
        ));
    }
    Ok(())
}

async fn versions_increment_sequentially<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut game = make_game();
    store
        .create_game(game.clone(), 0)
        .await
        .map_err(|e| format!("create: {e}"))?;

    for expected in 0..5u64 {
        game.append(make_pitch(PitchKind::Foul))
            .map_err(|e| e.to_string())?;
        let v = store
            .save_game(&game, game.actions.len(), expected)
            .await
            .map_err(|e| format!("save at {expected}: {e}"))?;
        if v != expected + 1 {
            return Err(format!("expected version {}, got {v}", expected + 1));
        }
    }
    Ok(())
}

async fn stale_version_returns_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let game = make_game();
    store
        .create_game(game.clone(), 0)
        .await
        .map_err(|e| format!("create: {e}"))?;
    store
        .save_game(&game, 0, 0)
        .await
        .map_err(|e| format!("first save: {e}"))?;

    match store.save_game(&game, 0, 0).await {
        Err(StorageError::ConcurrentConflict {
            game_id,
            expected_version: 0,
            actual_version: 1,
        }) if game_id == game.id => Ok(()),
        Err(e) => Err(format!("expected ConcurrentConflict(0 vs 1), got {e}")),
        Ok(v) => Err(format!("stale save succeeded with version {v}")),
    }
}

async fn conflict_writes_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut game = make_game();
    store
        .create_game(game.clone(), 0)
        .await
        .map_err(|e| format!("create: {e}"))?;

    game.append(make_pitch(PitchKind::Strike))
        .map_err(|e| e.to_string())?;
    if store.save_game(&game, 1, 7).await.is_ok() {
        return Err("save with wrong version succeeded".to_string());
    }
    let loaded = store
        .load_game(&game.id)
        .await
        .map_err(|e| format!("load: {e}"))?;
    if !loaded.game.actions.is_empty() || loaded.version != 0 {
        return Err("conflicting save modified the stored game".to_string());
    }
    Ok(())
}

async fn save_missing_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    match store.save_game(&make_game(), 0, 0).await {
        Err(StorageError::GameNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected GameNotFound, got {e}")),
        Ok(_) => Err("save of missing game succeeded".to_string()),
    }
}
