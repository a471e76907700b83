use std::future::Future;

use scorebook_model::{ActionKind, PitchKind};

use super::{make_game, make_pitch, TestResult};
use crate::{GameStore, StorageError};

pub(super) async fn run_game_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "games",
            "create_starts_at_version_0",
            create_starts_at_version_0(factory).await,
        ),
        TestResult::from_result(
            "games",
            "created_game_readable_with_full_log",
            created_game_readable_with_full_log(factory).await,
        ),
        TestResult::from_result(
            "games",
            "double_create_returns_already_exists",
            double_create_returns_already_exists(factory).await,
        ),
        TestResult::from_result(
            "games",
            "load_missing_returns_not_found",
            load_missing_returns_not_found(factory).await,
        ),
        TestResult::from_result(
            "games",
            "delete_removes_game",
            delete_removes_game(factory).await,
        ),
        TestResult::from_result(
            "games",
            "delete_missing_returns_not_found",
            delete_missing_returns_not_found(factory).await,
        ),
        TestResult::from_result(
            "games",
            "put_creates_then_replaces",
            put_creates_then_replaces(factory).await,
        ),
        TestResult::from_result(
            "games",
            "list_returns_every_game_by_id",
            list_returns_every_game_by_id(factory).await,
        ),
    ]
}

async fn create_starts_at_version_0<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let record = store
        .create_game(make_game(), 0)
        .await
        .map_err(|e| format!("create: {e}"))?;
    if record.version != 0 {
        return Err(format!("expected version 0, got {}", record.version));
    }
    let loaded = store
        .load_game(&record.game.id)
        .await
        .map_err(|e| format!("load: {e}"))?;
    if loaded.version != 0 {
        return Err(format!("loaded version {}, expected 0", loaded.version));
    }
    Ok(())
}

async fn created_game_readable_with_full_log<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut game = make_game();
    game.append(make_pitch(PitchKind::Ball))
        .map_err(|e| e.to_string())?;
    game.append(make_pitch(PitchKind::Strike))
        .map_err(|e| e.to_string())?;
    game.revision = 2;

    store
        .create_game(game.clone(), 2)
        .await
        .map_err(|e| format!("create: {e}"))?;
    let loaded = store
        .load_game(&game.id)
        .await
        .map_err(|e| format!("load: {e}"))?;

    if loaded.game != game {
        return Err("loaded game differs from created game".to_string());
    }
    if loaded.confirmed != 2 {
        return Err(format!("expected confirmed 2, got {}", loaded.confirmed));
    }
    match &loaded.game.actions[1].kind {
        ActionKind::Pitch(p) if p.pitch == PitchKind::Strike => Ok(()),
        other => Err(format!("log order not preserved: {other:?}")),
    }
}

async fn double_create_returns_already_exists<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .map_err(|e| format!("first create: {e}"))?;
    match store.create_game(game.clone(), 0).await {
        Err(StorageError::AlreadyExists { game_id }) if game_id == game.id => Ok(()),
        Err(e) => Err(format!("expected AlreadyExists, got {e}")),
        Ok(_) => Err("second create succeeded".to_string()),
    }
}

async fn load_missing_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let id = make_game().id;
    match store.load_game(&id).await {
        Err(StorageError::GameNotFound { game_id }) if game_id == id => Ok(()),
        Err(e) => Err(format!("expected GameNotFound, got {e}")),
        Ok(_) => Err("load of missing game succeeded".to_string()),
    }
}

async fn delete_removes_game<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .delete_game(&game.id)
        .await
        .map_err(|e| format!("delete: {e}"))?;
    match store.load_game(&game.id).await {
        Err(StorageError::GameNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected GameNotFound after delete, got {e}")),
        Ok(_) => Err("game still readable after delete".to_string()),
    }
}

async fn delete_missing_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    match store.delete_game(&make_game().id).await {
        Err(StorageError::GameNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected GameNotFound, got {e}")),
        Ok(()) => Err("delete of missing game succeeded".to_string()),
    }
}

async fn put_creates_then_replaces<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut game = make_game();
    let first = store
        .put_game(game.clone(), 0)
        .await
        .map_err(|e| format!("first put: {e}"))?;
    if first.version != 0 {
        return Err(format!("fresh put should be version 0, got {}", first.version));
    }

    game.append(make_pitch(PitchKind::Foul))
        .map_err(|e| e.to_string())?;
    let second = store
        .put_game(game.clone(), 1)
        .await
        .map_err(|e| format!("second put: {e}"))?;
    if second.version != 1 {
        return Err(format!("replacing put should bump to 1, got {}", second.version));
    }
    let loaded = store
        .load_game(&game.id)
        .await
        .map_err(|e| format!("load: {e}"))?;
    if loaded.game.actions.len() != 1 {
        return Err(format!(
            "expected 1 action after replace, got {}",
            loaded.game.actions.len()
        ));
    }
    Ok(())
}

async fn list_returns_every_game_by_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        let game = make_game();
        ids.push(game.id);
        store
            .create_game(game, 0)
            .await
            .map_err(|e| format!("create: {e}"))?;
    }
    ids.sort();

    let listed: Vec<_> = store
        .list_games()
        .await
        .map_err(|e| format!("list: {e}"))?
        .into_iter()
        .map(|r| r.game.id)
        .collect();
    if listed != ids {
        return Err(format!("expected {ids:?}, got {listed:?}"));
    }
    Ok(())
}
