use std::future::Future;
use std::sync::Arc;

use scorebook_model::PitchKind;

use super::{make_game, make_pitch, TestResult};
use crate::{GameStore, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_saves_exactly_one_wins",
        concurrent_saves_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_create_exactly_one_wins",
        concurrent_create_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_saves_different_games_all_succeed",
        concurrent_saves_different_games_all_succeed(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "parallel_writers_on_two_games_keep_separate_histories",
        parallel_writers_on_two_games_keep_separate_histories(factory).await,
    ));

    results
}

// ── Concurrent save: exactly one wins ───────────────────────────────────────

/// N tasks each append a different action and save from version 0. Exactly
/// one save lands; the rest get ConcurrentConflict, and the stored log holds
/// only the winner's action.
async fn concurrent_saves_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let game = make_game();
    storage
        .create_game(game.clone(), 0)
        .await
        .map_err(|e| format!("create: {e}"))?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        let mut mine = game.clone();
        handles.push(tokio::spawn(async move {
            mine.append(make_pitch(PitchKind::Ball))
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            match s.save_game(&mine, 0, 0).await {
                Ok(_) => Ok(true),
                Err(StorageError::ConcurrentConflict { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }

    let record = storage
        .load_game(&game.id)
        .await
        .map_err(|e| format!("load: {e}"))?;
    if record.version != 1 || record.game.actions.len() != 1 {
        return Err(format!(
            "expected version 1 with one action, got version {} with {}",
            record.version,
            record.game.actions.len()
        ));
    }
    Ok(())
}

// ── Concurrent create: exactly one wins ─────────────────────────────────────

async fn concurrent_create_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let game = make_game();

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        let g = game.clone();
        handles.push(tokio::spawn(async move {
            match s.create_game(g, 0).await {
                Ok(_) => Ok(true),
                Err(StorageError::AlreadyExists { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    Ok(())
}

// ── Different games: no false conflicts ─────────────────────────────────────

async fn concurrent_saves_different_games_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let mut games = Vec::new();
    for _ in 0..N {
        let game = make_game();
        storage
            .create_game(game.clone(), 0)
            .await
            .map_err(|e| format!("create: {e}"))?;
        games.push(game);
    }

    let mut handles = Vec::new();
    for mut game in games.clone() {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            game.append(make_pitch(PitchKind::Strike))
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            s.save_game(&game, 1, 0).await
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        handle
            .await
            .map_err(|e| format!("task {i} panic: {e}"))?
            .map_err(|e| format!("task {i} failed: {e}"))?;
    }

    for game in &games {
        let record = storage
            .load_game(&game.id)
            .await
            .map_err(|e| format!("load {}: {e}", game.id))?;
        if record.version != 1 {
            return Err(format!(
                "{}: expected version 1, got {}",
                game.id, record.version
            ));
        }
    }
    Ok(())
}

// ── Two games, two writers ──────────────────────────────────────────────────

/// Two tasks each save a run of appends to their own game at the same time.
/// Every save lands, and each game's version counts only its own writes.
async fn parallel_writers_on_two_games_keep_separate_histories<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: GameStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    const SAVES: usize = 20;

    let storage = Arc::new(factory().await);
    let (first, second) = (make_game(), make_game());
    for game in [&first, &second] {
        storage
            .create_game(game.clone(), 0)
            .await
            .map_err(|e| format!("create: {e}"))?;
    }

    let writer = |mut game: scorebook_model::Game, kind: PitchKind| {
        let s = storage.clone();
        tokio::spawn(async move {
            let mut version = 0;
            for _ in 0..SAVES {
                game.append(make_pitch(kind))
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                version = s.save_game(&game, game.actions.len(), version).await?;
                tokio::task::yield_now().await;
            }
            Ok::<_, StorageError>(version)
        })
    };
    let a = writer(first.clone(), PitchKind::Ball);
    let b = writer(second.clone(), PitchKind::Strike);

    for (name, handle) in [("first", a), ("second", b)] {
        let version = handle
            .await
            .map_err(|e| format!("{name} writer panic: {e}"))?
            .map_err(|e| format!("{name} writer failed: {e}"))?;
        if version != SAVES as u64 {
            return Err(format!("{name}: expected version {SAVES}, got {version}"));
        }
    }

    for (game, kind) in [(&first, PitchKind::Ball), (&second, PitchKind::Strike)] {
        let record = storage
            .load_game(&game.id)
            .await
            .map_err(|e| format!("load {}: {e}", game.id))?;
        let own = record
            .game
            .actions
            .iter()
            .all(|a| matches!(&a.kind, scorebook_model::ActionKind::Pitch(p) if p.pitch == kind));
        if record.game.actions.len() != SAVES || !own {
            return Err(format!(
                "{}: expected {SAVES} of its own pitches, got {} actions",
                game.id,
                record.game.actions.len()
            ));
        }
    }
    Ok(())
}
