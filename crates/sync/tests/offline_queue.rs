//! Offline recording, ordered flush, fast-forward, undo through the
//! session, and remote deletion.

use std::sync::Arc;

use scorebook_model::{
    Action, ActionKind, ActiveContext, Game, Lineup, PitchKind, PitchPayload, PlayOutcome,
    PlayResultPayload, Rules, Team, FIRST,
};
use scorebook_storage::{GameStore, MemoryStore};
use scorebook_sync::{
    InProcessServer, InProcessTransport, SyncError, SyncSession, SyncState, SyncTransport,
};
use uuid::Uuid;

fn new_game() -> Game {
    Game::new(
        Uuid::new_v4(),
        Lineup::new("Owls", &["Ada", "Bea", "Cal"]),
        Lineup::new("Hawks", &["Cy", "Di", "Ed"]),
        Rules::default(),
    )
}

fn pitch(batter: usize, kind: PitchKind) -> Action {
    Action::new(ActionKind::Pitch(PitchPayload {
        ctx: ActiveContext::new(1, Team::Away, batter, 1),
        pitch: kind,
    }))
}

#[tokio::test]
async fn offline_burst_is_flushed_in_order_as_one_batch() {
    let server = InProcessServer::new();
    let transport = InProcessTransport::new(server.clone());
    let store = Arc::new(MemoryStore::new());
    let mut session = SyncSession::create(store.clone(), transport.clone(), new_game())
        .await
        .unwrap();
    session.connect().await.unwrap();
    let start_revision = session.game().revision;

    transport.set_online(false);
    let burst: Vec<Action> = (0..5)
        .map(|i| pitch(i % 3, PitchKind::Ball))
        .collect();
    for action in &burst {
        session.record(action.clone()).await.unwrap();
    }
    assert_eq!(session.status(), SyncState::Disconnected);
    assert_eq!(session.pending().len(), 5);

    // Nothing is lost across a reload from the local store.
    let persisted = store.load_game(&session.game_id()).await.unwrap();
    assert_eq!(persisted.game.actions.len(), 5);
    assert_eq!(persisted.confirmed, 0);

    transport.set_online(true);
    assert_eq!(session.connect().await.unwrap(), SyncState::Synced);
    assert!(session.pending().is_empty());

    let on_server = server.game(&session.game_id()).await.unwrap();
    let ids: Vec<_> = on_server.actions.iter().map(|a| a.id).collect();
    let expected: Vec<_> = burst.iter().map(|a| a.id).collect();
    assert_eq!(ids, expected);
    // One contiguous commit.
    assert_eq!(on_server.revision, start_revision + 1);
}

#[tokio::test]
async fn reconnect_fast_forwards_when_nothing_is_pending() {
    let server = InProcessServer::new();
    let game = new_game();
    let id = game.id;
    let mut a = SyncSession::create(
        Arc::new(MemoryStore::new()),
        InProcessTransport::new(server.clone()),
        game,
    )
    .await
    .unwrap();
    a.connect().await.unwrap();

    let mut b = SyncSession::checkout(
        Arc::new(MemoryStore::new()),
        InProcessTransport::new(server.clone()),
        id,
    )
    .await
    .unwrap();
    b.record(pitch(0, PitchKind::Strike)).await.unwrap();
    b.record(pitch(0, PitchKind::Strike)).await.unwrap();

    a.disconnect();
    assert_eq!(a.connect().await.unwrap(), SyncState::Synced);
    assert_eq!(a.game().actions.len(), 2);
    let cell = a.state().cell(&ActiveContext::new(1, Team::Away, 0, 1)).unwrap();
    assert_eq!(cell.strikes(), 2);
}

#[tokio::test]
async fn undo_and_redo_travel_as_actions() {
    let server = InProcessServer::new();
    let mut session = SyncSession::create(
        Arc::new(MemoryStore::new()),
        InProcessTransport::new(server.clone()),
        new_game(),
    )
    .await
    .unwrap();
    session.connect().await.unwrap();

    let out = Action::new(ActionKind::PlayResult(PlayResultPayload {
        ctx: ActiveContext::new(1, Team::Away, 0, 1),
        outcome: PlayOutcome::Out,
        base: FIRST,
        code: "K".to_string(),
        hit: false,
        runners: vec![],
    }));
    session.record(out.clone()).await.unwrap();
    assert_eq!(session.state().outs(1, Team::Away), 1);

    assert_eq!(session.undo().await.unwrap(), Some(out.id));
    assert_eq!(session.state().outs(1, Team::Away), 0);

    assert!(session.redo().await.unwrap().is_some());
    assert_eq!(session.state().outs(1, Team::Away), 1);

    let on_server = server.game(&session.game_id()).await.unwrap();
    assert_eq!(on_server.actions.len(), 3);
}

#[tokio::test]
async fn remote_deletion_removes_local_copy() {
    let server = InProcessServer::new();
    let store = Arc::new(MemoryStore::new());
    let transport = InProcessTransport::new(server.clone());
    let mut session = SyncSession::create(store.clone(), transport.clone(), new_game())
        .await
        .unwrap();
    session.connect().await.unwrap();
    let id = session.game_id();

    transport.delete(id).await.unwrap();
    session.disconnect();
    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, SyncError::Gone(g) if g == id));
    assert!(store.load_game(&id).await.is_err());
}

#[tokio::test]
async fn idle_synced_session_hears_of_other_commits() {
    let server = InProcessServer::new();
    let mut a = SyncSession::create(
        Arc::new(MemoryStore::new()),
        InProcessTransport::new(server.clone()),
        new_game(),
    )
    .await
    .unwrap();
    a.connect().await.unwrap();
    let mut b = SyncSession::checkout(
        Arc::new(MemoryStore::new()),
        InProcessTransport::new(server.clone()),
        a.game_id(),
    )
    .await
    .unwrap();

    let strike = pitch(0, PitchKind::Strike);
    let strike_id = strike.id;
    let writer = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        b.record(strike).await.unwrap();
    });

    // A records nothing; the watch alone brings B's pitch over.
    assert_eq!(a.poll().await.unwrap(), SyncState::Synced);
    writer.await.unwrap();
    assert_eq!(a.game().actions.len(), 1);
    assert_eq!(a.game().actions[0].id, strike_id);
    let cell = a.state().cell(&ActiveContext::new(1, Team::Away, 0, 1)).unwrap();
    assert_eq!(cell.strikes(), 1);
}

#[tokio::test]
async fn watch_reports_remote_deletion() {
    let server = InProcessServer::new();
    let store = Arc::new(MemoryStore::new());
    let transport = InProcessTransport::new(server.clone());
    let mut session = SyncSession::create(store.clone(), transport.clone(), new_game())
        .await
        .unwrap();
    session.connect().await.unwrap();
    let id = session.game_id();

    transport.delete(id).await.unwrap();
    let err = session.poll().await.unwrap_err();
    assert!(matches!(err, SyncError::Gone(g) if g == id));
    assert!(store.load_game(&id).await.is_err());
}
