//! Writes that commit on the server while their acknowledgement is lost.
//!
//! The session must converge on the server log when it retries or
//! reconnects, and only diverge when another client's action really sits
//! between its own.

use std::sync::Arc;

use scorebook_model::{
    Action, ActionId, ActionKind, ActiveContext, Game, Lineup, PitchKind, PitchPayload, Rules,
    Team,
};
use scorebook_storage::MemoryStore;
use scorebook_sync::{InProcessServer, InProcessTransport, SyncError, SyncSession, SyncState};
use uuid::Uuid;

type Session = SyncSession<MemoryStore, InProcessTransport>;

fn new_game() -> Game {
    Game::new(
        Uuid::new_v4(),
        Lineup::new("Owls", &["Ada", "Bea"]),
        Lineup::new("Hawks", &["Cy", "Di"]),
        Rules::default(),
    )
}

fn pitch(kind: PitchKind) -> Action {
    Action::new(ActionKind::Pitch(PitchPayload {
        ctx: ActiveContext::new(1, Team::Away, 0, 1),
        pitch: kind,
    }))
}

fn ids(game: &Game) -> Vec<ActionId> {
    game.actions.iter().map(|a| a.id).collect()
}

/// A synced session whose first recorded action commits but is answered
/// with `QuorumTimeout`.
async fn after_lost_ack(server: &Arc<InProcessServer>) -> (Session, InProcessTransport, Action) {
    let transport = InProcessTransport::new(server.clone());
    let mut session = SyncSession::create(Arc::new(MemoryStore::new()), transport.clone(), new_game())
        .await
        .unwrap();
    assert_eq!(session.connect().await.unwrap(), SyncState::Synced);

    transport.lose_next_ack();
    let ball = pitch(PitchKind::Ball);
    let err = session.record(ball.clone()).await.unwrap_err();
    assert!(matches!(err, SyncError::QuorumTimeout), "{err}");
    assert_eq!(session.pending().len(), 1);

    let on_server = server.game(&session.game_id()).await.unwrap();
    assert_eq!(ids(&on_server), vec![ball.id]);
    (session, transport, ball)
}

async fn checkout(server: &Arc<InProcessServer>, session: &Session) -> Session {
    SyncSession::checkout(
        Arc::new(MemoryStore::new()),
        InProcessTransport::new(server.clone()),
        session.game_id(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn retry_picks_up_commits_made_after_the_lost_ack() {
    let server = InProcessServer::new();
    let (mut a, _, ball) = after_lost_ack(&server).await;

    let mut b = checkout(&server, &a).await;
    let strike = pitch(PitchKind::Strike);
    b.record(strike.clone()).await.unwrap();

    a.flush().await.unwrap();
    assert_eq!(a.status(), SyncState::Synced);
    assert!(a.pending().is_empty());
    assert_eq!(ids(a.game()), vec![ball.id, strike.id]);
    assert_eq!(a.game().revision, b.game().revision);
    let cell = a.state().cell(&ActiveContext::new(1, Team::Away, 0, 1)).unwrap();
    assert_eq!((cell.balls(), cell.strikes()), (1, 1));

    // The next write lands on top of B's, and both copies agree.
    let foul = pitch(PitchKind::Foul);
    a.record(foul.clone()).await.unwrap();
    let on_server = server.game(&a.game_id()).await.unwrap();
    assert_eq!(ids(&on_server), vec![ball.id, strike.id, foul.id]);
    assert_eq!(a.game().actions, on_server.actions);
    assert_eq!(a.game().revision, on_server.revision);
}

#[tokio::test]
async fn reconnect_after_lost_ack_converges() {
    let server = InProcessServer::new();
    let (mut a, _, ball) = after_lost_ack(&server).await;

    a.disconnect();
    assert_eq!(a.connect().await.unwrap(), SyncState::Synced);
    assert!(a.divergence().is_none());
    assert!(a.pending().is_empty());

    let on_server = server.game(&a.game_id()).await.unwrap();
    assert_eq!(ids(&on_server), vec![ball.id]);
    assert_eq!(a.game().revision, on_server.revision);
}

#[tokio::test]
async fn actions_queued_behind_a_lost_ack_are_sent_once() {
    let server = InProcessServer::new();
    let (mut a, transport, ball) = after_lost_ack(&server).await;

    transport.set_online(false);
    let strike = pitch(PitchKind::Strike);
    a.record(strike.clone()).await.unwrap();
    assert_eq!(a.status(), SyncState::Disconnected);
    assert_eq!(a.pending().len(), 2);

    transport.set_online(true);
    assert_eq!(a.connect().await.unwrap(), SyncState::Synced);
    assert!(a.pending().is_empty());
    let on_server = server.game(&a.game_id()).await.unwrap();
    assert_eq!(ids(&on_server), vec![ball.id, strike.id]);
}

#[tokio::test]
async fn foreign_action_between_ours_still_diverges() {
    let server = InProcessServer::new();
    let (mut a, transport, ball) = after_lost_ack(&server).await;

    let mut b = checkout(&server, &a).await;
    let strike = pitch(PitchKind::Strike);
    b.record(strike.clone()).await.unwrap();

    transport.set_online(false);
    a.record(pitch(PitchKind::Foul)).await.unwrap();
    transport.set_online(true);

    assert_eq!(a.connect().await.unwrap(), SyncState::Diverged);
    let divergence = a.divergence().unwrap();
    assert_eq!(divergence.local_only, 1);
    assert_eq!(ids(&divergence.server), vec![ball.id, strike.id]);
}
