//! End-to-end history and replay scenarios.
//!
//! 1. Determinism: the same log replays to the same state, full or incremental
//! 2. Undo/redo linearity: redo is offered until a new forward action lands
//! 3. Correction splicing: a stricken play does not feed the state after it
//! 4. Move-play integrity: a moved double lives at its new slot only
//! 5. State continuity: each live item starts where the previous one ended
//! 6. Malformed input: bad contexts become diagnostics, never panics

use scorebook_model::{
    Action, ActionKind, ActiveContext, Game, Lineup, MovePlayPayload, MoveTarget, PitchKind,
    PitchPayload, PlayOutcome, PlayResultPayload, Rules, RunnerMove, Team, FIRST, HOME, SECOND,
};
use scorebook_replay::{
    apply, effective_log, linearize, redo_target_id, replay, replay_game, GameState, ItemKind,
};
use uuid::Uuid;

// ──────────────────────────────────────────────
// Fixtures
// ──────────────────────────────────────────────

const AWAY: [&str; 12] = [
    "Ada", "Bea", "Cal", "Dot", "Eve", "Fin", "Gus", "Hal", "Ivy", "Jo", "Kit", "Lu",
];
const HOME_SIDE: [&str; 9] = ["Cy", "Di", "Ed", "Fay", "Gil", "Hu", "Io", "Jem", "Kai"];

fn new_game() -> Game {
    Game::new(
        Uuid::new_v4(),
        Lineup::new("Owls", &AWAY),
        Lineup::new("Hawks", &HOME_SIDE),
        Rules::default(),
    )
}

fn ctx(batter: usize) -> ActiveContext {
    ActiveContext::new(1, Team::Away, batter, 1)
}

fn create_result(c: ActiveContext, outcome: PlayOutcome) -> Action {
    result_with(c, outcome, FIRST, "", vec![])
}

fn result_with(
    c: ActiveContext,
    outcome: PlayOutcome,
    base: u8,
    code: &str,
    runners: Vec<RunnerMove>,
) -> Action {
    Action::new(ActionKind::PlayResult(PlayResultPayload {
        ctx: c,
        outcome,
        base,
        code: code.to_string(),
        hit: outcome == PlayOutcome::Safe && !code.is_empty(),
        runners,
    }))
}

fn pitch(c: ActiveContext, kind: PitchKind) -> Action {
    Action::new(ActionKind::Pitch(PitchPayload { ctx: c, pitch: kind }))
}

fn with_log(actions: Vec<Action>) -> Game {
    let mut game = new_game();
    game.append_all(actions).unwrap();
    game
}

// ──────────────────────────────────────────────
// 1. Determinism
// ──────────────────────────────────────────────

#[test]
fn replay_twice_and_incrementally_agree() {
    let log = vec![
        Action::new(ActionKind::GameStart),
        pitch(ctx(0), PitchKind::Strike),
        pitch(ctx(0), PitchKind::Foul),
        result_with(ctx(0), PlayOutcome::Safe, SECOND, "2B", vec![]),
        result_with(
            ctx(1),
            PlayOutcome::Safe,
            FIRST,
            "1B",
            vec![RunnerMove {
                key: Some(ctx(0).runner_key()),
                name: None,
                from: SECOND,
                to: HOME,
                out: false,
            }],
        ),
        create_result(ctx(2), PlayOutcome::Out),
    ];
    let game = with_log(log.clone());

    let first = replay_game(&game);
    let second = replay_game(&game);
    assert_eq!(first, second);

    let mut incremental = GameState::new(&game);
    for action in &log {
        apply(&mut incremental, action);
    }
    assert_eq!(incremental, first);
    assert_eq!(first.score().away, 1);
    assert_eq!(first.outs(1, Team::Away), 1);
}

// ──────────────────────────────────────────────
// 2. Undo/redo linearity
// ──────────────────────────────────────────────

#[test]
fn redo_is_invalidated_by_a_new_forward_action() {
    let a = pitch(ctx(0), PitchKind::Ball);
    let b = pitch(ctx(0), PitchKind::Strike);
    let undo_b = Action::undo(b.id);
    let mut log = vec![a.clone(), b, undo_b.clone()];

    let effective: Vec<_> = effective_log(&log).into_iter().map(|x| x.id).collect();
    assert_eq!(effective, vec![a.id]);
    assert_eq!(redo_target_id(&log), Some(undo_b.id));

    log.push(pitch(ctx(0), PitchKind::Ball));
    assert_eq!(redo_target_id(&log), None);
}

#[test]
fn undo_is_invisible_in_history_and_state() {
    let out = create_result(ctx(0), PlayOutcome::Out);
    let game = with_log(vec![
        Action::new(ActionKind::GameStart),
        out.clone(),
        Action::undo(out.id),
    ]);
    assert!(linearize(&game).plays().next().is_none());
    assert_eq!(replay_game(&game).outs(1, Team::Away), 0);
}

// ──────────────────────────────────────────────
// 3. Correction splicing
// ──────────────────────────────────────────────

#[test]
fn correction_is_spliced_in_place_of_stricken_play() {
    let a1 = create_result(ctx(0), PlayOutcome::Out);
    let a2 = create_result(ctx(1), PlayOutcome::Out);
    let a3 = create_result(ctx(0), PlayOutcome::Safe);
    let game = with_log(vec![a1.clone(), a2.clone(), a3.clone()]);

    let history = linearize(&game);
    assert_eq!(history.items.len(), 4);

    let header = &history.items[0];
    assert_eq!(header.kind, ItemKind::InningHeader);

    let item1 = &history.items[1];
    assert_eq!(item1.events[0].id, a1.id);
    assert!(item1.is_stricken);
    assert!(item1.state_after.is_none());

    let item2 = &history.items[2];
    assert_eq!(item2.events[0].id, a2.id);
    assert!(!item2.is_stricken);
    assert_eq!(item2.state_before.outs, 0);

    let item3 = &history.items[3];
    assert_eq!(item3.events[0].id, a3.id);
    assert!(item3.is_correction);
    assert!(!item3.is_stricken);
    assert_eq!(item3.state_before.outs, 1);

    // The live item for the corrected cell is the correction.
    assert_eq!(
        history.current(&ctx(0)).map(|i| i.id.as_str()),
        Some(item3.id.as_str())
    );
    // Replay agrees with the feed.
    let state = replay_game(&game);
    assert_eq!(state.outs(1, Team::Away), 1);
    assert_eq!(
        item3.state_after.as_ref().map(|s| s.outs),
        Some(state.outs(1, Team::Away))
    );
}

// ──────────────────────────────────────────────
// 4. Move-play integrity
// ──────────────────────────────────────────────

#[test]
fn moved_double_lives_at_target_slot() {
    let double = result_with(ctx(11), PlayOutcome::Safe, SECOND, "2B", vec![]);
    let move_it = Action::new(ActionKind::MovePlay(MovePlayPayload {
        source: ctx(11),
        target: MoveTarget {
            inning: None,
            team: None,
            batter_index: 10,
            column: 1,
        },
    }));
    let game = with_log(vec![double.clone(), move_it]);

    let history = linearize(&game);
    let plays: Vec<_> = history.plays().collect();
    assert_eq!(plays.len(), 2);

    let source = plays[0];
    assert_eq!(source.ctx, Some(ctx(11)));
    assert!(source.is_stricken);

    let target = plays[1];
    assert_eq!(target.ctx, Some(ctx(10)));
    assert!(!target.is_stricken);
    assert!(target.events.iter().any(|e| e.id == double.id));
    let after = target.state_after.as_ref().expect("live item has state after");
    assert_eq!(after.bases[1].as_deref(), Some("Kit"));
    assert_eq!(after.hits.away, 1);

    let state = replay_game(&game);
    assert!(state.cell(&ctx(11)).is_none());
    assert_eq!(
        state.cell(&ctx(10)).and_then(|c| c.code.clone()).as_deref(),
        Some("2B")
    );
}

#[test]
fn move_onto_recorded_slot_strikes_the_play_there() {
    let strikeout = result_with(ctx(10), PlayOutcome::Out, FIRST, "K", vec![]);
    let double = result_with(ctx(11), PlayOutcome::Safe, SECOND, "2B", vec![]);
    let move_it = Action::new(ActionKind::MovePlay(MovePlayPayload {
        source: ctx(11),
        target: MoveTarget {
            inning: None,
            team: None,
            batter_index: 10,
            column: 1,
        },
    }));
    let game = with_log(vec![strikeout.clone(), double.clone(), move_it]);

    let history = linearize(&game);
    let at_target: Vec<_> = history
        .plays()
        .filter(|i| i.ctx == Some(ctx(10)))
        .collect();
    assert_eq!(at_target.len(), 2);
    let live: Vec<_> = at_target.iter().filter(|i| !i.is_stricken).collect();
    assert_eq!(live.len(), 1, "one live item per cell");
    assert!(live[0].events.iter().any(|e| e.id == double.id));
    assert!(at_target
        .iter()
        .any(|i| i.is_stricken && i.events.iter().any(|e| e.id == strikeout.id)));

    let after = live[0].state_after.as_ref().expect("live item has state after");
    assert_eq!(after.outs, 0);
    assert_eq!(after.bases[1].as_deref(), Some("Kit"));

    let state = replay_game(&game);
    assert_eq!(state.outs(1, Team::Away), 0);
    assert_eq!(
        state.cell(&ctx(10)).and_then(|c| c.code.clone()).as_deref(),
        Some("2B")
    );
}

// ──────────────────────────────────────────────
// 5. State continuity
// ──────────────────────────────────────────────

#[test]
fn live_items_chain_state_within_half_inning() {
    let game = with_log(vec![
        Action::new(ActionKind::GameStart),
        result_with(ctx(0), PlayOutcome::Safe, FIRST, "1B", vec![]),
        create_result(ctx(1), PlayOutcome::Out),
        create_result(ctx(1), PlayOutcome::Safe),
        result_with(
            ctx(2),
            PlayOutcome::Safe,
            SECOND,
            "2B",
            vec![RunnerMove {
                key: None,
                name: None,
                from: FIRST,
                to: HOME,
                out: false,
            }],
        ),
    ]);

    let history = linearize(&game);
    let live: Vec<_> = history.plays().filter(|i| !i.is_stricken).collect();
    for pair in live.windows(2) {
        assert_eq!(pair[0].state_after.as_ref(), Some(&pair[1].state_before));
    }

    // The double's runner was resolved from the base path, not guessed.
    let double = live.last().expect("double recorded");
    assert_eq!(double.runners.len(), 1);
    assert!(!double.runners[0].source.is_heuristic());

    let final_state = replay(&GameState::new(&game), &game.actions);
    assert_eq!(
        double.state_after.as_ref().map(|s| s.score.away),
        Some(final_state.score().away)
    );
}

// ──────────────────────────────────────────────
// 6. Malformed input
// ──────────────────────────────────────────────

#[test]
fn batter_outside_the_lineup_is_reported_not_fatal() {
    let stray = ActiveContext::new(1, Team::Away, usize::MAX, 1);
    let bad = result_with(
        stray,
        PlayOutcome::Safe,
        FIRST,
        "1B",
        vec![RunnerMove {
            key: None,
            name: None,
            from: FIRST,
            to: SECOND,
            out: false,
        }],
    );
    let good = create_result(ctx(0), PlayOutcome::Out);
    let game = with_log(vec![Action::new(ActionKind::GameStart), bad.clone(), good]);

    let history = linearize(&game);
    assert!(history
        .diagnostics
        .iter()
        .any(|d| d.action_id == Some(bad.id)));
    let stray_item = history
        .plays()
        .find(|i| i.ctx == Some(stray))
        .expect("stray play still listed");
    assert!(stray_item.batter.is_none());
    assert!(stray_item.runners[0].name.is_none());

    // The bad play changed nothing; the good one still counts.
    let state = replay_game(&game);
    assert!(state.cell(&stray).is_none());
    assert_eq!(state.outs(1, Team::Away), 1);
}
