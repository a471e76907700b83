//! Forward application of actions.
//!
//! [`apply`] is the one place that interprets action kinds. It is total:
//! every kind has an effect (possibly none), and bad input produces a
//! [`Diagnostic`] instead of an error. [`replay`] folds `apply` over the
//! effective log, so full replay and incremental application agree as long
//! as the incremental caller re-runs full replay whenever it appends an
//! `UNDO`.

use tracing::warn;

use scorebook_model::{
    Action, ActionKind, ActiveContext, Game, GameStatus, PlayOutcome, RunnerMove,
    SubstitutionRecord,
};

use crate::diagnostic::Diagnostic;
use crate::state::GameState;
use crate::undo::effective_log;

/// Full replay result with the diagnostics collected on the way.
#[derive(Debug, Clone)]
pub struct Replay {
    pub state: GameState,
    pub diagnostics: Vec<Diagnostic>,
}

/// Replay a raw log (undo markers included) on top of `initial`.
pub fn replay(initial: &GameState, actions: &[Action]) -> GameState {
    replay_with_diagnostics(initial, actions).state
}

pub fn replay_with_diagnostics(initial: &GameState, actions: &[Action]) -> Replay {
    let mut state = initial.clone();
    let mut diagnostics = Vec::new();
    for action in effective_log(actions) {
        for d in apply(&mut state, action) {
            warn!(action_id = %action.id, kind = action.kind.type_name(), "{}", d.message);
            diagnostics.push(d);
        }
    }
    Replay { state, diagnostics }
}

/// Bring `state` up to date after the last entry of `log` was appended.
///
/// Forward actions are applied in place. An `UNDO` changes which earlier
/// actions count, so it forces a full replay from `initial`.
pub fn replay_incremental(
    initial: &GameState,
    state: &mut GameState,
    log: &[Action],
) -> Vec<Diagnostic> {
    match log.last() {
        None => Vec::new(),
        Some(last) if last.is_undo() => {
            let full = replay_with_diagnostics(initial, log);
            *state = full.state;
            full.diagnostics
        }
        Some(last) => {
            let diagnostics = apply(state, last);
            for d in &diagnostics {
                warn!(action_id = %last.id, kind = last.kind.type_name(), "{}", d.message);
            }
            diagnostics
        }
    }
}

/// Replay a game's whole log from its starting roster.
pub fn replay_game(game: &Game) -> GameState {
    replay(&GameState::new(game), &game.actions)
}

/// Every context an action names must point at a slot in the batting
/// side's lineup.
fn check_lineup(state: &GameState, action: &Action) -> Option<Diagnostic> {
    let mut contexts: Vec<ActiveContext> = action.context().into_iter().collect();
    if let ActionKind::MovePlay(p) = &action.kind {
        contexts.push(p.target.resolve(&p.source));
    }
    contexts
        .into_iter()
        .find(|c| c.batter_index >= state.roster.side(c.team).slots.len())
        .map(|c| {
            Diagnostic::for_action(
                action,
                format!("{} lineup has no batter {}", c.team, c.batter_index),
            )
        })
}

/// Apply one action to `state`.
///
/// A structurally invalid action leaves the state untouched. A play whose
/// runner sub-records cannot all be resolved still records the batter; the
/// unresolved runners are skipped and reported.
pub fn apply(state: &mut GameState, action: &Action) -> Vec<Diagnostic> {
    if let Err(e) = action.validate() {
        return vec![Diagnostic::for_action(action, e.to_string())];
    }
    if let Some(d) = check_lineup(state, action) {
        return vec![d];
    }

    let mut diagnostics = Vec::new();
    match &action.kind {
        ActionKind::GameStart => {
            if state.status == GameStatus::Scheduled {
                state.status = GameStatus::InProgress;
            }
        }

        ActionKind::Pitch(p) => {
            state.cell_mut(p.ctx).pitches.push(p.pitch);
            state.last_ctx = Some(p.ctx);
        }

        ActionKind::PlayResult(p) => {
            // Runners are located before the batter's own cell changes.
            let resolved = resolve_moves(state, action, &p.ctx, &p.runners, &mut diagnostics);

            let cell = state.cell_mut(p.ctx);
            cell.outcome = Some(p.outcome);
            cell.code = (!p.code.is_empty()).then(|| p.code.clone());
            cell.hit = p.hit;
            cell.path = Default::default();
            match p.outcome {
                PlayOutcome::Safe => cell.path.reach(p.base),
                PlayOutcome::Out => cell.path.put_out(p.base),
            }

            move_runners(state, resolved);
            state.last_ctx = Some(p.ctx);
        }

        ActionKind::RunnerAdvance(p) => {
            let moves = std::slice::from_ref(&p.runner);
            let resolved = resolve_moves(state, action, &p.ctx, moves, &mut diagnostics);
            move_runners(state, resolved);
            state.last_ctx = Some(p.ctx);
        }

        ActionKind::RunnerBatchUpdate(p) => {
            // Resolve against pre-batch positions so runners can pass
            // through each other's bases within one update.
            let resolved = resolve_moves(state, action, &p.ctx, &p.runners, &mut diagnostics);
            move_runners(state, resolved);
            state.last_ctx = Some(p.ctx);
        }

        ActionKind::ManualPathOverride(p) => match p.ctx.or(state.last_ctx) {
            Some(ctx) => {
                state.cell_mut(ctx).path = p.path;
                state.last_ctx = Some(ctx);
            }
            None => diagnostics.push(Diagnostic::for_action(
                action,
                "path override with no context and no previous action",
            )),
        },

        ActionKind::Substitution(p) => {
            let lineup = state.roster.side_mut(p.team);
            match lineup.slots.get_mut(p.slot) {
                Some(slot) => {
                    let outgoing = std::mem::replace(&mut slot.current, p.player.clone());
                    slot.history.push(SubstitutionRecord {
                        action_id: action.id,
                        inning: p.ctx.inning,
                        outgoing,
                        incoming: p.player.clone(),
                        position: p.position.clone(),
                    });
                }
                None => diagnostics.push(Diagnostic::for_action(
                    action,
                    format!("{} lineup has no slot {}", p.team, p.slot),
                )),
            }
            state.last_ctx = Some(p.ctx);
        }

        ActionKind::MovePlay(p) => {
            let target = p.target.resolve(&p.source);
            match state.cells.remove(&p.source) {
                Some(mut cell) => {
                    cell.ctx = target;
                    state.cells.insert(target, cell);
                    state.last_ctx = Some(target);
                }
                None => diagnostics.push(Diagnostic::for_action(
                    action,
                    format!("nothing recorded at {} to move", p.source.ctx_key()),
                )),
            }
        }

        ActionKind::ClearData(p) => {
            state.cells.remove(&p.ctx);
            state.last_ctx = Some(p.ctx);
        }

        ActionKind::Undo(_) => diagnostics.push(Diagnostic::for_action(
            action,
            "undo markers are resolved by the effective log, not replayed",
        )),

        ActionKind::GameMetadataUpdate(p) => {
            if let Some(name) = &p.away_name {
                state.roster.away.name = name.clone();
            }
            if let Some(name) = &p.home_name {
                state.roster.home.name = name.clone();
            }
            if let Some(innings) = p.innings {
                state.rules.innings = innings;
            }
            if let Some(status) = p.status {
                state.status = status;
            }
        }
    }
    diagnostics
}

/// A runner move bound to the cell of the runner it moves.
struct BoundMove {
    runner: ActiveContext,
    to: u8,
    out: bool,
}

/// Find the runner for each move: by explicit key first, then by whoever is
/// standing on the origin base in the same half-inning. The batter's own
/// cell is never a runner for its own play.
fn resolve_moves(
    state: &GameState,
    action: &Action,
    ctx: &ActiveContext,
    moves: &[RunnerMove],
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<BoundMove> {
    let mut bound = Vec::with_capacity(moves.len());
    for m in moves {
        let by_key = m
            .key
            .as_deref()
            .and_then(scorebook_model::parse_runner_key)
            .map(|(team, batter_index, column)| {
                ActiveContext::new(ctx.inning, team, batter_index, column)
            })
            .filter(|runner| runner != ctx && state.cells.contains_key(runner));

        let runner = by_key.or_else(|| {
            state
                .half_inning(ctx.inning, ctx.team)
                .find(|c| c.ctx != *ctx && c.path.standing_on() == Some(m.from))
                .map(|c| c.ctx)
        });

        match runner {
            Some(runner) => bound.push(BoundMove {
                runner,
                to: m.to,
                out: m.out,
            }),
            None => diagnostics.push(Diagnostic::for_action(
                action,
                format!("no runner found on base {}", m.from),
            )),
        }
    }
    bound
}

fn move_runners(state: &mut GameState, moves: Vec<BoundMove>) {
    for m in moves {
        let path = &mut state.cell_mut(m.runner).path;
        if m.out {
            path.put_out(m.to);
        } else {
            path.reach(m.to);
        }
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use scorebook_model::{
        ClearDataPayload, Lineup, ManualPathPayload, MetadataPayload, MovePlayPayload,
        MoveTarget, PitchKind, PitchPayload, PlayResultPayload, Player, RunnerAdvancePayload,
        RunnerBatchPayload, Rules, SubstitutionPayload, Team, FIRST, HOME, SECOND, THIRD,
    };
    use uuid::Uuid;

    fn game() -> Game {
        Game::new(
            Uuid::new_v4(),
            Lineup::new("Owls", &["Ada", "Bea", "Cal", "Dot"]),
            Lineup::new("Hawks", &["Cy", "Di", "Ed", "Fay"]),
            Rules::default(),
        )
    }

    fn away(batter: usize) -> ActiveContext {
        ActiveContext::new(1, Team::Away, batter, 1)
    }

    fn result(ctx: ActiveContext, outcome: PlayOutcome, base: u8) -> Action {
        Action::new(ActionKind::PlayResult(PlayResultPayload {
            ctx,
            outcome,
            base,
            code: String::new(),
            hit: outcome == PlayOutcome::Safe,
            runners: vec![],
        }))
    }

    fn advance(from: u8, to: u8) -> RunnerMove {
        RunnerMove {
            key: None,
            name: None,
            from,
            to,
            out: false,
        }
    }

    #[test]
    fn replay_is_deterministic() {
        let g = game();
        let log = vec![
            Action::new(ActionKind::GameStart),
            result(away(0), PlayOutcome::Safe, FIRST),
            result(away(1), PlayOutcome::Safe, SECOND),
            result(away(2), PlayOutcome::Out, FIRST),
        ];
        let init = GameState::new(&g);
        assert_eq!(replay(&init, &log), replay(&init, &log));
    }

    #[test]
    fn incremental_matches_full_replay() {
        let g = game();
        let log = vec![
            Action::new(ActionKind::GameStart),
            Action::new(ActionKind::Pitch(PitchPayload {
                ctx: away(0),
                pitch: PitchKind::Ball,
            })),
            result(away(0), PlayOutcome::Safe, FIRST),
            Action::new(ActionKind::RunnerAdvance(RunnerAdvancePayload {
                ctx: away(1),
                runner: advance(FIRST, SECOND),
            })),
        ];
        let init = GameState::new(&g);
        let mut incremental = init.clone();
        for a in &log {
            assert!(apply(&mut incremental, a).is_empty());
        }
        assert_eq!(incremental, replay(&init, &log));
    }

    #[test]
    fn double_then_single_scores_nobody_and_moves_runner() {
        let g = game();
        let mut single = result(away(1), PlayOutcome::Safe, FIRST);
        if let ActionKind::PlayResult(p) = &mut single.kind {
            p.runners.push(advance(SECOND, THIRD));
        }
        let log = vec![result(away(0), PlayOutcome::Safe, SECOND), single];
        let state = replay(&GameState::new(&g), &log);
        let n = state.narrative(1, Team::Away);
        assert_eq!(n.bases[0].as_deref(), Some("Bea"));
        assert_eq!(n.bases[2].as_deref(), Some("Ada"));
        assert_eq!(n.score.away, 0);
        assert_eq!(n.hits.away, 2);
    }

    #[test]
    fn batch_update_resolves_against_pre_batch_positions() {
        let g = game();
        let log = vec![
            result(away(0), PlayOutcome::Safe, SECOND),
            result(away(1), PlayOutcome::Safe, FIRST),
            Action::new(ActionKind::RunnerBatchUpdate(RunnerBatchPayload {
                ctx: away(2),
                runners: vec![advance(FIRST, SECOND), advance(SECOND, HOME)],
            })),
        ];
        let state = replay(&GameState::new(&g), &log);
        assert_eq!(state.score().away, 1);
        let n = state.narrative(1, Team::Away);
        assert_eq!(n.bases[1].as_deref(), Some("Bea"));
    }

    #[test]
    fn correction_replaces_outcome() {
        let g = game();
        let log = vec![
            result(away(0), PlayOutcome::Out, FIRST),
            result(away(0), PlayOutcome::Safe, FIRST),
        ];
        let state = replay(&GameState::new(&g), &log);
        assert_eq!(state.outs(1, Team::Away), 0);
        assert_eq!(
            state.narrative(1, Team::Away).bases[0].as_deref(),
            Some("Ada")
        );
    }

    #[test]
    fn undo_excludes_target_from_replay() {
        let g = game();
        let out = result(away(0), PlayOutcome::Out, FIRST);
        let log = vec![out.clone(), Action::undo(out.id)];
        let state = replay(&GameState::new(&g), &log);
        assert!(state.cells.is_empty());
        assert_eq!(state.outs(1, Team::Away), 0);
    }

    #[test]
    fn incremental_undo_falls_back_to_full_replay() {
        let g = game();
        let init = GameState::new(&g);
        let out = result(away(0), PlayOutcome::Out, FIRST);
        let mut log = vec![out.clone()];
        let mut state = init.clone();
        replay_incremental(&init, &mut state, &log);
        assert_eq!(state.outs(1, Team::Away), 1);

        log.push(Action::undo(out.id));
        replay_incremental(&init, &mut state, &log);
        assert_eq!(state, replay(&init, &log));
        assert_eq!(state.outs(1, Team::Away), 0);
    }

    #[test]
    fn malformed_actions_are_noops_with_diagnostics() {
        let g = game();
        let mut init = GameState::new(&g);
        let bad = result(away(0), PlayOutcome::Safe, 9);
        let before = init.clone();
        let diags = apply(&mut init, &bad);
        assert_eq!(diags.len(), 1);
        assert_eq!(init, before);

        let orphan = Action::new(ActionKind::ManualPathOverride(ManualPathPayload {
            ctx: None,
            path: Default::default(),
        }));
        assert_eq!(apply(&mut init, &orphan).len(), 1);
    }

    #[test]
    fn unresolved_runner_still_records_batter() {
        let g = game();
        let mut play = result(away(0), PlayOutcome::Safe, FIRST);
        if let ActionKind::PlayResult(p) = &mut play.kind {
            p.runners.push(advance(THIRD, HOME));
        }
        let mut state = GameState::new(&g);
        let diags = apply(&mut state, &play);
        assert_eq!(diags.len(), 1);
        assert!(state.cell(&away(0)).is_some());
        assert_eq!(state.score().away, 0);
    }

    #[test]
    fn manual_override_attaches_to_previous_context() {
        let g = game();
        let mut path = scorebook_model::BasePath::default();
        path.reach(THIRD);
        let log = vec![
            result(away(0), PlayOutcome::Safe, FIRST),
            Action::new(ActionKind::ManualPathOverride(ManualPathPayload { ctx: None, path })),
        ];
        let state = replay(&GameState::new(&g), &log);
        assert_eq!(state.cell(&away(0)).map(|c| c.path), Some(path));
    }

    #[test]
    fn substitution_chain_is_recorded() {
        let g = game();
        let sub = |name: &str| {
            Action::new(ActionKind::Substitution(SubstitutionPayload {
                ctx: away(2),
                team: Team::Away,
                slot: 2,
                player: Player::named(name),
                position: None,
            }))
        };
        let state = replay(&GameState::new(&g), &[sub("Pinch"), sub("Closer")]);
        let slot = &state.roster.away.slots[2];
        assert_eq!(slot.current.name, "Closer");
        assert_eq!(slot.starter.name, "Cal");
        assert_eq!(slot.history.len(), 2);
        assert_eq!(slot.history[1].outgoing.name, "Pinch");
    }

    #[test]
    fn move_and_clear() {
        let g = game();
        let log = vec![
            result(away(3), PlayOutcome::Safe, SECOND),
            Action::new(ActionKind::MovePlay(MovePlayPayload {
                source: away(3),
                target: MoveTarget {
                    inning: None,
                    team: None,
                    batter_index: 2,
                    column: 1,
                },
            })),
        ];
        let state = replay(&GameState::new(&g), &log);
        assert!(state.cell(&away(3)).is_none());
        assert_eq!(state.cell(&away(2)).map(|c| c.ctx), Some(away(2)));

        let mut cleared = state.clone();
        apply(
            &mut cleared,
            &Action::new(ActionKind::ClearData(ClearDataPayload { ctx: away(2) })),
        );
        assert!(cleared.cells.is_empty());
    }

    #[test]
    fn context_outside_lineup_is_a_no_op() {
        let g = game();
        let initial = GameState::new(&g);
        let mut state = initial.clone();
        let stray = Action::new(ActionKind::Pitch(PitchPayload {
            ctx: away(4),
            pitch: PitchKind::Ball,
        }));
        let diagnostics = apply(&mut state, &stray);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].action_id, Some(stray.id));
        assert!(state.cells.is_empty());

        let onto_nobody = Action::new(ActionKind::MovePlay(MovePlayPayload {
            source: away(0),
            target: MoveTarget {
                inning: None,
                team: None,
                batter_index: usize::MAX,
                column: 1,
            },
        }));
        assert_eq!(apply(&mut state, &onto_nobody).len(), 1);
    }

    #[test]
    fn metadata_finalizes_game() {
        let g = game();
        let log = vec![
            Action::new(ActionKind::GameStart),
            Action::new(ActionKind::GameMetadataUpdate(MetadataPayload {
                status: Some(GameStatus::Final),
                home_name: Some("Falcons".to_string()),
                ..Default::default()
            })),
        ];
        let state = replay(&GameState::new(&g), &log);
        assert_eq!(state.status, GameStatus::Final);
        assert_eq!(state.roster.home.name, "Falcons");
    }
}
