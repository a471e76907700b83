//! The history feed: a reviewable, correction-aware view of a game's log.
//!
//! [`linearize`] works in four passes over the effective log:
//!
//! 1. group actions into one item per scorebook cell, striking an item when a
//!    later generative action at the same cell corrects it, or when its play
//!    is moved elsewhere;
//! 2. insert an inning header wherever the half-inning changes;
//! 3. propagate state: every item gets the narrative state before it, and
//!    non-stricken items also get the state after it;
//! 4. append a summary when the game is final.
//!
//! Stricken items stay in the feed for audit but never advance the running
//! state, so the item after a stricken one starts from the state before it.

use std::collections::HashMap;

use serde::Serialize;

use scorebook_model::{Action, ActionKind, ActiveContext, Game, GameStatus, Team};

use crate::diagnostic::Diagnostic;
use crate::engine::apply;
use crate::names::{self, ResolvedRunner};
use crate::state::{GameState, NarrativeState};
use crate::undo::effective_log;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind {
    Play,
    InningHeader,
    Summary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub ctx_key: Option<String>,
    pub ctx: Option<ActiveContext>,
    pub inning: Option<u32>,
    pub team: Option<Team>,
    pub events: Vec<Action>,
    pub is_stricken: bool,
    pub is_correction: bool,
    pub batter: Option<String>,
    pub state_before: NarrativeState,
    /// Absent for stricken items and for headers and summaries.
    pub state_after: Option<NarrativeState>,
    pub runners: Vec<ResolvedRunner>,
}

impl HistoryItem {
    pub fn is_play(&self) -> bool {
        self.kind == ItemKind::Play
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct History {
    pub items: Vec<HistoryItem>,
    pub diagnostics: Vec<Diagnostic>,
}

impl History {
    pub fn plays(&self) -> impl Iterator<Item = &HistoryItem> {
        self.items.iter().filter(|i| i.is_play())
    }

    /// The live item for a cell, if any.
    pub fn current(&self, ctx: &ActiveContext) -> Option<&HistoryItem> {
        self.plays()
            .find(|i| !i.is_stricken && i.ctx.as_ref() == Some(ctx))
    }
}

/// An item under construction during grouping.
struct Draft {
    ctx: ActiveContext,
    ordinal: usize,
    events: Vec<Action>,
    stricken: bool,
    correction: bool,
    has_generative: bool,
    has_clear: bool,
}

impl Draft {
    fn push(&mut self, action: &Action) {
        self.has_generative |= action.kind.is_generative();
        self.has_clear |= matches!(action.kind, ActionKind::ClearData(_));
        self.events.push(action.clone());
    }
}

#[derive(Default)]
struct Grouping {
    drafts: Vec<Draft>,
    /// Cell → index of its open (non-stricken) draft.
    open: HashMap<ActiveContext, usize>,
    /// Items emitted so far per cell, for stable ids.
    emitted: HashMap<ActiveContext, usize>,
}

impl Grouping {
    fn open_new(&mut self, ctx: ActiveContext, correction: bool) -> usize {
        let ordinal = self.emitted.entry(ctx).or_insert(0);
        let idx = self.drafts.len();
        self.drafts.push(Draft {
            ctx,
            ordinal: *ordinal,
            events: Vec::new(),
            stricken: false,
            correction,
            has_generative: false,
            has_clear: false,
        });
        *ordinal += 1;
        self.open.insert(ctx, idx);
        idx
    }

    fn strike(&mut self, ctx: &ActiveContext) -> Option<usize> {
        let idx = self.open.remove(ctx)?;
        self.drafts[idx].stricken = true;
        Some(idx)
    }
}

/// Build the history feed for a game.
pub fn linearize(game: &Game) -> History {
    let effective = effective_log(&game.actions);
    let mut diagnostics = Vec::new();

    let drafts = group(&effective, &mut diagnostics);
    let finalized = effective
        .iter()
        .filter_map(|a| match &a.kind {
            ActionKind::GameMetadataUpdate(m) => m.status,
            _ => None,
        })
        .last()
        == Some(GameStatus::Final);

    let mut running = GameState::new(game);
    let mut items = Vec::with_capacity(drafts.len() + 8);
    let mut current_half: Option<(u32, Team)> = None;
    let mut headers = 0usize;

    for draft in drafts {
        let half = draft.ctx.half_inning();
        if current_half != Some(half) {
            current_half = Some(half);
            items.push(header(&running, half, headers));
            headers += 1;
        }
        items.push(propagate(&mut running, draft, &mut diagnostics));
    }

    if finalized {
        items.push(HistoryItem {
            id: "summary".to_string(),
            kind: ItemKind::Summary,
            ctx_key: None,
            ctx: None,
            inning: None,
            team: None,
            events: Vec::new(),
            is_stricken: false,
            is_correction: false,
            batter: None,
            state_before: running.totals(),
            state_after: None,
            runners: Vec::new(),
        });
    }

    History { items, diagnostics }
}

fn group(effective: &[&Action], diagnostics: &mut Vec<Diagnostic>) -> Vec<Draft> {
    let mut g = Grouping::default();
    let mut last_ctx: Option<ActiveContext> = None;

    for &action in effective {
        match &action.kind {
            ActionKind::GameStart | ActionKind::GameMetadataUpdate(_) => continue,

            ActionKind::MovePlay(p) => {
                let target = p.target.resolve(&p.source);
                let Some(source_idx) = g.strike(&p.source) else {
                    diagnostics.push(Diagnostic::for_action(
                        action,
                        format!("no play at {} to move", p.source.ctx_key()),
                    ));
                    continue;
                };
                // The moved play replaces whatever was recorded at the target.
                g.strike(&target);

                let carried = g.drafts[source_idx].events.clone();
                let idx = g.open_new(target, false);
                for event in &carried {
                    g.drafts[idx].push(event);
                }
                g.drafts[idx].push(action);
                last_ctx = Some(target);
            }

            _ => {
                let Some(ctx) = action.context().or(last_ctx) else {
                    diagnostics.push(Diagnostic::for_action(
                        action,
                        "no context and no previous action to attach to",
                    ));
                    continue;
                };

                let idx = match g.open.get(&ctx).copied() {
                    None => g.open_new(ctx, false),
                    Some(idx) => {
                        let draft = &g.drafts[idx];
                        let reclear =
                            matches!(action.kind, ActionKind::ClearData(_)) && draft.has_clear;
                        if draft.has_generative && action.kind.is_generative() && !reclear {
                            g.strike(&ctx);
                            g.open_new(ctx, true)
                        } else {
                            idx
                        }
                    }
                };
                g.drafts[idx].push(action);
                last_ctx = Some(ctx);
            }
        }
    }
    g.drafts
}

fn header(running: &GameState, (inning, team): (u32, Team), n: usize) -> HistoryItem {
    HistoryItem {
        id: format!("header-{}-{}-{}", inning, team, n),
        kind: ItemKind::InningHeader,
        ctx_key: None,
        ctx: None,
        inning: Some(inning),
        team: Some(team),
        events: Vec::new(),
        is_stricken: false,
        is_correction: false,
        batter: None,
        state_before: running.narrative(inning, team),
        state_after: None,
        runners: Vec::new(),
    }
}

fn propagate(
    running: &mut GameState,
    draft: Draft,
    diagnostics: &mut Vec<Diagnostic>,
) -> HistoryItem {
    let ctx = draft.ctx;
    let state_before = running.narrative(ctx.inning, ctx.team);
    let batter = running.batter_name(ctx.team, ctx.batter_index);

    let mut working = running.clone();
    // Context-less events in this item belong to this item's cell.
    working.last_ctx = Some(ctx);
    let mut runners = Vec::new();
    for event in &draft.events {
        let event_ctx = event.context().unwrap_or(ctx);
        for m in event.kind.runner_moves() {
            runners.push(names::resolve(&working, &event_ctx, m));
        }
        diagnostics.extend(apply(&mut working, event));
    }

    let state_after = if draft.stricken {
        None
    } else {
        let after = working.narrative(ctx.inning, ctx.team);
        *running = working;
        Some(after)
    };

    let ctx_key = ctx.ctx_key();
    HistoryItem {
        id: format!("{}:{}", ctx_key, draft.ordinal),
        kind: ItemKind::Play,
        ctx_key: Some(ctx_key),
        ctx: Some(ctx),
        inning: Some(ctx.inning),
        team: Some(ctx.team),
        events: draft.events,
        is_stricken: draft.stricken,
        is_correction: draft.correction,
        batter,
        state_before,
        state_after,
        runners,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scorebook_model::{
        ClearDataPayload, Lineup, ManualPathPayload, MetadataPayload, PitchKind, PitchPayload,
        PlayOutcome, PlayResultPayload, Rules, FIRST,
    };
    use uuid::Uuid;

    fn game(actions: Vec<Action>) -> Game {
        let mut g = Game::new(
            Uuid::new_v4(),
            Lineup::new("Owls", &["Ada", "Bea", "Cal"]),
            Lineup::new("Hawks", &["Cy", "Di", "Ed"]),
            Rules::default(),
        );
        g.actions = actions;
        g
    }

    fn ctx(team: Team, batter: usize) -> ActiveContext {
        ActiveContext::new(1, team, batter, 1)
    }

    fn play(c: ActiveContext, outcome: PlayOutcome) -> Action {
        Action::new(ActionKind::PlayResult(PlayResultPayload {
            ctx: c,
            outcome,
            base: FIRST,
            code: String::new(),
            hit: false,
            runners: vec![],
        }))
    }

    fn clear(c: ActiveContext) -> Action {
        Action::new(ActionKind::ClearData(ClearDataPayload { ctx: c }))
    }

    #[test]
    fn pitches_accumulate_in_one_item() {
        let c = ctx(Team::Away, 0);
        let pitch = |p| Action::new(ActionKind::Pitch(PitchPayload { ctx: c, pitch: p }));
        let h = linearize(&game(vec![
            Action::new(ActionKind::GameStart),
            pitch(PitchKind::Ball),
            pitch(PitchKind::Strike),
            play(c, PlayOutcome::Out),
        ]));
        assert_eq!(h.items.len(), 2);
        assert_eq!(h.items[0].kind, ItemKind::InningHeader);
        assert_eq!(h.items[1].events.len(), 3);
        assert_eq!(h.items[1].batter.as_deref(), Some("Ada"));
        assert_eq!(h.items[1].state_after.as_ref().map(|s| s.outs), Some(1));
    }

    #[test]
    fn headers_mark_half_inning_changes() {
        let h = linearize(&game(vec![
            play(ctx(Team::Away, 0), PlayOutcome::Out),
            play(ctx(Team::Home, 0), PlayOutcome::Out),
            play(ctx(Team::Home, 1), PlayOutcome::Out),
        ]));
        let kinds: Vec<ItemKind> = h.items.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ItemKind::InningHeader,
                ItemKind::Play,
                ItemKind::InningHeader,
                ItemKind::Play,
                ItemKind::Play,
            ]
        );
        assert_eq!(h.items[2].id, "header-1-home-1");
        // Home half starts at zero outs.
        assert_eq!(h.items[3].state_before.outs, 0);
    }

    #[test]
    fn clear_strikes_once_then_accumulates() {
        let c = ctx(Team::Away, 0);
        let h = linearize(&game(vec![play(c, PlayOutcome::Out), clear(c), clear(c)]));
        let plays: Vec<&HistoryItem> = h.plays().collect();
        assert_eq!(plays.len(), 2);
        assert!(plays[0].is_stricken);
        assert!(plays[1].is_correction);
        assert_eq!(plays[1].events.len(), 2);
        assert_eq!(plays[1].state_after.as_ref().map(|s| s.outs), Some(0));
    }

    #[test]
    fn contextless_override_joins_previous_item() {
        let c = ctx(Team::Away, 0);
        let h = linearize(&game(vec![
            play(c, PlayOutcome::Safe),
            Action::new(ActionKind::ManualPathOverride(ManualPathPayload {
                ctx: None,
                path: Default::default(),
            })),
        ]));
        assert_eq!(h.plays().count(), 1);
        assert_eq!(h.current(&c).map(|i| i.events.len()), Some(2));
        assert!(h.diagnostics.is_empty());
    }

    #[test]
    fn orphan_override_is_skipped_with_diagnostic() {
        let h = linearize(&game(vec![Action::new(ActionKind::ManualPathOverride(
            ManualPathPayload {
                ctx: None,
                path: Default::default(),
            },
        ))]));
        assert!(h.items.is_empty());
        assert_eq!(h.diagnostics.len(), 1);
    }

    #[test]
    fn undone_actions_never_appear() {
        let c = ctx(Team::Away, 0);
        let out = play(c, PlayOutcome::Out);
        let h = linearize(&game(vec![out.clone(), Action::undo(out.id)]));
        assert!(h.items.is_empty());
    }

    #[test]
    fn final_game_gets_summary() {
        let h = linearize(&game(vec![
            play(ctx(Team::Away, 0), PlayOutcome::Out),
            Action::new(ActionKind::GameMetadataUpdate(MetadataPayload {
                status: Some(GameStatus::Final),
                ..Default::default()
            })),
        ]));
        let last = h.items.last().map(|i| i.kind);
        assert_eq!(last, Some(ItemKind::Summary));
    }
}
