//! Replayed game state and the views derived from it.
//!
//! The state stores only per-cell facts (pitches, outcome, base path) and
//! the roster. Outs, score, hits, and base occupancy are computed from the
//! cells on demand, so a correction that rewrites a cell is reflected
//! everywhere without bookkeeping.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use scorebook_model::{
    ActiveContext, BasePath, Game, GameStatus, PitchKind, PlayOutcome, Roster, Rules, Team,
    FIRST, THIRD,
};

/// Everything recorded in one scorebook cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub ctx: ActiveContext,
    pub pitches: Vec<PitchKind>,
    pub outcome: Option<PlayOutcome>,
    pub code: Option<String>,
    pub hit: bool,
    pub path: BasePath,
}

impl Cell {
    pub fn new(ctx: ActiveContext) -> Self {
        Cell {
            ctx,
            pitches: Vec::new(),
            outcome: None,
            code: None,
            hit: false,
            path: BasePath::default(),
        }
    }

    pub fn balls(&self) -> u32 {
        self.pitches
            .iter()
            .filter(|p| matches!(p, PitchKind::Ball))
            .count() as u32
    }

    /// Strikes, with fouls counting only until two strikes.
    pub fn strikes(&self) -> u32 {
        let mut strikes = 0;
        for p in &self.pitches {
            match p {
                PitchKind::Strike => strikes += 1,
                PitchKind::Foul if strikes < 2 => strikes += 1,
                _ => {}
            }
        }
        strikes
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Score {
    pub away: u32,
    pub home: u32,
}

impl Score {
    pub fn get(&self, team: Team) -> u32 {
        match team {
            Team::Away => self.away,
            Team::Home => self.home,
        }
    }

    fn bump(&mut self, team: Team) {
        match team {
            Team::Away => self.away += 1,
            Team::Home => self.home += 1,
        }
    }
}

/// Narrative-shaped snapshot used by the history feed: what a reader of the
/// scorebook sees, not the internal bitmaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NarrativeState {
    pub outs: u8,
    /// Runner names on first, second, third.
    pub bases: [Option<String>; 3],
    pub score: Score,
    pub hits: Score,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    pub roster: Roster,
    pub rules: Rules,
    pub status: GameStatus,
    pub cells: BTreeMap<ActiveContext, Cell>,
    /// Context of the most recent action that had one. Supplemental actions
    /// without a context attach here.
    pub last_ctx: Option<ActiveContext>,
}

impl GameState {
    /// Initial state for a game: roster back at its starters, no cells.
    pub fn new(game: &Game) -> Self {
        GameState::from_parts(game.roster.at_start(), game.rules)
    }

    pub fn from_parts(roster: Roster, rules: Rules) -> Self {
        GameState {
            roster,
            rules,
            status: GameStatus::Scheduled,
            cells: BTreeMap::new(),
            last_ctx: None,
        }
    }

    pub fn cell(&self, ctx: &ActiveContext) -> Option<&Cell> {
        self.cells.get(ctx)
    }

    pub(crate) fn cell_mut(&mut self, ctx: ActiveContext) -> &mut Cell {
        self.cells.entry(ctx).or_insert_with(|| Cell::new(ctx))
    }

    pub fn half_inning(&self, inning: u32, team: Team) -> impl Iterator<Item = &Cell> {
        self.cells
            .values()
            .filter(move |c| c.ctx.inning == inning && c.ctx.team == team)
    }

    pub fn outs(&self, inning: u32, team: Team) -> u8 {
        let outs: u32 = self
            .half_inning(inning, team)
            .map(|c| c.path.out.count_ones())
            .sum();
        outs.min(u8::MAX as u32) as u8
    }

    pub fn score(&self) -> Score {
        let mut score = Score::default();
        for cell in self.cells.values().filter(|c| c.path.has_scored()) {
            score.bump(cell.ctx.team);
        }
        score
    }

    pub fn hits(&self) -> Score {
        let mut hits = Score::default();
        for cell in self.cells.values().filter(|c| c.hit) {
            hits.bump(cell.ctx.team);
        }
        hits
    }

    /// The cell of the runner standing on `base` in a half-inning.
    pub fn runner_on(&self, inning: u32, team: Team, base: u8) -> Option<&Cell> {
        self.half_inning(inning, team)
            .find(|c| c.path.standing_on() == Some(base))
    }

    /// Columns used per half-inning.
    pub fn column_set(&self) -> BTreeMap<(u32, Team), BTreeSet<u32>> {
        let mut columns: BTreeMap<(u32, Team), BTreeSet<u32>> = BTreeMap::new();
        for ctx in self.cells.keys() {
            columns
                .entry(ctx.half_inning())
                .or_default()
                .insert(ctx.column);
        }
        columns
    }

    /// Name of whoever currently occupies a lineup slot.
    pub fn batter_name(&self, team: Team, batter_index: usize) -> Option<String> {
        self.roster
            .side(team)
            .slots
            .get(batter_index)
            .map(|s| s.current.name.clone())
    }

    pub fn narrative(&self, inning: u32, team: Team) -> NarrativeState {
        let mut bases: [Option<String>; 3] = [None, None, None];
        for base in FIRST..=THIRD {
            bases[(base - 1) as usize] = self
                .runner_on(inning, team, base)
                .and_then(|c| self.batter_name(c.ctx.team, c.ctx.batter_index));
        }
        NarrativeState {
            outs: self.outs(inning, team),
            bases,
            score: self.score(),
            hits: self.hits(),
        }
    }

    /// Game totals with no half-inning in focus.
    pub fn totals(&self) -> NarrativeState {
        NarrativeState {
            outs: 0,
            bases: [None, None, None],
            score: self.score(),
            hits: self.hits(),
        }
    }
}
