//! Action types: one immutable, typed record per scoring event or correction.
//!
//! Wire format (adjacently tagged):
//!
//! ```json
//! {"id": "…", "timestamp": 1700000000000, "type": "PITCH",
//!  "payload": {"ctx": {"inning": 1, "team": "away", "batterIndex": 0, "column": 1},
//!              "pitch": "ball"}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;
use crate::game::{GameStatus, Player};

pub type ActionId = Uuid;

pub const FIRST: u8 = 1;
pub const SECOND: u8 = 2;
pub const THIRD: u8 = 3;
pub const HOME: u8 = 4;

// ──────────────────────────────────────────────
// Context
// ──────────────────────────────────────────────

/// Which side is batting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Away,
    Home,
}

impl Team {
    pub fn as_str(&self) -> &'static str {
        match self {
            Team::Away => "away",
            Team::Home => "home",
        }
    }

    pub fn parse(s: &str) -> Option<Team> {
        match s {
            "away" => Some(Team::Away),
            "home" => Some(Team::Home),
            _ => None,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The plate appearance an action belongs to: one scorebook cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveContext {
    pub inning: u32,
    pub team: Team,
    pub batter_index: usize,
    /// Scorebook column within the inning. A team that bats around uses a
    /// second column for the same inning.
    pub column: u32,
}

impl ActiveContext {
    pub fn new(inning: u32, team: Team, batter_index: usize, column: u32) -> Self {
        ActiveContext {
            inning,
            team,
            batter_index,
            column,
        }
    }

    /// `"{inning}-{team}-{batterIndex}-{column}"`.
    pub fn ctx_key(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.inning, self.team, self.batter_index, self.column
        )
    }

    /// Inverse of [`ctx_key`](Self::ctx_key).
    pub fn parse_key(key: &str) -> Option<ActiveContext> {
        let mut parts = key.split('-');
        let inning = parts.next()?.parse().ok()?;
        let team = Team::parse(parts.next()?)?;
        let batter_index = parts.next()?.parse().ok()?;
        let column = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(ActiveContext::new(inning, team, batter_index, column))
    }

    /// Runner key `"{team}-{batterIndex}-{column}"` as carried on runner moves.
    pub fn runner_key(&self) -> String {
        format!("{}-{}-{}", self.team, self.batter_index, self.column)
    }

    /// The half-inning this cell belongs to.
    pub fn half_inning(&self) -> (u32, Team) {
        (self.inning, self.team)
    }
}

/// Parse a runner key into `(team, batter_index, column)`.
pub fn parse_runner_key(key: &str) -> Option<(Team, usize, u32)> {
    let mut parts = key.split('-');
    let team = Team::parse(parts.next()?)?;
    let batter_index = parts.next()?.parse().ok()?;
    let column = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((team, batter_index, column))
}

// ──────────────────────────────────────────────
// Base path bitmaps
// ──────────────────────────────────────────────

/// Path of one batter-runner around the bases.
///
/// Each field is a bitmap over bases, bit 0 = first base through bit 3 = home.
/// `occupied` marks every base reached safely, `out` the base the runner was
/// retired going to, and `scored` marks home once the run has crossed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BasePath {
    #[serde(default)]
    pub occupied: u8,
    #[serde(default)]
    pub out: u8,
    #[serde(default)]
    pub scored: u8,
}

impl BasePath {
    pub fn bit(base: u8) -> u8 {
        debug_assert!((FIRST..=HOME).contains(&base));
        1 << (base - 1)
    }

    /// Mark every base up to and including `base` as reached.
    pub fn reach(&mut self, base: u8) {
        for b in FIRST..=base.min(HOME) {
            self.occupied |= Self::bit(b);
        }
        if base >= HOME {
            self.scored |= Self::bit(HOME);
        }
    }

    pub fn put_out(&mut self, base: u8) {
        self.out |= Self::bit(base.clamp(FIRST, HOME));
    }

    /// Highest base reached, or 0 when the batter never reached first.
    pub fn furthest(&self) -> u8 {
        (FIRST..=HOME)
            .rev()
            .find(|b| self.occupied & Self::bit(*b) != 0)
            .unwrap_or(0)
    }

    pub fn is_out(&self) -> bool {
        self.out != 0
    }

    pub fn has_scored(&self) -> bool {
        self.scored & Self::bit(HOME) != 0
    }

    /// The base this runner is standing on: reached it, not the next one,
    /// not retired, not scored.
    pub fn standing_on(&self) -> Option<u8> {
        if self.is_out() || self.has_scored() {
            return None;
        }
        match self.furthest() {
            b @ FIRST..=THIRD => Some(b),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0 && self.out == 0 && self.scored == 0
    }
}

// ──────────────────────────────────────────────
// Payloads
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PitchKind {
    Ball,
    Strike,
    Foul,
    InPlay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchPayload {
    pub ctx: ActiveContext,
    pub pitch: PitchKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayOutcome {
    Safe,
    Out,
}

/// A runner moving between bases as part of a play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerMove {
    /// `"{team}-{batterIndex}-{column}"` of the runner's own cell. Older
    /// action shapes omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub from: u8,
    pub to: u8,
    #[serde(default)]
    pub out: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayResultPayload {
    pub ctx: ActiveContext,
    pub outcome: PlayOutcome,
    /// Furthest base the batter reached, or the base the batter was retired
    /// going to when `outcome` is `Out`.
    pub base: u8,
    /// Scorer's notation: `1B`, `2B`, `K`, `6-3`, ...
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub hit: bool,
    #[serde(default)]
    pub runners: Vec<RunnerMove>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerAdvancePayload {
    pub ctx: ActiveContext,
    pub runner: RunnerMove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerBatchPayload {
    pub ctx: ActiveContext,
    pub runners: Vec<RunnerMove>,
}

/// Replace a cell's base path verbatim. The context may be omitted, in
/// which case the override supplements the previous action's cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualPathPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx: Option<ActiveContext>,
    pub path: BasePath,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionPayload {
    pub ctx: ActiveContext,
    pub team: Team,
    pub slot: usize,
    pub player: Player,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

/// Destination of a moved play. Missing inning or team are taken from the
/// source context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inning: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<Team>,
    pub batter_index: usize,
    pub column: u32,
}

impl MoveTarget {
    pub fn resolve(&self, source: &ActiveContext) -> ActiveContext {
        ActiveContext {
            inning: self.inning.unwrap_or(source.inning),
            team: self.team.unwrap_or(source.team),
            batter_index: self.batter_index,
            column: self.column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovePlayPayload {
    pub source: ActiveContext,
    pub target: MoveTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearDataPayload {
    pub ctx: ActiveContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoPayload {
    pub target: ActionId,
}

/// Patch of game-level metadata. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub away_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub innings: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<GameStatus>,
}

// ──────────────────────────────────────────────
// Action
// ──────────────────────────────────────────────

/// One case per action kind. The replay engine is the only place that
/// interprets these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    GameStart,
    Pitch(PitchPayload),
    PlayResult(PlayResultPayload),
    RunnerAdvance(RunnerAdvancePayload),
    RunnerBatchUpdate(RunnerBatchPayload),
    ManualPathOverride(ManualPathPayload),
    Substitution(SubstitutionPayload),
    MovePlay(MovePlayPayload),
    ClearData(ClearDataPayload),
    Undo(UndoPayload),
    GameMetadataUpdate(MetadataPayload),
}

impl ActionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ActionKind::GameStart => "GAME_START",
            ActionKind::Pitch(_) => "PITCH",
            ActionKind::PlayResult(_) => "PLAY_RESULT",
            ActionKind::RunnerAdvance(_) => "RUNNER_ADVANCE",
            ActionKind::RunnerBatchUpdate(_) => "RUNNER_BATCH_UPDATE",
            ActionKind::ManualPathOverride(_) => "MANUAL_PATH_OVERRIDE",
            ActionKind::Substitution(_) => "SUBSTITUTION",
            ActionKind::MovePlay(_) => "MOVE_PLAY",
            ActionKind::ClearData(_) => "CLEAR_DATA",
            ActionKind::Undo(_) => "UNDO",
            ActionKind::GameMetadataUpdate(_) => "GAME_METADATA_UPDATE",
        }
    }

    /// The cell this action belongs to. A moved play reports its source.
    pub fn context(&self) -> Option<ActiveContext> {
        match self {
            ActionKind::Pitch(p) => Some(p.ctx),
            ActionKind::PlayResult(p) => Some(p.ctx),
            ActionKind::RunnerAdvance(p) => Some(p.ctx),
            ActionKind::RunnerBatchUpdate(p) => Some(p.ctx),
            ActionKind::ManualPathOverride(p) => p.ctx,
            ActionKind::Substitution(p) => Some(p.ctx),
            ActionKind::MovePlay(p) => Some(p.source),
            ActionKind::ClearData(p) => Some(p.ctx),
            ActionKind::GameStart | ActionKind::Undo(_) | ActionKind::GameMetadataUpdate(_) => {
                None
            }
        }
    }

    /// Establishes or replaces a play's outcome.
    pub fn is_generative(&self) -> bool {
        matches!(self, ActionKind::PlayResult(_) | ActionKind::ClearData(_))
    }

    pub fn undo_target(&self) -> Option<ActionId> {
        match self {
            ActionKind::Undo(u) => Some(u.target),
            _ => None,
        }
    }

    /// Runner sub-records carried by this action.
    pub fn runner_moves(&self) -> &[RunnerMove] {
        match self {
            ActionKind::PlayResult(p) => &p.runners,
            ActionKind::RunnerAdvance(p) => std::slice::from_ref(&p.runner),
            ActionKind::RunnerBatchUpdate(p) => &p.runners,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    /// Milliseconds since the Unix epoch, assigned by the recording client.
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl Action {
    /// A new action with a fresh id, stamped now.
    pub fn new(kind: ActionKind) -> Self {
        Action {
            id: Uuid::new_v4(),
            timestamp: crate::now_millis(),
            kind,
        }
    }

    pub fn with_id(id: ActionId, timestamp: i64, kind: ActionKind) -> Self {
        Action {
            id,
            timestamp,
            kind,
        }
    }

    pub fn undo(target: ActionId) -> Self {
        Action::new(ActionKind::Undo(UndoPayload { target }))
    }

    pub fn context(&self) -> Option<ActiveContext> {
        self.kind.context()
    }

    pub fn is_undo(&self) -> bool {
        matches!(self.kind, ActionKind::Undo(_))
    }

    /// Structural checks that do not need game state.
    pub fn validate(&self) -> Result<(), ModelError> {
        let fail = |message: String| ModelError::Validation {
            action_id: self.id,
            message,
        };
        let check_moves = |moves: &[RunnerMove]| -> Result<(), ModelError> {
            for m in moves {
                if !(FIRST..=THIRD).contains(&m.from) {
                    return Err(fail(format!("runner origin base {} out of range", m.from)));
                }
                if !(FIRST..=HOME).contains(&m.to) || m.to < m.from {
                    return Err(fail(format!(
                        "runner destination base {} invalid from {}",
                        m.to, m.from
                    )));
                }
            }
            Ok(())
        };

        match &self.kind {
            ActionKind::PlayResult(p) => {
                if !(FIRST..=HOME).contains(&p.base) {
                    return Err(fail(format!("batter base {} out of range", p.base)));
                }
                check_moves(&p.runners)
            }
            ActionKind::RunnerAdvance(p) => check_moves(std::slice::from_ref(&p.runner)),
            ActionKind::RunnerBatchUpdate(p) => {
                if p.runners.is_empty() {
                    return Err(fail("empty runner batch".to_string()));
                }
                check_moves(&p.runners)
            }
            ActionKind::ManualPathOverride(p) => {
                let mask = 0b1111;
                if p.path.occupied & !mask != 0 || p.path.out & !mask != 0 {
                    return Err(fail("base path bits beyond home".to_string()));
                }
                Ok(())
            }
            ActionKind::Substitution(p) => {
                if p.player.name.trim().is_empty() {
                    return Err(fail("substitute has no name".to_string()));
                }
                Ok(())
            }
            ActionKind::Undo(u) if u.target == self.id => {
                Err(fail("undo targets itself".to_string()))
            }
            _ => Ok(()),
        }
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
