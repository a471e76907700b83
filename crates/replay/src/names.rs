//! Runner names for the history feed.

use serde::Serialize;

use scorebook_model::{parse_runner_key, ActiveContext, RunnerMove};

use crate::state::GameState;

/// Where a runner's name came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NameSource {
    /// Carried on the action itself.
    Explicit,
    /// The move's runner key matched a lineup slot.
    RosterKey,
    /// Found by who was standing on the origin base.
    BasePath,
    /// Guessed as the batter before this one in the order. Legacy action
    /// shapes carry no anchor at all; this is not a reliable identity.
    PrecedingBatter,
    Unknown,
}

impl NameSource {
    /// True when the name is a guess rather than an anchored identity.
    pub fn is_heuristic(&self) -> bool {
        matches!(self, NameSource::PrecedingBatter | NameSource::Unknown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRunner {
    pub from: u8,
    pub to: u8,
    pub out: bool,
    pub name: Option<String>,
    pub source: NameSource,
}

/// Resolve the runner of `m` against `state` as it stood before the action
/// carrying the move was applied.
pub fn resolve(state: &GameState, ctx: &ActiveContext, m: &RunnerMove) -> ResolvedRunner {
    let (name, source) = lookup(state, ctx, m);
    ResolvedRunner {
        from: m.from,
        to: m.to,
        out: m.out,
        name,
        source,
    }
}

fn lookup(state: &GameState, ctx: &ActiveContext, m: &RunnerMove) -> (Option<String>, NameSource) {
    if let Some(name) = m.name.as_deref().filter(|n| !n.trim().is_empty()) {
        return (Some(name.to_string()), NameSource::Explicit);
    }

    if let Some(name) = m
        .key
        .as_deref()
        .and_then(parse_runner_key)
        .and_then(|(team, idx, _)| state.batter_name(team, idx))
    {
        return (Some(name), NameSource::RosterKey);
    }

    if let Some(name) = state
        .half_inning(ctx.inning, ctx.team)
        .find(|c| c.ctx != *ctx && c.path.standing_on() == Some(m.from))
        .and_then(|c| state.batter_name(c.ctx.team, c.ctx.batter_index))
    {
        return (Some(name), NameSource::BasePath);
    }

    let lineup_len = state.roster.side(ctx.team).slots.len();
    if ctx.batter_index < lineup_len {
        let preceding = ctx.batter_index.checked_sub(1).unwrap_or(lineup_len - 1);
        if let Some(name) = state.batter_name(ctx.team, preceding) {
            return (Some(name), NameSource::PrecedingBatter);
        }
    }

    (None, NameSource::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scorebook_model::{Game, Lineup, Rules, Team, FIRST, SECOND};
    use uuid::Uuid;

    fn state() -> GameState {
        GameState::new(&Game::new(
            Uuid::new_v4(),
            Lineup::new("Owls", &["Ada", "Bea", "Cal"]),
            Lineup::new("Hawks", &["Cy", "Di", "Ed"]),
            Rules::default(),
        ))
    }

    fn mv(key: Option<&str>, name: Option<&str>) -> RunnerMove {
        RunnerMove {
            key: key.map(str::to_string),
            name: name.map(str::to_string),
            from: FIRST,
            to: SECOND,
            out: false,
        }
    }

    #[test]
    fn resolution_order() {
        let mut s = state();
        let batter = ActiveContext::new(1, Team::Away, 2, 1);

        let r = resolve(&s, &batter, &mv(Some("away-0-1"), Some("Zed")));
        assert_eq!((r.name.as_deref(), r.source), (Some("Zed"), NameSource::Explicit));

        let r = resolve(&s, &batter, &mv(Some("away-0-1"), None));
        assert_eq!((r.name.as_deref(), r.source), (Some("Ada"), NameSource::RosterKey));

        s.cell_mut(ActiveContext::new(1, Team::Away, 0, 1)).path.reach(FIRST);
        let r = resolve(&s, &batter, &mv(None, None));
        assert_eq!((r.name.as_deref(), r.source), (Some("Ada"), NameSource::BasePath));
    }

    #[test]
    fn preceding_batter_fallback_is_flagged() {
        let s = state();
        let leadoff = ActiveContext::new(2, Team::Home, 0, 1);
        let r = resolve(&s, &leadoff, &mv(None, None));
        assert_eq!(r.name.as_deref(), Some("Ed"));
        assert_eq!(r.source, NameSource::PrecedingBatter);
        assert!(r.source.is_heuristic());
    }

    #[test]
    fn batter_outside_the_lineup_has_no_preceding_batter() {
        let s = state();
        for batter_index in [3, usize::MAX] {
            let stray = ActiveContext::new(1, Team::Away, batter_index, 1);
            let r = resolve(&s, &stray, &mv(None, None));
            assert_eq!((r.name, r.source), (None, NameSource::Unknown));
        }
    }
}
