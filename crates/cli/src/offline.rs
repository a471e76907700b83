//! `scorebook replay` and `scorebook history`: read a backup file and
//! interpret it locally, with no node involved.

use std::path::Path;

use serde_json::json;

use scorebook_model::{Game, Team};
use scorebook_replay::{
    linearize, replay_with_diagnostics, GameState, HistoryItem, ItemKind, NarrativeState,
};

use crate::{load_backup, print_json, OutputFormat};

/// Runs scored in each half-inning, indexed by inning.
fn line_score(state: &GameState) -> Vec<(u32, u32, u32)> {
    let last_inning = state
        .cells
        .keys()
        .map(|ctx| ctx.inning)
        .max()
        .unwrap_or(0);
    (1..=last_inning)
        .map(|inning| {
            let runs = |team| {
                state
                    .half_inning(inning, team)
                    .filter(|c| c.path.has_scored())
                    .count() as u32
            };
            (inning, runs(Team::Away), runs(Team::Home))
        })
        .collect()
}

pub(crate) fn cmd_replay(backup: &Path, output: OutputFormat, quiet: bool) {
    let restored = load_backup(backup, output, quiet);
    let game = restored.game;
    let result = replay_with_diagnostics(&GameState::new(&game), &game.actions);
    let state = result.state;
    let score = state.score();
    let hits = state.hits();
    let innings = line_score(&state);

    match output {
        OutputFormat::Json => {
            let innings: Vec<_> = innings
                .iter()
                .map(|(inning, away, home)| json!({"inning": inning, "away": away, "home": home}))
                .collect();
            print_json(&json!({
                "gameId": game.id,
                "revision": game.revision,
                "actions": game.actions.len(),
                "status": state.status,
                "score": score,
                "hits": hits,
                "innings": innings,
                "diagnostics": result.diagnostics,
                "skippedLines": restored.skipped.len(),
            }));
        }
        OutputFormat::Text => {
            let (away, home) = team_names(&game);
            println!(
                "{} {}, {} {} ({:?}, {} actions)",
                away,
                score.away,
                home,
                score.home,
                state.status,
                game.actions.len()
            );
            println!("hits: {} {}, {} {}", away, hits.away, home, hits.home);
            if !innings.is_empty() {
                let header: Vec<String> = innings.iter().map(|(i, _, _)| format!("{i:>3}")).collect();
                let away_runs: Vec<String> =
                    innings.iter().map(|(_, a, _)| format!("{a:>3}")).collect();
                let home_runs: Vec<String> =
                    innings.iter().map(|(_, _, h)| format!("{h:>3}")).collect();
                println!("{:<12}{}", "", header.join(""));
                println!("{:<12}{}", away, away_runs.join(""));
                println!("{:<12}{}", home, home_runs.join(""));
            }
            if !quiet {
                for d in &result.diagnostics {
                    eprintln!("warning: {}", d);
                }
            }
        }
    }
}

pub(crate) fn cmd_history(backup: &Path, all: bool, output: OutputFormat, quiet: bool) {
    let restored = load_backup(backup, output, quiet);
    let history = linearize(&restored.game);
    let items: Vec<&HistoryItem> = history
        .items
        .iter()
        .filter(|i| all || !i.is_stricken)
        .collect();

    match output {
        OutputFormat::Json => print_json(&json!({
            "items": items,
            "diagnostics": history.diagnostics,
        })),
        OutputFormat::Text => {
            for item in items {
                println!("{}", render_item(item));
            }
            if !quiet {
                for d in &history.diagnostics {
                    eprintln!("warning: {}", d);
                }
            }
        }
    }
}

fn team_names(game: &Game) -> (&str, &str) {
    (&game.roster.away.name, &game.roster.home.name)
}

fn render_item(item: &HistoryItem) -> String {
    match item.kind {
        ItemKind::InningHeader => format!(
            "── {} {} ──",
            match item.team {
                Some(Team::Away) => "Top",
                _ => "Bottom",
            },
            item.inning.unwrap_or_default()
        ),
        ItemKind::Summary => format!("Final: {}", render_state(&item.state_before)),
        ItemKind::Play => {
            let mark = if item.is_stricken {
                "x"
            } else if item.is_correction {
                "*"
            } else {
                " "
            };
            let batter = item.batter.as_deref().unwrap_or("?");
            let events: Vec<&str> = item.events.iter().map(|e| e.kind.type_name()).collect();
            let after = item
                .state_after
                .as_ref()
                .map(render_state)
                .unwrap_or_else(|| "stricken".to_string());
            format!(
                "{} {:<10} {:<16} {:<40} {}",
                mark,
                item.ctx_key.as_deref().unwrap_or(""),
                batter,
                events.join(","),
                after
            )
        }
    }
}

fn render_state(state: &NarrativeState) -> String {
    let bases: Vec<&str> = state
        .bases
        .iter()
        .map(|b| b.as_deref().unwrap_or("-"))
        .collect();
    format!(
        "{} out, [{}], {}-{}",
        state.outs,
        bases.join(" "),
        state.score.away,
        state.score.home
    )
}
