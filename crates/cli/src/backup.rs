//! `scorebook export` and `scorebook import`: move whole games between a
//! node and backup files using the client sync protocol.

use std::path::Path;
use std::process;

use serde_json::json;

use scorebook_model::{export_game, GameId};
use scorebook_sync::{CreateRequest, HttpTransport, SyncError, SyncTransport};

use crate::{load_backup, print_json, report_error, OutputFormat};

fn transport(node: &str, user: Option<&str>) -> HttpTransport {
    let transport = HttpTransport::new(node);
    match user {
        Some(u) => transport.with_user(u),
        None => transport,
    }
}

fn runtime(output: OutputFormat, quiet: bool) -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(
                &format!("error: failed to start runtime: {}", e),
                output,
                quiet,
            );
            process::exit(1);
        }
    }
}

pub(crate) fn cmd_export(
    node: &str,
    game_id: GameId,
    out: Option<&Path>,
    user: Option<&str>,
    output: OutputFormat,
    quiet: bool,
) {
    let transport = transport(node, user);
    let game = match runtime(output, quiet).block_on(transport.fetch(game_id)) {
        Ok(g) => g,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    };
    let text = match export_game(&game) {
        Ok(t) => t,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    let Some(path) = out else {
        print!("{}", text);
        return;
    };
    if let Err(e) = std::fs::write(path, &text) {
        report_error(
            &format!("error: cannot write '{}': {}", path.display(), e),
            output,
            quiet,
        );
        process::exit(1);
    }
    match output {
        OutputFormat::Json => print_json(&json!({
            "gameId": game.id,
            "revision": game.revision,
            "actions": game.actions.len(),
            "path": path.display().to_string(),
        })),
        OutputFormat::Text => {
            if !quiet {
                println!(
                    "Exported game {} (revision {}, {} actions) to {}",
                    game.id,
                    game.revision,
                    game.actions.len(),
                    path.display()
                );
            }
        }
    }
}

pub(crate) fn cmd_import(
    node: &str,
    backup: &Path,
    user: Option<&str>,
    output: OutputFormat,
    quiet: bool,
) {
    let restored = load_backup(backup, output, quiet);
    let game = restored.game;
    let game_id = game.id;
    let transport = transport(node, user);

    let ack = match runtime(output, quiet).block_on(transport.create(CreateRequest { game })) {
        Ok(ack) => ack,
        Err(SyncError::Conflict { .. }) => {
            report_error(
                &format!("error: game {} already exists on {}", game_id, node),
                output,
                quiet,
            );
            process::exit(1);
        }
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    match output {
        OutputFormat::Json => print_json(&json!({
            "ack": ack,
            "skippedLines": restored.skipped.len(),
        })),
        OutputFormat::Text => {
            if !quiet {
                println!(
                    "Imported game {} at revision {} ({} actions, {} lines skipped)",
                    ack.game_id,
                    ack.revision,
                    ack.length,
                    restored.skipped.len()
                );
            }
        }
    }
}
