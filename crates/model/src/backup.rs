//! Portable backup record for a whole game.
//!
//! JSON lines: the first line is a [`BackupHeader`], every following line is
//! one [`Action`] in log order. The format is independent of the live sync
//! protocol so a backup can be restored into any store.

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::error::ModelError;
use crate::game::{Game, GameHeader};

pub const BACKUP_FORMAT: &str = "scorebook-backup";
pub const BACKUP_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupHeader {
    pub format: String,
    pub version: u32,
    pub game: GameHeader,
    pub action_count: usize,
}

/// Result of restoring a backup.
#[derive(Debug, Clone)]
pub struct Restored {
    pub game: Game,
    /// `(line number, reason)` for every action line that was skipped.
    pub skipped: Vec<(usize, String)>,
}

pub fn export_game(game: &Game) -> Result<String, ModelError> {
    let header = BackupHeader {
        format: BACKUP_FORMAT.to_string(),
        version: BACKUP_FORMAT_VERSION,
        game: game.header(),
        action_count: game.actions.len(),
    };
    let mut out = serde_json::to_string(&header)?;
    out.push('\n');
    for action in &game.actions {
        out.push_str(&serde_json::to_string(action)?);
        out.push('\n');
    }
    Ok(out)
}

/// Restore a game from backup text.
///
/// A bad header fails the whole restore. A bad action line is skipped and
/// reported, matching how replay treats malformed actions.
pub fn import_game(text: &str) -> Result<Restored, ModelError> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty());

    let (_, first) = lines
        .next()
        .ok_or_else(|| ModelError::Backup("empty backup".to_string()))?;
    let header: BackupHeader = serde_json::from_str(first)
        .map_err(|e| ModelError::Backup(format!("unreadable header: {}", e)))?;
    if header.format != BACKUP_FORMAT {
        return Err(ModelError::Backup(format!(
            "unknown format '{}'",
            header.format
        )));
    }
    if header.version > BACKUP_FORMAT_VERSION {
        return Err(ModelError::Backup(format!(
            "backup version {} is newer than supported version {}",
            header.version, BACKUP_FORMAT_VERSION
        )));
    }

    let mut game = Game::from_header(header.game, Vec::new());
    let mut skipped = Vec::new();
    for (idx, line) in lines {
        let line_no = idx + 1;
        match serde_json::from_str::<Action>(line) {
            Ok(action) => {
                if let Err(e) = game.append(action) {
                    skipped.push((line_no, e.to_string()));
                }
            }
            Err(e) => skipped.push((line_no, e.to_string())),
        }
    }

    Ok(Restored { game, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionKind, ActiveContext, PitchKind, PitchPayload, Team};
    use crate::game::{Lineup, Rules};
    use uuid::Uuid;

    fn sample() -> Game {
        let mut game = Game::new(
            Uuid::new_v4(),
            Lineup::new("Owls", &["Ada"]),
            Lineup::new("Hawks", &["Cy"]),
            Rules::default(),
        );
        game.append(Action::new(ActionKind::GameStart)).unwrap();
        game.append(Action::new(ActionKind::Pitch(PitchPayload {
            ctx: ActiveContext::new(1, Team::Away, 0, 1),
            pitch: PitchKind::Foul,
        })))
        .unwrap();
        game
    }

    #[test]
    fn export_then_import_restores_log() {
        let game = sample();
        let text = export_game(&game).unwrap();
        assert_eq!(text.lines().count(), 3);

        let restored = import_game(&text).unwrap();
        assert!(restored.skipped.is_empty());
        assert_eq!(restored.game, game);
    }

    #[test]
    fn malformed_action_lines_are_skipped() {
        let game = sample();
        let mut text = export_game(&game).unwrap();
        text.push_str("{\"id\": \"nope\"}\n");

        let restored = import_game(&text).unwrap();
        assert_eq!(restored.game.actions.len(), 2);
        assert_eq!(restored.skipped.len(), 1);
        assert_eq!(restored.skipped[0].0, 4);
    }

    #[test]
    fn foreign_header_is_rejected() {
        let err = import_game("{\"format\": \"other\"}\n").unwrap_err();
        assert!(matches!(err, ModelError::Backup(_)));
        assert!(import_game("").is_err());
    }
}
