//! Scorebook action log model.
//!
//! A game is an append-only log of immutable, typed [`Action`]s. Nothing in
//! this crate interprets the log; replay lives in `scorebook-replay`. The
//! types here are the shared vocabulary of the client, the store, and the
//! replication cluster, and they define the JSON wire format.

pub mod access;
pub mod action;
pub mod backup;
pub mod error;
pub mod game;

pub use access::{Access, AccessPolicy, GamePermissions, OpenAccess, PermissionTable};
pub use action::{
    parse_runner_key, Action, ActionId, ActionKind, ActiveContext, BasePath, ClearDataPayload,
    ManualPathPayload, MetadataPayload, MovePlayPayload, MoveTarget, PitchKind, PitchPayload,
    PlayOutcome, PlayResultPayload, RunnerAdvancePayload, RunnerBatchPayload, RunnerMove,
    SubstitutionPayload, Team, UndoPayload, FIRST, HOME, SECOND, THIRD,
};
pub use backup::{export_game, import_game, BackupHeader, Restored, BACKUP_FORMAT_VERSION};
pub use error::ModelError;
pub use game::{
    log_digest, Game, GameHeader, GameId, GameStatus, Lineup, Player, Revision, Roster,
    RosterSlot, Rules, SubstitutionRecord, TeamRecord,
};

/// Current time as milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Current time as an RFC 3339 string.
pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
