//! Scorebook replay engine.
//!
//! Turns an action log into game state. Everything here is a pure function
//! of its inputs: no clocks, no randomness, no shared mutable state. The
//! same log always produces the same [`GameState`], whether it is replayed
//! from scratch or one action at a time.
//!
//! - [`engine`]: forward application of one action, and full replay
//! - [`undo`]: effective-log reduction and undo/redo target selection
//! - [`history`]: the reviewable, per-item-snapshotted play feed
//! - [`names`]: runner name resolution for the feed

pub mod diagnostic;
pub mod engine;
pub mod history;
pub mod names;
pub mod state;
pub mod undo;

pub use diagnostic::Diagnostic;
pub use engine::{
    apply, replay, replay_game, replay_incremental, replay_with_diagnostics, Replay,
};
pub use history::{linearize, History, HistoryItem, ItemKind};
pub use names::{NameSource, ResolvedRunner};
pub use state::{Cell, GameState, NarrativeState, Score};
pub use undo::{effective_log, redo_target_id, undo_target_id, undone_ids};
