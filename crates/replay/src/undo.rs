//! Undo reduction and undo/redo target selection.
//!
//! An `UNDO` that is itself undone has no effect, so undoing an undo is how
//! a redo is expressed. One backward scan resolves any nesting depth: by the
//! time an `UNDO` is reached, every later action that could undo it has
//! already been seen.

use std::collections::HashSet;

use scorebook_model::{Action, ActionId, ActionKind};

/// Ids of every action removed by a live `UNDO`.
pub fn undone_ids(actions: &[Action]) -> HashSet<ActionId> {
    let mut undone = HashSet::new();
    for action in actions.iter().rev() {
        if undone.contains(&action.id) {
            continue;
        }
        if let Some(target) = action.kind.undo_target() {
            undone.insert(target);
        }
    }
    undone
}

/// The log minus undone actions and minus every `UNDO` marker, in order.
pub fn effective_log(actions: &[Action]) -> Vec<&Action> {
    let undone = undone_ids(actions);
    actions
        .iter()
        .filter(|a| !a.is_undo() && !undone.contains(&a.id))
        .collect()
}

/// Most recent forward action that an `UNDO` appended now would remove.
///
/// `GAME_START` is never offered: undoing it would leave a log with no
/// beginning.
pub fn undo_target_id(actions: &[Action]) -> Option<ActionId> {
    let undone = undone_ids(actions);
    actions
        .iter()
        .rev()
        .filter(|a| !undone.contains(&a.id))
        .find(|a| !a.is_undo() && !matches!(a.kind, ActionKind::GameStart))
        .map(|a| a.id)
}

/// The `UNDO` that a redo should cancel, if redo is currently possible.
///
/// Walks back over live actions. Undos of undos are earlier redos and are
/// passed over. The first live forward action ends the search: anything
/// recorded after an undo invalidates redo.
pub fn redo_target_id(actions: &[Action]) -> Option<ActionId> {
    let undone = undone_ids(actions);
    let by_id: std::collections::HashMap<ActionId, &Action> =
        actions.iter().map(|a| (a.id, a)).collect();

    for action in actions.iter().rev() {
        if undone.contains(&action.id) {
            continue;
        }
        match action.kind.undo_target() {
            None => return None,
            Some(target) => {
                let target_is_undo = by_id.get(&target).is_some_and(|t| t.is_undo());
                if !target_is_undo {
                    return Some(action.id);
                }
            }
        }
    }
    None
}
