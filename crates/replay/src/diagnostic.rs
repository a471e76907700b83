use std::fmt;

use serde::Serialize;

use scorebook_model::{Action, ActionId};

/// A recoverable problem found while interpreting an action.
///
/// Replay and linearization never abort on bad input; they skip the action
/// (or the bad part of it) and report one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub action_id: Option<ActionId>,
    pub action_type: &'static str,
    pub message: String,
}

impl Diagnostic {
    pub fn for_action(action: &Action, message: impl Into<String>) -> Self {
        Diagnostic {
            action_id: Some(action.id),
            action_type: action.kind.type_name(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action_id {
            Some(id) => write!(f, "{} {}: {}", self.action_type, id, self.message),
            None => write!(f, "{}: {}", self.action_type, self.message),
        }
    }
}
