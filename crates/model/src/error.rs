use crate::action::ActionId;

/// Errors raised while building or decoding model values.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// An action whose payload violates a structural rule (base out of
    /// range, empty runner batch, and so on).
    #[error("invalid action {action_id}: {message}")]
    Validation { action_id: ActionId, message: String },

    /// An action id that already exists in the log was appended again.
    #[error("duplicate action id {0}")]
    DuplicateAction(ActionId),

    /// A backup file that cannot be restored.
    #[error("malformed backup: {0}")]
    Backup(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
