//! Error types for SkillBus.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use std::any::Any;

use thiserror::Error;

/// The top-level error type for catalog and context operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown skill: {0}")]
    UnknownSkill(String),

    #[error("Skill error: {0}")]
    Skill(#[from] SkillError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures raised by a skill's own lifecycle or execute methods.
///
/// These never cross the host boundary: [`crate::SkillHost`] turns them into
/// log lines, status changes and failed [`crate::ExecutionResult`]s.
#[derive(Debug, Clone, Error)]
pub enum SkillError {
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),
}

/// Failures raised by event handlers during dispatch.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("Handler '{handler}' failed: {reason}")]
    Failed { handler: String, reason: String },
}

impl HandlerError {
    pub fn failed(handler: impl Into<String>, reason: impl ToString) -> Self {
        Self::Failed {
            handler: handler.into(),
            reason: reason.to_string(),
        }
    }
}

/// Extract a readable message from a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
