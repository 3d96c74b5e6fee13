//! Plugin runtime error types.

use thiserror::Error;

/// Result type for plugin runtime operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors that can occur while registering plugin contributions.
///
/// Only [`PluginError::Validation`] is ever returned to plugin code at
/// registration time. Render failures are constructed for logging and are
/// never propagated into the host render path.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A registration was rejected before touching any registry state.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A code block renderer or post-processor failed.
    #[error("Plugin '{plugin_id}' renderer '{id}' failed: {message}")]
    Render { plugin_id: String, id: String, message: String },
}

impl PluginError {
    /// Shorthand for a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether this error was raised by registration-time validation.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
