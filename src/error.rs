//! Error taxonomy for the compositor core
//!
//! Fatal collaborator failures and configuration errors are errors; lookups
//! that find nothing are not (they return `Option`).

use thiserror::Error;

use crate::backend::OutputHandle;
use crate::registry::OutputId;

/// Failure reported by an external collaborator (backend, renderer, seat...)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// A required resource could not be created; the process cannot continue
    #[error("failed to initialize {resource}: {reason}")]
    Init { resource: &'static str, reason: String },

    /// Rendering state for an output could not be set up
    #[error("unable to initialize renderer for output {0}")]
    RenderInit(String),

    /// The backend refused an output state
    #[error("output {output} rejected state: {reason}")]
    Commit { output: String, reason: String },

    /// Keymap compilation failed
    #[error("keymap compilation failed: {0}")]
    Keymap(String),

    /// The backend does not know the handle it was given
    #[error("unknown backend handle {0}")]
    UnknownHandle(u64),
}

/// Output arrangement could not be computed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// The layout engine produced an empty box for enabled outputs
    #[error("output layout produced an empty box for {}", names.join(", "))]
    EmptyBox { outputs: Vec<OutputId>, names: Vec<String> },
}

/// An output-management configuration was rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OutputConfigError {
    #[error("configuration names unknown output {0:?}")]
    UnknownOutput(OutputHandle),

    #[error("output {0} would be enabled without a usable mode")]
    NoMode(String),

    #[error("output {output} has invalid scale {scale}")]
    InvalidScale { output: String, scale: f32 },

    #[error("output {0} would have no place in the layout")]
    Unplaced(String),

    #[error("backend rejected configuration: {0}")]
    Backend(#[from] BackendError),
}

/// Umbrella error for event handlers
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    OutputConfig(#[from] OutputConfigError),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("status subscriber failed: {0}")]
    Status(#[from] serde_json::Error),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Errors after which the compositor cannot keep running
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Backend(BackendError::Init { .. }))
    }
}
