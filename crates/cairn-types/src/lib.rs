//! Shared types and errors for the Cairn build engine.
//!
//! This crate provides the foundational types used across all other Cairn crates:
//! - `CairnError` — unified error taxonomy for project definition and task invocation
//! - `ProjectState` — lifecycle of a project definition
//! - `TaskStatus` — lifecycle of a single task invocation
//! - `Value` — the dynamic value stored in project attributes

use serde::{Deserialize, Serialize};

/// Dynamic attribute value. Attributes are JSON-shaped so that Buildfiles and
/// extensions can exchange them without a shared schema.
pub type Value = serde_json::Value;

/// Unified error type for all Cairn subsystems.
#[derive(Debug, thiserror::Error)]
pub enum CairnError {
    // === Definition Errors ===
    #[error("You cannot define the same project ({name}) more than once")]
    DuplicateProject { name: String },

    #[error(
        "You can only define a sub project ({name}) within the definition of its parent project (active scope: {scope})"
    )]
    InvalidNesting { name: String, scope: String },

    #[error("Invalid project name {name:?}: {reason}")]
    InvalidProjectName { name: String, reason: String },

    #[error("No such project {name}")]
    ProjectNotFound { name: String },

    #[error("Project {name} requires parent project {parent}, which is not defined")]
    ParentMissing { name: String, parent: String },

    #[error("Circular evaluation of project {name} (evaluating: {chain})")]
    CircularEvaluation { name: String, chain: String },

    #[error("Definition of project {name} failed earlier in this run")]
    EvaluationFailed { name: String },

    #[error("Cannot set base directory of {project} twice, or after reading its value")]
    BaseDirAlreadySet { project: String },

    // === Attribute Errors ===
    #[error("Project {project} has no attribute '{attribute}'")]
    UnknownAttribute { project: String, attribute: String },

    #[error("Attribute '{attribute}' of project {project} has the wrong type: {message}")]
    AttributeType {
        project: String,
        attribute: String,
        message: String,
    },

    // === Task Errors ===
    #[error(
        "You cannot define a project task outside the project definition, and no task {name} defined in the project"
    )]
    TaskNotFound { name: String },

    #[error("Circular dependency detected: {chain}")]
    CircularTaskDependency { chain: String },

    #[error("Task '{task}' failed: {message}")]
    TaskFailed { task: String, message: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl CairnError {
    /// Returns `true` for errors raised while project definitions are being
    /// registered or evaluated, as opposed to while tasks execute.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            CairnError::DuplicateProject { .. }
                | CairnError::InvalidNesting { .. }
                | CairnError::InvalidProjectName { .. }
                | CairnError::ProjectNotFound { .. }
                | CairnError::ParentMissing { .. }
                | CairnError::CircularEvaluation { .. }
                | CairnError::EvaluationFailed { .. }
                | CairnError::BaseDirAlreadySet { .. }
                | CairnError::UnknownAttribute { .. }
                | CairnError::AttributeType { .. }
        )
    }

    /// The project or task name the error is about, when there is one.
    pub fn subject(&self) -> Option<&str> {
        match self {
            CairnError::DuplicateProject { name }
            | CairnError::InvalidNesting { name, .. }
            | CairnError::InvalidProjectName { name, .. }
            | CairnError::ProjectNotFound { name }
            | CairnError::ParentMissing { name, .. }
            | CairnError::CircularEvaluation { name, .. }
            | CairnError::EvaluationFailed { name }
            | CairnError::TaskNotFound { name } => Some(name),
            CairnError::BaseDirAlreadySet { project }
            | CairnError::UnknownAttribute { project, .. }
            | CairnError::AttributeType { project, .. } => Some(project),
            CairnError::TaskFailed { task, .. } => Some(task),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, CairnError>`.
pub type Result<T> = std::result::Result<T, CairnError>;

// ---------------------------------------------------------------------------
// ProjectState — lifecycle of a project definition
// ---------------------------------------------------------------------------

/// A project moves `Pending -> Evaluating -> Evaluated` exactly once.
/// `Failed` is terminal and records that the definition body returned an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    Pending,
    Evaluating,
    Evaluated,
    Failed,
}

impl ProjectState {
    pub fn is_evaluated(&self) -> bool {
        matches!(self, ProjectState::Evaluated)
    }
}

// ---------------------------------------------------------------------------
// TaskStatus — lifecycle of a task invocation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed(String),
}

impl TaskStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskStatus::Done)
    }
}
