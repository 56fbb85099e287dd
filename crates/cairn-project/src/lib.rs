//! Project definitions, hierarchical namespaces, and task execution.
//!
//! This crate implements the Cairn project model: a workspace registry of
//! named projects whose definition bodies run lazily, exactly once, with
//! sub-projects deferred until their parent's body finishes; inherited and
//! memoized attributes; scoped task lookup; and a scheduler that runs task
//! graphs sequentially or in parallel.

pub mod attribute;
pub mod events;
pub mod extension;
pub mod project;
pub mod scheduler;
pub mod scope;
pub mod task;
pub mod workspace;

pub use attribute::{AttributeDefault, AttributeDescriptor, AttributeFactory};
pub use events::{EventEmitter, WorkspaceEvent};
pub use extension::{DefineHook, Extension, RecursiveTasks};
pub use project::{DefinitionBody, Project, BASE_DIR_ATTRIBUTE};
pub use scheduler::{ExecutionMode, ExecutionPlan, Scheduler};
pub use scope::{validate_name, SEPARATOR};
pub use task::{Action, Invocable, Prerequisite, Task, TaskKind};
pub use workspace::{Workspace, WorkspaceConfig};

pub use cairn_types::{CairnError, ProjectState, Result, TaskStatus, Value};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
/// No lock in this crate is held while user code runs, so the data is
/// consistent even after a panic elsewhere.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
