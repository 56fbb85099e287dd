//! Extension trait and the built-in recursive-task extension.
//!
//! Extensions are registered on the workspace and called for every project
//! as it is evaluated: `before_define` after attributes are applied and before
//! any define hook or body, `after_define` once the body and its deferred
//! sub-projects are done.

use std::sync::Arc;

use cairn_types::Result;

use crate::project::Project;

/// Callback registered with [`Workspace::on_define`](crate::Workspace::on_define).
pub type DefineHook = Arc<dyn Fn(&Project) -> Result<()> + Send + Sync>;

// ---------------------------------------------------------------------------
// Extension trait
// ---------------------------------------------------------------------------

pub trait Extension: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    fn before_define(&self, _project: &Project) -> Result<()> {
        Ok(())
    }

    fn after_define(&self, _project: &Project) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecursiveTasks
// ---------------------------------------------------------------------------

/// Gives every project a recursive task for each configured name, so
/// invoking `build` on a project also builds all of its sub-projects.
pub struct RecursiveTasks {
    names: Vec<String>,
}

impl RecursiveTasks {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Extension for RecursiveTasks {
    fn name(&self) -> &str {
        "recursive-tasks"
    }

    fn before_define(&self, project: &Project) -> Result<()> {
        for name in &self.names {
            project.recursive_task(name)?;
        }
        Ok(())
    }
}
