//! Project nodes and the lazy evaluation driver.
//!
//! A [`Project`] is a handle to one node of the project tree. Its definition
//! body is stored unevaluated and run exactly once by [`Project::evaluate`],
//! either eagerly (roots, inside `define`) or on demand when a lookup needs
//! the project. Sub-projects defined by a body are queued on their parent and
//! drained before the parent counts as evaluated.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use cairn_types::{CairnError, ProjectState, Result, Value};
use serde::de::DeserializeOwned;

use crate::attribute::{self, AttributeSlots};
use crate::events::WorkspaceEvent;
use crate::lock;
use crate::scope::{self, SEPARATOR};
use crate::task::{Invocable, Prerequisite, Task, TaskKind};
use crate::workspace::{Workspace, WorkspaceInner};

/// A project definition body. Runs once, with the project as the active scope.
pub type DefinitionBody = Box<dyn FnOnce(&Project) -> Result<()> + Send>;

/// Attribute key that sets the base directory instead of an attribute slot.
pub const BASE_DIR_ATTRIBUTE: &str = "base_dir";

#[derive(Clone)]
pub struct Project {
    inner: Arc<ProjectInner>,
}

struct ProjectInner {
    name: String,
    parent: Option<Weak<ProjectInner>>,
    workspace: Weak<WorkspaceInner>,
    state: Mutex<ProjectState>,
    body: Mutex<Option<DefinitionBody>>,
    deferred: Mutex<VecDeque<Project>>,
    base_dir: Mutex<Option<PathBuf>>,
    slots: AttributeSlots,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

impl std::fmt::Display for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.inner.name)
    }
}

impl PartialEq for Project {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Project {}

impl Project {
    pub(crate) fn new(
        name: &str,
        parent: Option<&Project>,
        workspace: Weak<WorkspaceInner>,
        body: DefinitionBody,
    ) -> Self {
        Self {
            inner: Arc::new(ProjectInner {
                name: name.to_string(),
                parent: parent.map(|p| Arc::downgrade(&p.inner)),
                workspace,
                state: Mutex::new(ProjectState::Pending),
                body: Mutex::new(Some(body)),
                deferred: Mutex::new(VecDeque::new()),
                base_dir: Mutex::new(None),
                slots: AttributeSlots::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ProjectState {
        *lock(&self.inner.state)
    }

    pub fn workspace(&self) -> Result<Workspace> {
        self.inner
            .workspace
            .upgrade()
            .map(Workspace::from_inner)
            .ok_or_else(|| CairnError::Other(format!("workspace of project {} was dropped", self)))
    }

    pub fn parent(&self) -> Result<Option<Project>> {
        let Some(parent) = &self.inner.parent else {
            return Ok(None);
        };
        parent
            .upgrade()
            .map(|inner| Some(Project { inner }))
            .ok_or_else(|| CairnError::ParentMissing {
                name: self.inner.name.clone(),
                parent: scope::parent_name(&self.inner.name)
                    .unwrap_or_default()
                    .to_string(),
            })
    }

    /// The top-most ancestor (the project itself for roots).
    pub fn root(&self) -> Result<Project> {
        let mut current = self.clone();
        while let Some(parent) = current.parent()? {
            current = parent;
        }
        Ok(current)
    }

    fn is_active_scope(&self, workspace: &Workspace) -> bool {
        workspace.current_scope().as_deref() == Some(self.name())
    }

    // -----------------------------------------------------------------------
    // Base directory
    // -----------------------------------------------------------------------

    /// Root: the workspace base directory. Child: `parent.base_dir/<last segment>`.
    /// Fixed on first read.
    pub fn base_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = lock(&self.inner.base_dir).clone() {
            return Ok(dir);
        }
        let computed = match self.parent()? {
            Some(parent) => parent.base_dir()?.join(scope::last_segment(self.name())),
            None => self.workspace()?.base_dir()?,
        };
        Ok(lock(&self.inner.base_dir).get_or_insert(computed).clone())
    }

    /// Set the base directory. Allowed once, and only before it was read.
    /// Relative paths are taken from the workspace base directory.
    pub fn set_base_dir(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        let resolved = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.workspace()?.base_dir()?.join(dir)
        };
        let mut slot = lock(&self.inner.base_dir);
        if slot.is_some() {
            return Err(CairnError::BaseDirAlreadySet {
                project: self.inner.name.clone(),
            });
        }
        tracing::debug!(project = %self, base_dir = %resolved.display(), "Base directory set");
        *slot = Some(resolved);
        Ok(())
    }

    /// Path relative to the base directory.
    pub fn path_to<I, P>(&self, parts: I) -> Result<PathBuf>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut path = self.base_dir()?;
        for part in parts {
            path.push(part);
        }
        Ok(path)
    }

    // -----------------------------------------------------------------------
    // Attributes
    // -----------------------------------------------------------------------

    pub(crate) fn slots(&self) -> &AttributeSlots {
        &self.inner.slots
    }

    /// Read an attribute, falling back to ancestors and then the declared
    /// default. The first resolution is cached on this project.
    pub fn attribute(&self, name: &str) -> Result<Value> {
        if let Some(value) = self.inner.slots.cached(name) {
            return Ok(value);
        }
        let descriptor = self
            .workspace()?
            .attribute_descriptor(name)
            .ok_or_else(|| self.unknown_attribute(name))?;
        attribute::resolve(self, &descriptor)
    }

    /// Read an attribute and deserialize it.
    pub fn attribute_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self.attribute(name)?;
        serde_json::from_value(value).map_err(|e| CairnError::AttributeType {
            project: self.inner.name.clone(),
            attribute: name.to_string(),
            message: e.to_string(),
        })
    }

    /// Store an attribute value, overriding any fallback from now on.
    pub fn set_attribute(&self, name: &str, value: Value) -> Result<()> {
        if name == BASE_DIR_ATTRIBUTE {
            let dir = value.as_str().ok_or_else(|| CairnError::AttributeType {
                project: self.inner.name.clone(),
                attribute: name.to_string(),
                message: format!("expected a path string, got {value}"),
            })?;
            return self.set_base_dir(dir);
        }
        if self.workspace()?.attribute_descriptor(name).is_none() {
            return Err(self.unknown_attribute(name));
        }
        self.inner.slots.store(name, value);
        Ok(())
    }

    /// Attribute values set on, or already resolved by, this project.
    pub fn attributes(&self) -> BTreeMap<String, Value> {
        self.inner.slots.snapshot()
    }

    fn unknown_attribute(&self, name: &str) -> CairnError {
        CairnError::UnknownAttribute {
            project: self.inner.name.clone(),
            attribute: name.to_string(),
        }
    }

    // -----------------------------------------------------------------------
    // Sub-projects and lookups
    // -----------------------------------------------------------------------

    /// Define a sub-project named `<this>:<local>`.
    pub fn define<F>(&self, local: &str, body: F) -> Result<Project>
    where
        F: FnOnce(&Project) -> Result<()> + Send + 'static,
    {
        self.define_with(local, Vec::<(String, Value)>::new(), body)
    }

    pub fn define_with<I, K, F>(&self, local: &str, attributes: I, body: F) -> Result<Project>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
        F: FnOnce(&Project) -> Result<()> + Send + 'static,
    {
        let name = scope::qualify(Some(self.name()), local);
        self.workspace()?.define_with(&name, attributes, body)
    }

    /// Look up a project relative to this one (nearest ancestor namespace first).
    /// Called from a body, this project and its ancestors come back as they
    /// stand, still mid-evaluation.
    pub fn project(&self, name: &str) -> Result<Project> {
        self.workspace()?.resolve(name, Some(self.name()))
    }

    /// With no names: the direct sub-projects. Otherwise each name resolved
    /// relative to this project. Sorted by name.
    pub fn projects(&self, names: &[&str]) -> Result<Vec<Project>> {
        self.workspace()?.resolve_many(names, Some(self.name()))
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Create or find the task `<this>:<name>`.
    ///
    /// A leading `:` addresses the top-level namespace. While this project is
    /// the active scope the task is created if missing; otherwise an existing
    /// task is looked up in this namespace, then each ancestor's.
    pub fn task(&self, name: &str) -> Result<Task> {
        let workspace = self.workspace()?;
        let table = workspace.task_table();
        if let Some(absolute) = name.strip_prefix(SEPARATOR) {
            return Ok(table.define(absolute, None, TaskKind::Plain));
        }
        let qualified = scope::qualify(Some(self.name()), name);
        if self.is_active_scope(&workspace) {
            Ok(table.define(&qualified, Some(self.name()), TaskKind::Plain))
        } else {
            table
                .lookup(name, Some(self.name()))
                .ok_or(CairnError::TaskNotFound { name: qualified })
        }
    }

    /// Create or find a file task for `path` under the base directory.
    pub fn file(&self, path: impl AsRef<Path>) -> Result<Task> {
        let full = self.path_to([path])?;
        let name = full.to_string_lossy().into_owned();
        Ok(self
            .workspace()?
            .task_table()
            .define(&name, Some(self.name()), TaskKind::File(full)))
    }

    /// Create `<this>:<name>` and make the parent's task of the same name
    /// depend on it, so invoking an ancestor's task reaches this one.
    pub fn recursive_task(&self, name: &str) -> Result<Task> {
        let task = self.task(name)?;
        if let Some(parent) = self.parent()? {
            parent.task(name)?.enhance([&task]);
        }
        Ok(task)
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    pub(crate) fn defer(&self, child: Project) {
        lock(&self.inner.deferred).push_back(child);
    }

    /// Run the definition once. Re-entering while evaluating is a cycle.
    pub(crate) fn evaluate(&self) -> Result<()> {
        let workspace = self.workspace()?;
        {
            let mut state = lock(&self.inner.state);
            match *state {
                ProjectState::Evaluated => return Ok(()),
                ProjectState::Failed => {
                    return Err(CairnError::EvaluationFailed {
                        name: self.inner.name.clone(),
                    })
                }
                ProjectState::Evaluating => {
                    return Err(CairnError::CircularEvaluation {
                        name: self.inner.name.clone(),
                        chain: format!("{} => {}", workspace.scope_chain(), self),
                    })
                }
                ProjectState::Pending => *state = ProjectState::Evaluating,
            }
        }

        tracing::debug!(project = %self, "Evaluating project");
        workspace.emit(WorkspaceEvent::ProjectEvaluationStarted {
            name: self.inner.name.clone(),
        });
        let start = Instant::now();
        let outcome = {
            let _scope = workspace.enter_scope(self.name());
            self.run_definition(&workspace)
        };

        match &outcome {
            Ok(()) => {
                *lock(&self.inner.state) = ProjectState::Evaluated;
                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::debug!(project = %self, duration_ms, "Project evaluated");
                workspace.emit(WorkspaceEvent::ProjectEvaluated {
                    name: self.inner.name.clone(),
                    duration_ms,
                });
            }
            Err(e) => {
                *lock(&self.inner.state) = ProjectState::Failed;
                self.abandon_deferred();
                tracing::warn!(project = %self, error = %e, "Project definition failed");
                workspace.emit(WorkspaceEvent::ProjectEvaluationFailed {
                    name: self.inner.name.clone(),
                    error: e.to_string(),
                });
            }
        }
        outcome
    }

    fn run_definition(&self, workspace: &Workspace) -> Result<()> {
        let extensions = workspace.extensions();
        for extension in &extensions {
            extension.before_define(self)?;
        }
        for hook in workspace.define_hooks() {
            hook(self)?;
        }
        let body = lock(&self.inner.body).take();
        if let Some(body) = body {
            body(self)?;
        }
        self.drain_deferred()?;
        for extension in &extensions {
            extension.after_define(self)?;
        }
        self.drain_deferred()
    }

    fn drain_deferred(&self) -> Result<()> {
        loop {
            let next = lock(&self.inner.deferred).pop_front();
            match next {
                Some(child) => child.evaluate()?,
                None => return Ok(()),
            }
        }
    }

    /// Fail every sub-project still queued behind this one's definition.
    fn abandon_deferred(&self) {
        let queued: Vec<Project> = lock(&self.inner.deferred).drain(..).collect();
        for child in queued {
            {
                let mut state = lock(&child.inner.state);
                if *state != ProjectState::Pending {
                    continue;
                }
                *state = ProjectState::Failed;
            }
            tracing::debug!(project = %child, parent = %self, "Abandoned with failed parent");
            child.abandon_deferred();
        }
    }
}

impl Invocable for Project {
    fn name(&self) -> &str {
        Project::name(self)
    }

    fn prerequisites(&self) -> Result<Vec<Arc<dyn Invocable>>> {
        Ok(Vec::new())
    }

    fn invoke(&self) -> Result<()> {
        self.evaluate()
    }

    fn execute(&self) -> Result<()> {
        self.evaluate()
    }

    fn is_invoked(&self) -> bool {
        self.state().is_evaluated()
    }

    fn runs_inline(&self) -> bool {
        true
    }
}

impl From<Project> for Prerequisite {
    fn from(project: Project) -> Self {
        Prerequisite::Handle(Arc::new(project))
    }
}

impl From<&Project> for Prerequisite {
    fn from(project: &Project) -> Self {
        Prerequisite::Handle(Arc::new(project.clone()))
    }
}
