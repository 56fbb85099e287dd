//! Tasks, prerequisites, and the namespaced task table.
//!
//! A [`Task`] is a named unit of work with an ordered set of prerequisites and
//! an ordered list of actions. Invoking a task invokes each prerequisite once,
//! then runs its own actions once; invoking it again is a no-op.
//!
//! Tasks and projects share the [`Invocable`] capability so either can appear
//! as a prerequisite and the scheduler treats both uniformly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Instant, SystemTime};

use cairn_types::{CairnError, Result, TaskStatus};

use crate::events::{EventEmitter, WorkspaceEvent};
use crate::lock;
use crate::scope;

// ---------------------------------------------------------------------------
// Invocable — shared capability of tasks and projects
// ---------------------------------------------------------------------------

pub trait Invocable: Send + Sync {
    /// Fully-qualified name, unique among invocables.
    fn name(&self) -> &str;

    /// Prerequisites resolved to handles.
    fn prerequisites(&self) -> Result<Vec<Arc<dyn Invocable>>>;

    /// Invoke prerequisites depth-first, then run this node. Idempotent.
    fn invoke(&self) -> Result<()>;

    /// Run this node only, assuming prerequisites are satisfied. Idempotent.
    fn execute(&self) -> Result<()>;

    fn is_invoked(&self) -> bool;

    /// Modification time for file-based nodes. `None` means "always newer".
    fn timestamp(&self) -> Option<SystemTime> {
        None
    }

    /// Invoked while the graph is planned, one at a time, instead of on a
    /// parallel worker (project definitions push onto the active-scope stack).
    fn runs_inline(&self) -> bool {
        false
    }
}

/// A prerequisite as declared: either a name resolved at invocation time
/// against the owning project's scope, or a direct handle.
#[derive(Clone)]
pub enum Prerequisite {
    Named(String),
    Handle(Arc<dyn Invocable>),
}

impl Prerequisite {
    pub fn name(&self) -> &str {
        match self {
            Prerequisite::Named(name) => name,
            Prerequisite::Handle(handle) => handle.name(),
        }
    }
}

impl std::fmt::Debug for Prerequisite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Prerequisite::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Prerequisite::Handle(handle) => f.debug_tuple("Handle").field(&handle.name()).finish(),
        }
    }
}

impl From<&str> for Prerequisite {
    fn from(name: &str) -> Self {
        Prerequisite::Named(name.to_string())
    }
}

impl From<String> for Prerequisite {
    fn from(name: String) -> Self {
        Prerequisite::Named(name)
    }
}

impl From<&String> for Prerequisite {
    fn from(name: &String) -> Self {
        Prerequisite::Named(name.clone())
    }
}

impl From<Task> for Prerequisite {
    fn from(task: Task) -> Self {
        Prerequisite::Handle(Arc::new(task))
    }
}

impl From<&Task> for Prerequisite {
    fn from(task: &Task) -> Self {
        Prerequisite::Handle(Arc::new(task.clone()))
    }
}

impl From<Arc<dyn Invocable>> for Prerequisite {
    fn from(handle: Arc<dyn Invocable>) -> Self {
        Prerequisite::Handle(handle)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

pub type Action = Arc<dyn Fn(&Task) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    Plain,
    /// Runs only when the file is missing or older than a prerequisite.
    File(PathBuf),
}

#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

struct TaskInner {
    name: String,
    scope: Option<String>,
    kind: TaskKind,
    table: Weak<TaskTable>,
    prerequisites: Mutex<Vec<Prerequisite>>,
    actions: Mutex<Vec<Action>>,
    description: Mutex<Option<String>>,
    status: Mutex<TaskStatus>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("status", &self.status())
            .finish()
    }
}

impl Task {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Name of the project whose namespace owns this task, if any.
    pub fn scope(&self) -> Option<&str> {
        self.inner.scope.as_deref()
    }

    pub fn kind(&self) -> &TaskKind {
        &self.inner.kind
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.inner.kind {
            TaskKind::File(path) => Some(path),
            TaskKind::Plain => None,
        }
    }

    /// Add prerequisites. Already-present names are ignored.
    pub fn enhance<I, P>(&self, prerequisites: I) -> &Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Prerequisite>,
    {
        let mut current = lock(&self.inner.prerequisites);
        for prerequisite in prerequisites {
            let prerequisite = prerequisite.into();
            if !current.iter().any(|p| p.name() == prerequisite.name()) {
                current.push(prerequisite);
            }
        }
        self
    }

    /// Append an action.
    pub fn action<F>(&self, f: F) -> &Self
    where
        F: Fn(&Task) -> Result<()> + Send + Sync + 'static,
    {
        lock(&self.inner.actions).push(Arc::new(f));
        self
    }

    pub fn describe(&self, text: impl Into<String>) -> &Self {
        *lock(&self.inner.description) = Some(text.into());
        self
    }

    pub fn description(&self) -> Option<String> {
        lock(&self.inner.description).clone()
    }

    pub fn prerequisite_names(&self) -> Vec<String> {
        lock(&self.inner.prerequisites)
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    pub fn action_count(&self) -> usize {
        lock(&self.inner.actions).len()
    }

    pub fn status(&self) -> TaskStatus {
        lock(&self.inner.status).clone()
    }

    pub fn is_invoked(&self) -> bool {
        self.status().is_done()
    }

    /// Resolve declared prerequisites to handles.
    pub fn resolve_prerequisites(&self) -> Result<Vec<Arc<dyn Invocable>>> {
        let declared = lock(&self.inner.prerequisites).clone();
        let table = self.inner.table.upgrade();
        declared
            .into_iter()
            .map(|prerequisite| match prerequisite {
                Prerequisite::Handle(handle) => Ok(handle),
                Prerequisite::Named(name) => table
                    .as_ref()
                    .and_then(|t| t.lookup(&name, self.scope()))
                    .map(|task| Arc::new(task) as Arc<dyn Invocable>)
                    .ok_or_else(|| CairnError::TaskNotFound {
                        name: match name.strip_prefix(scope::SEPARATOR) {
                            Some(absolute) => absolute.to_string(),
                            None => scope::qualify(self.scope(), &name),
                        },
                    }),
            })
            .collect()
    }

    /// Invoke prerequisites, then this task's actions. Runs at most once.
    pub fn invoke(&self) -> Result<()> {
        if !self.claim()? {
            return Ok(());
        }
        let table = self.inner.table.upgrade();
        if let Some(table) = &table {
            lock(&table.chain).push(self.inner.name.clone());
        }
        let outcome = self.resolve_prerequisites().and_then(|prerequisites| {
            for prerequisite in &prerequisites {
                prerequisite.invoke()?;
            }
            self.run_actions(&prerequisites)
        });
        if let Some(table) = &table {
            lock(&table.chain).pop();
        }
        self.finish(&outcome);
        outcome
    }

    /// Run this task's actions without invoking prerequisites.
    pub fn execute(&self) -> Result<()> {
        if !self.claim()? {
            return Ok(());
        }
        let outcome = self
            .resolve_prerequisites()
            .and_then(|prerequisites| self.run_actions(&prerequisites));
        self.finish(&outcome);
        outcome
    }

    /// Move `Pending -> Running`. `Ok(false)` when already done.
    fn claim(&self) -> Result<bool> {
        let mut status = lock(&self.inner.status);
        match &*status {
            TaskStatus::Done => Ok(false),
            TaskStatus::Failed(message) => Err(CairnError::TaskFailed {
                task: self.inner.name.clone(),
                message: message.clone(),
            }),
            TaskStatus::Running => Err(CairnError::CircularTaskDependency {
                chain: self.cycle_chain(),
            }),
            TaskStatus::Pending => {
                *status = TaskStatus::Running;
                Ok(true)
            }
        }
    }

    fn cycle_chain(&self) -> String {
        let mut chain = self
            .inner
            .table
            .upgrade()
            .map(|table| lock(&table.chain).clone())
            .unwrap_or_default();
        chain.push(self.inner.name.clone());
        chain.join(" => ")
    }

    fn finish(&self, outcome: &Result<()>) {
        *lock(&self.inner.status) = match outcome {
            Ok(()) => TaskStatus::Done,
            Err(e) => TaskStatus::Failed(e.to_string()),
        };
    }

    fn needed(&self, prerequisites: &[Arc<dyn Invocable>]) -> bool {
        let Some(modified) = self.timestamp() else {
            return true;
        };
        prerequisites
            .iter()
            .any(|p| p.timestamp().map_or(true, |t| t > modified))
    }

    fn run_actions(&self, prerequisites: &[Arc<dyn Invocable>]) -> Result<()> {
        let name = &self.inner.name;
        if matches!(self.inner.kind, TaskKind::File(_)) && !self.needed(prerequisites) {
            tracing::debug!(task = %name, "File is up to date");
            self.emit(WorkspaceEvent::TaskSkipped { name: name.clone() });
            return Ok(());
        }

        let actions = lock(&self.inner.actions).clone();
        tracing::info!(task = %name, actions = actions.len(), "Executing task");
        self.emit(WorkspaceEvent::TaskStarted { name: name.clone() });
        let start = Instant::now();
        for action in &actions {
            if let Err(e) = action(self) {
                tracing::warn!(task = %name, error = %e, "Task action failed");
                self.emit(WorkspaceEvent::TaskFailed {
                    name: name.clone(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        }
        self.emit(WorkspaceEvent::TaskCompleted {
            name: name.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
        });
        Ok(())
    }

    fn emit(&self, event: WorkspaceEvent) {
        if let Some(table) = self.inner.table.upgrade() {
            table.events.emit(event);
        }
    }

    fn timestamp(&self) -> Option<SystemTime> {
        let path = self.path()?;
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }
}

impl Invocable for Task {
    fn name(&self) -> &str {
        Task::name(self)
    }

    fn prerequisites(&self) -> Result<Vec<Arc<dyn Invocable>>> {
        self.resolve_prerequisites()
    }

    fn invoke(&self) -> Result<()> {
        Task::invoke(self)
    }

    fn execute(&self) -> Result<()> {
        Task::execute(self)
    }

    fn is_invoked(&self) -> bool {
        Task::is_invoked(self)
    }

    fn timestamp(&self) -> Option<SystemTime> {
        Task::timestamp(self)
    }
}

// ---------------------------------------------------------------------------
// TaskTable — every task in the workspace, keyed by qualified name
// ---------------------------------------------------------------------------

pub(crate) struct TaskTable {
    tasks: Mutex<BTreeMap<String, Task>>,
    /// Tasks currently being invoked depth-first, for cycle messages.
    chain: Mutex<Vec<String>>,
    events: EventEmitter,
}

impl TaskTable {
    pub(crate) fn new(events: EventEmitter) -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(BTreeMap::new()),
            chain: Mutex::new(Vec::new()),
            events,
        })
    }

    /// Create the task `name` or return the existing one.
    pub(crate) fn define(self: &Arc<Self>, name: &str, scope: Option<&str>, kind: TaskKind) -> Task {
        let mut tasks = lock(&self.tasks);
        if let Some(existing) = tasks.get(name) {
            return existing.clone();
        }
        tracing::debug!(task = %name, "Task defined");
        let task = Task {
            inner: Arc::new(TaskInner {
                name: name.to_string(),
                scope: scope.map(String::from),
                kind,
                table: Arc::downgrade(self),
                prerequisites: Mutex::new(Vec::new()),
                actions: Mutex::new(Vec::new()),
                description: Mutex::new(None),
                status: Mutex::new(TaskStatus::Pending),
            }),
        };
        tasks.insert(name.to_string(), task.clone());
        task
    }

    pub(crate) fn get(&self, name: &str) -> Option<Task> {
        lock(&self.tasks).get(name).cloned()
    }

    /// Find `name` from `scope`, nearest namespace first. A leading `:`
    /// makes the name absolute.
    pub(crate) fn lookup(&self, name: &str, scope: Option<&str>) -> Option<Task> {
        if let Some(absolute) = name.strip_prefix(scope::SEPARATOR) {
            return self.get(absolute);
        }
        let tasks = lock(&self.tasks);
        scope::lookup_candidates(name, scope)
            .iter()
            .find_map(|candidate| tasks.get(candidate).cloned())
    }

    pub(crate) fn all(&self) -> Vec<Task> {
        lock(&self.tasks).values().cloned().collect()
    }

    pub(crate) fn clear(&self) {
        lock(&self.tasks).clear();
        lock(&self.chain).clear();
    }
}
