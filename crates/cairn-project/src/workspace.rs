//! The workspace: registry of projects and the process-wide build context.
//!
//! A [`Workspace`] owns every project, the active-scope stack, attribute
//! declarations, define hooks, extensions, the task table and the event
//! channel. It is created once at program start and passed by handle to
//! whatever needs to define or look up projects; [`Workspace::clear`] resets
//! it between isolated test runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cairn_types::{CairnError, ProjectState, Result, Value};

use crate::attribute::{AttributeDefault, AttributeDescriptor, AttributeRegistry};
use crate::events::{EventEmitter, WorkspaceEvent};
use crate::extension::{DefineHook, Extension};
use crate::lock;
use crate::project::Project;
use crate::scheduler::{ExecutionMode, Scheduler};
use crate::scope::{self, ScopeGuard, ScopeStack};
use crate::task::{Invocable, Task, TaskKind, TaskTable};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    /// Base directory of root projects. Defaults to the working directory.
    pub base_dir: Option<PathBuf>,
    /// How [`Workspace::run`] executes tasks.
    pub execution: ExecutionMode,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            execution: ExecutionMode::Sequential,
            event_capacity: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Cloning a `Workspace` yields another handle to the **same** registry.
#[derive(Clone)]
pub struct Workspace {
    inner: Arc<WorkspaceInner>,
}

pub(crate) struct WorkspaceInner {
    config: WorkspaceConfig,
    projects: Mutex<BTreeMap<String, Project>>,
    scope: ScopeStack,
    attributes: AttributeRegistry,
    hooks: Mutex<Vec<DefineHook>>,
    extensions: Mutex<Vec<Arc<dyn Extension>>>,
    tasks: Arc<TaskTable>,
    events: EventEmitter,
}

impl Workspace {
    pub fn new(config: WorkspaceConfig) -> Self {
        let events = EventEmitter::new(config.event_capacity);
        Self {
            inner: Arc::new(WorkspaceInner {
                tasks: TaskTable::new(events.clone()),
                events,
                config,
                projects: Mutex::new(BTreeMap::new()),
                scope: ScopeStack::default(),
                attributes: AttributeRegistry::default(),
                hooks: Mutex::new(Vec::new()),
                extensions: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<WorkspaceInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.inner.config
    }

    /// Base directory for root projects.
    pub fn base_dir(&self) -> Result<PathBuf> {
        match &self.inner.config.base_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    // -----------------------------------------------------------------------
    // Definition
    // -----------------------------------------------------------------------

    /// Define a project. See [`Workspace::define_with`].
    pub fn define<F>(&self, name: &str, body: F) -> Result<Project>
    where
        F: FnOnce(&Project) -> Result<()> + Send + 'static,
    {
        self.define_with(name, Vec::<(String, Value)>::new(), body)
    }

    /// Define the project `name` with initial attributes and a body.
    ///
    /// A sub-project (`parent:child`) may only be defined while its parent's
    /// definition is executing, and its body is deferred until the parent's
    /// body finishes or a lookup needs it. A root project is evaluated before
    /// this returns.
    pub fn define_with<I, K, F>(&self, name: &str, attributes: I, body: F) -> Result<Project>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
        F: FnOnce(&Project) -> Result<()> + Send + 'static,
    {
        scope::validate_name(name)?;
        let parent_name = scope::parent_name(name);
        let parent = match parent_name {
            Some(parent_name) => Some(self.peek(parent_name).ok_or_else(|| {
                CairnError::ParentMissing {
                    name: name.to_string(),
                    parent: parent_name.to_string(),
                }
            })?),
            None => None,
        };

        // Top-level names may be defined from anywhere.
        if let Some(expected) = parent_name {
            let active = self.current_scope();
            if active.as_deref() != Some(expected) {
                return Err(CairnError::InvalidNesting {
                    name: name.to_string(),
                    scope: active.unwrap_or_else(|| "<top level>".to_string()),
                });
            }
        }
        if lock(&self.inner.projects).contains_key(name) {
            return Err(CairnError::DuplicateProject {
                name: name.to_string(),
            });
        }
        if self.inner.tasks.get(name).is_some() {
            return Err(CairnError::InvalidProjectName {
                name: name.to_string(),
                reason: "already used for a task".into(),
            });
        }

        let project = Project::new(
            name,
            parent.as_ref(),
            Arc::downgrade(&self.inner),
            Box::new(body),
        );
        for (key, value) in attributes {
            let key: String = key.into();
            project.set_attribute(&key, value)?;
        }
        {
            let mut projects = lock(&self.inner.projects);
            if projects.contains_key(name) {
                return Err(CairnError::DuplicateProject {
                    name: name.to_string(),
                });
            }
            projects.insert(name.to_string(), project.clone());
        }
        tracing::debug!(project = %name, "Project defined");
        self.emit(WorkspaceEvent::ProjectDefined {
            name: name.to_string(),
        });

        match parent {
            Some(parent) => parent.defer(project.clone()),
            None => project.evaluate()?,
        }
        Ok(project)
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Look up a project by absolute name, evaluating it (and any pending
    /// ancestor) before returning.
    pub fn project(&self, name: &str) -> Result<Project> {
        self.resolve(name, None)
    }

    /// Look up `name`. With a scope, the scope and each of its ancestors are
    /// tried as namespaces, nearest first, before the top level.
    pub fn resolve(&self, name: &str, scope: Option<&str>) -> Result<Project> {
        let mut found = None;
        for candidate in scope::lookup_candidates(name, scope) {
            if let Some(project) = self.find_forcing(&candidate)? {
                found = Some(project);
                break;
            }
        }
        let project = found.ok_or_else(|| CairnError::ProjectNotFound {
            name: name.to_string(),
        })?;
        self.evaluate_for_lookup(&project)?;
        Ok(project)
    }

    /// Resolve several projects, sorted by name.
    ///
    /// - names given: each is resolved (relative to `scope` if given);
    /// - only a scope: the scope's direct sub-projects;
    /// - neither: every project, after evaluating all of them.
    pub fn resolve_many(&self, names: &[&str], scope: Option<&str>) -> Result<Vec<Project>> {
        let scope = scope.filter(|s| !s.is_empty());
        let mut projects = if !names.is_empty() {
            names
                .iter()
                .map(|name| self.resolve(name, scope))
                .collect::<Result<Vec<_>>>()?
        } else if let Some(scope) = scope {
            let parent = self.peek(scope).ok_or_else(|| CairnError::ProjectNotFound {
                name: scope.to_string(),
            })?;
            if matches!(parent.state(), ProjectState::Pending | ProjectState::Failed) {
                parent.evaluate()?;
            }
            let children: Vec<Project> = lock(&self.inner.projects)
                .values()
                .filter(|p| scope::parent_name(p.name()) == Some(scope))
                .cloned()
                .collect();
            for child in &children {
                self.evaluate_for_lookup(child)?;
            }
            children
        } else {
            self.evaluate_all()?;
            lock(&self.inner.projects).values().cloned().collect()
        };
        projects.sort_by(|a, b| a.name().cmp(b.name()));
        projects.dedup();
        Ok(projects)
    }

    /// All projects, sorted by name, each fully evaluated.
    pub fn projects(&self) -> Result<Vec<Project>> {
        self.resolve_many(&[], None)
    }

    /// Registry lookup without forcing evaluation.
    pub fn peek(&self, name: &str) -> Option<Project> {
        lock(&self.inner.projects).get(name).cloned()
    }

    /// Top-most projects whose base directory is `dir`. When none is, the
    /// parent directory is tried, up to the workspace base directory.
    pub fn local_projects(&self, dir: &Path) -> Result<Vec<Project>> {
        let projects = self.projects()?;
        let stop = self.base_dir()?;
        let mut dir = dir;
        loop {
            let local = Self::projects_at(&projects, dir)?;
            if !local.is_empty() || dir == stop.as_path() {
                return Ok(local);
            }
            match dir.parent() {
                Some(parent) => {
                    tracing::debug!(dir = %dir.display(), "No local project, trying parent directory");
                    dir = parent;
                }
                None => return Ok(local),
            }
        }
    }

    fn projects_at(projects: &[Project], dir: &Path) -> Result<Vec<Project>> {
        let mut local = Vec::new();
        for project in projects {
            if project.base_dir()? != dir {
                continue;
            }
            let parent_is_local = match project.parent()? {
                Some(parent) => parent.base_dir()? == dir,
                None => false,
            };
            if !parent_is_local {
                local.push(project.clone());
            }
        }
        Ok(local)
    }

    /// Evaluate pending proper prefixes of `name`, then look `name` up. A
    /// failed prefix fails the lookup.
    fn find_forcing(&self, name: &str) -> Result<Option<Project>> {
        for prefix in scope::proper_prefixes(name) {
            if let Some(ancestor) = self.peek(prefix) {
                match ancestor.state() {
                    ProjectState::Pending => {
                        tracing::debug!(project = %prefix, target = %name, "Pulling evaluation forward");
                        ancestor.evaluate()?;
                    }
                    ProjectState::Failed => ancestor.evaluate()?,
                    _ => {}
                }
            }
        }
        Ok(self.peek(name))
    }

    /// A body may look up itself or any of its ancestors without tripping
    /// cycle detection; those are handed back mid-evaluation.
    fn evaluate_for_lookup(&self, project: &Project) -> Result<()> {
        if let Some(current) = self.current_scope() {
            if current == project.name()
                || scope::proper_prefixes(&current).contains(&project.name())
            {
                return Ok(());
            }
        }
        project.evaluate()
    }

    fn evaluate_all(&self) -> Result<()> {
        loop {
            let pending: Vec<Project> = lock(&self.inner.projects)
                .values()
                .filter(|p| p.state() == ProjectState::Pending)
                .cloned()
                .collect();
            if pending.is_empty() {
                return Ok(());
            }
            for project in pending {
                if project.state() == ProjectState::Pending {
                    project.evaluate()?;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Scope
    // -----------------------------------------------------------------------

    /// Name of the project whose definition is executing, if any.
    pub fn current_scope(&self) -> Option<String> {
        self.inner.scope.current()
    }

    pub(crate) fn scope_chain(&self) -> String {
        self.inner.scope.chain()
    }

    pub(crate) fn enter_scope(&self, name: &str) -> ScopeGuard<'_> {
        self.inner.scope.enter(name)
    }

    // -----------------------------------------------------------------------
    // Attributes, hooks, extensions
    // -----------------------------------------------------------------------

    pub fn declare(&self, descriptor: AttributeDescriptor) {
        self.inner.attributes.declare(descriptor);
    }

    pub fn declare_inherited_attribute(&self, name: &str, default: Value) {
        self.declare(AttributeDescriptor::inherited(name, default));
    }

    pub fn declare_inherited_attribute_with<F>(&self, name: &str, factory: F)
    where
        F: Fn(&Project) -> Result<Value> + Send + Sync + 'static,
    {
        self.declare(AttributeDescriptor::inherited(
            name,
            AttributeDefault::factory(factory),
        ));
    }

    pub fn declare_attribute(&self, name: &str, default: Value) {
        self.declare(AttributeDescriptor::local(name, default));
    }

    pub fn attribute_descriptor(&self, name: &str) -> Option<Arc<AttributeDescriptor>> {
        self.inner.attributes.get(name)
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.inner.attributes.names()
    }

    /// Run `callback` for every project after its attributes are applied and
    /// before its body, in registration order.
    pub fn on_define<F>(&self, callback: F)
    where
        F: Fn(&Project) -> Result<()> + Send + Sync + 'static,
    {
        lock(&self.inner.hooks).push(Arc::new(callback));
    }

    pub(crate) fn define_hooks(&self) -> Vec<DefineHook> {
        lock(&self.inner.hooks).clone()
    }

    pub fn register_extension(&self, extension: impl Extension + 'static) {
        tracing::debug!(extension = %extension.name(), "Extension registered");
        lock(&self.inner.extensions).push(Arc::new(extension));
    }

    pub(crate) fn extensions(&self) -> Vec<Arc<dyn Extension>> {
        lock(&self.inner.extensions).clone()
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub(crate) fn task_table(&self) -> &Arc<TaskTable> {
        &self.inner.tasks
    }

    /// Create or find a task in the top-level namespace.
    pub fn task(&self, name: &str) -> Task {
        let name = name.strip_prefix(scope::SEPARATOR).unwrap_or(name);
        self.inner.tasks.define(name, None, TaskKind::Plain)
    }

    /// Find a task from `scope`, nearest namespace first.
    pub fn lookup_task(&self, name: &str, scope: Option<&str>) -> Option<Task> {
        self.inner.tasks.lookup(name, scope)
    }

    /// Every task, sorted by name.
    pub fn tasks(&self) -> Vec<Task> {
        self.inner.tasks.all()
    }

    fn find_task(&self, name: &str) -> Result<Task> {
        let scope = self.current_scope();
        self.lookup_task(name, scope.as_deref())
            .ok_or_else(|| CairnError::TaskNotFound {
                name: name.to_string(),
            })
    }

    /// Invoke a task sequentially on the calling thread.
    pub fn invoke(&self, name: &str) -> Result<()> {
        self.find_task(name)?.invoke()
    }

    /// Run tasks with the configured [`ExecutionMode`].
    pub async fn run(&self, names: &[&str]) -> Result<()> {
        let targets = names
            .iter()
            .map(|name| self.find_task(name).map(|t| Arc::new(t) as Arc<dyn Invocable>))
            .collect::<Result<Vec<_>>>()?;
        Scheduler::new(self.inner.config.execution).run(targets).await
    }

    // -----------------------------------------------------------------------
    // Events and reset
    // -----------------------------------------------------------------------

    pub(crate) fn emit(&self, event: WorkspaceEvent) {
        self.inner.events.emit(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkspaceEvent> {
        self.inner.events.subscribe()
    }

    /// Discard every project and task. Attribute declarations, hooks and
    /// extensions are kept.
    pub fn clear(&self) {
        lock(&self.inner.projects).clear();
        self.inner.tasks.clear();
        self.inner.scope.clear();
        tracing::debug!("Workspace cleared");
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new(WorkspaceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duplicate_project_is_rejected() {
        let ws = Workspace::default();
        ws.define("a", |_| Ok(())).unwrap();
        let err = ws.define("a", |_| Ok(())).unwrap_err();
        assert!(matches!(err, CairnError::DuplicateProject { name } if name == "a"));
    }

    #[test]
    fn sub_project_outside_parent_is_rejected() {
        let ws = Workspace::default();
        ws.define("a", |_| Ok(())).unwrap();
        let err = ws.define("a:b", |_| Ok(())).unwrap_err();
        assert!(matches!(err, CairnError::InvalidNesting { name, .. } if name == "a:b"));
    }

    #[test]
    fn sub_project_inside_sibling_is_rejected() {
        let ws = Workspace::default();
        ws.define("a", |_| Ok(())).unwrap();
        let err = ws
            .define("b", |b| {
                b.workspace()?.define("a:c", |_| Ok(()))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, CairnError::InvalidNesting { scope, .. } if scope == "b"));
    }

    #[test]
    fn top_level_project_inside_a_body_is_evaluated() {
        let ws = Workspace::default();
        ws.define("a", |a| {
            let other = a.workspace()?.define("other", |_| Ok(()))?;
            assert_eq!(other.state(), ProjectState::Evaluated);
            Ok(())
        })
        .unwrap();
        assert_eq!(ws.peek("other").unwrap().state(), ProjectState::Evaluated);
        assert!(ws.peek("other").unwrap().parent().unwrap().is_none());
    }

    #[test]
    fn missing_parent_is_reported() {
        let ws = Workspace::default();
        let err = ws.define("x:y", |_| Ok(())).unwrap_err();
        assert!(matches!(err, CairnError::ParentMissing { parent, .. } if parent == "x"));
    }

    #[test]
    fn invalid_name_is_rejected() {
        let ws = Workspace::default();
        assert!(matches!(
            ws.define("a::b", |_| Ok(())).unwrap_err(),
            CairnError::InvalidProjectName { .. }
        ));
    }

    #[test]
    fn project_name_cannot_shadow_a_task() {
        let ws = Workspace::default();
        ws.task("build");
        let err = ws.define("build", |_| Ok(())).unwrap_err();
        assert!(matches!(err, CairnError::InvalidProjectName { .. }));
    }

    #[test]
    fn root_is_evaluated_on_define() {
        let ws = Workspace::default();
        let app = ws.define("app", |_| Ok(())).unwrap();
        assert_eq!(app.state(), ProjectState::Evaluated);
    }

    #[test]
    fn child_body_runs_after_parent_body() {
        let ws = Workspace::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        let log = order.clone();
        ws.define("a", move |a| {
            let child_log = log.clone();
            a.define("b", move |_| {
                child_log.lock().unwrap().push("a:b body");
                Ok(())
            })?;
            log.lock().unwrap().push("a body end");
            Ok(())
        })
        .unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["a body end", "a:b body"]);
        assert_eq!(ws.peek("a:b").unwrap().state(), ProjectState::Evaluated);
    }

    #[test]
    fn attributes_apply_before_body() {
        let ws = Workspace::default();
        ws.declare_inherited_attribute("version", Value::Null);
        let seen = Arc::new(Mutex::new(Value::Null));
        let sink = seen.clone();
        ws.define_with("app", [("version", json!("3.1"))], move |app| {
            *sink.lock().unwrap() = app.attribute("version")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(*seen.lock().unwrap(), json!("3.1"));
    }

    #[test]
    fn unknown_attribute_in_define_leaves_no_project() {
        let ws = Workspace::default();
        let err = ws
            .define_with("app", [("colour", json!("red"))], |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, CairnError::UnknownAttribute { .. }));
        assert!(ws.peek("app").is_none());
    }

    #[test]
    fn project_not_found() {
        let ws = Workspace::default();
        assert!(matches!(
            ws.project("ghost").unwrap_err(),
            CairnError::ProjectNotFound { name } if name == "ghost"
        ));
        ws.define("a", |_| Ok(())).unwrap();
        assert!(matches!(
            ws.project("a:ghost").unwrap_err(),
            CairnError::ProjectNotFound { .. }
        ));
    }

    #[test]
    fn relative_lookup_prefers_nearest_namespace() {
        let ws = Workspace::default();
        ws.define("common", |_| Ok(())).unwrap();
        ws.define("app", |app| {
            app.define("common", |_| Ok(()))?;
            app.define("web", |_| Ok(()))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(ws.resolve("common", Some("app:web")).unwrap().name(), "app:common");
        assert_eq!(ws.resolve("common", None).unwrap().name(), "common");
        assert_eq!(ws.resolve("web", Some("app")).unwrap().name(), "app:web");
    }

    #[test]
    fn direct_children_only() {
        let ws = Workspace::default();
        ws.define("a", |a| {
            a.define("b", |b| {
                b.define("d", |_| Ok(()))?;
                Ok(())
            })?;
            a.define("c", |_| Ok(()))?;
            Ok(())
        })
        .unwrap();
        let names: Vec<String> = ws
            .resolve_many(&[], Some("a"))
            .unwrap()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, vec!["a:b", "a:c"]);
    }

    #[test]
    fn resolve_many_with_names_sorts() {
        let ws = Workspace::default();
        ws.define("zeta", |_| Ok(())).unwrap();
        ws.define("alpha", |_| Ok(())).unwrap();
        let names: Vec<String> = ws
            .resolve_many(&["zeta", "alpha"], None)
            .unwrap()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn body_may_look_itself_up() {
        let ws = Workspace::default();
        ws.define("a", |a| {
            let me = a.workspace()?.project("a")?;
            assert_eq!(me.state(), ProjectState::Evaluating);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn local_projects_are_top_most_at_dir() {
        let ws = Workspace::new(WorkspaceConfig {
            base_dir: Some(PathBuf::from("/repo")),
            ..WorkspaceConfig::default()
        });
        ws.define("a", |a| {
            a.define_with("b", [("base_dir", json!("/repo"))], |_| Ok(()))?;
            a.define("c", |_| Ok(()))?;
            Ok(())
        })
        .unwrap();
        ws.define_with("z", [("base_dir", json!("/elsewhere"))], |_| Ok(()))
            .unwrap();
        let local: Vec<String> = ws
            .local_projects(Path::new("/repo"))
            .unwrap()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(local, vec!["a"]);
        let nested = ws.local_projects(Path::new("/repo/c")).unwrap();
        assert_eq!(nested[0].name(), "a:c");
    }

    #[test]
    fn local_projects_fall_back_to_parent_directory() {
        let ws = Workspace::new(WorkspaceConfig {
            base_dir: Some(PathBuf::from("/repo")),
            ..WorkspaceConfig::default()
        });
        ws.define("a", |a| {
            a.define("c", |_| Ok(()))?;
            Ok(())
        })
        .unwrap();
        let names = |dir: &str| -> Vec<String> {
            ws.local_projects(Path::new(dir))
                .unwrap()
                .iter()
                .map(|p| p.name().to_string())
                .collect()
        };
        assert_eq!(names("/repo/docs/guide"), vec!["a"]);
        assert_eq!(names("/repo/c/src/main"), vec!["a:c"]);
        assert!(names("/elsewhere").is_empty());
    }

    #[test]
    fn body_may_look_up_its_ancestors() {
        let ws = Workspace::default();
        ws.define("a", |a| {
            a.define("b", |b| {
                let parent = b.project("a")?;
                assert_eq!(parent.state(), ProjectState::Evaluating);
                b.define("c", |c| {
                    assert_eq!(c.project("a")?.name(), "a");
                    assert_eq!(c.project("a:b")?.name(), "a:b");
                    Ok(())
                })?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap();
        assert_eq!(ws.peek("a:b:c").unwrap().state(), ProjectState::Evaluated);
    }

    #[test]
    fn children_of_a_failed_definition_are_never_evaluated() {
        let ws = Workspace::default();
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        ws.define("a", move |a| {
            a.define("b", move |_| {
                *flag.lock().unwrap() = true;
                Ok(())
            })?;
            Err(CairnError::Other("boom".into()))
        })
        .unwrap_err();

        assert_eq!(ws.peek("a:b").unwrap().state(), ProjectState::Failed);
        assert!(matches!(
            ws.project("a:b").unwrap_err(),
            CairnError::EvaluationFailed { .. }
        ));
        assert!(matches!(
            ws.resolve_many(&[], Some("a")).unwrap_err(),
            CairnError::EvaluationFailed { .. }
        ));
        assert!(!*ran.lock().unwrap());
    }

    #[test]
    fn clear_discards_projects_and_tasks() {
        let ws = Workspace::default();
        ws.define("a", |a| {
            a.task("x")?;
            Ok(())
        })
        .unwrap();
        ws.clear();
        assert!(ws.peek("a").is_none());
        assert!(ws.tasks().is_empty());
        ws.define("a", |_| Ok(())).unwrap();
    }

    #[test]
    fn events_follow_project_lifecycle() {
        let ws = Workspace::default();
        let mut rx = ws.subscribe();
        ws.define("a", |_| Ok(())).unwrap();
        assert!(matches!(rx.try_recv().unwrap(), WorkspaceEvent::ProjectDefined { name } if name == "a"));
        assert!(matches!(
            rx.try_recv().unwrap(),
            WorkspaceEvent::ProjectEvaluationStarted { .. }
        ));
        assert!(matches!(rx.try_recv().unwrap(), WorkspaceEvent::ProjectEvaluated { .. }));
    }
}
