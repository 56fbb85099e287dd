//! JSON Buildfile: declares attributes and a project tree, and installs it
//! into a [`Workspace`].
//!
//! ```json
//! {
//!   "attributes": [{ "name": "version", "default": "0.1.0" }],
//!   "recursive_tasks": ["build", "clean"],
//!   "projects": [{
//!     "name": "app",
//!     "attributes": { "version": "1.2.0" },
//!     "tasks": [{ "name": "build", "run": "make" }],
//!     "projects": [{ "name": "web", "uses": ["core"] }]
//!   }]
//! }
//! ```

use std::path::{Path, PathBuf};

use cairn_project::{
    CairnError, Project, RecursiveTasks, Result, Task, Value, Workspace, BASE_DIR_ATTRIBUTE,
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Buildfile {
    #[serde(default)]
    pub attributes: Vec<AttributeDecl>,
    /// Task names every project gets as recursive tasks.
    #[serde(default)]
    pub recursive_tasks: Vec<String>,
    #[serde(default)]
    pub projects: Vec<ProjectDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeDecl {
    pub name: String,
    #[serde(default = "default_inherited")]
    pub inherited: bool,
    #[serde(default)]
    pub default: Value,
}

fn default_inherited() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectDef {
    /// Local name; nested projects are qualified by their parent.
    pub name: String,
    #[serde(default)]
    pub base_dir: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, Value>,
    /// Projects looked up (and so evaluated) while this body runs.
    #[serde(default)]
    pub uses: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<TaskDef>,
    #[serde(default)]
    pub files: Vec<FileDef>,
    #[serde(default)]
    pub projects: Vec<ProjectDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskDef {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Also make the parent project's task of the same name depend on it.
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileDef {
    /// Output path relative to the project's base directory.
    pub path: String,
    /// Input files, relative to the base directory.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub run: Option<String>,
}

impl Buildfile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)?;
        let buildfile = serde_json::from_str(&source)?;
        tracing::debug!(path = %path.display(), "Buildfile loaded");
        Ok(buildfile)
    }

    /// Declare attributes and define every top-level project.
    pub fn install(&self, workspace: &Workspace) -> Result<()> {
        for decl in &self.attributes {
            if decl.inherited {
                workspace.declare_inherited_attribute(&decl.name, decl.default.clone());
            } else {
                workspace.declare_attribute(&decl.name, decl.default.clone());
            }
        }
        if !self.recursive_tasks.is_empty() {
            workspace.register_extension(RecursiveTasks::new(self.recursive_tasks.clone()));
        }
        for def in &self.projects {
            let (attributes, body) = def.clone().into_parts();
            workspace.define_with(&def.name, attributes, body)?;
        }
        Ok(())
    }
}

type Body = Box<dyn FnOnce(&Project) -> Result<()> + Send>;

impl ProjectDef {
    fn into_parts(self) -> (Vec<(String, Value)>, Body) {
        let mut attributes: Vec<(String, Value)> = self
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(dir) = &self.base_dir {
            attributes.push((BASE_DIR_ATTRIBUTE.to_string(), Value::String(dir.clone())));
        }
        (attributes, Box::new(move |project: &Project| self.populate(project)))
    }

    fn populate(self, project: &Project) -> Result<()> {
        for name in &self.uses {
            let used = project.project(name)?;
            tracing::debug!(project = %project, uses = %used, "Resolved project reference");
        }
        for def in &self.tasks {
            def.install(project)?;
        }
        for def in &self.files {
            def.install(project)?;
        }
        for def in self.projects {
            let name = def.name.clone();
            let (attributes, body) = def.into_parts();
            project.define_with(&name, attributes, body)?;
        }
        Ok(())
    }
}

impl TaskDef {
    fn install(&self, project: &Project) -> Result<Task> {
        let task = if self.recursive {
            project.recursive_task(&self.name)?
        } else {
            project.task(&self.name)?
        };
        task.enhance(&self.depends_on);
        if let Some(text) = &self.description {
            task.describe(text.clone());
        }
        if let Some(command) = &self.run {
            task.action(shell_action(command.clone(), project.base_dir()?));
        }
        Ok(task)
    }
}

impl FileDef {
    fn install(&self, project: &Project) -> Result<Task> {
        let task = project.file(&self.path)?;
        for source in &self.sources {
            task.enhance([project.file(source)?]);
        }
        task.enhance(&self.depends_on);
        if let Some(command) = &self.run {
            task.action(shell_action(command.clone(), project.base_dir()?));
        }
        Ok(task)
    }
}

/// Run `command` with `sh -c` in `dir`; a non-zero exit fails the task.
fn shell_action(
    command: String,
    dir: PathBuf,
) -> impl Fn(&Task) -> Result<()> + Send + Sync + 'static {
    move |task| {
        tracing::info!(task = %task.name(), command = %command, "Running command");
        std::fs::create_dir_all(&dir)?;
        let status = std::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&dir)
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(CairnError::Other(format!(
                "command `{command}` exited with {status}"
            )))
        }
    }
}
