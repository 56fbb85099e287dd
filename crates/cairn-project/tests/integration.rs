//! End-to-end tests for the Cairn project model.
//!
//! Each test builds a small project tree through the public API and checks
//! definition order, lookup, attribute inheritance, and task execution.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use cairn_project::{
    CairnError, ExecutionMode, Project, ProjectState, RecursiveTasks, TaskStatus, Workspace,
    WorkspaceConfig, WorkspaceEvent,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Log = Arc<Mutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Give `project` a recursive `build` task that records its own name.
fn recorded_build(project: &Project, log: &Log) -> cairn_project::Result<()> {
    let log = log.clone();
    project.recursive_task("build")?.action(move |task| {
        log.lock().unwrap().push(task.name().to_string());
        Ok(())
    });
    Ok(())
}

/// `a` with sub-projects `a:b` and `a:c`, each with a recorded `build`.
fn define_tree(ws: &Workspace, log: &Log) {
    let a_log = log.clone();
    ws.define("a", move |a| {
        recorded_build(a, &a_log)?;
        let b_log = a_log.clone();
        a.define("b", move |b| recorded_build(b, &b_log))?;
        let c_log = a_log.clone();
        a.define("c", move |c| recorded_build(c, &c_log))?;
        Ok(())
    })
    .expect("tree should define");
}

fn parallel_workspace(jobs: usize) -> Workspace {
    Workspace::new(WorkspaceConfig {
        execution: ExecutionMode::Parallel { jobs },
        ..WorkspaceConfig::default()
    })
}

// ---------------------------------------------------------------------------
// Definition and nesting
// ---------------------------------------------------------------------------

#[test]
fn nested_definition_outside_parent_fails() {
    let ws = Workspace::default();
    ws.define("a", |_| Ok(())).unwrap();
    let err = ws.define("a:b", |_| Ok(())).unwrap_err();
    assert!(matches!(err, CairnError::InvalidNesting { .. }));
    assert!(err.is_definition_error());
    assert_eq!(err.subject(), Some("a:b"));
}

#[test]
fn defining_twice_fails() {
    let ws = Workspace::default();
    ws.define("a", |_| Ok(())).unwrap();
    let err = ws.define("a", |_| Ok(())).unwrap_err();
    assert!(matches!(err, CairnError::DuplicateProject { .. }));
    assert_eq!(
        err.to_string(),
        "You cannot define the same project (a) more than once"
    );
}

#[test]
fn lookup_forces_parent_then_child() {
    let ws = Workspace::default();
    let order = log();
    let outer = order.clone();
    ws.define("a", move |a| {
        outer.lock().unwrap().push("a".into());
        let inner = outer.clone();
        a.define("b", move |_| {
            inner.lock().unwrap().push("a:b".into());
            Ok(())
        })?;
        Ok(())
    })
    .unwrap();

    let b = ws.project("a:b").unwrap();
    assert_eq!(b.name(), "a:b");
    assert_eq!(b.state(), ProjectState::Evaluated);
    assert_eq!(entries(&order), vec!["a", "a:b"]);
}

#[test]
fn body_can_pull_a_deferred_child_forward() {
    let ws = Workspace::default();
    let order = log();
    let outer = order.clone();
    ws.define("a", move |a| {
        let inner = outer.clone();
        a.define("b", move |_| {
            inner.lock().unwrap().push("a:b body".into());
            Ok(())
        })?;
        let b = a.project("b")?;
        assert_eq!(b.state(), ProjectState::Evaluated);
        outer.lock().unwrap().push("a body end".into());
        Ok(())
    })
    .unwrap();
    assert_eq!(entries(&order), vec!["a:b body", "a body end"]);
}

#[test]
fn projects_are_sorted_and_evaluated() {
    let ws = Workspace::default();
    ws.define("zeta", |_| Ok(())).unwrap();
    ws.define("alpha", |alpha| {
        alpha.define("mid", |_| Ok(()))?;
        Ok(())
    })
    .unwrap();

    let all = ws.projects().unwrap();
    let names: Vec<&str> = all.iter().map(|p| p.name()).collect();
    assert_eq!(names, vec!["alpha", "alpha:mid", "zeta"]);
    assert!(all.iter().all(|p| p.state() == ProjectState::Evaluated));
}

#[test]
fn mutual_sibling_lookup_is_circular() {
    let ws = Workspace::default();
    let err = ws
        .define("a", |a| {
            a.define("b", |b| {
                b.project("c")?;
                Ok(())
            })?;
            a.define("c", |c| {
                c.project("b")?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap_err();
    match err {
        CairnError::CircularEvaluation { name, chain } => {
            assert_eq!(name, "a:b");
            assert!(chain.contains("a:b => a:c"), "chain was {chain}");
        }
        other => panic!("expected CircularEvaluation, got {other:?}"),
    }
    assert_eq!(ws.current_scope(), None);
}

#[test]
fn relative_lookup_walks_ancestors() {
    let ws = Workspace::default();
    ws.define("shared", |_| Ok(())).unwrap();
    ws.define("app", |app| {
        app.define("api", |_| Ok(()))?;
        app.define("web", |web| {
            assert_eq!(web.project("api")?.name(), "app:api");
            assert_eq!(web.project("shared")?.name(), "shared");
            Ok(())
        })?;
        Ok(())
    })
    .unwrap();
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

#[test]
fn inherited_attribute_is_cached_on_first_read() {
    let ws = Workspace::default();
    ws.declare_inherited_attribute("version", json!("1.0"));
    ws.define("a", |a| {
        a.define("b", |_| Ok(()))?;
        a.define("c", |_| Ok(()))?;
        Ok(())
    })
    .unwrap();

    let a = ws.project("a").unwrap();
    let b = ws.project("a:b").unwrap();
    let c = ws.project("a:c").unwrap();

    assert_eq!(b.attribute("version").unwrap(), json!("1.0"));
    a.set_attribute("version", json!("2.0")).unwrap();
    assert_eq!(b.attribute("version").unwrap(), json!("1.0"));
    assert_eq!(c.attribute("version").unwrap(), json!("2.0"));
}

#[test]
fn attributes_passed_to_define_are_visible_to_children() {
    let ws = Workspace::default();
    ws.declare_inherited_attribute("group", json!(null));
    ws.define_with("a", [("group", json!("org.example"))], |a| {
        a.define("b", |b| {
            let group: String = b.attribute_as("group")?;
            assert_eq!(group, "org.example");
            Ok(())
        })?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn base_dir_is_fixed_once_read() {
    let dir = tempfile::tempdir().unwrap();
    let ws = Workspace::new(WorkspaceConfig {
        base_dir: Some(dir.path().to_path_buf()),
        ..WorkspaceConfig::default()
    });
    let a = ws
        .define("a", |a| {
            a.define("b", |_| Ok(()))?;
            Ok(())
        })
        .unwrap();
    let b = ws.project("a:b").unwrap();
    assert_eq!(b.base_dir().unwrap(), dir.path().join("b"));
    assert!(matches!(
        a.set_base_dir("elsewhere").unwrap_err(),
        CairnError::BaseDirAlreadySet { .. }
    ));
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[test]
fn recursive_build_runs_children_first_once() {
    let ws = Workspace::default();
    let runs = log();
    define_tree(&ws, &runs);

    ws.invoke("a:build").unwrap();
    assert_eq!(entries(&runs), vec!["a:b:build", "a:c:build", "a:build"]);

    ws.invoke("a:build").unwrap();
    assert_eq!(entries(&runs).len(), 3);
}

#[test]
fn task_namespace_follows_project() {
    let ws = Workspace::default();
    ws.define("a", |a| {
        a.task("x")?.enhance(["y"]);
        a.task("y")?;
        let again = a.task("x")?;
        again.enhance(["z"]);
        a.task("z")?;
        Ok(())
    })
    .unwrap();

    let a = ws.project("a").unwrap();
    let x = a.task("x").unwrap();
    assert_eq!(x.name(), "a:x");
    assert_eq!(x.prerequisite_names(), vec!["y", "z"]);
    assert!(ws.lookup_task("a:x", None).is_some());

    match a.task("missing").unwrap_err() {
        CairnError::TaskNotFound { name } => assert_eq!(name, "a:missing"),
        other => panic!("expected TaskNotFound, got {other:?}"),
    }
}

#[test]
fn invoking_unknown_task_fails() {
    let ws = Workspace::default();
    assert!(matches!(
        ws.invoke("nothing").unwrap_err(),
        CairnError::TaskNotFound { .. }
    ));
}

#[test]
fn failing_action_marks_task_failed() {
    let ws = Workspace::default();
    ws.define("a", |a| {
        a.task("test")?
            .action(|_| Err(CairnError::Other("2 tests failed".into())));
        Ok(())
    })
    .unwrap();
    assert!(ws.invoke("a:test").is_err());
    let task = ws.lookup_task("a:test", None).unwrap();
    assert_eq!(task.status(), TaskStatus::Failed("2 tests failed".into()));
    assert!(matches!(
        ws.invoke("a:test").unwrap_err(),
        CairnError::TaskFailed { .. }
    ));
}

#[test]
fn on_define_hook_runs_before_body() {
    let ws = Workspace::default();
    ws.declare_attribute("packaging", json!(null));
    ws.on_define(|project| project.set_attribute("packaging", json!("jar")));
    ws.define("a", |a| {
        assert_eq!(a.attribute("packaging")?, json!("jar"));
        Ok(())
    })
    .unwrap();
}

#[test]
fn recursive_tasks_extension_builds_whole_tree() {
    let ws = Workspace::default();
    ws.register_extension(RecursiveTasks::new(["build", "clean"]));
    ws.define("a", |a| {
        a.define("b", |b| {
            b.define("deep", |_| Ok(()))?;
            Ok(())
        })?;
        Ok(())
    })
    .unwrap();

    ws.invoke("a:clean").unwrap();
    for name in ["a:clean", "a:b:clean", "a:b:deep:clean"] {
        assert!(ws.lookup_task(name, None).unwrap().is_invoked(), "{name}");
    }
    assert!(!ws.lookup_task("a:build", None).unwrap().is_invoked());
}

#[test]
fn file_task_skips_when_output_is_newer() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("in.txt"), "source").unwrap();
    std::fs::write(dir.path().join("out.txt"), "built").unwrap();

    let ws = Workspace::new(WorkspaceConfig {
        base_dir: Some(dir.path().to_path_buf()),
        ..WorkspaceConfig::default()
    });
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = builds.clone();
    let a = ws
        .define("a", move |a| {
            let input = a.file("in.txt")?;
            a.file("out.txt")?.enhance([&input]).action(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        })
        .unwrap();

    let output = a.file("out.txt").unwrap();
    output.invoke().unwrap();
    assert_eq!(builds.load(Ordering::SeqCst), 0);
    assert!(output.is_invoked());
}

#[test]
fn file_task_runs_when_input_is_newer() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("out.txt"), "built").unwrap();
    std::fs::write(dir.path().join("in.txt"), "source").unwrap();
    std::fs::File::options()
        .write(true)
        .open(dir.path().join("in.txt"))
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(3600))
        .unwrap();

    let ws = Workspace::new(WorkspaceConfig {
        base_dir: Some(dir.path().to_path_buf()),
        ..WorkspaceConfig::default()
    });
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = builds.clone();
    ws.define("a", move |a| {
        let input = a.file("in.txt")?;
        a.file("out.txt")?.enhance([&input]).action(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        Ok(())
    })
    .unwrap();

    let out = dir.path().join("out.txt");
    ws.lookup_task(&out.to_string_lossy(), None)
        .unwrap()
        .invoke()
        .unwrap();
    assert_eq!(builds.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sequential_run_matches_invoke() {
    let ws = Workspace::default();
    let runs = log();
    define_tree(&ws, &runs);
    ws.run(&["a:build"]).await.unwrap();
    assert_eq!(entries(&runs), vec!["a:b:build", "a:c:build", "a:build"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn parallel_recursive_build_runs_each_task_once() {
    let ws = parallel_workspace(4);
    let runs = log();
    define_tree(&ws, &runs);

    ws.run(&["a:build", "a:b:build"]).await.unwrap();
    let mut seen = entries(&runs);
    assert_eq!(seen.len(), 3);
    assert_eq!(seen.last().map(String::as_str), Some("a:build"));
    seen.sort();
    assert_eq!(seen, vec!["a:b:build", "a:build", "a:c:build"]);
}

#[tokio::test]
async fn parallel_failure_is_surfaced() {
    let ws = parallel_workspace(2);
    let runs = log();
    let a_log = runs.clone();
    ws.define("a", move |a| {
        recorded_build(a, &a_log)?;
        a.define("b", |b| {
            b.recursive_task("build")?
                .action(|_| Err(CairnError::Other("b does not compile".into())));
            Ok(())
        })?;
        let c_log = a_log.clone();
        a.define("c", move |c| recorded_build(c, &c_log))?;
        Ok(())
    })
    .unwrap();

    let err = ws.run(&["a:build"]).await.unwrap_err();
    assert!(matches!(err, CairnError::Other(ref m) if m == "b does not compile"));
    assert!(!entries(&runs).contains(&"a:build".to_string()));
}

#[tokio::test]
async fn events_report_task_lifecycle() {
    let ws = Workspace::default();
    let mut rx = ws.subscribe();
    ws.define("a", |a| {
        a.task("compile")?.action(|_| Ok(()));
        Ok(())
    })
    .unwrap();
    ws.run(&["a:compile"]).await.unwrap();

    let mut task_events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            WorkspaceEvent::TaskStarted { name } => task_events.push(format!("started {name}")),
            WorkspaceEvent::TaskCompleted { name, .. } => {
                task_events.push(format!("completed {name}"))
            }
            _ => {}
        }
    }
    assert_eq!(task_events, vec!["started a:compile", "completed a:compile"]);
}

#[test]
fn local_projects_match_directory() {
    let ws = Workspace::new(WorkspaceConfig {
        base_dir: Some("/checkout".into()),
        ..WorkspaceConfig::default()
    });
    ws.define("a", |a| {
        a.define("b", |_| Ok(()))?;
        Ok(())
    })
    .unwrap();
    let local = ws.local_projects(Path::new("/checkout/b")).unwrap();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].name(), "a:b");
}
