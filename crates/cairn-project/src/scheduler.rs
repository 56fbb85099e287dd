//! Task scheduling: sequential depth-first invocation or a parallel run over
//! the prerequisite DAG.
//!
//! Task actions and project definitions are blocking closures, so they always
//! run on tokio's blocking pool. In parallel mode the reachable graph is
//! planned up front on one blocking thread, ordered with Kahn's algorithm
//! (alphabetical tie-breaking), and every node whose prerequisites are done
//! is handed to a worker, up to `jobs` at a time.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use cairn_types::{CairnError, Result};
use tokio::task::JoinSet;

use crate::task::Invocable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Invoke targets one after another, prerequisites depth-first.
    #[default]
    Sequential,
    /// Run independent nodes concurrently, at most `jobs` at once.
    Parallel { jobs: usize },
}

// ---------------------------------------------------------------------------
// ExecutionPlan
// ---------------------------------------------------------------------------

/// The not-yet-invoked part of the graph reachable from a set of targets.
pub struct ExecutionPlan {
    nodes: BTreeMap<String, Arc<dyn Invocable>>,
    /// node -> names of its pending prerequisites
    dependencies: BTreeMap<String, Vec<String>>,
}

impl ExecutionPlan {
    /// Walk prerequisites from `targets`. Already-invoked nodes are left out;
    /// nodes that must run inline (project definitions) are invoked here.
    pub fn build(targets: &[Arc<dyn Invocable>]) -> Result<Self> {
        let mut nodes: BTreeMap<String, Arc<dyn Invocable>> = BTreeMap::new();
        let mut dependencies: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut stack: Vec<Arc<dyn Invocable>> = targets.to_vec();

        while let Some(node) = stack.pop() {
            let name = node.name().to_string();
            if nodes.contains_key(&name) {
                continue;
            }
            let mut pending = Vec::new();
            for prerequisite in node.prerequisites()? {
                if prerequisite.runs_inline() {
                    prerequisite.invoke()?;
                    continue;
                }
                if prerequisite.is_invoked() {
                    continue;
                }
                if !pending.contains(&prerequisite.name().to_string()) {
                    pending.push(prerequisite.name().to_string());
                }
                stack.push(prerequisite);
            }
            dependencies.insert(name.clone(), pending);
            nodes.insert(name, node);
        }

        Ok(Self {
            nodes,
            dependencies,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// node -> nodes waiting on it
    fn dependents(&self) -> HashMap<&str, Vec<&str>> {
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (node, prerequisites) in &self.dependencies {
            for prerequisite in prerequisites {
                dependents.entry(prerequisite.as_str()).or_default().push(node.as_str());
            }
        }
        dependents
    }

    /// Topological order, prerequisites first, ties broken by name.
    pub fn order(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .dependencies
            .iter()
            .map(|(node, prerequisites)| (node.as_str(), prerequisites.len()))
            .collect();
        let dependents = self.dependents();

        // BTreeMap iteration is already sorted.
        let mut queue: VecDeque<&str> = self
            .dependencies
            .iter()
            .filter(|(_, prerequisites)| prerequisites.is_empty())
            .map(|(node, _)| node.as_str())
            .collect();

        let mut order = Vec::new();
        while let Some(current) = queue.pop_front() {
            order.push(current.to_string());
            let mut next_ready = Vec::new();
            for dependent in dependents.get(current).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(*dependent);
                    }
                }
            }
            next_ready.sort();
            queue.extend(next_ready);
        }

        if order.len() != self.nodes.len() {
            let mut cycle: Vec<&str> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(node, _)| *node)
                .collect();
            cycle.sort();
            return Err(CairnError::CircularTaskDependency {
                chain: cycle.join(" => "),
            });
        }
        Ok(order)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    mode: ExecutionMode,
}

impl Scheduler {
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Run every target to completion. The first failure is returned once
    /// running siblings have finished; nothing new is started after it.
    pub async fn run(&self, targets: Vec<Arc<dyn Invocable>>) -> Result<()> {
        match self.mode {
            ExecutionMode::Sequential => run_sequential(targets).await,
            ExecutionMode::Parallel { jobs } => run_parallel(targets, jobs.max(1)).await,
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> CairnError {
    CairnError::Other(format!("task worker failed: {e}"))
}

async fn run_sequential(targets: Vec<Arc<dyn Invocable>>) -> Result<()> {
    for target in targets {
        tracing::debug!(target = %target.name(), "Invoking");
        tokio::task::spawn_blocking(move || target.invoke())
            .await
            .map_err(join_error)??;
    }
    Ok(())
}

async fn run_parallel(targets: Vec<Arc<dyn Invocable>>, jobs: usize) -> Result<()> {
    // Planning may run project definitions, which block.
    let plan = tokio::task::spawn_blocking(move || ExecutionPlan::build(&targets))
        .await
        .map_err(join_error)??;
    let order = plan.order()?;
    tracing::info!(nodes = order.len(), jobs, "Parallel run");

    let dependents = plan.dependents();
    let mut remaining: HashMap<&str, usize> = plan
        .dependencies
        .iter()
        .map(|(node, prerequisites)| (node.as_str(), prerequisites.len()))
        .collect();
    let mut ready: VecDeque<String> = order
        .iter()
        .filter(|node| remaining.get(node.as_str()) == Some(&0))
        .cloned()
        .collect();

    let mut running: JoinSet<(String, Result<()>)> = JoinSet::new();
    let mut first_error: Option<CairnError> = None;

    loop {
        while first_error.is_none() && running.len() < jobs {
            let Some(name) = ready.pop_front() else {
                break;
            };
            let Some(node) = plan.nodes.get(&name).cloned() else {
                continue;
            };
            running.spawn_blocking(move || {
                let outcome = node.execute();
                (name, outcome)
            });
        }

        let Some(joined) = running.join_next().await else {
            break;
        };
        match joined {
            Ok((name, Ok(()))) => {
                let mut next_ready = Vec::new();
                for dependent in dependents.get(name.as_str()).into_iter().flatten() {
                    if let Some(count) = remaining.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            next_ready.push(dependent.to_string());
                        }
                    }
                }
                next_ready.sort();
                ready.extend(next_ready);
            }
            Ok((name, Err(e))) => {
                tracing::warn!(task = %name, error = %e, "Parallel run stopping");
                first_error.get_or_insert(e);
            }
            Err(e) => {
                first_error.get_or_insert(join_error(e));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
