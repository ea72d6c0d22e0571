//! Task graph construction and dependency resolution
//!
//! Uses petgraph to build a DAG of tasks and perform topological sorting
//! to determine execution order.

use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

use crate::error::{AssetError, Result};
use crate::task::TaskSpec;

/// Collects tasks before the graph is validated.
#[derive(Debug, Default)]
pub struct TaskGraphBuilder {
    tasks: Vec<TaskSpec>,
}

impl TaskGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Names are unique.
    pub fn add(&mut self, task: TaskSpec) -> Result<&mut Self> {
        if self.contains(&task.name) {
            return Err(AssetError::DuplicateTask { name: task.name });
        }
        self.tasks.push(task);
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.iter().any(|t| t.name == name)
    }

    /// Resolve dependencies and reject unknown names and cycles.
    pub fn build(self) -> Result<TaskGraph> {
        let available: Vec<String> = self.tasks.iter().map(|t| t.name.clone()).collect();

        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for task in self.tasks {
            let name = task.name.clone();
            let idx = graph.add_node(task);
            name_to_index.insert(name, idx);
        }

        let mut edges = Vec::new();
        for idx in graph.node_indices() {
            for dep in &graph[idx].depends {
                let dep_idx = name_to_index.get(dep).ok_or_else(|| AssetError::TaskNotFound {
                    name: dep.clone(),
                    available: available.clone(),
                })?;

                // Edge goes from dependency TO dependent (dep must run first)
                edges.push((*dep_idx, idx));
            }
        }
        for (from, to) in edges {
            graph.add_edge(from, to, ());
        }

        if is_cyclic_directed(&graph) {
            let cycle = find_cycle_description(&graph);
            return Err(AssetError::CyclicDependency { cycle });
        }

        Ok(TaskGraph {
            graph,
            name_to_index,
        })
    }
}

/// The validated task dependency graph
#[derive(Debug)]
pub struct TaskGraph {
    graph: DiGraph<TaskSpec, ()>,
    name_to_index: HashMap<String, NodeIndex>,
}

/// Tasks needed for a set of targets, grouped so every task's
/// dependencies sit in earlier groups.
#[derive(Debug)]
pub struct ExecutionPlan<'a> {
    /// Tasks to execute in order
    pub tasks: Vec<&'a TaskSpec>,
    /// Groups of tasks that can run in parallel
    pub parallel_groups: Vec<Vec<&'a TaskSpec>>,
}

impl TaskGraph {
    fn index(&self, name: &str) -> Result<NodeIndex> {
        self.name_to_index
            .get(name)
            .copied()
            .ok_or_else(|| AssetError::TaskNotFound {
                name: name.to_string(),
                available: self.task_names().map(String::from).collect(),
            })
    }

    /// Execution order for the given targets, dependencies included, each
    /// task once.
    pub fn execution_order(&self, targets: &[&str]) -> Result<Vec<&TaskSpec>> {
        let mut required = HashSet::new();
        for target in targets {
            let idx = self.index(target)?;
            required.extend(self.get_ancestors(idx));
        }

        let sorted = toposort(&self.graph, None).map_err(|c| AssetError::CyclicDependency {
            cycle: self.graph[c.node_id()].name.clone(),
        })?;

        Ok(sorted
            .into_iter()
            .filter(|idx| required.contains(idx))
            .map(|idx| &self.graph[idx])
            .collect())
    }

    /// Plan the targets into dependency levels.
    pub fn plan(&self, targets: &[&str]) -> Result<ExecutionPlan<'_>> {
        let tasks = self.execution_order(targets)?;

        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut parallel_groups: Vec<Vec<&TaskSpec>> = Vec::new();

        for &task in &tasks {
            // Dependencies come earlier in topological order
            let target_group = task
                .depends
                .iter()
                .filter_map(|d| depth.get(d.as_str()))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);

            while parallel_groups.len() <= target_group {
                parallel_groups.push(Vec::new());
            }
            parallel_groups[target_group].push(task);
            depth.insert(&task.name, target_group);
        }

        Ok(ExecutionPlan {
            tasks,
            parallel_groups,
        })
    }

    /// Get ancestors (all dependencies, transitive) of a node
    fn get_ancestors(&self, target: NodeIndex) -> Vec<NodeIndex> {
        use petgraph::visit::{Bfs, Reversed};

        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(&reversed, target);
        let mut ancestors = Vec::new();

        // BFS backwards through dependencies
        while let Some(node) = bfs.next(&reversed) {
            ancestors.push(node);
        }

        ancestors
    }

    /// Check if a task exists
    pub fn has_task(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// Get a task by name
    pub fn get_task(&self, name: &str) -> Option<&TaskSpec> {
        self.name_to_index.get(name).map(|&idx| &self.graph[idx])
    }

    /// All task names in registration order
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(|t| t.name.as_str())
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskSpec> {
        self.graph.node_weights()
    }

    /// Get direct dependencies of a task
    pub fn dependencies(&self, name: &str) -> Option<Vec<&str>> {
        self.get_task(name)
            .map(|task| task.depends.iter().map(String::as_str).collect())
    }

    /// Get tasks that depend on the given task
    pub fn dependents(&self, name: &str) -> Option<Vec<&str>> {
        self.name_to_index.get(name).map(|&idx| {
            let mut names: Vec<&str> = self
                .graph
                .neighbors_directed(idx, petgraph::Direction::Outgoing)
                .map(|dep_idx| self.graph[dep_idx].name.as_str())
                .collect();
            names.sort_unstable();
            names.dedup();
            names
        })
    }
}

/// Find a human-readable description of a cycle
fn find_cycle_description(graph: &DiGraph<TaskSpec, ()>) -> String {
    for idx in graph.node_indices() {
        let mut visited = HashSet::new();
        let mut path = vec![graph[idx].name.clone()];

        if dfs_find_cycle(graph, idx, idx, &mut visited, &mut path) {
            return path.join(" -> ");
        }
    }

    "Unknown cycle".to_string()
}

fn dfs_find_cycle(
    graph: &DiGraph<TaskSpec, ()>,
    current: NodeIndex,
    target: NodeIndex,
    visited: &mut HashSet<NodeIndex>,
    path: &mut Vec<String>,
) -> bool {
    for neighbor in graph.neighbors(current) {
        if neighbor == target {
            path.push(graph[target].name.clone());
            return true;
        }

        if visited.insert(neighbor) {
            path.push(graph[neighbor].name.clone());
            if dfs_find_cycle(graph, neighbor, target, visited, path) {
                return true;
            }
            path.pop();
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, deps: &[&str]) -> TaskSpec {
        TaskSpec::new(name).depends_on(deps.iter().copied())
    }

    fn make_test_graph() -> TaskGraph {
        let mut builder = TaskGraphBuilder::new();
        builder.add(task("a", &[])).unwrap();
        builder.add(task("b", &["a"])).unwrap();
        builder.add(task("c", &["a"])).unwrap();
        builder.add(task("d", &["b", "c"])).unwrap();
        builder.build().unwrap()
    }

    fn pos(names: &[&str], name: &str) -> usize {
        names.iter().position(|&n| n == name).unwrap()
    }

    #[test]
    fn test_execution_order() {
        let graph = make_test_graph();

        let order = graph.execution_order(&["d"]).unwrap();
        let names: Vec<_> = order.iter().map(|t| t.name.as_str()).collect();

        // 'a' must come before 'b' and 'c', which must come before 'd'
        assert_eq!(names.len(), 4);
        assert!(pos(&names, "a") < pos(&names, "b"));
        assert!(pos(&names, "a") < pos(&names, "c"));
        assert!(pos(&names, "b") < pos(&names, "d"));
        assert!(pos(&names, "c") < pos(&names, "d"));
    }

    #[test]
    fn test_shared_dependency_once() {
        let graph = make_test_graph();
        let order = graph.execution_order(&["b", "c"]).unwrap();
        let names: Vec<_> = order.iter().map(|t| t.name.as_str()).collect();

        assert_eq!(names.iter().filter(|&&n| n == "a").count(), 1);
        assert!(!names.contains(&"d"));
    }

    #[test]
    fn test_plan_groups() {
        let graph = make_test_graph();
        let plan = graph.plan(&["d"]).unwrap();

        let groups: Vec<Vec<&str>> = plan
            .parallel_groups
            .iter()
            .map(|g| {
                let mut names: Vec<_> = g.iter().map(|t| t.name.as_str()).collect();
                names.sort_unstable();
                names
            })
            .collect();
        assert_eq!(groups, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn test_cycle_detection() {
        let mut builder = TaskGraphBuilder::new();
        builder.add(task("a", &["b"])).unwrap();
        builder.add(task("b", &["a"])).unwrap();

        match builder.build() {
            Err(AssetError::CyclicDependency { cycle }) => {
                assert!(cycle.contains("a") && cycle.contains("b"));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let mut builder = TaskGraphBuilder::new();
        builder.add(task("a", &["missing"])).unwrap();

        assert!(matches!(
            builder.build(),
            Err(AssetError::TaskNotFound { name, .. }) if name == "missing"
        ));
    }

    #[test]
    fn test_duplicate_task() {
        let mut builder = TaskGraphBuilder::new();
        builder.add(task("a", &[])).unwrap();
        assert!(matches!(
            builder.add(task("a", &[])),
            Err(AssetError::DuplicateTask { .. })
        ));
    }

    #[test]
    fn test_unknown_target() {
        let graph = make_test_graph();
        match graph.execution_order(&["nope"]) {
            Err(AssetError::TaskNotFound { available, .. }) => {
                assert_eq!(available, vec!["a", "b", "c", "d"]);
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[test]
    fn test_dependents() {
        let graph = make_test_graph();
        assert_eq!(graph.dependents("a").unwrap(), vec!["b", "c"]);
        assert_eq!(graph.dependencies("d").unwrap(), vec!["b", "c"]);
    }
}
