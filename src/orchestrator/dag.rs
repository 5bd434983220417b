//! Named tasks with declared upstream sets.

use crate::error::{PipelineError, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub name: String,
    pub upstream: Vec<String>,
}

/// A validated acyclic graph. Construction fails on duplicate names,
/// unknown upstream references and cycles.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    /// Topological order; ties broken by declaration order.
    nodes: Vec<TaskNode>,
}

#[derive(Debug, Default)]
pub struct TaskGraphBuilder {
    nodes: Vec<TaskNode>,
}

impl TaskGraphBuilder {
    pub fn task(mut self, name: &str, upstream: &[&str]) -> Self {
        self.nodes.push(TaskNode {
            name: name.to_string(),
            upstream: upstream.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn build(self) -> Result<TaskGraph> {
        let mut index = BTreeMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if index.insert(node.name.as_str(), i).is_some() {
                return Err(PipelineError::Graph(format!("duplicate task {:?}", node.name)));
            }
        }

        let mut indegree = vec![0usize; self.nodes.len()];
        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            let unique: BTreeSet<&str> = node.upstream.iter().map(String::as_str).collect();
            for up in unique {
                let Some(&j) = index.get(up) else {
                    return Err(PipelineError::Graph(format!(
                        "task {:?} depends on unknown task {up:?}",
                        node.name
                    )));
                };
                indegree[i] += 1;
                downstream[j].push(i);
            }
        }

        // Kahn's algorithm
        let mut queue: VecDeque<usize> = (0..self.nodes.len()).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &d in &downstream[i] {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    queue.push_back(d);
                }
            }
        }
        if order.len() != self.nodes.len() {
            let stuck: Vec<&str> = (0..self.nodes.len())
                .filter(|&i| indegree[i] > 0)
                .map(|i| self.nodes[i].name.as_str())
                .collect();
            return Err(PipelineError::Graph(format!("cycle among tasks {stuck:?}")));
        }

        let mut slots: Vec<Option<TaskNode>> = self.nodes.into_iter().map(Some).collect();
        let nodes = order.into_iter().filter_map(|i| slots[i].take()).collect();
        Ok(TaskGraph { nodes })
    }
}

impl TaskGraph {
    pub fn builder() -> TaskGraphBuilder {
        TaskGraphBuilder::default()
    }

    /// Nodes in topological order.
    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

}

#[cfg(test)]
impl TaskGraph {
    pub fn get(&self, name: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topological_order() {
        let graph = TaskGraph::builder()
            .task("summarize_by_author", &["load"])
            .task("load", &["extract"])
            .task("summarize_by_source", &["load"])
            .task("extract", &[])
            .build()
            .unwrap();
        let names: Vec<&str> = graph.nodes().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(
            names,
            ["extract", "load", "summarize_by_author", "summarize_by_source"]
        );
    }

    #[test]
    fn test_rejects_unknown_dependency() {
        let err = TaskGraph::builder().task("load", &["extract"]).build().unwrap_err();
        assert!(matches!(err, PipelineError::Graph(msg) if msg.contains("unknown task")));
    }

    #[test]
    fn test_rejects_cycle() {
        let err = TaskGraph::builder()
            .task("a", &["c"])
            .task("b", &["a"])
            .task("c", &["b"])
            .task("d", &[])
            .build()
            .unwrap_err();
        match err {
            PipelineError::Graph(msg) => {
                assert!(msg.contains("cycle"));
                assert!(!msg.contains("\"d\""));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rejects_duplicates_and_self_loops() {
        assert!(TaskGraph::builder().task("a", &[]).task("a", &[]).build().is_err());
        assert!(TaskGraph::builder().task("a", &["a"]).build().is_err());
    }
}
