//! Ordering graph over `COMPONENT-COMMAND` keys.

use crate::error::{AppError, Result};
use std::collections::{HashMap, VecDeque};

/// Directed graph where an edge `a -> b` means `a` must run before `b`.
///
/// Node and edge insertion order is remembered so that the topological order is
/// deterministic for the same metadata.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    outgoing: Vec<Vec<usize>>,
    edge_count: usize,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node if it is not present yet and return its index.
    pub fn add_node(&mut self, key: impl Into<String>) -> usize {
        let key = key.into();
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.nodes.len();
        self.index.insert(key.clone(), idx);
        self.nodes.push(key);
        self.outgoing.push(Vec::new());
        idx
    }

    /// Declare that `blocker` must precede `blocked`. Duplicate edges are ignored.
    pub fn add_edge(&mut self, blocker: impl Into<String>, blocked: impl Into<String>) {
        let from = self.add_node(blocker);
        let to = self.add_node(blocked);
        if !self.outgoing[from].contains(&to) {
            self.outgoing[from].push(to);
            self.edge_count += 1;
        }
    }

    pub fn contains_edge(&self, blocker: &str, blocked: &str) -> bool {
        match (self.index.get(blocker), self.index.get(blocked)) {
            (Some(&from), Some(&to)) => self.outgoing[from].contains(&to),
            _ => false,
        }
    }

    pub fn successors(&self, key: &str) -> Vec<&str> {
        self.index
            .get(key)
            .map(|&idx| {
                self.outgoing[idx]
                    .iter()
                    .map(|&to| self.nodes[to].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Kahn's algorithm, seeded and expanded in insertion order.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        for targets in &self.outgoing {
            for &to in targets {
                in_degree[to] += 1;
            }
        }

        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, degree)| *degree == 0)
            .map(|(idx, _)| idx)
            .collect();

        let mut sorted = Vec::with_capacity(self.nodes.len());
        while let Some(idx) = queue.pop_front() {
            sorted.push(idx);
            for &to in &self.outgoing[idx] {
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    queue.push_back(to);
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            let nodes = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, degree)| *degree > 0)
                .map(|(idx, _)| self.nodes[idx].clone())
                .collect();
            return Err(AppError::CyclicDependency { nodes });
        }

        Ok(sorted.into_iter().map(|idx| self.nodes[idx].clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(order: &[String], key: &str) -> usize {
        order.iter().position(|k| k == key).unwrap()
    }

    #[test]
    fn linear_chain() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("ZOOKEEPER_SERVER-START", "NAMENODE-START");
        graph.add_edge("NAMENODE-START", "DATANODE-START");

        let order = graph.topological_order().unwrap();
        assert_eq!(
            order,
            vec!["ZOOKEEPER_SERVER-START", "NAMENODE-START", "DATANODE-START"]
        );
    }

    #[test]
    fn diamond_respects_every_edge() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("A-START", "B-START");
        graph.add_edge("A-START", "C-START");
        graph.add_edge("B-START", "D-START");
        graph.add_edge("C-START", "D-START");

        let order = graph.topological_order().unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "A-START") < position(&order, "B-START"));
        assert!(position(&order, "A-START") < position(&order, "C-START"));
        assert!(position(&order, "B-START") < position(&order, "D-START"));
        assert!(position(&order, "C-START") < position(&order, "D-START"));
    }

    #[test]
    fn order_is_deterministic() {
        let build = || {
            let mut graph = DependencyGraph::new();
            graph.add_edge("X-START", "Y-START");
            graph.add_node("P-START");
            graph.add_edge("Q-START", "Y-START");
            graph
        };
        assert_eq!(
            build().topological_order().unwrap(),
            build().topological_order().unwrap()
        );
    }

    #[test]
    fn cycle_is_reported() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("A-START", "B-START");
        graph.add_edge("B-START", "C-START");
        graph.add_edge("C-START", "A-START");
        graph.add_edge("D-START", "A-START");

        let result = graph.topological_order();
        match result {
            Err(AppError::CyclicDependency { nodes }) => {
                assert_eq!(nodes.len(), 3);
                assert!(!nodes.contains(&"D-START".to_string()));
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("A-STOP", "A-STOP");
        assert!(matches!(
            graph.topological_order(),
            Err(AppError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn duplicate_edges_collapse() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("A-START", "B-START");
        graph.add_edge("A-START", "B-START");
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.contains_edge("A-START", "B-START"));
        assert!(!graph.contains_edge("B-START", "A-START"));
        assert_eq!(graph.successors("A-START"), vec!["B-START"]);
    }
}
