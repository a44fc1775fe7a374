//! Dense integer view of a node graph for traversal.

use std::collections::{HashMap, VecDeque};

use super::GraphNode;

/// Node ids mapped to positions once per run; all traversals are iterative.
#[derive(Debug, Clone)]
pub struct GraphIndex {
    positions: HashMap<String, usize>,
    /// Resolved child edges per node position.
    children: Vec<Vec<usize>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

impl GraphIndex {
    /// Index `nodes`; with duplicate ids the first occurrence owns the id.
    pub fn new(nodes: &[GraphNode]) -> Self {
        let mut positions = HashMap::with_capacity(nodes.len());
        for (position, node) in nodes.iter().enumerate() {
            positions.entry(node.id.clone()).or_insert(position);
        }
        let children = nodes
            .iter()
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|child| positions.get(child).copied())
                    .collect()
            })
            .collect();
        Self {
            positions,
            children,
        }
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn children(&self, position: usize) -> &[usize] {
        &self.children[position]
    }

    /// Parent positions per node, one entry per incoming edge.
    pub fn parents(&self) -> Vec<Vec<usize>> {
        let mut parents = vec![Vec::new(); self.len()];
        for (parent, children) in self.children.iter().enumerate() {
            for &child in children {
                parents[child].push(parent);
            }
        }
        parents
    }

    /// Edges `(parent, child)` that close a cycle, found by depth-first search.
    pub fn back_edges(&self) -> Vec<(usize, usize)> {
        let mut marks = vec![Mark::Unvisited; self.len()];
        let mut back = Vec::new();
        for start in 0..self.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::OnStack;
            while let Some(top) = stack.last_mut() {
                let (node, next) = *top;
                if let Some(&child) = self.children[node].get(next) {
                    top.1 += 1;
                    match marks[child] {
                        Mark::Unvisited => {
                            marks[child] = Mark::OnStack;
                            stack.push((child, 0));
                        }
                        Mark::OnStack => back.push((node, child)),
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    stack.pop();
                }
            }
        }
        back
    }

    /// Depth of every node (roots are 1), following the longest path over
    /// the graph with back edges ignored.
    pub fn depths(&self) -> Vec<usize> {
        let back = self.back_edges();
        let mut indegree = vec![0usize; self.len()];
        for (parent, children) in self.children.iter().enumerate() {
            for &child in children {
                if !back.contains(&(parent, child)) {
                    indegree[child] += 1;
                }
            }
        }
        let mut depth = vec![1usize; self.len()];
        let mut queue: VecDeque<usize> = (0..self.len()).filter(|&n| indegree[n] == 0).collect();
        while let Some(node) = queue.pop_front() {
            for &child in &self.children[node] {
                if back.contains(&(node, child)) {
                    continue;
                }
                depth[child] = depth[child].max(depth[node] + 1);
                indegree[child] -= 1;
                if indegree[child] == 0 {
                    queue.push_back(child);
                }
            }
        }
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;

    fn node(id: &str, children: &[&str]) -> GraphNode {
        let mut node = GraphNode::new(id.to_string(), NodeKind::Block, "div");
        node.children = children.iter().map(|c| c.to_string()).collect();
        node
    }

    #[test]
    fn finds_back_edges() {
        let index = GraphIndex::new(&[node("a", &["b"]), node("b", &["c"]), node("c", &["a"])]);
        assert_eq!(index.back_edges(), vec![(2, 0)]);
        let acyclic = GraphIndex::new(&[node("a", &["b", "c"]), node("b", &["c"]), node("c", &[])]);
        assert!(acyclic.back_edges().is_empty());
    }

    #[test]
    fn self_reference_is_a_back_edge() {
        let index = GraphIndex::new(&[node("a", &["a"])]);
        assert_eq!(index.back_edges(), vec![(0, 0)]);
    }

    #[test]
    fn depths_follow_longest_path() {
        let index = GraphIndex::new(&[
            node("a", &["b", "d"]),
            node("b", &["c"]),
            node("c", &["d"]),
            node("d", &[]),
            node("e", &["missing"]),
        ]);
        assert_eq!(index.depths(), vec![1, 2, 3, 4, 1]);
        assert_eq!(index.parents()[3], vec![0, 2]);
    }

    #[test]
    fn deep_chains_do_not_recurse() {
        let nodes: Vec<GraphNode> = (0..20_000)
            .map(|i| {
                let next = format!("n{}", i + 1);
                if i == 19_999 {
                    node(&format!("n{i}"), &[])
                } else {
                    node(&format!("n{i}"), &[next.as_str()])
                }
            })
            .collect();
        let index = GraphIndex::new(&nodes);
        assert!(index.back_edges().is_empty());
        assert_eq!(index.depths()[19_999], 20_000);
    }
}
