use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use super::node::{Node, SafeNode};
use super::GraphError;
use crate::config::FailurePolicy;

/// Name of the single node with no predecessors.
pub const ENTRY_NODE: &str = "initialize";

/// Collects nodes and their predecessors; [`build`](GraphBuilder::build)
/// validates the whole topology at once.
pub struct GraphBuilder {
    policy: FailurePolicy,
    nodes: Vec<(Arc<dyn Node>, Vec<String>)>,
}

impl GraphBuilder {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            nodes: Vec::new(),
        }
    }

    /// Register a node that runs after every node in `predecessors`.
    pub fn add_node(mut self, node: Arc<dyn Node>, predecessors: &[&str]) -> Self {
        self.nodes
            .push((node, predecessors.iter().map(|p| p.to_string()).collect()));
        self
    }

    pub fn build(self) -> Result<TaskGraph, GraphError> {
        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, (node, _)) in self.nodes.iter().enumerate() {
            if index.insert(node.name().to_string(), i).is_some() {
                return Err(GraphError::DuplicateNode(node.name().to_string()));
            }
        }

        let mut predecessors: Vec<Vec<usize>> = Vec::with_capacity(self.nodes.len());
        for (node, preds) in &self.nodes {
            let mut resolved = Vec::with_capacity(preds.len());
            for pred in preds {
                let idx = index.get(pred).copied().ok_or_else(|| GraphError::UnknownNode {
                    node: node.name().to_string(),
                    predecessor: pred.clone(),
                })?;
                if !resolved.contains(&idx) {
                    resolved.push(idx);
                }
            }
            predecessors.push(resolved);
        }

        let roots: Vec<&str> = self
            .nodes
            .iter()
            .zip(&predecessors)
            .filter(|(_, preds)| preds.is_empty())
            .map(|((node, _), _)| node.name())
            .collect();
        match roots.as_slice() {
            [root] if *root == ENTRY_NODE => {}
            [] if self.nodes.is_empty() => return Err(GraphError::InvalidEntry("graph has no nodes".into())),
            _ if !index.contains_key(ENTRY_NODE) => {
                return Err(GraphError::InvalidEntry(format!("no '{}' node", ENTRY_NODE)))
            }
            _ => {
                return Err(GraphError::InvalidEntry(format!(
                    "'{}' must be the only node without predecessors, found: {}",
                    ENTRY_NODE,
                    roots.join(", ")
                )))
            }
        }

        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (node, preds) in predecessors.iter().enumerate() {
            for &pred in preds {
                successors[pred].push(node);
            }
        }

        let order = topological_order(&predecessors, &successors).map_err(|stuck| {
            GraphError::Cycle(stuck.into_iter().map(|i| self.nodes[i].0.name().to_string()).collect())
        })?;

        let nodes: Vec<Arc<SafeNode>> = self
            .nodes
            .into_iter()
            .map(|(node, _)| Arc::new(SafeNode::new(node, self.policy)))
            .collect();

        for node in &nodes {
            if let Some(field) = node.undeclared_field(&node.inner().empty_update()) {
                return Err(GraphError::UndeclaredWrite {
                    node: node.name().to_string(),
                    field,
                });
            }
        }

        check_concurrent_writers(&nodes, &predecessors, &order)?;

        Ok(TaskGraph {
            nodes,
            predecessors,
            successors,
            order,
        })
    }
}

/// Kahn's algorithm. Ties are broken by registration order so the result is
/// deterministic. On a cycle, returns the nodes that never became ready.
fn topological_order(predecessors: &[Vec<usize>], successors: &[Vec<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut queue: VecDeque<usize> = (0..in_degree.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(node) = queue.pop_front() {
        order.push(node);
        let mut next = Vec::new();
        for &succ in &successors[node] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                next.push(succ);
            }
        }
        next.sort_unstable();
        queue.extend(next);
    }

    if order.len() == in_degree.len() {
        Ok(order)
    } else {
        Err((0..in_degree.len()).filter(|&i| in_degree[i] > 0).collect())
    }
}

/// Plain (non-reducer) fields may have several writers only when every pair
/// of them is ordered by a path in the graph.
fn check_concurrent_writers(
    nodes: &[Arc<SafeNode>],
    predecessors: &[Vec<usize>],
    order: &[usize],
) -> Result<(), GraphError> {
    let mut ancestors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
    for &node in order {
        let mut set = BTreeSet::new();
        for &pred in &predecessors[node] {
            set.insert(pred);
            set.extend(ancestors[pred].iter().copied());
        }
        ancestors[node] = set;
    }

    for a in 0..nodes.len() {
        for b in (a + 1)..nodes.len() {
            let ordered = ancestors[a].contains(&b) || ancestors[b].contains(&a);
            if ordered {
                continue;
            }
            if let Some(field) = nodes[a]
                .writes()
                .intersection(nodes[b].writes())
                .find(|f| !f.is_reduced())
            {
                return Err(GraphError::ConflictingWriters {
                    field: *field,
                    first: nodes[a].name().to_string(),
                    second: nodes[b].name().to_string(),
                });
            }
        }
    }
    Ok(())
}

/// A validated task graph ready to execute.
pub struct TaskGraph {
    pub(super) nodes: Vec<Arc<SafeNode>>,
    pub(super) predecessors: Vec<Vec<usize>>,
    pub(super) successors: Vec<Vec<usize>>,
    pub(super) order: Vec<usize>,
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n.name() == name)
    }

    /// Node names in a valid execution order.
    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.nodes[i].name()).collect()
    }

    pub fn predecessors_of(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.nodes.iter().position(|n| n.name() == name)?;
        Some(self.predecessors[idx].iter().map(|&p| self.nodes[p].name()).collect())
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("order", &self.topological_order())
            .finish()
    }
}
