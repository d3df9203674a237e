use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::pool::InstancePool;
use super::processor::{Processor, ReturnCode};

/// Builds a fresh processor for one node.
pub type ProcessorFactory = Arc<dyn Fn() -> Box<dyn Processor> + Send + Sync>;

/// Errors detected while validating an action graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// The action declared no nodes.
    #[error("action '{action}' has no nodes")]
    Empty {
        /// Action name.
        action: String,
    },
    /// Two nodes share a name.
    #[error("action '{action}' declares node '{node}' twice")]
    DuplicateNode {
        /// Action name.
        action: String,
        /// Repeated node name.
        node: String,
    },
    /// The root or an edge names a node that does not exist.
    #[error("action '{action}' refers to unknown node '{node}'")]
    UnknownNode {
        /// Action name.
        action: String,
        /// Missing node name.
        node: String,
    },
    /// A node has two edges for the same return code.
    #[error("node '{node}' of action '{action}' has two edges for code '{code}'")]
    DuplicateEdge {
        /// Action name.
        action: String,
        /// Source node.
        node: String,
        /// Repeated code.
        code: String,
    },
    /// The edges form a cycle.
    #[error("action '{action}' contains the cycle {}", path.join(" -> "))]
    Cycle {
        /// Action name.
        action: String,
        /// Nodes on the cycle, first node repeated at the end.
        path: Vec<String>,
    },
}

/// Immutable step of a registered action.
#[derive(Debug)]
pub(crate) struct Node {
    name: String,
    edges: HashMap<ReturnCode, usize>,
}

impl Node {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn next(&self, code: &ReturnCode) -> Option<usize> {
        self.edges.get(code).copied()
    }
}

/// A validated handler graph with its instance pool.
pub struct Action {
    name: String,
    root: usize,
    nodes: Vec<Node>,
    pool: InstancePool,
}

impl Action {
    /// Action name clients address.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node names in declaration order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(Node::name)
    }

    pub(crate) const fn root(&self) -> usize {
        self.root
    }

    pub(crate) fn node(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub(crate) const fn pool(&self) -> &InstancePool {
        &self.pool
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Action")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}

struct NodeSpec {
    name: String,
    factory: ProcessorFactory,
}

/// Declares an action graph node by node.
///
/// The first node declared is the root unless [`ActionBuilder::root`] names
/// another one. Validation happens in [`ActionBuilder::build`].
pub struct ActionBuilder {
    name: String,
    root: Option<String>,
    nodes: Vec<NodeSpec>,
    edges: Vec<(String, ReturnCode, String)>,
}

impl ActionBuilder {
    /// Starts an action called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: None,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Adds a node whose processors are built by `factory`.
    #[must_use]
    pub fn node<P, F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        P: Processor + 'static,
        F: Fn() -> P + Send + Sync + 'static,
    {
        self.nodes.push(NodeSpec {
            name: name.into(),
            factory: Arc::new(move || Box::new(factory()) as Box<dyn Processor>),
        });
        self
    }

    /// Routes `code` returned by `from` to `to`.
    #[must_use]
    pub fn edge(
        mut self,
        from: impl Into<String>,
        code: impl Into<ReturnCode>,
        to: impl Into<String>,
    ) -> Self {
        self.edges.push((from.into(), code.into(), to.into()));
        self
    }

    /// Chooses the entry node.
    #[must_use]
    pub fn root(mut self, name: impl Into<String>) -> Self {
        self.root = Some(name.into());
        self
    }

    /// Validates the graph and attaches an instance pool keeping at most
    /// `pool_capacity` idle sets.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] for duplicate or unknown nodes, duplicate
    /// edges and cycles.
    pub fn build(self, pool_capacity: usize) -> Result<Action, GraphError> {
        let Self {
            name,
            root,
            nodes,
            edges,
        } = self;
        if nodes.is_empty() {
            return Err(GraphError::Empty { action: name });
        }

        let mut index = HashMap::with_capacity(nodes.len());
        for (position, spec) in nodes.iter().enumerate() {
            if index.insert(spec.name.clone(), position).is_some() {
                return Err(GraphError::DuplicateNode {
                    action: name,
                    node: spec.name.clone(),
                });
            }
        }
        let lookup = |node: &str| {
            index
                .get(node)
                .copied()
                .ok_or_else(|| GraphError::UnknownNode {
                    action: name.clone(),
                    node: node.to_owned(),
                })
        };

        let root = match &root {
            Some(root) => lookup(root)?,
            None => 0,
        };
        let mut tables: Vec<HashMap<ReturnCode, usize>> = vec![HashMap::new(); nodes.len()];
        for (from, code, to) in edges {
            let source = lookup(&from)?;
            let target = lookup(&to)?;
            let Some(table) = tables.get_mut(source) else {
                continue;
            };
            if table.insert(code.clone(), target).is_some() {
                return Err(GraphError::DuplicateEdge {
                    action: name.clone(),
                    node: from,
                    code: code.as_str().to_owned(),
                });
            }
        }

        let names: Vec<&str> = nodes.iter().map(|spec| spec.name.as_str()).collect();
        if let Some(path) = find_cycle(&tables, &names) {
            return Err(GraphError::Cycle { action: name, path });
        }

        let factories: Arc<[ProcessorFactory]> =
            nodes.iter().map(|spec| Arc::clone(&spec.factory)).collect();
        let nodes = nodes
            .into_iter()
            .zip(tables)
            .map(|(spec, edges)| Node {
                name: spec.name,
                edges,
            })
            .collect();
        Ok(Action {
            name,
            root,
            nodes,
            pool: InstancePool::new(factories, pool_capacity),
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// Depth-first search over every node; returns the first cycle found.
fn find_cycle(tables: &[HashMap<ReturnCode, usize>], names: &[&str]) -> Option<Vec<String>> {
    let mut marks = vec![Mark::Unvisited; tables.len()];
    let mut path = Vec::new();
    (0..tables.len()).find_map(|start| visit(start, tables, names, &mut marks, &mut path))
}

fn visit(
    node: usize,
    tables: &[HashMap<ReturnCode, usize>],
    names: &[&str],
    marks: &mut [Mark],
    path: &mut Vec<usize>,
) -> Option<Vec<String>> {
    match marks.get(node).copied() {
        Some(Mark::Done) | None => return None,
        Some(Mark::OnPath) => {
            let start = path.iter().position(|&entry| entry == node).unwrap_or(0);
            let mut cycle: Vec<String> = path
                .iter()
                .skip(start)
                .filter_map(|&entry| names.get(entry).map(|name| (*name).to_owned()))
                .collect();
            if let Some(name) = names.get(node) {
                cycle.push((*name).to_owned());
            }
            return Some(cycle);
        }
        Some(Mark::Unvisited) => {}
    }

    if let Some(mark) = marks.get_mut(node) {
        *mark = Mark::OnPath;
    }
    path.push(node);
    let mut targets: Vec<usize> = tables
        .get(node)
        .map(|table| table.values().copied().collect())
        .unwrap_or_default();
    targets.sort_unstable();
    for target in targets {
        if let Some(cycle) = visit(target, tables, names, marks, path) {
            return Some(cycle);
        }
    }
    path.pop();
    if let Some(mark) = marks.get_mut(node) {
        *mark = Mark::Done;
    }
    None
}
