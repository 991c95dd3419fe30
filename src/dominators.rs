//! Dominator and post-dominator trees over a [`ControlFlowGraph`].
//!
//! Both are computed with petgraph's Cooper-Harvey-Kennedy iteration. The
//! post-dominator tree runs on the reversed graph rooted at a virtual sink
//! joined to every exit, so bytecode with several RETURN/REVERT sites still has
//! a single root.

use petgraph::algo::dominators::{simple_fast, Dominators};
use petgraph::graph::NodeIndex;

use crate::cfg::{ControlFlowGraph, EdgeKind, NodeId};

#[derive(Debug, Clone)]
pub struct DominatorTree {
    inner: Dominators<NodeIndex>,
    /// Index of the synthetic root, present only for post-dominators
    virtual_root: Option<NodeIndex>,
    len: usize,
}

impl DominatorTree {
    /// Dominators of the forward graph, rooted at the entry.
    pub fn dominators(cfg: &ControlFlowGraph) -> Self {
        let graph = cfg.to_petgraph();
        let inner = simple_fast(&graph, NodeIndex::new(cfg.entry().index()));
        Self {
            inner,
            virtual_root: None,
            len: cfg.len(),
        }
    }

    /// Post-dominators, or `None` when the graph has no exit to root them at.
    pub fn post_dominators(cfg: &ControlFlowGraph) -> Option<Self> {
        if cfg.exits().is_empty() {
            return None;
        }

        let mut graph = cfg.reverse().graph().clone();
        let sink = graph.add_node(usize::MAX);
        for exit in cfg.exits() {
            graph.add_edge(sink, NodeIndex::new(exit.index()), EdgeKind::Next);
        }

        let inner = simple_fast(&graph, sink);
        Some(Self {
            inner,
            virtual_root: Some(sink),
            len: cfg.len(),
        })
    }

    fn to_node(&self, index: NodeIndex) -> Option<NodeId> {
        if Some(index) == self.virtual_root {
            None
        } else {
            Some(NodeId(index.index()))
        }
    }

    fn in_range(&self, id: NodeId) -> bool {
        id.index() < self.len
    }

    /// Whether `id` is reachable from the tree's root.
    pub fn contains(&self, id: NodeId) -> bool {
        self.in_range(id) && self.inner.dominators(NodeIndex::new(id.index())).is_some()
    }

    /// Closest strict dominator. `None` for the root, for unreachable nodes,
    /// and for nodes only the virtual sink post-dominates.
    pub fn immediate_dominator(&self, id: NodeId) -> Option<NodeId> {
        if !self.in_range(id) {
            return None;
        }
        self.inner
            .immediate_dominator(NodeIndex::new(id.index()))
            .and_then(|idom| self.to_node(idom))
    }

    /// Every node dominating `id`, including `id` itself, in ascending id
    /// order. Empty when `id` is unreachable.
    pub fn dominator_set(&self, id: NodeId) -> Vec<NodeId> {
        if !self.in_range(id) {
            return Vec::new();
        }
        let mut set: Vec<NodeId> = match self.inner.dominators(NodeIndex::new(id.index())) {
            Some(iter) => iter.filter_map(|n| self.to_node(n)).collect(),
            None => Vec::new(),
        };
        set.sort();
        set
    }

    /// Whether every path from the root to `b` passes through `a`.
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if !self.in_range(b) {
            return false;
        }
        match self.inner.dominators(NodeIndex::new(b.index())) {
            Some(mut iter) => iter.any(|n| n.index() == a.index() && Some(n) != self.virtual_root),
            None => false,
        }
    }
}
