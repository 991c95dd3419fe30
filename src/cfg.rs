//! Node-per-instruction control-flow graph.
//!
//! Every decoded instruction gets exactly one [`Node`], stored in a dense arena
//! in instruction order. Edges are [`NodeId`] indices into that arena, so back
//! edges and cycles are plain data. Each node has three outgoing slots:
//!
//! - `next`: the following instruction in program order (set for every node
//!   but the last),
//! - `branch`: the statically known target of a JUMP/JUMPI,
//! - `call_continuation`: the instruction after a CALL-family opcode, where
//!   control resumes once the callee returns. The callee body is never modelled.
//!
//! RETURN, REVERT and SELFDESTRUCT nodes form the exit set.

use std::collections::HashMap;
use std::fmt;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::strategy::decompile;
use crate::{jump_target, AnalysisError, Disassembly, Instruction, Offset};

/// Dense index of a node in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The three outgoing edge slots of a node, in traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Next,
    Branch,
    CallContinuation,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 3] = [EdgeKind::Next, EdgeKind::Branch, EdgeKind::CallContinuation];
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Next => write!(f, "next"),
            EdgeKind::Branch => write!(f, "branch"),
            EdgeKind::CallContinuation => write!(f, "call_continuation"),
        }
    }
}

/// One graph node per instruction offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub offset: Offset,
    pub next: Option<NodeId>,
    pub branch: Option<NodeId>,
    pub call_continuation: Option<NodeId>,
}

impl Node {
    fn new(offset: Offset) -> Self {
        Self {
            offset,
            next: None,
            branch: None,
            call_continuation: None,
        }
    }

    pub fn edge(&self, kind: EdgeKind) -> Option<NodeId> {
        match kind {
            EdgeKind::Next => self.next,
            EdgeKind::Branch => self.branch,
            EdgeKind::CallContinuation => self.call_continuation,
        }
    }

    fn edge_mut(&mut self, kind: EdgeKind) -> &mut Option<NodeId> {
        match kind {
            EdgeKind::Next => &mut self.next,
            EdgeKind::Branch => &mut self.branch,
            EdgeKind::CallContinuation => &mut self.call_continuation,
        }
    }

    /// Set edges as `(kind, target)` pairs in the fixed order next, branch,
    /// call_continuation.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeKind, NodeId)> + '_ {
        EdgeKind::ALL
            .into_iter()
            .filter_map(move |kind| self.edge(kind).map(|target| (kind, target)))
    }
}

/// Control-flow graph over a decoded instruction list.
#[derive(Debug, Clone, Serialize)]
pub struct ControlFlowGraph {
    instructions: Vec<Instruction>,
    nodes: Vec<Node>,
    #[serde(skip)]
    index: HashMap<Offset, NodeId>,
    entry: NodeId,
    exits: Vec<NodeId>,
}

impl ControlFlowGraph {
    /// Build the graph in a single forward pass over `instructions`.
    ///
    /// Fails on an empty list, or when offsets are not strictly ascending
    /// (two instructions would otherwise share a node). Jumps whose target
    /// offset has no instruction simply get no `branch` edge.
    pub fn build(instructions: &[Instruction]) -> Result<Self, AnalysisError> {
        if instructions.is_empty() {
            return Err(AnalysisError::NoInstructions);
        }
        for pair in instructions.windows(2) {
            if pair[1].offset <= pair[0].offset {
                return Err(AnalysisError::UnorderedInstructions {
                    previous: pair[0].offset,
                    offset: pair[1].offset,
                });
            }
        }

        let nodes: Vec<Node> = instructions.iter().map(|insn| Node::new(insn.offset)).collect();
        let index: HashMap<Offset, NodeId> = instructions
            .iter()
            .enumerate()
            .map(|(i, insn)| (insn.offset, NodeId(i)))
            .collect();

        let mut cfg = Self {
            instructions: instructions.to_vec(),
            nodes,
            index,
            entry: NodeId(0),
            exits: Vec::new(),
        };

        let mut dangling = 0usize;
        for (i, insn) in instructions.iter().enumerate() {
            let id = NodeId(i);
            let following = (i + 1 < instructions.len()).then(|| NodeId(i + 1));

            cfg.nodes[i].next = following;

            if insn.opcode.is_jump() {
                let previous = i.checked_sub(1).map(|p| &instructions[p]);
                match jump_target(insn, previous).and_then(|target| cfg.node_at(target)) {
                    Some(target) => cfg.nodes[i].branch = Some(target),
                    None => {
                        dangling += 1;
                        log::trace!("No modelled target for {} at 0x{:x}", insn.opcode, insn.offset);
                    }
                }
            }

            if insn.opcode.is_call() {
                cfg.nodes[i].call_continuation = following;
            }

            if insn.opcode.is_terminal() {
                cfg.exits.push(id);
            }
        }

        log::debug!(
            "Built CFG: {} nodes, {} branch edges, {} unresolved jumps, {} exits",
            cfg.nodes.len(),
            cfg.nodes.iter().filter(|n| n.branch.is_some()).count(),
            dangling,
            cfg.exits.len()
        );

        Ok(cfg)
    }

    pub fn from_disassembly(disassembly: &Disassembly) -> Result<Self, AnalysisError> {
        Self::build(disassembly.instructions())
    }

    /// Decompile `bytes` and build the graph, propagating decode errors.
    pub fn from_bytecode(bytes: &[u8]) -> Result<Self, AnalysisError> {
        let disassembly = decompile(bytes)?;
        Self::from_disassembly(&disassembly)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Node ids in instruction order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn node_at(&self, offset: Offset) -> Option<NodeId> {
        self.index.get(&offset).copied()
    }

    pub fn instruction(&self, id: NodeId) -> &Instruction {
        &self.instructions[id.0]
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn offset(&self, id: NodeId) -> Offset {
        self.nodes[id.0].offset
    }

    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Every RETURN/REVERT/SELFDESTRUCT node in program order.
    pub fn exits(&self) -> &[NodeId] {
        &self.exits
    }

    /// The last exit in program order.
    pub fn exit(&self) -> Option<NodeId> {
        self.exits.last().copied()
    }

    pub fn is_exit(&self, id: NodeId) -> bool {
        self.exits.binary_search(&id).is_ok()
    }

    /// Outgoing edges in the fixed order `next, branch, call_continuation`,
    /// unset slots omitted.
    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes[id.0].edges().map(|(_, target)| target).collect()
    }

    /// Incoming edges of every node, indexed by node id. Each list is
    /// ordered by source node, then edge kind.
    pub fn predecessor_lists(&self) -> Vec<Vec<NodeId>> {
        let mut preds = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            for (_, target) in node.edges() {
                preds[target.0].push(NodeId(i));
            }
        }
        preds
    }

    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .flat_map(|(i, node)| {
                node.edges()
                    .filter(move |(_, target)| *target == id)
                    .map(move |_| NodeId(i))
            })
            .collect()
    }

    /// Overwrite one edge slot. Used for graph surgery and hand-built test
    /// graphs; the builder never needs it.
    pub fn set_edge(&mut self, from: NodeId, kind: EdgeKind, to: Option<NodeId>) {
        *self.nodes[from.0].edge_mut(kind) = to;
    }

    /// Nodes reachable from `start` (inclusive), as a membership vector.
    pub fn reachable_from(&self, start: NodeId) -> Vec<bool> {
        let mut reached = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut reached[id.0], true) {
                continue;
            }
            for (_, target) in self.nodes[id.0].edges() {
                if !reached[target.0] {
                    stack.push(target);
                }
            }
        }
        reached
    }

    pub fn is_reachable(&self, from: NodeId, to: NodeId) -> bool {
        self.reachable_from(from)[to.0]
    }

    /// Remove every node unreachable from the entry, together with its
    /// instruction. Remaining nodes keep their relative order and are
    /// reindexed. Returns the number of nodes removed.
    pub fn eliminate_dead_code(&mut self) -> usize {
        let reached = self.reachable_from(self.entry);
        let removed = reached.iter().filter(|r| !**r).count();
        if removed == 0 {
            return 0;
        }

        let mut remap: Vec<Option<NodeId>> = vec![None; self.nodes.len()];
        let mut kept = 0;
        for (old, live) in reached.iter().enumerate() {
            if *live {
                remap[old] = Some(NodeId(kept));
                kept += 1;
            }
        }

        let old_nodes = std::mem::take(&mut self.nodes);
        let old_instructions = std::mem::take(&mut self.instructions);
        for ((node, insn), live) in old_nodes.into_iter().zip(old_instructions).zip(&reached) {
            if !*live {
                continue;
            }
            let relink = |edge: Option<NodeId>| edge.and_then(|t| remap[t.0]);
            self.nodes.push(Node {
                offset: node.offset,
                next: relink(node.next),
                branch: relink(node.branch),
                call_continuation: relink(node.call_continuation),
            });
            self.instructions.push(insn);
        }

        self.exits = self.exits.iter().filter_map(|e| remap[e.0]).collect();
        self.entry = remap[self.entry.0].unwrap_or(NodeId(0));
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.offset, NodeId(i)))
            .collect();

        log::debug!("Dead code elimination removed {} nodes, {} remain", removed, kept);
        removed
    }

    /// Copy the graph into a petgraph `DiGraph`. Node index `i` corresponds to
    /// `NodeId(i)` and carries the instruction offset.
    pub fn to_petgraph(&self) -> DiGraph<Offset, EdgeKind> {
        let mut graph = DiGraph::with_capacity(self.nodes.len(), self.nodes.len() * 2);
        for node in &self.nodes {
            graph.add_node(node.offset);
        }
        for (i, node) in self.nodes.iter().enumerate() {
            for (kind, target) in node.edges() {
                graph.add_edge(NodeIndex::new(i), NodeIndex::new(target.0), kind);
            }
        }
        graph
    }

    /// Invert every edge. The forward exits become the entries of the
    /// reversed graph and the forward entry becomes its exit.
    ///
    /// Nodes of the reversed graph hold an unbounded edge list, so a node with
    /// many incoming edges keeps all of them.
    pub fn reverse(&self) -> ReversedGraph {
        let mut graph = DiGraph::with_capacity(self.nodes.len(), self.nodes.len() * 2);
        for node in &self.nodes {
            graph.add_node(node.offset);
        }
        for (i, node) in self.nodes.iter().enumerate() {
            for (kind, target) in node.edges() {
                graph.add_edge(NodeIndex::new(target.0), NodeIndex::new(i), kind);
            }
        }
        ReversedGraph {
            graph,
            entries: self.exits.clone(),
            exit: self.entry,
        }
    }
}

/// Edge-inverted view of a [`ControlFlowGraph`].
#[derive(Debug, Clone)]
pub struct ReversedGraph {
    graph: DiGraph<Offset, EdgeKind>,
    entries: Vec<NodeId>,
    exit: NodeId,
}

impl ReversedGraph {
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// The forward graph's exits.
    pub fn entries(&self) -> &[NodeId] {
        &self.entries
    }

    /// The forward graph's entry.
    pub fn exit(&self) -> NodeId {
        self.exit
    }

    pub fn offset(&self, id: NodeId) -> Offset {
        self.graph[NodeIndex::new(id.0)]
    }

    /// Outgoing edges of `id` in the reversed graph, ordered by target node
    /// then edge kind.
    pub fn successors(&self, id: NodeId) -> Vec<(EdgeKind, NodeId)> {
        let mut edges: Vec<(EdgeKind, NodeId)> = self
            .graph
            .edges_directed(NodeIndex::new(id.0), Direction::Outgoing)
            .map(|edge| (*edge.weight(), NodeId(edge.target().index())))
            .collect();
        edges.sort_by_key(|(kind, target)| (*target, EdgeKind::ALL.iter().position(|k| k == kind)));
        edges
    }

    pub fn graph(&self) -> &DiGraph<Offset, EdgeKind> {
        &self.graph
    }
}
