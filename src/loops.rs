//! Back-edge loop detection.
//!
//! A loop is recorded when a DFS edge `u -> s` lands on a node `s` still on
//! the DFS stack that also sits behind `u` on the chain of `next` links. Only `next`
//! links are walked for that ancestry test, so a cycle whose way back exists
//! solely through `branch` edges is not reported. Every reported loop is a
//! real cycle: `s` reaches `u` by `next` links and `u` has an edge to `s`.
//!
//! Bounds and invariants are annotations for a human reader. A bound is the
//! target of a JUMP inside the body, an invariant is the literal an ADD works
//! with. Neither is a trip count or a proven fact.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;

use crate::cfg::{ControlFlowGraph, NodeId};
use crate::{effective_operand, jump_target, OpCode, Offset};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Loop {
    /// Target of the back edge
    pub header: NodeId,
    /// First successor of a body node that leaves the loop
    pub exit: Option<NodeId>,
    /// Body from the header to the source of the back edge, along `next` links
    pub nodes: Vec<NodeId>,
    /// Static targets of JUMPs in the body
    pub bounds: Vec<Offset>,
    /// Hex literals consumed by ADDs in the body, `0x` prefixed
    pub invariants: Vec<String>,
}

impl Loop {
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Find loops by DFS from every unvisited node in instruction order, entry
/// first, so code unreachable from the entry is still scanned.
pub fn detect_loops(cfg: &ControlFlowGraph) -> Vec<Loop> {
    if cfg.is_empty() {
        return Vec::new();
    }

    let mut chains = ChainSearch::new(cfg);
    let mut visited = vec![false; cfg.len()];
    let mut on_stack = vec![false; cfg.len()];
    let mut loops = Vec::new();

    let roots = std::iter::once(cfg.entry()).chain(cfg.node_ids());
    for root in roots {
        if visited[root.index()] {
            continue;
        }
        visited[root.index()] = true;
        on_stack[root.index()] = true;

        // (node, successors, cursor)
        let mut stack: Vec<(NodeId, Vec<NodeId>, usize)> = vec![(root, cfg.successors(root), 0)];

        while let Some((node, succs, cursor)) = stack.last_mut() {
            let Some(&succ) = succs.get(*cursor) else {
                on_stack[node.index()] = false;
                stack.pop();
                continue;
            };
            *cursor += 1;
            let node = *node;

            if !visited[succ.index()] {
                visited[succ.index()] = true;
                on_stack[succ.index()] = true;
                stack.push((succ, cfg.successors(succ), 0));
                continue;
            }

            // Finished nodes and other trees cannot close a cycle through `node`
            if !on_stack[succ.index()] {
                continue;
            }

            if let Some(body) = chains.find(succ, node) {
                log::trace!(
                    "Back edge 0x{:x} -> 0x{:x} closes a {}-node loop",
                    cfg.offset(node),
                    cfg.offset(succ),
                    body.len()
                );
                let mut found = Loop {
                    header: succ,
                    exit: None,
                    nodes: body,
                    bounds: Vec::new(),
                    invariants: Vec::new(),
                };
                found.exit = loop_exit(cfg, &found);
                annotate(cfg, &mut found);
                loops.push(found);
            }
        }
    }

    log::debug!("Detected {} loops over {} nodes", loops.len(), cfg.len());
    loops
}

/// Backward search along `next` links. The buffers are sized once per graph
/// and only the entries touched by a search are reset afterwards.
struct ChainSearch {
    /// Sources of the `next` edges into each node
    next_preds: Vec<Vec<NodeId>>,
    /// came_from[n] is the node one step closer to the tail
    came_from: Vec<Option<NodeId>>,
    seen: Vec<bool>,
    touched: Vec<NodeId>,
    queue: VecDeque<NodeId>,
}

impl ChainSearch {
    fn new(cfg: &ControlFlowGraph) -> Self {
        let mut next_preds = vec![Vec::new(); cfg.len()];
        for id in cfg.node_ids() {
            if let Some(next) = cfg.node(id).next {
                next_preds[next.index()].push(id);
            }
        }
        Self {
            next_preds,
            came_from: vec![None; cfg.len()],
            seen: vec![false; cfg.len()],
            touched: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    /// The `next` chain from `header` to `tail`, found by walking backwards
    /// from `tail`. `None` when `header` is not behind `tail`.
    fn find(&mut self, header: NodeId, tail: NodeId) -> Option<Vec<NodeId>> {
        if header == tail {
            return Some(vec![tail]);
        }

        self.mark(tail, None);
        self.queue.push_back(tail);

        let mut found = false;
        'search: while let Some(current) = self.queue.pop_front() {
            for i in 0..self.next_preds[current.index()].len() {
                let pred = self.next_preds[current.index()][i];
                if self.seen[pred.index()] {
                    continue;
                }
                self.mark(pred, Some(current));
                if pred == header {
                    found = true;
                    break 'search;
                }
                self.queue.push_back(pred);
            }
        }

        let chain = found.then(|| {
            let mut chain = vec![header];
            let mut at = header;
            while let Some(step) = self.came_from[at.index()] {
                chain.push(step);
                at = step;
            }
            chain
        });

        for id in self.touched.drain(..) {
            self.seen[id.index()] = false;
            self.came_from[id.index()] = None;
        }
        self.queue.clear();
        chain
    }

    fn mark(&mut self, id: NodeId, from: Option<NodeId>) {
        self.seen[id.index()] = true;
        self.came_from[id.index()] = from;
        self.touched.push(id);
    }
}

fn loop_exit(cfg: &ControlFlowGraph, found: &Loop) -> Option<NodeId> {
    let members: HashSet<NodeId> = found.nodes.iter().copied().collect();
    found
        .nodes
        .iter()
        .flat_map(|id| cfg.successors(*id))
        .find(|succ| !members.contains(succ))
}

fn annotate(cfg: &ControlFlowGraph, found: &mut Loop) {
    for id in &found.nodes {
        let insn = cfg.instruction(*id);
        let previous = id.index().checked_sub(1).map(|p| cfg.instruction(NodeId(p)));

        if insn.opcode == OpCode::JUMP {
            if let Some(target) = jump_target(insn, previous) {
                found.bounds.push(target);
            }
        } else if insn.opcode == OpCode::ADD {
            if let Some(literal) = effective_operand(insn, previous) {
                found.invariants.push(format!("0x{}", hex::encode(literal)));
            }
        }
    }
}
