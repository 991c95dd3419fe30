//! Entry-to-exit path enumeration.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::cfg::{ControlFlowGraph, NodeId};
use crate::loops::Loop;

/// Node sequence from the entry to an exit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Path(pub Vec<NodeId>);

impl Path {
    pub fn nodes(&self) -> &[NodeId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<NodeId> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<NodeId> {
        self.0.last().copied()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|id| id.index().to_string()).collect();
        write!(f, "{}", parts.join(" -> "))
    }
}

/// Limits on the enumeration. The number of paths can grow exponentially
/// with the number of branches, so callers scanning many contracts should
/// set both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathOptions {
    /// Stop after this many paths
    pub max_paths: Option<usize>,
    /// Stop after this many node visits
    pub max_steps: Option<usize>,
}

impl PathOptions {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_paths(mut self, max_paths: usize) -> Self {
        self.max_paths = Some(max_paths);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }
}

/// Paths found by [`find_all_paths`], in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PathSet {
    pub paths: Vec<Path>,
    /// A limit in [`PathOptions`] cut the enumeration short
    pub truncated: bool,
}

impl PathSet {
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Path> {
        self.paths.iter()
    }
}

impl<'a> IntoIterator for &'a PathSet {
    type Item = &'a Path;
    type IntoIter = std::slice::Iter<'a, Path>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

struct Frame {
    node: NodeId,
    succs: Vec<NodeId>,
    cursor: usize,
}

/// Enumerate paths from the entry that end at an exit node.
///
/// DFS with a visited set scoped to the current spine: a node is released on
/// backtrack, so it can appear in many paths but never twice in one. Reaching
/// any exit records the path and does not continue past it. Successors are
/// tried in the order next, branch, call_continuation. A loop header then
/// also tries the exit of each loop it heads, unless that node is already
/// one of its successors.
pub fn find_all_paths(cfg: &ControlFlowGraph, loops: &[Loop], options: &PathOptions) -> PathSet {
    let mut result = PathSet::default();
    if cfg.is_empty() {
        return result;
    }

    let mut loop_exits: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for found in loops {
        if let Some(exit) = found.exit {
            let exits = loop_exits.entry(found.header).or_default();
            if !exits.contains(&exit) {
                exits.push(exit);
            }
        }
    }

    let successors = |node: NodeId| {
        let mut succs = cfg.successors(node);
        if let Some(exits) = loop_exits.get(&node) {
            for exit in exits {
                if !succs.contains(exit) {
                    succs.push(*exit);
                }
            }
        }
        succs
    };

    let entry = cfg.entry();
    if cfg.is_exit(entry) {
        if options.max_paths == Some(0) {
            result.truncated = true;
        } else {
            result.paths.push(Path(vec![entry]));
        }
        return result;
    }

    let mut on_path = vec![false; cfg.len()];
    let mut spine: Vec<NodeId> = vec![entry];
    let mut stack = vec![Frame {
        node: entry,
        succs: successors(entry),
        cursor: 0,
    }];
    on_path[entry.index()] = true;
    let mut steps = 0usize;

    while let Some(frame) = stack.last_mut() {
        let Some(&succ) = frame.succs.get(frame.cursor) else {
            on_path[frame.node.index()] = false;
            spine.pop();
            stack.pop();
            continue;
        };
        frame.cursor += 1;

        steps += 1;
        if options.max_steps.map_or(false, |max| steps > max) {
            log::debug!("Path enumeration stopped after {} steps", steps - 1);
            result.truncated = true;
            break;
        }

        if on_path[succ.index()] {
            continue;
        }

        if cfg.is_exit(succ) {
            if options.max_paths.map_or(false, |max| result.paths.len() >= max) {
                log::debug!("Path enumeration stopped at {} paths", result.paths.len());
                result.truncated = true;
                break;
            }
            let mut path = spine.clone();
            path.push(succ);
            result.paths.push(Path(path));
            continue;
        }

        on_path[succ.index()] = true;
        spine.push(succ);
        stack.push(Frame {
            node: succ,
            succs: successors(succ),
            cursor: 0,
        });
    }

    log::debug!(
        "Enumerated {} paths ({} steps{})",
        result.paths.len(),
        steps,
        if result.truncated { ", truncated" } else { "" }
    );
    result
}
