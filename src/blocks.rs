//! Basic block partitioning.

use serde::Serialize;

use crate::cfg::{ControlFlowGraph, NodeId};
use crate::Offset;

/// Straight-line run of nodes, in instruction order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    /// Offset of the first node
    pub start: Offset,
    /// Nodes in the block
    pub nodes: Vec<NodeId>,
    /// Successor offsets of the last node (next, branch, call_continuation)
    pub succs: Vec<Offset>,
}

impl Block {
    fn new(start: Offset) -> Self {
        Self {
            start,
            nodes: Vec::new(),
            succs: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn last(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }

    fn close(&mut self, cfg: &ControlFlowGraph) {
        if let Some(last) = self.last() {
            self.succs = cfg
                .successors(last)
                .into_iter()
                .map(|succ| cfg.offset(succ))
                .collect();
        }
    }
}

/// Partition the graph into blocks by a linear scan in instruction order.
///
/// A block closes after any node with a `branch` edge, a `call_continuation`
/// edge, or membership in the exit set. The result follows bytecode layout,
/// not traversal order, and covers every node exactly once.
pub fn create_blocks(cfg: &ControlFlowGraph) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;

    for id in cfg.node_ids() {
        let node = cfg.node(id);
        let block = current.get_or_insert_with(|| Block::new(node.offset));
        block.nodes.push(id);

        let ends_block = node.branch.is_some() || node.call_continuation.is_some() || cfg.is_exit(id);
        if ends_block {
            if let Some(mut done) = current.take() {
                done.close(cfg);
                blocks.push(done);
            }
        }
    }

    if let Some(mut trailing) = current.take() {
        trailing.close(cfg);
        blocks.push(trailing);
    }

    log::debug!("Partitioned {} nodes into {} blocks", cfg.len(), blocks.len());
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_offsets(cfg: &ControlFlowGraph, blocks: &[Block]) -> Vec<Vec<Offset>> {
        blocks
            .iter()
            .map(|b| b.nodes.iter().map(|id| cfg.offset(*id)).collect())
            .collect()
    }

    #[test]
    fn test_straight_line_is_one_block() {
        let cfg = ControlFlowGraph::from_bytecode(&[0x60, 0x01, 0x60, 0x02, 0x01]).unwrap();
        let blocks = create_blocks(&cfg);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].start, 0);
        assert_eq!(block_offsets(&cfg, &blocks), vec![vec![0, 2, 4]]);
        assert!(blocks[0].succs.is_empty());
    }

    #[test]
    fn test_blocks_close_at_branch_call_and_exit() {
        // 0: PUSH1 0x05  2: JUMP  3: CALL  4: ADD  5: JUMPDEST  6: RETURN  7: ADD
        let bytes = [0x60, 0x05, 0x56, 0xf1, 0x01, 0x5b, 0xf3, 0x01];
        let cfg = ControlFlowGraph::from_bytecode(&bytes).unwrap();
        let blocks = create_blocks(&cfg);

        assert_eq!(
            block_offsets(&cfg, &blocks),
            vec![vec![0, 2], vec![3], vec![4, 5, 6], vec![7]]
        );
        assert_eq!(blocks[0].succs, vec![3, 5]);
        assert_eq!(blocks[1].succs, vec![4, 4]);
        // An exit still falls through to the next instruction in layout
        assert_eq!(blocks[2].succs, vec![7]);
        assert!(blocks[3].succs.is_empty());
    }

    #[test]
    fn test_dangling_jump_does_not_close_block() {
        // PUSH1 0x01 points into its own operand
        let cfg = ControlFlowGraph::from_bytecode(&[0x60, 0x01, 0x56, 0x01, 0x00]).unwrap();
        let blocks = create_blocks(&cfg);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].len(), 4);
    }

    #[test]
    fn test_blocks_cover_every_node_once() {
        let bytes = [0x60, 0x07, 0x57, 0x60, 0x08, 0x56, 0x00, 0x5b, 0x5b, 0xf3];
        let cfg = ControlFlowGraph::from_bytecode(&bytes).unwrap();
        let covered: Vec<NodeId> = create_blocks(&cfg)
            .into_iter()
            .flat_map(|b| b.nodes)
            .collect();
        assert_eq!(covered, cfg.node_ids().collect::<Vec<_>>());
    }
}
