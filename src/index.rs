//! Lookup tables over a decoded instruction stream, and a spanning-tree view
//! of the control-flow graph for debugging.

use std::collections::HashMap;

use serde::Serialize;

use crate::cfg::{ControlFlowGraph, NodeId};
use crate::{jump_target, Instruction, OpCode, Offset};

/// A JUMP or JUMPI and what its target resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JumpSite {
    pub offset: Offset,
    pub opcode: OpCode,
    /// Statically known target, if any
    pub target: Option<Offset>,
    /// The target is the offset of a decoded instruction
    pub resolved: bool,
    /// The target is a JUMPDEST, so the EVM would accept the jump
    pub valid: bool,
}

impl JumpSite {
    /// A static target exists but names no instruction.
    pub fn is_dangling(&self) -> bool {
        self.target.is_some() && !self.resolved
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstructionIndex {
    positions: HashMap<Offset, usize>,
    by_opcode: HashMap<OpCode, Vec<Offset>>,
    jumpdests: Vec<Offset>,
    jumps: Vec<JumpSite>,
}

impl InstructionIndex {
    pub fn new(instructions: &[Instruction]) -> Self {
        let mut index = Self::default();

        for (position, insn) in instructions.iter().enumerate() {
            index.positions.insert(insn.offset, position);
            index.by_opcode.entry(insn.opcode).or_default().push(insn.offset);
            if insn.opcode.is_jumpdest() {
                index.jumpdests.push(insn.offset);
            }
        }

        for (position, insn) in instructions.iter().enumerate() {
            if !insn.opcode.is_jump() {
                continue;
            }
            let previous = position.checked_sub(1).map(|p| &instructions[p]);
            let target = jump_target(insn, previous);
            let target_position = target.and_then(|t| index.positions.get(&t).copied());
            index.jumps.push(JumpSite {
                offset: insn.offset,
                opcode: insn.opcode,
                target,
                resolved: target_position.is_some(),
                valid: target_position.map_or(false, |p| instructions[p].opcode.is_jumpdest()),
            });
        }

        index
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// List position of the instruction at `offset`.
    pub fn position(&self, offset: Offset) -> Option<usize> {
        self.positions.get(&offset).copied()
    }

    pub fn contains(&self, offset: Offset) -> bool {
        self.positions.contains_key(&offset)
    }

    /// Offsets of every instruction with `opcode`, ascending.
    pub fn offsets_of(&self, opcode: OpCode) -> &[Offset] {
        self.by_opcode.get(&opcode).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn jumpdests(&self) -> &[Offset] {
        &self.jumpdests
    }

    pub fn is_jumpdest(&self, offset: Offset) -> bool {
        self.jumpdests.binary_search(&offset).is_ok()
    }

    pub fn jumps(&self) -> &[JumpSite] {
        &self.jumps
    }

    pub fn dangling_jumps(&self) -> impl Iterator<Item = &JumpSite> + '_ {
        self.jumps.iter().filter(|jump| jump.is_dangling())
    }

    /// Jumps whose target cannot be determined statically.
    pub fn dynamic_jumps(&self) -> impl Iterator<Item = &JumpSite> + '_ {
        self.jumps.iter().filter(|jump| jump.target.is_none())
    }
}

/// DFS spanning tree of a [`ControlFlowGraph`] rooted at the entry. A node's
/// parent is the node it was first discovered from.
#[derive(Debug, Clone)]
pub struct ExecutionTree {
    root: NodeId,
    parent: Vec<Option<NodeId>>,
    children: Vec<Vec<NodeId>>,
    depth: Vec<Option<usize>>,
}

impl ExecutionTree {
    pub fn build(cfg: &ControlFlowGraph) -> Self {
        let root = cfg.entry();
        let mut tree = Self {
            root,
            parent: vec![None; cfg.len()],
            children: vec![Vec::new(); cfg.len()],
            depth: vec![None; cfg.len()],
        };
        if cfg.is_empty() {
            return tree;
        }

        tree.depth[root.index()] = Some(0);
        let mut stack: Vec<(NodeId, Vec<NodeId>, usize)> = vec![(root, cfg.successors(root), 0)];

        while let Some((node, succs, cursor)) = stack.last_mut() {
            let Some(&succ) = succs.get(*cursor) else {
                stack.pop();
                continue;
            };
            *cursor += 1;
            let node = *node;

            if tree.depth[succ.index()].is_some() {
                continue;
            }
            tree.depth[succ.index()] = tree.depth[node.index()].map(|d| d + 1);
            tree.parent[succ.index()] = Some(node);
            tree.children[node.index()].push(succ);
            stack.push((succ, cfg.successors(succ), 0));
        }

        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.depth.get(id.index()).map_or(false, Option::is_some)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parent.get(id.index()).copied().flatten()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.children.get(id.index()).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn depth(&self, id: NodeId) -> Option<usize> {
        self.depth.get(id.index()).copied().flatten()
    }

    /// One line per reachable instruction, indented two spaces per level.
    pub fn render(&self, cfg: &ControlFlowGraph) -> String {
        let mut output = String::new();
        if !self.contains(self.root) {
            return output;
        }

        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let depth = self.depth(id).unwrap_or(0);
            output.push_str(&"  ".repeat(depth));
            output.push_str(&cfg.instruction(id).to_string());
            output.push('\n');
            stack.extend(self.children(id).iter().rev());
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::decompile;

    #[test]
    fn test_instruction_index_lookups() {
        // 0: PUSH1 0x05  2: JUMP  3: PUSH1 0x01  5: JUMPDEST  6: PUSH1 0x0a  8: JUMPI  9: STOP
        let bytes = [0x60, 0x05, 0x56, 0x60, 0x01, 0x5b, 0x60, 0x0a, 0x57, 0x00];
        let disassembly = decompile(&bytes).unwrap();
        let index = InstructionIndex::new(disassembly.instructions());

        assert_eq!(index.len(), 7);
        assert_eq!(index.position(5), Some(3));
        assert_eq!(index.position(4), None);
        assert_eq!(index.offsets_of(OpCode::PUSH1), &[0, 3, 6]);
        assert!(index.offsets_of(OpCode::CALL).is_empty());
        assert_eq!(index.jumpdests(), &[5]);
        assert!(index.is_jumpdest(5));

        let jumps = index.jumps();
        assert_eq!(jumps.len(), 2);
        assert_eq!(jumps[0].target, Some(5));
        assert!(jumps[0].resolved && jumps[0].valid);
        // 0x0a is past the end of the code
        assert_eq!(jumps[1].target, Some(0x0a));
        assert!(jumps[1].is_dangling());
        assert_eq!(index.dangling_jumps().count(), 1);
        assert_eq!(index.dynamic_jumps().count(), 0);
    }

    #[test]
    fn test_jump_to_non_jumpdest_is_resolved_but_invalid() {
        // PUSH1 0x03, JUMP, ADD, STOP
        let disassembly = decompile(&[0x60, 0x03, 0x56, 0x01, 0x00]).unwrap();
        let index = InstructionIndex::new(disassembly.instructions());
        let jump = index.jumps()[0];
        assert!(jump.resolved);
        assert!(!jump.valid);
    }

    #[test]
    fn test_execution_tree() {
        // 0: PUSH1 0x04  2: JUMP  3: JUMPDEST  4: JUMPDEST  5: RETURN
        let cfg = ControlFlowGraph::from_bytecode(&[0x60, 0x04, 0x56, 0x5b, 0x5b, 0xf3]).unwrap();
        let tree = ExecutionTree::build(&cfg);

        assert_eq!(tree.root(), NodeId(0));
        assert_eq!(tree.depth(NodeId(0)), Some(0));
        // The JUMPDEST at 4 is first found by falling through 3, not by the jump
        assert_eq!(tree.parent(NodeId(3)), Some(NodeId(2)));
        assert_eq!(tree.children(NodeId(1)), &[NodeId(2)]);
        assert_eq!(tree.depth(NodeId(4)), Some(4));

        let rendered = tree.render(&cfg);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "000000  PUSH1    0x04");
        assert_eq!(lines[2], "    000003  JUMPDEST");
    }

    #[test]
    fn test_execution_tree_skips_unreachable() {
        let mut cfg = ControlFlowGraph::from_bytecode(&[0x00, 0x00]).unwrap();
        cfg.set_edge(NodeId(0), crate::EdgeKind::Next, None);
        let tree = ExecutionTree::build(&cfg);

        assert!(tree.contains(NodeId(0)));
        assert!(!tree.contains(NodeId(1)));
        assert_eq!(tree.depth(NodeId(1)), None);
        assert_eq!(tree.render(&cfg).lines().count(), 1);
    }
}
