#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Instant;

    use rstest::rstest;

    use crate::{
        analysis::{analyze, analyze_batch, AnalysisOptions},
        blocks::create_blocks,
        cfg::{ControlFlowGraph, NodeId},
        dominators::DominatorTree,
        format::OutputFormat,
        loops::detect_loops,
        parse_hex,
        paths::{find_all_paths, PathOptions},
        strategy::{decompile, Strategy},
        Disassembly, EvmDecoder, OpCode,
    };

    /// Solidity-style prelude: callvalue check, calldata size check, one
    /// selector compared against `a9059cbb`, fallback revert.
    const DISPATCHER: &str = "0x608060405234801560\
                              0f57600080fd5b5060\
                              043610602857600035\
                              60e01c8063a9059cbb\
                              14602d575b600080fd\
                              5b600160005500";

    /// Counter loop: `i = 0; while i < 10 { i += 1 }; return`
    ///
    /// 00 PUSH1 00  02 JUMPDEST  03 DUP1  04 PUSH1 0a  06 GT  07 ISZERO
    /// 08 PUSH1 11  0a JUMPI     0b PUSH1 01 0d ADD   0e PUSH1 02  10 JUMP
    /// 11 JUMPDEST  12 PUSH1 00  14 DUP1  15 RETURN  16 STOP
    const COUNTER_LOOP: &str = "0x60005b80600a11156011576001016002565b6000\
                                80f300";

    fn lcg_bytes(seed: u64, len: usize) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (state >> 56) as u8
            })
            .collect()
    }

    fn samples() -> Vec<(&'static str, Vec<u8>)> {
        vec![
            ("scenario_add", vec![0x60, 0x01, 0x60, 0x02, 0x01]),
            ("dispatcher", parse_hex(DISPATCHER).unwrap()),
            ("counter_loop", parse_hex(COUNTER_LOOP).unwrap()),
            ("all_zero", vec![0u8; 64]),
            ("all_jumpdest", vec![0x5b; 16]),
            ("push32_run", vec![0x7f; 100]),
            ("random_a", lcg_bytes(1, 512)),
            ("random_b", lcg_bytes(0xdead_beef, 2048)),
            ("trailing_push", vec![0x5b, 0x01, 0x62, 0xaa]),
        ]
    }

    fn graph(bytes: &[u8]) -> Option<ControlFlowGraph> {
        let disassembly = decompile(bytes).unwrap();
        if disassembly.is_empty() {
            return None;
        }
        Some(ControlFlowGraph::from_disassembly(&disassembly).unwrap())
    }

    #[test]
    fn test_decompile_is_idempotent_and_ordered() {
        for (name, bytes) in samples() {
            let first = decompile(&bytes).unwrap();
            let second = decompile(&bytes).unwrap();
            assert_eq!(first, second, "{}: repeated decompile differs", name);

            for pair in first.instructions().windows(2) {
                assert!(pair[0].offset < pair[1].offset, "{}: offsets not ascending", name);
                assert_eq!(pair[0].end(), pair[1].offset, "{}: gap in linear sweep", name);
            }
        }
    }

    #[test]
    fn test_push_sizing_and_round_trip() {
        for (name, bytes) in samples() {
            let disassembly = decompile(&bytes).unwrap();

            for insn in disassembly.iter() {
                let expected = insn.opcode.push_operand_size().unwrap_or(0);
                assert_eq!(insn.operand.len(), expected, "{}: bad operand at 0x{:x}", name, insn.offset);
            }

            assert_eq!(
                disassembly.decoded_bytes() + disassembly.undecoded_bytes(),
                bytes.len(),
                "{}: bytes lost",
                name
            );
        }
    }

    #[test]
    fn test_graph_parity_and_successor_order() {
        for (name, bytes) in samples() {
            let Some(cfg) = graph(&bytes) else { continue };
            let disassembly = decompile(&bytes).unwrap();

            assert_eq!(cfg.len(), disassembly.len(), "{}: node count", name);
            for (id, insn) in cfg.node_ids().zip(disassembly.iter()) {
                assert_eq!(cfg.offset(id), insn.offset);
                assert_eq!(cfg.node_at(insn.offset), Some(id));

                let node = cfg.node(id);
                let expected: Vec<NodeId> = [node.next, node.branch, node.call_continuation]
                    .into_iter()
                    .flatten()
                    .collect();
                assert_eq!(cfg.successors(id), expected, "{}: successor order", name);
                assert_eq!(cfg.successors(id), cfg.successors(id));
            }
            assert_eq!(cfg.entry(), NodeId(0));
        }
    }

    #[test]
    fn test_block_coverage() {
        for (name, bytes) in samples() {
            let Some(cfg) = graph(&bytes) else { continue };
            let covered: Vec<NodeId> = create_blocks(&cfg).into_iter().flat_map(|b| b.nodes).collect();
            assert_eq!(covered, cfg.node_ids().collect::<Vec<_>>(), "{}: blocks", name);
        }
    }

    #[test]
    fn test_loop_validity() {
        for (name, bytes) in samples() {
            let Some(cfg) = graph(&bytes) else { continue };
            let from_entry = cfg.reachable_from(cfg.entry());

            for found in detect_loops(&cfg) {
                assert!(found.contains(found.header), "{}: header outside body", name);
                if !from_entry[found.header.index()] {
                    continue;
                }
                let from_header = cfg.reachable_from(found.header);
                for id in &found.nodes {
                    assert!(from_header[id.index()], "{}: loop node not reachable from header", name);
                }
                if let Some(exit) = found.exit {
                    assert!(!found.contains(exit));
                }
            }
        }
    }

    #[test]
    fn test_path_termination() {
        let options = PathOptions::default().with_max_paths(5_000).with_max_steps(200_000);
        for (name, bytes) in samples() {
            let Some(cfg) = graph(&bytes) else { continue };
            let loops = detect_loops(&cfg);

            let start = Instant::now();
            let paths = find_all_paths(&cfg, &loops, &options);
            println!("{}: {} paths in {:?}", name, paths.len(), start.elapsed());

            for path in &paths {
                assert_eq!(path.first(), Some(cfg.entry()), "{}: path must start at entry", name);
                let last = path.last().unwrap();
                assert!(cfg.is_exit(last), "{}: path must end at an exit", name);
                let unique: HashSet<NodeId> = path.nodes().iter().copied().collect();
                assert_eq!(unique.len(), path.len(), "{}: node repeated on one path", name);
            }
        }
    }

    #[test]
    fn test_dispatcher_structure() {
        let bytes = parse_hex(DISPATCHER).unwrap();
        let analysis = analyze(&bytes, &AnalysisOptions::default()).unwrap();
        let cfg = analysis.cfg.as_ref().unwrap();

        assert_eq!(analysis.disassembly.len(), 36);
        assert_eq!(analysis.disassembly.undecoded_bytes(), 0);
        assert_eq!(analysis.disassembly.count(OpCode::JUMPI), 3);
        assert_eq!(analysis.disassembly.at_offset(0x1f).map(|i| i.operand_hex()), Some("a9059cbb".to_string()));

        let exits: Vec<usize> = cfg.exits().iter().map(|id| cfg.offset(*id)).collect();
        assert_eq!(exits, vec![0x0e, 0x2c]);
        assert_eq!(cfg.exit().map(|id| cfg.offset(id)), Some(0x2c));

        assert_eq!(analysis.blocks.len(), 6);
        assert!(analysis.loops.is_empty());
        assert_eq!(analysis.index.dangling_jumps().count(), 0);
        // callvalue revert, short calldata revert, unknown selector revert
        assert_eq!(analysis.paths.as_ref().map(|p| p.len()), Some(3));

        let dom = DominatorTree::dominators(cfg);
        let at = |offset| cfg.node_at(offset).unwrap();
        assert!(dom.dominates(at(0x0f), at(0x2d)));
        assert_eq!(dom.immediate_dominator(at(0x28)), Some(at(0x17)));
    }

    #[test]
    fn test_counter_loop() {
        let bytes = parse_hex(COUNTER_LOOP).unwrap();
        let analysis = analyze(&bytes, &AnalysisOptions::default()).unwrap();
        let cfg = analysis.cfg.as_ref().unwrap();

        assert_eq!(analysis.loops.len(), 1);
        let found = &analysis.loops[0];
        assert_eq!(cfg.offset(found.header), 0x02);
        assert_eq!(found.exit.map(|e| cfg.offset(e)), Some(0x11));
        assert_eq!(found.bounds, vec![0x02]);
        assert_eq!(found.invariants, vec!["0x01".to_string()]);

        let paths = analysis.paths.as_ref().unwrap();
        assert!(!paths.truncated);
        assert!(!paths.is_empty());
        for path in paths {
            assert_eq!(path.last().map(|id| cfg.offset(id)), Some(0x15));
        }
    }

    #[test]
    fn test_strategies_agree_on_clean_code() {
        for source in [DISPATCHER, COUNTER_LOOP] {
            let bytes = parse_hex(source).unwrap();
            let linear = Strategy::Linear.run(&bytes, &EvmDecoder).unwrap();
            let recursive = Strategy::Recursive.run(&bytes, &EvmDecoder).unwrap();
            // Recursive descent never decodes more than the sweep does
            let linear_offsets: HashSet<usize> = linear.iter().map(|i| i.offset).collect();
            assert!(recursive.iter().all(|i| linear_offsets.contains(&i.offset)));
        }

        let bytes = parse_hex(DISPATCHER).unwrap();
        let recursive = Strategy::Recursive.run(&bytes, &EvmDecoder).unwrap();
        assert_eq!(recursive, decompile(&bytes).unwrap());
    }

    #[rstest]
    #[case::scenario_add(&[0x60, 0x01, 0x60, 0x02, 0x01], 3, 0)]
    #[case::lone_push(&[0x60, 0x01], 0, 2)]
    #[case::push_past_end(&[0x63, 0x01, 0x02], 0, 3)]
    #[case::single_stop(&[0x00], 1, 0)]
    fn test_decode_shapes(#[case] bytes: &[u8], #[case] instructions: usize, #[case] undecoded: usize) {
        let disassembly: Disassembly = decompile(bytes).unwrap();
        assert_eq!(disassembly.len(), instructions);
        assert_eq!(disassembly.undecoded_bytes(), undecoded);
    }

    #[test]
    fn test_every_format_renders_every_sample() {
        for (name, bytes) in samples() {
            let analysis = analyze(&bytes, &AnalysisOptions::default()).unwrap();
            for format in OutputFormat::available_formats() {
                let rendered = format.get_formatter(None).format(&analysis);
                assert!(rendered.is_ok(), "{} failed to render as {}", name, format);
            }
        }
    }

    #[test]
    fn test_batch_matches_single_runs() {
        let contracts: Vec<Vec<u8>> = samples().into_iter().map(|(_, bytes)| bytes).collect();
        let options = AnalysisOptions::default();
        let batch = analyze_batch(&contracts, &options);

        assert_eq!(batch.len(), contracts.len());
        for (bytes, result) in contracts.iter().zip(batch) {
            let single = analyze(bytes, &options).unwrap();
            let batched = result.unwrap();
            assert_eq!(batched.disassembly, single.disassembly);
            assert_eq!(batched.blocks, single.blocks);
            assert_eq!(batched.loops, single.loops);
            assert_eq!(batched.paths, single.paths);
        }
    }
}
