//! Recursive descent decoding strategy

use std::collections::{BTreeMap, HashSet, VecDeque};
use crate::{jump_target, AnalysisError, Decoder, Disassembly, Instruction, OpCode, Offset};

/// Recursive-descent decoding.
///
/// Starts at offset 0 and follows control flow instead of sweeping the whole
/// buffer: fall-through until an instruction that halts, plus every
/// statically resolvable `PUSH target; JUMP(I)` whose target is a JUMPDEST.
/// Bytes never reached this way (constructor arguments, metadata, embedded
/// data) are left undecoded rather than misread as code.
///
/// # Arguments
/// * `image` - The bytecode to decode
/// * `decoder` - The decoder to use
///
/// # Returns
/// The reachable instructions in ascending offset order
pub fn run(image: &[u8], decoder: &dyn Decoder) -> Result<Disassembly, AnalysisError> {
    if image.is_empty() {
        return Err(AnalysisError::EmptyInput);
    }

    log::debug!("Starting recursive descent over {} bytes", image.len());

    let decoded = recursive_decode(image, decoder, 0);
    let covered: usize = decoded.values().map(Instruction::size).sum();
    let instructions: Vec<Instruction> = decoded.into_values().collect();

    log::debug!(
        "Recursive descent complete: {} instructions, {} bytes unreached",
        instructions.len(),
        image.len() - covered
    );

    Ok(Disassembly::new(instructions, image.len() - covered))
}

/// Core recursive descent loop. Instructions are keyed by offset so the
/// result comes out sorted.
fn recursive_decode(
    image: &[u8],
    decoder: &dyn Decoder,
    entry_point: Offset,
) -> BTreeMap<Offset, Instruction> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    let mut decoded: BTreeMap<Offset, Instruction> = BTreeMap::new();

    queue.push_back(entry_point);

    while let Some(start) = queue.pop_front() {
        if !seen.insert(start) {
            continue;
        }
        if overlaps_existing(&decoded, start, start + 1) {
            log::debug!("Skipping jump target 0x{:x} inside an operand", start);
            continue;
        }

        let mut at = start;
        let mut previous: Option<Instruction> = None;

        while let Some(insn) = decoder.decode(image, at) {
            if decoded.contains_key(&insn.offset) {
                // Rejoined a run decoded earlier
                break;
            }
            if overlaps_existing(&decoded, insn.offset, insn.end()) {
                log::warn!(
                    "{} at 0x{:x} overlaps previously decoded code, stopping this run",
                    insn.opcode,
                    insn.offset
                );
                break;
            }

            if insn.opcode.is_jump() {
                match jump_target(&insn, previous.as_ref()) {
                    Some(target) if is_jumpdest(image, target) => {
                        if !seen.contains(&target) {
                            queue.push_back(target);
                        }
                    }
                    Some(target) => {
                        log::trace!("Jump at 0x{:x} to non-JUMPDEST 0x{:x}", insn.offset, target);
                    }
                    None => {
                        log::trace!("Jump at 0x{:x} has no static target", insn.offset);
                    }
                }
            }

            let halts = insn.opcode.halts();
            at = insn.end();
            decoded.insert(insn.offset, insn.clone());
            previous = Some(insn);

            if halts {
                break;
            }
        }
    }

    decoded
}

fn is_jumpdest(image: &[u8], target: Offset) -> bool {
    image.get(target).map_or(false, |b| OpCode(*b).is_jumpdest())
}

/// True when `[start, end)` intersects an already decoded instruction other
/// than one starting exactly at `start`.
fn overlaps_existing(decoded: &BTreeMap<Offset, Instruction>, start: Offset, end: Offset) -> bool {
    if let Some((_, before)) = decoded.range(..start).next_back() {
        if before.end() > start {
            return true;
        }
    }
    decoded
        .range(start + 1..end)
        .next()
        .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EvmDecoder;

    fn opcodes(disasm: &Disassembly) -> Vec<OpCode> {
        disasm.iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn test_recursive_stops_at_halt() {
        // PUSH1 0, PUSH1 0, RETURN, then data that looks like code
        let bytes = [0x60, 0x00, 0x60, 0x00, 0xf3, 0x01, 0x02, 0x03];
        let result = run(&bytes, &EvmDecoder).unwrap();

        assert_eq!(opcodes(&result), vec![OpCode::PUSH1, OpCode::PUSH1, OpCode::RETURN]);
        assert_eq!(result.undecoded_bytes(), 3);
    }

    #[test]
    fn test_recursive_follows_static_jump() {
        // 0: PUSH1 0x05  2: JUMP  3: ADD (dead)  4: ADD (dead)  5: JUMPDEST  6: STOP
        let bytes = [0x60, 0x05, 0x56, 0x01, 0x01, 0x5b, 0x00];
        let result = run(&bytes, &EvmDecoder).unwrap();

        let offsets: Vec<_> = result.iter().map(|i| i.offset).collect();
        assert_eq!(offsets, vec![0, 2, 5, 6]);
        assert_eq!(result.undecoded_bytes(), 2);
    }

    #[test]
    fn test_recursive_ignores_non_jumpdest_target() {
        // PUSH1 0x04, JUMP, STOP, ADD (target is not a JUMPDEST)
        let bytes = [0x60, 0x04, 0x56, 0x00, 0x01];
        let result = run(&bytes, &EvmDecoder).unwrap();
        assert_eq!(opcodes(&result), vec![OpCode::PUSH1, OpCode::JUMP]);
    }

    #[test]
    fn test_recursive_jumpi_keeps_fallthrough() {
        // 0: PUSH1 0x01 (condition)  2: PUSH1 0x06  4: JUMPI  5: STOP  6: JUMPDEST  7: STOP
        let bytes = [0x60, 0x01, 0x60, 0x06, 0x57, 0x00, 0x5b, 0x00];
        let result = run(&bytes, &EvmDecoder).unwrap();
        assert_eq!(result.len(), 6);
        assert_eq!(result.undecoded_bytes(), 0);
    }
}
