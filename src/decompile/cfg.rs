//! Basic blocks and the control-flow graph between them.
//!
//! A block starts at position 0, at every jump target and after every
//! instruction that ends a block (`JMP`, `JZ`, `JNZ`, `RETN`). `JSR` does not
//! end a block: control comes back to the next instruction.

use std::collections::{BTreeSet, HashMap};

use crate::bytecode::ir::Program;
use crate::bytecode::op::Opcode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// First position in the block.
    pub start: usize,
    /// One past the last position.
    pub end: usize,
    pub successors: Vec<usize>,
    pub predecessors: Vec<usize>,
}

impl BasicBlock {
    pub fn last(&self) -> usize {
        self.end - 1
    }
}

#[derive(Debug, Clone)]
pub struct Cfg {
    pub blocks: Vec<BasicBlock>,
    /// Jump target of every position, resolved once.
    targets: Vec<Option<usize>>,
    block_of: Vec<usize>,
    /// Header position -> positions of the `JMP`s back to it, ascending.
    /// Nested loops may share a header once labels are gone.
    back_jumps: HashMap<usize, Vec<usize>>,
}

impl Cfg {
    pub fn build(program: &Program) -> Cfg {
        let len = program.len();
        let positions = program.positions();
        let targets: Vec<Option<usize>> = program
            .iter()
            .map(|(_, ins)| ins.jump.and_then(|t| positions.get(&t).copied()))
            .collect();

        let mut leaders = BTreeSet::new();
        if len > 0 {
            leaders.insert(0);
        }
        for (ip, (_, ins)) in program.iter().enumerate() {
            if let Some(target) = targets[ip] {
                leaders.insert(target);
            }
            if ins.opcode.ends_block() && ip + 1 < len {
                leaders.insert(ip + 1);
            }
        }

        let starts: Vec<usize> = leaders.into_iter().collect();
        let mut blocks: Vec<BasicBlock> = starts
            .iter()
            .enumerate()
            .map(|(i, &start)| BasicBlock {
                start,
                end: starts.get(i + 1).copied().unwrap_or(len),
                successors: Vec::new(),
                predecessors: Vec::new(),
            })
            .collect();

        let mut block_of = vec![0; len];
        for (index, block) in blocks.iter().enumerate() {
            for slot in &mut block_of[block.start..block.end] {
                *slot = index;
            }
        }

        let mut back_jumps: HashMap<usize, Vec<usize>> = HashMap::new();
        for index in 0..blocks.len() {
            let (start, last) = (blocks[index].start, blocks[index].last());
            let mut successors = Vec::new();
            let Some(ins) = program.at(last) else {
                continue;
            };
            match ins.opcode {
                Opcode::Jmp => successors.extend(targets[last].map(|t| block_of[t])),
                Opcode::Jz | Opcode::Jnz => {
                    successors.extend(targets[last].map(|t| block_of[t]));
                    if last + 1 < len {
                        successors.push(block_of[last + 1]);
                    }
                }
                Opcode::Retn => {}
                _ if last + 1 < len => successors.push(index + 1),
                _ => {}
            }
            // a deferred action body continues two instructions later
            for ip in start..=last {
                if program.at(ip).map(|i| i.opcode) == Some(Opcode::StoreState) && ip + 2 < len {
                    successors.push(block_of[ip + 2]);
                }
            }
            if ins.opcode == Opcode::Jmp {
                if let Some(target) = targets[last].filter(|&t| t <= last) {
                    back_jumps.entry(target).or_default().push(last);
                }
            }
            successors.dedup();
            blocks[index].successors = successors;
        }
        for index in 0..blocks.len() {
            for succ in blocks[index].successors.clone() {
                blocks[succ].predecessors.push(index);
            }
        }

        Cfg {
            blocks,
            targets,
            block_of,
            back_jumps,
        }
    }

    pub fn target(&self, position: usize) -> Option<usize> {
        self.targets.get(position).copied().flatten()
    }

    pub fn block_of(&self, position: usize) -> Option<usize> {
        self.block_of.get(position).copied()
    }

    /// Positions of the unconditional jumps back to `header`, ascending.
    /// Empty unless the header starts a loop.
    pub fn back_jumps(&self, header: usize) -> &[usize] {
        self.back_jumps
            .get(&header)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Blocks reachable from the block at `entry` without entering calls.
    pub fn reachable(&self, entry: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let Some(first) = self.block_of(entry) else {
            return seen;
        };
        let mut work = vec![first];
        while let Some(block) = work.pop() {
            if seen.insert(block) {
                work.extend(self.blocks[block].successors.iter().copied());
            }
        }
        seen
    }

    /// The last position reachable from `entry`; a subroutine spans
    /// `entry..=last`.
    pub fn last_reachable(&self, entry: usize) -> Option<usize> {
        self.reachable(entry)
            .into_iter()
            .map(|b| self.blocks[b].last())
            .max()
    }
}

/// Subroutine entries: position 0 and every `JSR` target, ascending.
pub fn subroutines(program: &Program, cfg: &Cfg) -> Vec<usize> {
    let mut subs: BTreeSet<usize> = program
        .iter()
        .enumerate()
        .filter(|(_, (_, ins))| ins.opcode == Opcode::Jsr)
        .filter_map(|(ip, _)| cfg.target(ip))
        .collect();
    if !program.is_empty() {
        subs.insert(0);
    }
    subs.into_iter().collect()
}
