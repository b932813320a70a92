//! Static stack-height verification.
//!
//! Walks each subroutine from its entry, tracking the height (in bytes) at
//! every reachable instruction. Heights must agree wherever control paths
//! join, and nothing may read or pop below the subroutine's floor. A callee's
//! floor is unknown up front, so its summary records how far below its entry
//! it reaches (parameters and return slot); the caller must have at least that
//! much on the stack at the `JSR`.

use std::collections::{HashMap, HashSet};

use crate::bytecode::ir::{Instruction, Program};
use crate::bytecode::op::{Opcode, Qualifier};
use crate::lang::catalog::Catalog;
use crate::lang::operators::binary_result;
use crate::lang::types::{StructMap, Type, WORD};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("stack check error: {message}")]
pub struct StackCheckError {
    pub message: String,
    pub ip: Option<usize>,
}

impl StackCheckError {
    fn at(ip: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ip: Some(ip),
        }
    }
}

/// What a subroutine does to its caller's stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    /// Bytes below the entry height the subroutine reads or pops.
    pub reach: i32,
    /// Height at `RETN` relative to entry; `None` if it never returns.
    pub net: Option<i32>,
}

/// Result of stepping one instruction.
enum Step {
    /// Pops then pushes, in bytes.
    Plain(i32, i32),
    /// Reads or writes `[SP + offset, size)` without changing the height.
    Touch(i32),
    /// Reads `[SP + offset, size)` and pushes a copy.
    CopyUp(i32, i32),
    Unknown,
}

fn step(instruction: &Instruction, catalog: Option<&Catalog>) -> Step {
    use Opcode::*;
    let arg = |i| instruction.int_arg(i).unwrap_or(0);
    let words = |w: i32| w * WORD;
    let none = StructMap::new();

    match instruction.opcode {
        RsAdd | Const | SaveBp => Step::Plain(0, WORD),
        RestoreBp => Step::Plain(WORD, 0),
        CpTopSp => Step::CopyUp(arg(0), arg(1)),
        CpDownSp => Step::Touch(arg(0)),
        CpTopBp => Step::Plain(0, arg(1)),
        CpDownBp | IncBp | DecBp | Nop | Jmp | Jsr | Retn | StoreState | StoreStateAll => {
            Step::Plain(0, 0)
        }
        IncSp | DecSp => Step::Touch(arg(0)),
        MovSp => Step::Plain(-arg(0), 0),
        Jz | Jnz => Step::Plain(WORD, 0),
        Destruct => Step::Plain(arg(0), arg(2)),
        Action => {
            let routine = instruction
                .int_arg(0)
                .and_then(|i| u16::try_from(i).ok())
                .and_then(|i| catalog.and_then(|c| c.routine_by_index(i)));
            match routine {
                Some(r) => Step::Plain(
                    r.params
                        .iter()
                        .filter(|p| p.ty != Type::Action)
                        .map(|p| p.ty.size(&none))
                        .sum(),
                    r.returns.size(&none),
                ),
                None => Step::Unknown,
            }
        }
        Neg | Comp | Not => {
            let (w, _) = instruction.qualifier.operand_words();
            Step::Plain(words(w), words(w))
        }
        opcode => {
            if instruction.qualifier == Qualifier::StructStruct {
                return Step::Plain(2 * arg(0), WORD);
            }
            let (lhs, rhs) = instruction.qualifier.operand_words();
            match binary_result(opcode, instruction.qualifier) {
                Some((_, result)) => Step::Plain(words(lhs + rhs), result.size(&none)),
                None => Step::Unknown,
            }
        }
    }
}

struct Checker<'a> {
    program: &'a Program,
    catalog: Option<&'a Catalog>,
    summaries: HashMap<usize, Option<Summary>>,
    in_progress: HashSet<usize>,
}

impl<'a> Checker<'a> {
    /// Walks from `entry` starting at `height`. With a `floor`, going below
    /// it is an error; without one the deepest reach is recorded instead.
    /// Returns `None` when an instruction with unknown effect is met.
    fn walk(
        &mut self,
        entry: usize,
        height: i32,
        floor: Option<i32>,
    ) -> Result<Option<Summary>, StackCheckError> {
        let program = self.program;
        let mut heights: HashMap<usize, i32> = HashMap::new();
        let mut work = vec![(entry, height)];
        let mut reach = 0;
        let mut net: Option<i32> = None;

        while let Some((ip, mut h)) = work.pop() {
            if let Some(&seen) = heights.get(&ip) {
                if seen != h {
                    return Err(StackCheckError::at(
                        ip,
                        format!("stack height mismatch at ip={}: {} vs {} bytes", ip, seen, h),
                    ));
                }
                continue;
            }
            heights.insert(ip, h);
            let Some(instruction) = program.at(ip) else {
                return Err(StackCheckError::at(
                    ip,
                    format!("control falls off the end of the program at ip={}", ip),
                ));
            };

            let mut below = |needed: i32, h: i32| -> Result<(), StackCheckError> {
                let depth = needed - h;
                match floor {
                    Some(floor) if depth > floor => Err(StackCheckError::at(
                        ip,
                        format!(
                            "stack underflow at ip={}, op={}, needed {} bytes, have {}",
                            ip,
                            instruction.mnemonic(),
                            needed,
                            h + floor
                        ),
                    )),
                    _ => {
                        reach = reach.max(depth);
                        Ok(())
                    }
                }
            };

            match step(instruction, self.catalog) {
                Step::Unknown => return Ok(None),
                Step::Plain(pops, pushes) => {
                    below(pops, h)?;
                    h += pushes - pops;
                }
                Step::Touch(offset) => below(-offset, h)?,
                Step::CopyUp(offset, size) => {
                    below(-offset, h)?;
                    h += size;
                }
            }

            let target = program.target_position(ip);
            match instruction.opcode {
                Opcode::Retn => {
                    if let Some(previous) = net {
                        if previous != h {
                            return Err(StackCheckError::at(
                                ip,
                                format!("RETN at ip={} with {} bytes, earlier RETN had {}", ip, h, previous),
                            ));
                        }
                    }
                    net = Some(h);
                    continue;
                }
                Opcode::Jmp => {
                    if let Some(target) = target {
                        work.push((target, h));
                    }
                    continue;
                }
                Opcode::Jz | Opcode::Jnz => {
                    if let Some(target) = target {
                        work.push((target, h));
                    }
                }
                Opcode::Jsr => {
                    let Some(callee) = target else {
                        return Ok(None);
                    };
                    let Some(summary) = self.summary(callee)? else {
                        return Ok(None);
                    };
                    below(summary.reach, h)?;
                    match summary.net {
                        Some(delta) => h += delta,
                        None => continue,
                    }
                }
                Opcode::StoreState => {
                    let saved = instruction.int_arg(1).unwrap_or(0);
                    self.walk(ip + 2, saved, Some(0))?;
                }
                _ => {}
            }
            work.push((ip + 1, h));
        }

        Ok(Some(Summary { reach, net }))
    }

    fn summary(&mut self, entry: usize) -> Result<Option<Summary>, StackCheckError> {
        if let Some(known) = self.summaries.get(&entry) {
            return Ok(*known);
        }
        if !self.in_progress.insert(entry) {
            return Ok(None);
        }
        let summary = self.walk(entry, 0, None)?;
        self.in_progress.remove(&entry);
        self.summaries.insert(entry, summary);
        Ok(summary)
    }
}

/// Checks a whole program from position 0 with an empty stack. Paths through
/// an instruction whose effect cannot be known (an `ACTION` missing from the
/// catalog, recursion) end the check for that subroutine.
pub fn check_program(program: &Program, catalog: Option<&Catalog>) -> Result<(), StackCheckError> {
    if program.is_empty() {
        return Ok(());
    }
    let mut checker = Checker {
        program,
        catalog,
        summaries: HashMap::new(),
        in_progress: HashSet::new(),
    };
    checker.walk(0, 0, Some(0))?;
    Ok(())
}

/// Summary of the subroutine starting at `entry`.
pub fn summarize(
    program: &Program,
    entry: usize,
    catalog: Option<&Catalog>,
) -> Result<Option<Summary>, StackCheckError> {
    let mut checker = Checker {
        program,
        catalog,
        summaries: HashMap::new(),
        in_progress: HashSet::new(),
    };
    checker.summary(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::Operand;

    fn program(instructions: Vec<Instruction>) -> Program {
        let mut program = Program::new();
        for instruction in instructions {
            program.push(instruction);
        }
        program
    }

    #[test]
    fn test_balanced_sequence() {
        let p = program(vec![
            Instruction::const_int(1),
            Instruction::const_int(2),
            Instruction::new(Opcode::Add, Qualifier::IntInt),
            Instruction::movsp(-4),
            Instruction::retn(),
        ]);
        assert!(check_program(&p, None).is_ok());
    }

    #[test]
    fn test_underflow() {
        let p = program(vec![
            Instruction::new(Opcode::Add, Qualifier::IntInt),
            Instruction::retn(),
        ]);
        let err = check_program(&p, None).unwrap_err();
        assert!(err.message.contains("underflow at ip=0"));
        assert_eq!(err.ip, Some(0));
    }

    #[test]
    fn test_read_below_floor() {
        let p = program(vec![
            Instruction::const_int(1),
            Instruction::copy(Opcode::CpTopSp, -8, 4),
            Instruction::retn(),
        ]);
        assert!(check_program(&p, None).is_err());
    }

    #[test]
    fn test_vector_ops_use_three_words() {
        let p = program(vec![
            Instruction::const_float(1.0),
            Instruction::const_float(2.0),
            Instruction::const_float(3.0),
            Instruction::const_float(2.0),
            Instruction::new(Opcode::Mul, Qualifier::VectorFloat),
            Instruction::movsp(-12),
            Instruction::retn(),
        ]);
        assert!(check_program(&p, None).is_ok());
    }

    #[test]
    fn test_join_mismatch() {
        let mut p = Program::new();
        let join = p.alloc(Instruction::retn());
        p.push(Instruction::const_int(1));
        p.push(Instruction::jump_to(Opcode::Jz, join));
        p.push(Instruction::const_int(5));
        p.place(join);
        let err = check_program(&p, None).unwrap_err();
        assert!(err.message.contains("mismatch"), "{}", err);
    }

    #[test]
    fn test_callee_summary() {
        // RSADDI; CONSTI; JSR f; MOVSP -4; RETN; f: CPDOWNSP -8,4 ... RETN
        let mut p = Program::new();
        let f = p.alloc(Instruction::copy(Opcode::CpTopSp, -4, 4));
        p.push(Instruction::new(Opcode::RsAdd, Qualifier::Int));
        p.push(Instruction::const_int(3));
        p.push(Instruction::jump_to(Opcode::Jsr, f));
        p.push(Instruction::movsp(-4));
        p.push(Instruction::retn());
        p.place(f);
        p.push(Instruction::copy(Opcode::CpDownSp, -12, 4));
        p.push(Instruction::movsp(-4));
        p.push(Instruction::movsp(-4));
        p.push(Instruction::retn());

        let summary = summarize(&p, 5, None).unwrap().unwrap();
        assert_eq!(summary, Summary { reach: 8, net: Some(-4) });
        assert!(check_program(&p, None).is_ok());
    }

    #[test]
    fn test_unknown_action_stops_checking() {
        let p = program(vec![
            Instruction::action(9999, 0),
            Instruction::new(Opcode::Add, Qualifier::IntInt),
        ]);
        assert!(check_program(&p, None).is_ok());
    }

    #[test]
    fn test_catalog_action_effect() {
        let catalog = Catalog::builtin();
        let p = program(vec![
            Instruction::const_int(5),
            Instruction::action(92, 1),
            Instruction::movsp(-4),
            Instruction::retn(),
        ]);
        assert!(check_program(&p, Some(&catalog)).is_ok());

        let p = program(vec![Instruction::action(92, 1), Instruction::retn()]);
        assert!(check_program(&p, Some(&catalog)).is_err());
    }

    #[test]
    fn test_struct_equality_uses_size_argument() {
        let p = program(vec![
            Instruction::const_int(1),
            Instruction::const_int(2),
            Instruction::const_int(1),
            Instruction::const_int(2),
            Instruction::new(Opcode::Equal, Qualifier::StructStruct)
                .with_args(vec![Operand::Int(8)]),
            Instruction::movsp(-4),
            Instruction::retn(),
        ]);
        assert!(check_program(&p, None).is_ok());
    }
}
