use std::collections::BTreeSet;

use crate::bytecode::encode::{instruction_len, offsets};
use crate::bytecode::ir::{Instruction, Operand, Program};
use crate::bytecode::op::Opcode;
use crate::lang::catalog::Catalog;

/// Print disassembly of a program
pub fn print_program(program: &Program, catalog: Option<&Catalog>) {
    print!("{}", disassemble(program, catalog));
}

/// Render a program listing: one line per instruction with its index, byte
/// offset, mnemonic and arguments. Subroutine entries (position 0 and every
/// `JSR` target) open a new section.
pub fn disassemble(program: &Program, catalog: Option<&Catalog>) -> String {
    let mut out = String::new();
    let offsets = offsets(program);
    let targets = collect_jump_targets(program);
    let subroutines = collect_subroutines(program);
    let size = match (offsets.last(), program.iter().last()) {
        (Some(last), Some((_, ins))) => last + instruction_len(ins),
        _ => offsets.first().copied().unwrap_or(0),
    };

    out.push_str("=== NCS PROGRAM ===\n");
    out.push_str(&format!(" {} instructions, {} bytes\n\n", program.len(), size));

    for (ip, (_, instruction)) in program.iter().enumerate() {
        if subroutines.contains(&ip) {
            if ip > 0 {
                out.push('\n');
            }
            let name = if ip == 0 {
                "entry".to_string()
            } else {
                format!("sub_{:04}", ip)
            };
            out.push_str("════════════════════════════════════════\n");
            out.push_str(&format!(" {}\n", name));
            out.push_str("════════════════════════════════════════\n");
        }
        if targets.contains(&ip) {
            out.push_str("             ┌──────────────────────────────────\n");
        }

        let marker = if targets.contains(&ip) { "► " } else { "  " };
        out.push_str(&format!(
            "{:04} {}{:#06x}  {}\n",
            ip,
            marker,
            offsets[ip],
            format_instruction(program, ip, instruction, catalog)
        ));
    }
    out
}

fn format_instruction(
    program: &Program,
    ip: usize,
    instruction: &Instruction,
    catalog: Option<&Catalog>,
) -> String {
    let mnemonic = instruction.mnemonic();

    if instruction.opcode.is_jump() {
        return match program.target_position(ip) {
            Some(target) => {
                let direction = if target <= ip { "↑" } else { "↓" };
                format!("{:<12}{} (→ {:04})", mnemonic, direction, target)
            }
            None => format!("{:<12}?", mnemonic),
        };
    }

    let args: Vec<String> = instruction.args.iter().map(format_operand).collect();
    let mut line = if args.is_empty() {
        mnemonic
    } else {
        format!("{:<12}{}", mnemonic, args.join(", "))
    };

    if instruction.opcode == Opcode::Action {
        let routine = instruction
            .int_arg(0)
            .and_then(|i| u16::try_from(i).ok())
            .and_then(|i| catalog.and_then(|c| c.routine_by_index(i)));
        if let Some(routine) = routine {
            line.push_str(&format!("   ; {}", routine.name));
        }
    }
    line
}

fn format_operand(operand: &Operand) -> String {
    match operand {
        Operand::Int(n) => n.to_string(),
        Operand::Float(x) => format!("{:?}", x),
        Operand::Str(s) => format!("{:?}", s),
        Operand::Object(id) => format!("#{}", id),
    }
}

fn collect_jump_targets(program: &Program) -> BTreeSet<usize> {
    (0..program.len())
        .filter_map(|ip| program.target_position(ip))
        .collect()
}

fn collect_subroutines(program: &Program) -> BTreeSet<usize> {
    let mut subs: BTreeSet<usize> = (0..program.len())
        .filter(|ip| program.at(*ip).map(|i| i.opcode) == Some(Opcode::Jsr))
        .filter_map(|ip| program.target_position(ip))
        .collect();
    if !program.is_empty() {
        subs.insert(0);
    }
    subs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::Qualifier;

    fn sample() -> Program {
        let mut program = Program::new();
        let sub = program.alloc(Instruction::const_int(5));
        program.push(Instruction::jump_to(Opcode::Jsr, sub));
        program.push(Instruction::retn());
        program.place(sub);
        program.push(Instruction::action(92, 1));
        program.push(Instruction::new(Opcode::MovSp, Qualifier::None).with_args(vec![Operand::Int(-4)]));
        program.push(Instruction::retn());
        program
    }

    #[test]
    fn test_listing_lines() {
        let catalog = Catalog::builtin();
        let text = disassemble(&sample(), Some(&catalog));
        assert!(text.contains(" 6 instructions, 40 bytes"));
        assert!(text.contains("0000   0x000d  JSR         ↓ (→ 0002)"));
        assert!(text.contains("0002 ► 0x0015  CONSTI      5"));
        assert!(text.contains("ACTION      92, 1   ; IntToString"));
        assert!(text.contains("MOVSP       -4"));
    }

    #[test]
    fn test_subroutine_sections() {
        let text = disassemble(&sample(), None);
        assert!(text.contains(" entry\n"));
        assert!(text.contains(" sub_0002\n"));
        assert!(!text.contains("IntToString"));
    }

    #[test]
    fn test_empty_program() {
        let text = disassemble(&Program::new(), None);
        assert!(text.contains(" 0 instructions, 0 bytes"));
    }
}
