use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bytecode::op::{Opcode, Qualifier};

/// Stable handle to an instruction in a [`Program`] arena.
///
/// Handles survive reordering: only the program's placement order changes,
/// never the arena slot an id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrId(pub usize);

/// One instruction argument. Widths are fixed by the opcode at encode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Int(i32),
    Float(f32),
    Str(String),
    Object(i32),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Int(n) => write!(f, "{}", n),
            Operand::Float(x) => write!(f, "{:?}", x),
            Operand::Str(s) => write!(f, "{:?}", s),
            Operand::Object(id) => write!(f, "#{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub qualifier: Qualifier,
    pub args: Vec<Operand>,
    /// Target of a jump-family instruction. Resolved to a relative byte
    /// offset only when the program is encoded.
    pub jump: Option<InstrId>,
}

impl Instruction {
    pub fn new(opcode: Opcode, qualifier: Qualifier) -> Self {
        Instruction {
            opcode,
            qualifier,
            args: Vec::new(),
            jump: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Operand>) -> Self {
        self.args = args;
        self
    }

    pub fn jump_to(opcode: Opcode, target: InstrId) -> Self {
        Instruction {
            opcode,
            qualifier: Qualifier::None,
            args: Vec::new(),
            jump: Some(target),
        }
    }

    pub fn nop() -> Self {
        Instruction::new(Opcode::Nop, Qualifier::None)
    }

    pub fn retn() -> Self {
        Instruction::new(Opcode::Retn, Qualifier::None)
    }

    pub fn movsp(delta: i32) -> Self {
        Instruction::new(Opcode::MovSp, Qualifier::None).with_args(vec![Operand::Int(delta)])
    }

    pub fn const_int(value: i32) -> Self {
        Instruction::new(Opcode::Const, Qualifier::Int).with_args(vec![Operand::Int(value)])
    }

    pub fn const_float(value: f32) -> Self {
        Instruction::new(Opcode::Const, Qualifier::Float).with_args(vec![Operand::Float(value)])
    }

    pub fn const_string(value: &str) -> Self {
        Instruction::new(Opcode::Const, Qualifier::String)
            .with_args(vec![Operand::Str(value.to_string())])
    }

    pub fn const_object(value: i32) -> Self {
        Instruction::new(Opcode::Const, Qualifier::Object).with_args(vec![Operand::Object(value)])
    }

    /// One of the four stack-copy instructions with `(offset, size)`.
    pub fn copy(opcode: Opcode, offset: i32, size: i32) -> Self {
        Instruction::new(opcode, Qualifier::Copy)
            .with_args(vec![Operand::Int(offset), Operand::Int(size)])
    }

    pub fn action(routine: u16, argc: u8) -> Self {
        Instruction::new(Opcode::Action, Qualifier::None)
            .with_args(vec![Operand::Int(routine as i32), Operand::Int(argc as i32)])
    }

    pub fn mnemonic(&self) -> String {
        self.opcode.mnemonic(self.qualifier)
    }

    /// Integer argument at `index`, if it is one.
    pub fn int_arg(&self, index: usize) -> Option<i32> {
        match self.args.get(index) {
            Some(Operand::Int(n)) | Some(Operand::Object(n)) => Some(*n),
            _ => None,
        }
    }
}

/// An ordered instruction list backed by an arena.
///
/// Instructions are allocated into the arena and separately *placed* into the
/// execution order. Jump targets are arena ids, so a target may be allocated
/// before it is placed (forward jumps) and instructions may be reordered or
/// removed without invalidating any jump.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    arena: Vec<Instruction>,
    order: Vec<InstrId>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an instruction without placing it.
    pub fn alloc(&mut self, instruction: Instruction) -> InstrId {
        self.arena.push(instruction);
        InstrId(self.arena.len() - 1)
    }

    /// Appends an allocated instruction to the execution order.
    pub fn place(&mut self, id: InstrId) {
        self.order.push(id);
    }

    /// Allocates and places in one step.
    pub fn push(&mut self, instruction: Instruction) -> InstrId {
        let id = self.alloc(instruction);
        self.place(id);
        id
    }

    pub fn get(&self, id: InstrId) -> &Instruction {
        &self.arena[id.0]
    }

    pub fn get_mut(&mut self, id: InstrId) -> &mut Instruction {
        &mut self.arena[id.0]
    }

    /// Number of placed instructions.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn ids(&self) -> &[InstrId] {
        &self.order
    }

    /// Placed instructions in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (InstrId, &Instruction)> + '_ {
        self.order.iter().map(move |id| (*id, &self.arena[id.0]))
    }

    /// Instruction at position `index` of the execution order.
    pub fn at(&self, index: usize) -> Option<&Instruction> {
        self.order.get(index).map(|id| &self.arena[id.0])
    }

    /// Maps every placed id to its position in the execution order.
    pub fn positions(&self) -> HashMap<InstrId, usize> {
        self.order
            .iter()
            .enumerate()
            .map(|(pos, id)| (*id, pos))
            .collect()
    }

    /// Jump target of the instruction at `index`, as a position.
    pub fn target_position(&self, index: usize) -> Option<usize> {
        let target = self.at(index)?.jump?;
        self.order.iter().position(|id| *id == target)
    }

    /// Drops `NOP` labels from the execution order and returns how many went.
    /// Jumps aimed at a dropped label land on the next instruction that
    /// stays. A label with nothing live after it is kept so that its jumps
    /// still have somewhere to go.
    pub fn remove_nops(&mut self) -> usize {
        let mut redirect = HashMap::new();
        let mut keep = vec![true; self.order.len()];
        let mut next_live: Option<InstrId> = None;
        for (pos, id) in self.order.iter().enumerate().rev() {
            if self.arena[id.0].opcode != Opcode::Nop {
                next_live = Some(*id);
                continue;
            }
            match next_live {
                Some(next) => {
                    redirect.insert(*id, next);
                    keep[pos] = false;
                }
                None => next_live = Some(*id),
            }
        }
        if redirect.is_empty() {
            return 0;
        }
        for instruction in &mut self.arena {
            if let Some(target) = instruction.jump.and_then(|t| redirect.get(&t)) {
                instruction.jump = Some(*target);
            }
        }
        let mut flags = keep.into_iter();
        self.order.retain(|_| flags.next().unwrap_or(true));
        redirect.len()
    }

    /// Rebuilds the program so that arena order equals execution order and
    /// unplaced instructions are dropped.
    pub fn linearized(&self) -> Program {
        let positions = self.positions();
        let mut out = Program::new();
        for (_, instruction) in self.iter() {
            let mut copy = instruction.clone();
            copy.jump = instruction
                .jump
                .and_then(|target| positions.get(&target).map(|p| InstrId(*p)));
            out.push(copy);
        }
        out
    }

    pub fn to_postcard(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(&self.linearized())
    }

    pub fn from_postcard(bytes: &[u8]) -> Result<Program, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

impl PartialEq for Program {
    /// Two programs are equal when they execute the same instruction sequence
    /// with jumps landing on the same positions.
    fn eq(&self, other: &Self) -> bool {
        let a = self.linearized();
        let b = other.linearized();
        a.order.len() == b.order.len()
            && a
                .iter()
                .zip(b.iter())
                .all(|((_, x), (_, y))| x == y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_jump_by_id() {
        let mut program = Program::new();
        let end = program.alloc(Instruction::nop());
        program.push(Instruction::const_int(0));
        program.push(Instruction::jump_to(Opcode::Jz, end));
        program.push(Instruction::const_int(1));
        program.place(end);

        assert_eq!(program.len(), 4);
        assert_eq!(program.target_position(1), Some(3));
    }

    #[test]
    fn test_remove_nops_redirects_jumps() {
        let mut program = Program::new();
        let label = program.alloc(Instruction::nop());
        program.push(Instruction::jump_to(Opcode::Jmp, label));
        program.place(label);
        let after = program.push(Instruction::retn());

        assert_eq!(program.remove_nops(), 1);

        assert_eq!(program.len(), 2);
        assert_eq!(program.get(program.ids()[0]).jump, Some(after));
    }

    #[test]
    fn test_remove_nops_keeps_terminal_label() {
        let mut program = Program::new();
        let first = program.alloc(Instruction::nop());
        let last = program.alloc(Instruction::nop());
        program.push(Instruction::jump_to(Opcode::Jmp, first));
        program.push(Instruction::jump_to(Opcode::Jmp, last));
        program.place(first);
        program.place(last);

        assert_eq!(program.remove_nops(), 1);

        assert_eq!(program.len(), 3);
        assert_eq!(program.target_position(0), Some(2));
        assert_eq!(program.target_position(1), Some(2));
    }

    #[test]
    fn test_equality_ignores_arena_layout() {
        let mut a = Program::new();
        let end = a.alloc(Instruction::retn());
        a.push(Instruction::jump_to(Opcode::Jmp, end));
        a.place(end);

        let mut b = Program::new();
        let jmp = b.push(Instruction::jump_to(Opcode::Jmp, InstrId(0)));
        let ret = b.push(Instruction::retn());
        b.get_mut(jmp).jump = Some(ret);

        assert_eq!(a, b);
    }

    #[test]
    fn test_postcard_round_trip() {
        let mut program = Program::new();
        program.push(Instruction::const_string("hello"));
        program.push(Instruction::movsp(-4));
        program.push(Instruction::retn());

        let bytes = program.to_postcard().unwrap();
        let back = Program::from_postcard(&bytes).unwrap();
        assert_eq!(program, back);
    }
}
