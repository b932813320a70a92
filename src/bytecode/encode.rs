//! NCS container encoder.
//!
//! ```text
//! "NCS " "V1.0" 0x42 <u32 total size> <instructions...>
//! ```
//!
//! Every instruction is an opcode byte, a qualifier byte and big-endian
//! arguments whose widths are fixed by the opcode. Encoding runs in two
//! passes: the first assigns byte offsets, the second writes bytes and turns
//! jump targets into relative offsets.

use std::borrow::Cow;

use tracing::debug;

use crate::bytecode::codec_error::EncodeError;
use crate::bytecode::ir::{Instruction, Operand, Program};
use crate::bytecode::op::{Opcode, Qualifier};

pub const MAGIC: &[u8; 4] = b"NCS ";
pub const VERSION: &[u8; 4] = b"V1.0";
pub const MARKER: u8 = 0x42;
pub const HEADER_SIZE: usize = 13;

/// One encoded argument slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    I32,
    U32,
    I16,
    U16,
    U8,
    F32,
    /// u16 length followed by the bytes.
    Str,
    /// i32 relative to the start of the instruction, taken from the jump target.
    Jump,
}

impl Field {
    fn fixed_width(self) -> usize {
        match self {
            Field::I32 | Field::U32 | Field::F32 | Field::Jump => 4,
            Field::I16 | Field::U16 | Field::Str => 2,
            Field::U8 => 1,
        }
    }
}

/// Argument layout of `opcode` under `qualifier`. `None` when the pair has no
/// encoding (a `CONST` of an engine structure, for instance).
pub fn layout(opcode: Opcode, qualifier: Qualifier) -> Option<&'static [Field]> {
    use Field::*;
    Some(match opcode {
        Opcode::CpDownSp | Opcode::CpTopSp | Opcode::CpDownBp | Opcode::CpTopBp => &[I32, U16],
        Opcode::Const => match qualifier {
            Qualifier::Int | Qualifier::Object => &[I32],
            Qualifier::Float => &[F32],
            Qualifier::String => &[Str],
            _ => return None,
        },
        Opcode::Action => &[U16, U8],
        Opcode::MovSp | Opcode::IncSp | Opcode::DecSp | Opcode::IncBp | Opcode::DecBp => &[I32],
        Opcode::Jmp | Opcode::Jsr | Opcode::Jz | Opcode::Jnz => &[Jump],
        Opcode::Destruct => &[U16, I16, U16],
        Opcode::StoreState => &[U32, U32],
        Opcode::Equal | Opcode::NEqual if qualifier == Qualifier::StructStruct => &[U16],
        _ => &[],
    })
}

/// Bytes of a string constant. Text that fits Latin-1 is written one byte
/// per character, which is how [`decode`](crate::bytecode::decode) reads it
/// back; anything wider falls back to UTF-8.
pub fn string_bytes(s: &str) -> Cow<'_, [u8]> {
    if s.is_ascii() {
        return Cow::Borrowed(s.as_bytes());
    }
    match s.chars().map(|c| u8::try_from(u32::from(c))).collect::<Result<Vec<u8>, _>>() {
        Ok(latin1) => Cow::Owned(latin1),
        Err(_) => Cow::Borrowed(s.as_bytes()),
    }
}

/// Encoded length of one instruction in bytes.
pub fn instruction_len(instruction: &Instruction) -> usize {
    let fields = layout(instruction.opcode, instruction.qualifier).unwrap_or(&[]);
    let strings: usize = instruction
        .args
        .iter()
        .map(|a| match a {
            Operand::Str(s) => string_bytes(s).len(),
            _ => 0,
        })
        .sum();
    2 + fields.iter().map(|f| f.fixed_width()).sum::<usize>() + strings
}

/// Byte offset of every placed instruction, header included.
pub fn offsets(program: &Program) -> Vec<usize> {
    let mut offset = HEADER_SIZE;
    program
        .iter()
        .map(|(_, instruction)| {
            let here = offset;
            offset += instruction_len(instruction);
            here
        })
        .collect()
}

pub fn encode(program: &Program) -> Result<Vec<u8>, EncodeError> {
    let offsets = offsets(program);
    let positions = program.positions();
    let total = match (offsets.last(), program.iter().last()) {
        (Some(last), Some((_, instruction))) => last + instruction_len(instruction),
        _ => HEADER_SIZE,
    };
    let size = u32::try_from(total).map_err(|_| EncodeError::TooLarge { size: total })?;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(VERSION);
    out.push(MARKER);
    out.extend_from_slice(&size.to_be_bytes());

    for (index, (_, instruction)) in program.iter().enumerate() {
        let mnemonic = || instruction.mnemonic();
        let Some(fields) = layout(instruction.opcode, instruction.qualifier) else {
            return Err(EncodeError::NoEncoding {
                index,
                mnemonic: mnemonic(),
            });
        };

        out.push(instruction.opcode.byte());
        out.push(instruction.qualifier.byte());

        if fields == [Field::Jump] {
            let Some(target) = instruction.jump else {
                return Err(EncodeError::UnresolvedJump {
                    index,
                    mnemonic: mnemonic(),
                });
            };
            let Some(position) = positions.get(&target) else {
                return Err(EncodeError::DanglingJump { index });
            };
            let relative = offsets[*position] as i64 - offsets[index] as i64;
            out.extend_from_slice(&(relative as i32).to_be_bytes());
            continue;
        }

        if fields.len() != instruction.args.len() {
            return Err(EncodeError::Arity {
                index,
                mnemonic: mnemonic(),
                expected: fields.len(),
                found: instruction.args.len(),
            });
        }
        for (arg, (field, operand)) in fields.iter().zip(&instruction.args).enumerate() {
            write_field(&mut out, *field, operand).map_err(|message| EncodeError::BadArgument {
                index,
                mnemonic: mnemonic(),
                arg,
                message,
            })?;
        }
    }

    debug!(bytes = out.len(), instructions = program.len(), "encoded program");
    Ok(out)
}

fn write_field(out: &mut Vec<u8>, field: Field, operand: &Operand) -> Result<(), String> {
    fn int<T: TryFrom<i32>>(n: i32, what: &str) -> Result<T, String> {
        T::try_from(n).map_err(|_| format!("{} does not fit {}", n, what))
    }

    match (field, operand) {
        (Field::I32, Operand::Int(n) | Operand::Object(n)) => out.extend_from_slice(&n.to_be_bytes()),
        (Field::U32, Operand::Int(n)) => out.extend_from_slice(&int::<u32>(*n, "u32")?.to_be_bytes()),
        (Field::I16, Operand::Int(n)) => out.extend_from_slice(&int::<i16>(*n, "i16")?.to_be_bytes()),
        (Field::U16, Operand::Int(n)) => out.extend_from_slice(&int::<u16>(*n, "u16")?.to_be_bytes()),
        (Field::U8, Operand::Int(n)) => out.push(int::<u8>(*n, "u8")?),
        (Field::F32, Operand::Float(x)) => out.extend_from_slice(&x.to_be_bytes()),
        (Field::Str, Operand::Str(s)) => {
            let raw = string_bytes(s);
            let len = u16::try_from(raw.len())
                .map_err(|_| format!("string of {} bytes is too long", raw.len()))?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&raw);
        }
        (field, operand) => return Err(format!("{:?} cannot be encoded as {:?}", operand, field)),
    }
    Ok(())
}
