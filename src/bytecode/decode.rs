use std::collections::HashMap;

use tracing::debug;

use crate::bytecode::codec_error::DecodeError;
use crate::bytecode::encode::{layout, Field, HEADER_SIZE, MAGIC, MARKER, VERSION};
use crate::bytecode::ir::{InstrId, Instruction, Operand, Program};
use crate::bytecode::op::{Opcode, Qualifier};

struct Reader<'a> {
    code: &'a [u8],
    pos: usize,
    /// Offset of `code[0]` in the whole file.
    base: usize,
    start: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self
            .code
            .get(self.pos..self.pos + N)
            .and_then(|s| <[u8; N]>::try_from(s).ok())
            .ok_or(DecodeError::UnexpectedEnd {
                offset: self.base + self.start,
            })?;
        self.pos += N;
        Ok(bytes)
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let slice = self
            .code
            .get(self.pos..self.pos + len)
            .ok_or(DecodeError::UnexpectedEnd {
                offset: self.base + self.start,
            })?;
        self.pos += len;
        Ok(slice)
    }
}

/// Validates the 13-byte header and returns the code section. Bytes past the
/// declared size are ignored.
fn code_section(bytes: &[u8]) -> Result<&[u8], DecodeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DecodeError::Truncated { size: bytes.len() });
    }
    if &bytes[0..4] != MAGIC || &bytes[4..8] != VERSION {
        return Err(DecodeError::BadMagic {
            found: String::from_utf8_lossy(&bytes[0..8]).into_owned(),
        });
    }
    if bytes[8] != MARKER {
        return Err(DecodeError::BadMarker { found: bytes[8] });
    }
    let declared = u32::from_be_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]);
    let size = declared as usize;
    if size < HEADER_SIZE || size > bytes.len() {
        return Err(DecodeError::BadSize {
            declared,
            actual: bytes.len(),
        });
    }
    Ok(&bytes[HEADER_SIZE..size])
}

/// String constants are raw bytes in the game's 8-bit code page; each byte
/// becomes the Latin-1 character of the same value.
fn string_from_bytes(raw: &[u8]) -> String {
    raw.iter().map(|&b| char::from(b)).collect()
}

/// Decodes an NCS file into a program whose arena order equals its execution
/// order, so `InstrId(n)` is the n-th instruction.
pub fn decode(bytes: &[u8]) -> Result<Program, DecodeError> {
    let code = code_section(bytes)?;
    let mut reader = Reader {
        code,
        pos: 0,
        base: HEADER_SIZE,
        start: 0,
    };

    let mut program = Program::new();
    let mut starts: HashMap<usize, usize> = HashMap::new();
    // (instruction index, its file offset, absolute target offset)
    let mut jumps: Vec<(usize, usize, i64)> = Vec::new();

    while reader.pos < code.len() {
        reader.start = reader.pos;
        let offset = HEADER_SIZE + reader.pos;
        let [op_byte, q_byte] = reader.take::<2>()?;
        let opcode = Opcode::from_byte(op_byte).ok_or(DecodeError::UnknownOpcode {
            byte: op_byte,
            offset,
        })?;
        let unknown_qualifier = DecodeError::UnknownQualifier {
            opcode,
            byte: q_byte,
            offset,
        };
        let qualifier = Qualifier::from_byte(q_byte).ok_or(unknown_qualifier.clone())?;
        let fields = layout(opcode, qualifier).ok_or(unknown_qualifier)?;

        let index = program.len();
        let mut instruction = Instruction::new(opcode, qualifier);
        for field in fields {
            let operand = match field {
                Field::I32 => {
                    let n = i32::from_be_bytes(reader.take()?);
                    if opcode == Opcode::Const && qualifier == Qualifier::Object {
                        Operand::Object(n)
                    } else {
                        Operand::Int(n)
                    }
                }
                Field::U32 => Operand::Int(u32::from_be_bytes(reader.take()?) as i32),
                Field::I16 => Operand::Int(i16::from_be_bytes(reader.take()?) as i32),
                Field::U16 => Operand::Int(u16::from_be_bytes(reader.take()?) as i32),
                Field::U8 => Operand::Int(reader.take::<1>()?[0] as i32),
                Field::F32 => Operand::Float(f32::from_be_bytes(reader.take()?)),
                Field::Str => {
                    let len = u16::from_be_bytes(reader.take()?) as usize;
                    Operand::Str(string_from_bytes(reader.bytes(len)?))
                }
                Field::Jump => {
                    let relative = i32::from_be_bytes(reader.take()?);
                    jumps.push((index, offset, offset as i64 + relative as i64));
                    continue;
                }
            };
            instruction.args.push(operand);
        }

        starts.insert(offset, index);
        program.push(instruction);
    }

    for (index, offset, target) in jumps {
        let landing = usize::try_from(target).ok().and_then(|t| starts.get(&t));
        let Some(&target_index) = landing else {
            return Err(DecodeError::BadJumpTarget { offset, target });
        };
        program.get_mut(InstrId(index)).jump = Some(InstrId(target_index));
    }

    debug!(bytes = bytes.len(), instructions = program.len(), "decoded program");
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::encode::encode;

    fn sample() -> Program {
        let mut program = Program::new();
        let end = program.alloc(Instruction::retn());
        program.push(Instruction::new(Opcode::RsAdd, Qualifier::Int));
        program.push(Instruction::const_object(0));
        program.push(Instruction::const_string("héllo"));
        program.push(Instruction::jump_to(Opcode::Jz, end));
        program.push(Instruction::movsp(-4));
        program.place(end);
        program
    }

    #[test]
    fn test_decode_inverts_encode() {
        let program = sample();
        let decoded = decode(&encode(&program).unwrap()).unwrap();
        assert_eq!(decoded, program);
        assert_eq!(decoded.at(1).unwrap().args, vec![Operand::Object(0)]);
        assert_eq!(decoded.target_position(3), Some(5));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(DecodeError::BadMagic { .. })));
    }

    #[test]
    fn test_bad_marker() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[8] = 0x00;
        assert_eq!(decode(&bytes).unwrap_err(), DecodeError::BadMarker { found: 0 });
    }

    #[test]
    fn test_truncated_header() {
        assert_eq!(
            decode(b"NCS V1.0").unwrap_err(),
            DecodeError::Truncated { size: 8 }
        );
    }

    #[test]
    fn test_declared_size_checked() {
        let mut bytes = encode(&sample()).unwrap();
        let too_big = (bytes.len() as u32 + 1).to_be_bytes();
        bytes[9..13].copy_from_slice(&too_big);
        assert!(matches!(decode(&bytes), Err(DecodeError::BadSize { .. })));

        bytes[9..13].copy_from_slice(&5u32.to_be_bytes());
        assert!(matches!(decode(&bytes), Err(DecodeError::BadSize { declared: 5, .. })));
    }

    #[test]
    fn test_trailing_padding_is_ignored() {
        let program = sample();
        let mut bytes = encode(&program).unwrap();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(decode(&bytes).unwrap(), program);
    }

    #[test]
    fn test_unknown_opcode() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[HEADER_SIZE] = 0x7F;
        assert_eq!(
            decode(&bytes).unwrap_err(),
            DecodeError::UnknownOpcode {
                byte: 0x7F,
                offset: 13
            }
        );
    }

    #[test]
    fn test_instruction_cut_short() {
        let mut bytes = encode(&sample()).unwrap();
        let len = bytes.len() - 3;
        bytes.truncate(len);
        bytes[9..13].copy_from_slice(&(len as u32).to_be_bytes());
        assert!(matches!(decode(&bytes), Err(DecodeError::UnexpectedEnd { .. })));
    }

    #[test]
    fn test_jump_into_instruction_middle() {
        let mut program = Program::new();
        let target = program.alloc(Instruction::const_int(7));
        program.push(Instruction::jump_to(Opcode::Jmp, target));
        program.place(target);
        let mut bytes = encode(&program).unwrap();
        // point one byte into CONSTI
        bytes[15..19].copy_from_slice(&7i32.to_be_bytes());
        assert_eq!(
            decode(&bytes).unwrap_err(),
            DecodeError::BadJumpTarget {
                offset: 13,
                target: 20
            }
        );
    }

    #[test]
    fn test_latin1_string() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"NCS V1.0\x42");
        bytes.extend_from_slice(&18u32.to_be_bytes());
        bytes.extend_from_slice(&[0x04, 0x05, 0x00, 0x01, 0xE9]);
        let program = decode(&bytes).unwrap();
        assert_eq!(program.at(0).unwrap().args, vec![Operand::Str("é".to_string())]);
        assert_eq!(encode(&program).unwrap(), bytes);
    }

    #[test]
    fn test_string_bytes_survive_decode_then_encode() {
        for raw in [&[0xE9u8][..], &[0xC3, 0xA9][..], &[0x80, 0x00, 0xFF][..]] {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(b"NCS V1.0\x42");
            bytes.extend_from_slice(&(17 + raw.len() as u32).to_be_bytes());
            bytes.extend_from_slice(&[0x04, 0x05, 0x00, raw.len() as u8]);
            bytes.extend_from_slice(raw);
            let program = decode(&bytes).unwrap();
            assert_eq!(encode(&program).unwrap(), bytes, "{:?}", raw);
        }
    }
}
