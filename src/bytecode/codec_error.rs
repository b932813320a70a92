use crate::bytecode::op::Opcode;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("encode error: instruction {index} ({mnemonic}) takes {expected} argument(s), found {found}")]
    Arity {
        index: usize,
        mnemonic: String,
        expected: usize,
        found: usize,
    },

    #[error("encode error: instruction {index} ({mnemonic}) argument {arg}: {message}")]
    BadArgument {
        index: usize,
        mnemonic: String,
        arg: usize,
        message: String,
    },

    #[error("encode error: instruction {index} ({mnemonic}) has no encoding")]
    NoEncoding { index: usize, mnemonic: String },

    #[error("encode error: jump at instruction {index} ({mnemonic}) has no target")]
    UnresolvedJump { index: usize, mnemonic: String },

    #[error("encode error: jump at instruction {index} targets an instruction that is not in the program")]
    DanglingJump { index: usize },

    #[error("encode error: program of {size} bytes does not fit the container")]
    TooLarge { size: usize },
}

/// Container-level corruption. These are the only decompiler inputs that are
/// rejected outright.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("decode error: {size} bytes is shorter than the 13-byte header")]
    Truncated { size: usize },

    #[error("decode error: bad header tag {found:?}, expected \"NCS V1.0\"")]
    BadMagic { found: String },

    #[error("decode error: bad marker byte 0x{found:02X}, expected 0x42")]
    BadMarker { found: u8 },

    #[error("decode error: declared size {declared} does not fit a {actual}-byte buffer")]
    BadSize { declared: u32, actual: usize },

    #[error("decode error: unknown opcode 0x{byte:02X} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },

    #[error("decode error: unknown qualifier 0x{byte:02X} for {opcode:?} at offset {offset}")]
    UnknownQualifier {
        opcode: Opcode,
        byte: u8,
        offset: usize,
    },

    #[error("decode error: instruction at offset {offset} runs past the end of the code")]
    UnexpectedEnd { offset: usize },

    #[error("decode error: jump at offset {offset} lands on {target}, which is not an instruction boundary")]
    BadJumpTarget { offset: usize, target: i64 },
}
