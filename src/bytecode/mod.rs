pub mod codec_error;
pub mod compile;
pub mod compile_error;
pub mod compile_stmt;
pub mod decode;
pub mod disasm;
pub mod encode;
pub mod ir;
pub mod op;
pub mod scope;
pub mod stack_check;

pub use codec_error::{DecodeError, EncodeError};
pub use compile_error::CompileError;
pub use compile_stmt::compile_root;
pub use decode::decode;
pub use encode::encode;
pub use ir::{InstrId, Instruction, Operand, Program};
pub use op::{Opcode, Qualifier};
