use crate::bytecode::{CompileError, DecodeError, EncodeError};
use crate::decompile::DecompileError;
use crate::embed::EmbedError;
use crate::frontend::lexer::LexerError;
use crate::frontend::parser_error::ParserError;
use crate::lang::catalog::CatalogError;

/// Any failure of a library entry point. Each variant's text starts with the
/// stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("lexer error: {0}")]
    Lexer(#[from] LexerError),

    #[error("parse error: {0}")]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Decompile(#[from] DecompileError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("embed error: {0}")]
    Embed(#[from] EmbedError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_prefixes() {
        let err = Error::from(LexerError {
            message: "unexpected character '@'".to_string(),
            line: 2,
            col: 5,
        });
        assert_eq!(err.to_string(), "lexer error: 2:5: unexpected character '@'");

        let err = Error::from(DecodeError::Truncated { size: 4 });
        assert!(err.to_string().starts_with("decode error: "));
    }

    #[test]
    fn test_io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.nss");
        assert!(matches!(Error::from(io), Error::Io(_)));
    }
}
