/// A syntax error with source location.
///
/// `line` and `col` are 1-based positions coming from the lexer spans. Errors
/// at end of input reuse the last consumed token's span, so locations are
/// never `0:0`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{line}:{col}: {message}")]
pub struct ParserError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}
