use crate::bytecode::codec_error::DecodeError;

/// Bytecode the decompiler cannot make sense of.
///
/// Most malformed input degrades to placeholder text instead; this error is
/// reserved for input with nothing to decompile at all.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("decompile error: {message}{}", .index.map(|i| format!(" (instruction {})", i)).unwrap_or_default())]
pub struct DecompileError {
    pub message: String,
    pub index: Option<usize>,
    #[source]
    pub source: Option<DecodeError>,
}

impl DecompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            index: None,
            source: None,
        }
    }

    pub fn at(index: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            index: Some(index),
            source: None,
        }
    }
}

impl From<DecodeError> for DecompileError {
    fn from(err: DecodeError) -> Self {
        Self {
            message: err.to_string(),
            index: None,
            source: Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_with_index() {
        let err = DecompileError::at(7, "no instructions");
        assert_eq!(err.to_string(), "decompile error: no instructions (instruction 7)");
    }

    #[test]
    fn test_wraps_decode_error() {
        let err = DecompileError::from(DecodeError::Truncated { size: 3 });
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("decompile error: "));
    }
}
