//! Original bytecode carried inside decompiled source.
//!
//! Decompiled text only approximates the program it came from. Appending the
//! bytes as a base64 comment block lets `compile` hand back the exact
//! original instead of recompiling the approximation:
//!
//! ```text
//! /*__NCS_BYTECODE__
//! TkNTIFYxLjBCAAAAHR4AAAAACAAgAC0AIAA=
//! __END_NCS_BYTECODE__*/
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

pub const BEGIN: &str = "/*__NCS_BYTECODE__";
pub const END: &str = "__END_NCS_BYTECODE__*/";

const LINE_WIDTH: usize = 76;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmbedError {
    #[error("embedded bytecode is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("embedded bytecode block has no closing marker")]
    Unterminated,
}

/// The comment block holding `bytes`, ending in a newline.
pub fn embed(bytes: &[u8]) -> String {
    let encoded = STANDARD.encode(bytes);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / LINE_WIDTH + 48);
    out.push_str(BEGIN);
    out.push('\n');
    // base64 output is ASCII, so byte chunks are valid UTF-8
    for line in encoded.as_bytes().chunks(LINE_WIDTH) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str(END);
    out.push('\n');
    out
}

/// `source` followed by the block for `bytes`.
pub fn append(source: &str, bytes: &[u8]) -> String {
    let mut out = String::with_capacity(source.len() + bytes.len() * 4 / 3 + 64);
    out.push_str(source);
    if !source.is_empty() && !source.ends_with('\n') {
        out.push('\n');
    }
    out.push('\n');
    out.push_str(&embed(bytes));
    out
}

/// The bytes embedded in `source`, or `None` if it carries no block.
pub fn extract(source: &str) -> Option<Result<Vec<u8>, EmbedError>> {
    let start = source.find(BEGIN)? + BEGIN.len();
    let Some(len) = source[start..].find(END) else {
        return Some(Err(EmbedError::Unterminated));
    };
    let text: String = source[start..start + len]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    Some(STANDARD.decode(text).map_err(EmbedError::from))
}
