use std::path::PathBuf;

use crate::lang::operators::OperatorError;
use crate::lang::types::Type;

fn fmt_hint(hint: &Option<String>) -> String {
    match hint {
        Some(h) => format!("\n  hint: {}", h),
        None => String::new(),
    }
}

fn fmt_searched(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return String::new();
    }
    let list: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    format!("\n  searched: {}", list.join(", "))
}

fn fmt_members(available: &[String]) -> String {
    if available.is_empty() {
        return String::new();
    }
    format!("\n  available members: {}", available.join(", "))
}

/// Semantic errors raised while generating code. None of them are recovered
/// from: the first one aborts the compile.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("compile error: type mismatch in {context}: expected {expected}, found {found}{}", fmt_hint(.hint))]
    TypeMismatch {
        context: String,
        expected: Type,
        found: Type,
        hint: Option<String>,
    },

    #[error("compile error: cannot assign to const '{name}'\n  hint: '{name}' was declared const")]
    ConstAssignment { name: String },

    #[error("compile error: undefined identifier '{name}'")]
    UndefinedIdentifier { name: String },

    #[error("compile error: undefined function '{name}'{}", fmt_hint(.hint))]
    UndefinedFunction { name: String, hint: Option<String> },

    #[error("compile error: {0}")]
    Operator(#[from] OperatorError),

    #[error("compile error: include '{name}' not found{}", fmt_searched(.searched))]
    MissingInclude { name: String, searched: Vec<PathBuf> },

    #[error("compile error: {message}\n  hint: define `void main()` or `int StartingConditional()`")]
    EntryPoint { message: String },

    #[error("compile error: {what} '{name}' is already defined")]
    Redefinition { what: &'static str, name: String },

    #[error("compile error: {name} expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("compile error: unknown struct '{name}'")]
    UnknownStruct { name: String },

    #[error("compile error: {ty} has no member '{member}'{}", fmt_members(.available))]
    UnknownMember {
        ty: Type,
        member: String,
        available: Vec<String>,
    },

    #[error("compile error: '{keyword}' outside of {context}")]
    MisplacedJump {
        keyword: &'static str,
        context: &'static str,
    },

    #[error("compile error: {message}{}", fmt_hint(.hint))]
    Invalid {
        message: String,
        hint: Option<String>,
    },
}

impl CompileError {
    pub fn mismatch(context: impl Into<String>, expected: &Type, found: &Type) -> Self {
        CompileError::TypeMismatch {
            context: context.into(),
            expected: expected.clone(),
            found: found.clone(),
            hint: None,
        }
    }

    /// Assignment requires identical types; there is no implicit conversion.
    pub fn assign_mismatch(target: &str, expected: &Type, found: &Type) -> Self {
        CompileError::TypeMismatch {
            context: format!("assignment to '{}'", target),
            expected: expected.clone(),
            found: found.clone(),
            hint: Some(format!("'{}' only accepts values of type {}", target, expected)),
        }
    }

    pub fn condition(found: &Type) -> Self {
        CompileError::TypeMismatch {
            context: "condition".to_string(),
            expected: Type::Int,
            found: found.clone(),
            hint: Some("conditions must be int; compare explicitly".to_string()),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        CompileError::Invalid {
            message: message.into(),
            hint: None,
        }
    }

    pub fn invalid_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        CompileError::Invalid {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }
}
