//! Operator resolution tables.
//!
//! Every binary and unary operator resolves through a table keyed by the
//! operand types. A lookup either yields exactly one `(opcode, qualifier,
//! result)` triple or fails; there is no implicit fallback or widening.

use std::fmt;

use crate::bytecode::op::{Opcode, Qualifier};
use crate::lang::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    LogicalAnd,
    LogicalOr,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 19] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Mod,
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::Gt,
        BinaryOp::Lt,
        BinaryOp::Ge,
        BinaryOp::Le,
        BinaryOp::LogicalAnd,
        BinaryOp::LogicalOr,
        BinaryOp::BitAnd,
        BinaryOp::BitOr,
        BinaryOp::BitXor,
        BinaryOp::Shl,
        BinaryOp::Shr,
        BinaryOp::UShr,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::Ge => ">=",
            BinaryOp::Le => "<=",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::UShr => ">>>",
        }
    }

    /// Binding strength used when printing expressions; larger binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::LogicalOr => 1,
            BinaryOp::LogicalAnd => 2,
            BinaryOp::BitOr => 3,
            BinaryOp::BitXor => 4,
            BinaryOp::BitAnd => 5,
            BinaryOp::Eq | BinaryOp::Ne => 6,
            BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Ge | BinaryOp::Le => 7,
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr => 8,
            BinaryOp::Add | BinaryOp::Sub => 9,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 10,
        }
    }

    fn opcode(self) -> Opcode {
        match self {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Mod => Opcode::Mod,
            BinaryOp::Eq => Opcode::Equal,
            BinaryOp::Ne => Opcode::NEqual,
            BinaryOp::Gt => Opcode::Gt,
            BinaryOp::Lt => Opcode::Lt,
            BinaryOp::Ge => Opcode::Geq,
            BinaryOp::Le => Opcode::Leq,
            BinaryOp::LogicalAnd => Opcode::LogAnd,
            BinaryOp::LogicalOr => Opcode::LogOr,
            BinaryOp::BitAnd => Opcode::BoolAnd,
            BinaryOp::BitOr => Opcode::IncOr,
            BinaryOp::BitXor => Opcode::ExcOr,
            BinaryOp::Shl => Opcode::ShLeft,
            BinaryOp::Shr => Opcode::ShRight,
            BinaryOp::UShr => Opcode::UShRight,
        }
    }

    /// Reverse lookup used by the decompiler.
    pub fn from_opcode(opcode: Opcode) -> Option<BinaryOp> {
        BinaryOp::ALL.into_iter().find(|op| op.opcode() == opcode)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }

    pub fn from_opcode(opcode: Opcode) -> Option<UnaryOp> {
        match opcode {
            Opcode::Neg => Some(UnaryOp::Neg),
            Opcode::Not => Some(UnaryOp::Not),
            Opcode::Comp => Some(UnaryOp::BitNot),
            _ => None,
        }
    }
}

/// One row of a binary resolution table.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMapping {
    pub opcode: Opcode,
    pub qualifier: Qualifier,
    pub result: Type,
    pub lhs: Type,
    pub rhs: Type,
}

/// One row of a unary resolution table.
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryMapping {
    pub opcode: Opcode,
    pub qualifier: Qualifier,
    pub result: Type,
    pub operand: Type,
}

/// Failed operator lookup. Carries a sample of the valid combinations so the
/// diagnostic can suggest one.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorError {
    pub operator: &'static str,
    pub operands: Vec<Type>,
    pub available: Vec<String>,
}

impl fmt::Display for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operands.as_slice() {
            [lhs, rhs] => write!(
                f,
                "no operator '{}' for operand types {} and {}",
                self.operator, lhs, rhs
            )?,
            [operand] => write!(
                f,
                "no unary operator '{}' for operand type {}",
                self.operator, operand
            )?,
            _ => write!(f, "no operator '{}' for these operands", self.operator)?,
        }
        if !self.available.is_empty() {
            write!(f, "\n  Available combinations: {}", self.available.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for OperatorError {}

const SAMPLE: usize = 5;

fn row(op: BinaryOp, qualifier: Qualifier, result: Type, lhs: Type, rhs: Type) -> BinaryMapping {
    BinaryMapping {
        opcode: op.opcode(),
        qualifier,
        result,
        lhs,
        rhs,
    }
}

/// The full resolution table for `op`.
pub fn binary_mappings(op: BinaryOp) -> Vec<BinaryMapping> {
    use Qualifier as Q;
    use Type as T;
    let arithmetic = || {
        vec![
            row(op, Q::IntInt, T::Int, T::Int, T::Int),
            row(op, Q::IntFloat, T::Float, T::Int, T::Float),
            row(op, Q::FloatInt, T::Float, T::Float, T::Int),
            row(op, Q::FloatFloat, T::Float, T::Float, T::Float),
        ]
    };
    match op {
        BinaryOp::Add => {
            let mut rows = arithmetic();
            rows.push(row(op, Q::VectorVector, T::Vector, T::Vector, T::Vector));
            rows.push(row(op, Q::StringString, T::String, T::String, T::String));
            rows
        }
        BinaryOp::Sub => {
            let mut rows = arithmetic();
            rows.push(row(op, Q::VectorVector, T::Vector, T::Vector, T::Vector));
            rows
        }
        BinaryOp::Mul => {
            let mut rows = arithmetic();
            rows.push(row(op, Q::VectorFloat, T::Vector, T::Vector, T::Float));
            rows.push(row(op, Q::FloatVector, T::Vector, T::Float, T::Vector));
            rows
        }
        BinaryOp::Div => {
            let mut rows = arithmetic();
            rows.push(row(op, Q::VectorFloat, T::Vector, T::Vector, T::Float));
            rows
        }
        BinaryOp::Eq | BinaryOp::Ne => vec![
            row(op, Q::IntInt, T::Int, T::Int, T::Int),
            row(op, Q::FloatFloat, T::Int, T::Float, T::Float),
            row(op, Q::StringString, T::Int, T::String, T::String),
            row(op, Q::ObjectObject, T::Int, T::Object, T::Object),
            row(op, Q::EffectEffect, T::Int, T::Effect, T::Effect),
            row(op, Q::EventEvent, T::Int, T::Event, T::Event),
            row(op, Q::LocationLocation, T::Int, T::Location, T::Location),
            row(op, Q::TalentTalent, T::Int, T::Talent, T::Talent),
            row(
                op,
                Q::ItemPropertyItemProperty,
                T::Int,
                T::ItemProperty,
                T::ItemProperty,
            ),
            row(op, Q::StructStruct, T::Int, T::Vector, T::Vector),
        ],
        BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Ge | BinaryOp::Le => vec![
            row(op, Q::IntInt, T::Int, T::Int, T::Int),
            row(op, Q::FloatFloat, T::Int, T::Float, T::Float),
        ],
        BinaryOp::Mod
        | BinaryOp::LogicalAnd
        | BinaryOp::LogicalOr
        | BinaryOp::BitAnd
        | BinaryOp::BitOr
        | BinaryOp::BitXor
        | BinaryOp::Shl
        | BinaryOp::Shr
        | BinaryOp::UShr => vec![row(op, Q::IntInt, T::Int, T::Int, T::Int)],
    }
}

/// Resolves `lhs op rhs`.
///
/// Struct equality is not in the static table: two values of the same struct
/// type compare with `EQUALTT`/`NEQUALTT`, whose size operand the caller
/// supplies.
pub fn resolve_binary(op: BinaryOp, lhs: &Type, rhs: &Type) -> Result<BinaryMapping, OperatorError> {
    if matches!(op, BinaryOp::Eq | BinaryOp::Ne)
        && matches!(lhs, Type::Struct(_))
        && lhs == rhs
    {
        return Ok(BinaryMapping {
            opcode: op.opcode(),
            qualifier: Qualifier::StructStruct,
            result: Type::Int,
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        });
    }

    let rows = binary_mappings(op);
    if let Some(found) = rows.iter().find(|m| &m.lhs == lhs && &m.rhs == rhs) {
        return Ok(found.clone());
    }

    Err(OperatorError {
        operator: op.symbol(),
        operands: vec![lhs.clone(), rhs.clone()],
        available: rows
            .iter()
            .take(SAMPLE)
            .map(|m| format!("{} {} {}", m.lhs, op.symbol(), m.rhs))
            .collect(),
    })
}

pub fn unary_mappings(op: UnaryOp) -> Vec<UnaryMapping> {
    let unary = |opcode, qualifier, ty: Type| UnaryMapping {
        opcode,
        qualifier,
        result: ty.clone(),
        operand: ty,
    };
    match op {
        UnaryOp::Neg => vec![
            unary(Opcode::Neg, Qualifier::Int, Type::Int),
            unary(Opcode::Neg, Qualifier::Float, Type::Float),
        ],
        UnaryOp::Not => vec![unary(Opcode::Not, Qualifier::Int, Type::Int)],
        UnaryOp::BitNot => vec![unary(Opcode::Comp, Qualifier::Int, Type::Int)],
    }
}

pub fn resolve_unary(op: UnaryOp, operand: &Type) -> Result<UnaryMapping, OperatorError> {
    let rows = unary_mappings(op);
    if let Some(found) = rows.iter().find(|m| &m.operand == operand) {
        return Ok(found.clone());
    }
    Err(OperatorError {
        operator: op.symbol(),
        operands: vec![operand.clone()],
        available: rows
            .iter()
            .take(SAMPLE)
            .map(|m| format!("{}{}", op.symbol(), m.operand))
            .collect(),
    })
}

/// Result type of a binary instruction, for the decompiler.
pub fn binary_result(opcode: Opcode, qualifier: Qualifier) -> Option<(BinaryOp, Type)> {
    let op = BinaryOp::from_opcode(opcode)?;
    let rows = binary_mappings(op);
    match rows.iter().find(|m| m.qualifier == qualifier) {
        Some(m) => Some((op, m.result.clone())),
        None if qualifier == Qualifier::StructStruct => Some((op, Type::Int)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_plus_float_is_float() {
        let m = resolve_binary(BinaryOp::Add, &Type::Int, &Type::Float).unwrap();
        assert_eq!(m.opcode, Opcode::Add);
        assert_eq!(m.qualifier, Qualifier::IntFloat);
        assert_eq!(m.result, Type::Float);
    }

    #[test]
    fn test_string_concatenation() {
        let m = resolve_binary(BinaryOp::Add, &Type::String, &Type::String).unwrap();
        assert_eq!(m.qualifier, Qualifier::StringString);
        assert_eq!(m.result, Type::String);
    }

    #[test]
    fn test_comparison_returns_int() {
        let m = resolve_binary(BinaryOp::Le, &Type::Float, &Type::Float).unwrap();
        assert_eq!(m.opcode, Opcode::Leq);
        assert_eq!(m.result, Type::Int);
    }

    #[test]
    fn test_logical_ops_are_plain_int_ops() {
        let and = resolve_binary(BinaryOp::LogicalAnd, &Type::Int, &Type::Int).unwrap();
        let or = resolve_binary(BinaryOp::LogicalOr, &Type::Int, &Type::Int).unwrap();
        assert_eq!(and.opcode, Opcode::LogAnd);
        assert_eq!(or.opcode, Opcode::LogOr);
    }

    #[test]
    fn test_missing_combination_lists_samples() {
        let err = resolve_binary(BinaryOp::Sub, &Type::String, &Type::Int).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("string and int"), "{}", text);
        assert!(text.contains("Available combinations: int - int"), "{}", text);
        assert_eq!(err.available.len(), 5);
    }

    #[test]
    fn test_struct_equality() {
        let ty = Type::Struct("S".to_string());
        let m = resolve_binary(BinaryOp::Ne, &ty, &ty).unwrap();
        assert_eq!(m.opcode, Opcode::NEqual);
        assert_eq!(m.qualifier, Qualifier::StructStruct);

        let other = Type::Struct("T".to_string());
        assert!(resolve_binary(BinaryOp::Eq, &ty, &other).is_err());
    }

    #[test]
    fn test_unary_neg_float() {
        let m = resolve_unary(UnaryOp::Neg, &Type::Float).unwrap();
        assert_eq!(m.opcode, Opcode::Neg);
        assert_eq!(m.qualifier, Qualifier::Float);
        assert!(resolve_unary(UnaryOp::BitNot, &Type::Float).is_err());
    }

    #[test]
    fn test_reverse_lookup() {
        assert_eq!(
            binary_result(Opcode::Mul, Qualifier::VectorFloat),
            Some((BinaryOp::Mul, Type::Vector))
        );
        assert_eq!(binary_result(Opcode::Mod, Qualifier::FloatFloat), None);
        assert_eq!(BinaryOp::from_opcode(Opcode::BoolAnd), Some(BinaryOp::BitAnd));
    }

    #[test]
    fn test_precedence_order() {
        assert!(BinaryOp::Mul.precedence() > BinaryOp::Add.precedence());
        assert!(BinaryOp::Add.precedence() > BinaryOp::Shl.precedence());
        assert!(BinaryOp::BitAnd.precedence() > BinaryOp::LogicalAnd.precedence());
    }
}
