//! # NWScript Abstract Syntax Tree
//!
//! Produced by the parser and consumed by the code generator. Nodes own their
//! children; the tree is never mutated after parsing.

use crate::lang::operators::{BinaryOp, UnaryOp};
use crate::lang::types::{StructDef, Type};

/// A parsed compilation unit, in source order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CodeRoot {
    pub objects: Vec<TopLevel>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TopLevel {
    /// `#include "name"` or `include "name";`
    Include(String),
    Struct(StructDef),
    /// Function prototype: `int f(int a);`
    Prototype(FunctionSig),
    Function(FunctionDef),
    Global(Declaration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSig {
    pub name: String,
    pub returns: Type,
    pub params: Vec<ParamDecl>,
}

impl FunctionSig {
    pub fn required_params(&self) -> usize {
        self.params.iter().take_while(|p| p.default.is_none()).count()
    }

    /// True when both signatures have the same return and parameter types.
    pub fn same_shape(&self, other: &FunctionSig) -> bool {
        self.returns == other.returns
            && self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|(a, b)| a.ty == b.ty)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub name: String,
    pub ty: Type,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub sig: FunctionSig,
    pub body: Vec<Stmt>,
}

/// `[const] type a [= init], b [= init];`
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub ty: Type,
    pub is_const: bool,
    pub vars: Vec<Declarator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
}

/// An lvalue path: a variable optionally followed by `.member` accesses.
#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    pub name: String,
    pub fields: Vec<String>,
}

impl Access {
    pub fn var(name: &str) -> Self {
        Access {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        for field in &self.fields {
            write!(f, ".{}", field)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i32),
    Float(f32),
    Str(String),
    /// Object literal: `OBJECT_SELF` is 0, `OBJECT_INVALID` is 1.
    Object(i32),
    /// `[x, y, z]`
    Vector(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Variable, member path or named constant.
    Name(Access),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Assign {
        target: Access,
        value: Box<Expr>,
    },
    /// `target op= value`, kept distinct from a desugared `target = target op value`.
    CompoundAssign {
        op: BinaryOp,
        target: Access,
        value: Box<Expr>,
    },
    IncDec {
        target: Access,
        increment: bool,
        prefix: bool,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `.member` chain after an expression that is not a plain name, such as
    /// `GetPosition(o).x`. Read-only.
    Member { base: Box<Expr>, fields: Vec<String> },
    /// Call of a user function.
    Call { name: String, args: Vec<Expr> },
    /// Call of a catalog routine. Arguments are complete: defaults for
    /// omitted trailing parameters were filled in by the parser.
    EngineCall {
        routine: u16,
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn name(name: &str) -> Expr {
        Expr::Name(Access::var(name))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Literal expressions are the only valid defaults and case labels.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Int(_) | Expr::Float(_) | Expr::Str(_) | Expr::Object(_) => true,
            Expr::Unary {
                op: UnaryOp::Neg,
                operand,
            } => matches!(**operand, Expr::Int(_) | Expr::Float(_)),
            Expr::Vector(x, y, z) => x.is_constant() && y.is_constant() && z.is_constant(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Empty,
    Expr(Expr),
    Decl(Declaration),
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Option<Vec<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    DoWhile {
        body: Vec<Stmt>,
        cond: Expr,
    },
    For {
        init: Option<Expr>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    Switch {
        value: Expr,
        arms: Vec<SwitchArm>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
}

/// Consecutive labels sharing one run of statements. Control falls through
/// into the next arm unless a `break` intervenes.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchArm {
    pub labels: Vec<SwitchLabel>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwitchLabel {
    Case(Expr),
    Default,
}
