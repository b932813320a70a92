//! Reconstructed expression trees and statements, and their source text.

use std::fmt;

use crate::lang::operators::{BinaryOp, UnaryOp};
use crate::lang::types::Type;

const INDENT: &str = "    ";

/// Precedence of postfix forms and primaries.
const PRIMARY: u8 = 12;
const PREFIX: u8 = 11;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i32),
    Float(f32),
    Str(String),
    Object(i32),
    Var(String),
    /// Vector component access.
    Field(Box<Expr>, &'static str),
    Vector(Box<[Expr; 3]>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Assign(Box<Expr>, Box<Expr>),
    /// `cond ? then : otherwise`
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    IncDec {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
    },
    /// Text for something that could not be reconstructed.
    Raw(String),
}

impl Expr {
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::Unary(op, Box::new(operand))
    }

    pub fn assign(target: Expr, value: Expr) -> Expr {
        Expr::Assign(Box::new(target), Box::new(value))
    }

    pub fn ternary(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
        Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise))
    }

    /// Whether evaluating the expression changes anything. Pure values that
    /// get popped are dropped; effects become expression statements.
    pub fn has_effect(&self) -> bool {
        match self {
            Expr::Call(..) | Expr::Assign(..) | Expr::IncDec { .. } => true,
            Expr::Field(inner, _) | Expr::Unary(_, inner) => inner.has_effect(),
            Expr::Binary(_, lhs, rhs) => lhs.has_effect() || rhs.has_effect(),
            Expr::Ternary(cond, then, otherwise) => {
                cond.has_effect() || then.has_effect() || otherwise.has_effect()
            }
            Expr::Vector(parts) => parts.iter().any(Expr::has_effect),
            _ => false,
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Assign(..) | Expr::Ternary(..) => 0,
            Expr::Binary(op, ..) => op.precedence(),
            Expr::Unary(..) | Expr::IncDec { prefix: true, .. } => PREFIX,
            Expr::Int(n) if *n < 0 => PREFIX,
            Expr::Float(x) if x.is_sign_negative() => PREFIX,
            _ => PRIMARY,
        }
    }

    fn write_operand(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

fn float_literal(x: f32) -> String {
    if x.is_finite() && x.fract() == 0.0 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(n) => write!(f, "{}", n),
            Expr::Float(x) => f.write_str(&float_literal(*x)),
            Expr::Str(s) => write!(f, "\"{}\"", escape(s)),
            Expr::Object(0) => f.write_str("OBJECT_SELF"),
            Expr::Object(1) => f.write_str("OBJECT_INVALID"),
            Expr::Object(n) => write!(f, "OBJECT_INVALID /* #{} */", n),
            Expr::Var(name) => f.write_str(name),
            Expr::Field(base, member) => {
                base.write_operand(f, PRIMARY)?;
                write!(f, ".{}", member)
            }
            Expr::Vector(parts) => write!(f, "[{}, {}, {}]", parts[0], parts[1], parts[2]),
            Expr::Unary(op, operand) => {
                f.write_str(op.symbol())?;
                operand.write_operand(f, PRIMARY)
            }
            Expr::Binary(op, lhs, rhs) => {
                let p = op.precedence();
                lhs.write_operand(f, p)?;
                write!(f, " {} ", op)?;
                rhs.write_operand(f, p + 1)
            }
            Expr::Call(name, args) => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Expr::Assign(target, value) => write!(f, "{} = {}", target, value),
            Expr::Ternary(cond, then, otherwise) => {
                cond.write_operand(f, 1)?;
                write!(f, " ? {} : ", then)?;
                if matches!(**otherwise, Expr::Assign(..)) {
                    write!(f, "({})", otherwise)
                } else {
                    write!(f, "{}", otherwise)
                }
            }
            Expr::IncDec {
                target,
                increment,
                prefix,
            } => {
                let op = if *increment { "++" } else { "--" };
                if *prefix {
                    write!(f, "{}{}", op, target)
                } else {
                    write!(f, "{}{}", target, op)
                }
            }
            Expr::Raw(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaseLabel {
    Case(Expr),
    Default,
}

/// Labels sharing one body. Bodies fall through unless they end in `break`.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchArm {
    pub labels: Vec<CaseLabel>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Declare {
        ty: Type,
        name: String,
        init: Option<Expr>,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    DoWhile {
        body: Vec<Stmt>,
        cond: Expr,
    },
    /// A loop whose body continues to its step. The initializer, if any, is
    /// the statement before it.
    For {
        cond: Expr,
        step: Expr,
        body: Vec<Stmt>,
    },
    Switch {
        value: Expr,
        arms: Vec<SwitchArm>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    /// Code that could not be reconstructed. Rendered as an `#error` line so
    /// that the output refuses to compile.
    Placeholder(String),
}

/// Writes `stmts` one per line at `depth` levels of indentation.
pub fn render_block(out: &mut String, stmts: &[Stmt], depth: usize) {
    for stmt in stmts {
        render_stmt(out, stmt, depth);
    }
}

fn render_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    let pad = INDENT.repeat(depth);
    match stmt {
        Stmt::Declare { ty, name, init } => match init {
            Some(value) => out.push_str(&format!("{}{} {} = {};\n", pad, ty, name, value)),
            None => out.push_str(&format!("{}{} {};\n", pad, ty, name)),
        },
        Stmt::Expr(expr) => out.push_str(&format!("{}{};\n", pad, expr)),
        Stmt::If {
            cond,
            then,
            otherwise,
        } => {
            out.push_str(&pad);
            render_if(out, cond, then, otherwise, depth);
        }
        Stmt::While { cond, body } => {
            out.push_str(&format!("{}while ({}) {{\n", pad, cond));
            render_block(out, body, depth + 1);
            out.push_str(&format!("{}}}\n", pad));
        }
        Stmt::DoWhile { body, cond } => {
            out.push_str(&format!("{}do {{\n", pad));
            render_block(out, body, depth + 1);
            out.push_str(&format!("{}}} while ({});\n", pad, cond));
        }
        Stmt::For { cond, step, body } => {
            out.push_str(&format!("{}for (; {}; {}) {{\n", pad, cond, step));
            render_block(out, body, depth + 1);
            out.push_str(&format!("{}}}\n", pad));
        }
        Stmt::Switch { value, arms } => {
            out.push_str(&format!("{}switch ({}) {{\n", pad, value));
            let label_pad = INDENT.repeat(depth + 1);
            for arm in arms {
                for label in &arm.labels {
                    match label {
                        CaseLabel::Case(expr) => {
                            out.push_str(&format!("{}case {}:\n", label_pad, expr))
                        }
                        CaseLabel::Default => out.push_str(&format!("{}default:\n", label_pad)),
                    }
                }
                render_block(out, &arm.body, depth + 2);
            }
            out.push_str(&format!("{}}}\n", pad));
        }
        Stmt::Break => out.push_str(&format!("{}break;\n", pad)),
        Stmt::Continue => out.push_str(&format!("{}continue;\n", pad)),
        Stmt::Return(Some(value)) => out.push_str(&format!("{}return {};\n", pad, value)),
        Stmt::Return(None) => out.push_str(&format!("{}return;\n", pad)),
        // directives must start the line
        Stmt::Placeholder(text) => out.push_str(&format!("#error {}\n", text)),
    }
}

/// `if` without its leading indentation, so `else if` chains stay flat.
fn render_if(out: &mut String, cond: &Expr, then: &[Stmt], otherwise: &[Stmt], depth: usize) {
    let pad = INDENT.repeat(depth);
    out.push_str(&format!("if ({}) {{\n", cond));
    render_block(out, then, depth + 1);
    match otherwise {
        [] => out.push_str(&format!("{}}}\n", pad)),
        [Stmt::If {
            cond,
            then,
            otherwise,
        }] => {
            out.push_str(&format!("{}}} else ", pad));
            render_if(out, cond, then, otherwise, depth);
        }
        _ => {
            out.push_str(&format!("{}}} else {{\n", pad));
            render_block(out, otherwise, depth + 1);
            out.push_str(&format!("{}}}\n", pad));
        }
    }
}
