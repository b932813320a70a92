use crate::frontend::lexer::{Span, Spanned};
use crate::frontend::parser_error::ParserError;
use crate::frontend::token::{Keyword, Operator, Separator, Token};
use crate::lang::ast::{
    Access, CodeRoot, Declaration, Declarator, Expr, FunctionDef, FunctionSig, ParamDecl, Stmt,
    SwitchArm, SwitchLabel, TopLevel,
};
use crate::lang::catalog::{Catalog, ConstValue, Param, Routine};
use crate::lang::operators::{BinaryOp, UnaryOp};
use crate::lang::types::{StructDef, StructMember, Type};

/// Binary operator levels, loosest first. Each level is parsed by
/// [`Parser::parse_binary`] and delegates to the next for its operands.
const BINARY_LEVELS: [&[(Operator, BinaryOp)]; 10] = [
    &[(Operator::OrOr, BinaryOp::LogicalOr)],
    &[(Operator::AndAnd, BinaryOp::LogicalAnd)],
    &[(Operator::Pipe, BinaryOp::BitOr)],
    &[(Operator::Caret, BinaryOp::BitXor)],
    &[(Operator::Amp, BinaryOp::BitAnd)],
    &[(Operator::EqEq, BinaryOp::Eq), (Operator::NotEq, BinaryOp::Ne)],
    &[
        (Operator::Lt, BinaryOp::Lt),
        (Operator::Gt, BinaryOp::Gt),
        (Operator::LtEq, BinaryOp::Le),
        (Operator::GtEq, BinaryOp::Ge),
    ],
    &[
        (Operator::Shl, BinaryOp::Shl),
        (Operator::Shr, BinaryOp::Shr),
        (Operator::UShr, BinaryOp::UShr),
    ],
    &[(Operator::Plus, BinaryOp::Add), (Operator::Minus, BinaryOp::Sub)],
    &[
        (Operator::Star, BinaryOp::Mul),
        (Operator::Slash, BinaryOp::Div),
        (Operator::Percent, BinaryOp::Mod),
    ],
];

fn compound_op(op: Operator) -> Option<BinaryOp> {
    Some(match op {
        Operator::PlusAssign => BinaryOp::Add,
        Operator::MinusAssign => BinaryOp::Sub,
        Operator::StarAssign => BinaryOp::Mul,
        Operator::SlashAssign => BinaryOp::Div,
        Operator::PercentAssign => BinaryOp::Mod,
        Operator::AmpAssign => BinaryOp::BitAnd,
        Operator::PipeAssign => BinaryOp::BitOr,
        Operator::CaretAssign => BinaryOp::BitXor,
        Operator::ShlAssign => BinaryOp::Shl,
        Operator::ShrAssign => BinaryOp::Shr,
        Operator::UShrAssign => BinaryOp::UShr,
        _ => return None,
    })
}

/// Literal expression for a catalog constant.
pub fn constant_expr(value: &ConstValue) -> Expr {
    match value {
        ConstValue::Int(n) => Expr::Int(*n),
        ConstValue::Float(x) => Expr::Float(*x),
        ConstValue::String(s) => Expr::Str(s.clone()),
        ConstValue::Object(id) => Expr::Object(*id),
    }
}

fn parse_int_literal(text: &str) -> Option<i32> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok().map(|v| v as i32),
        None => text.parse().ok(),
    }
}

fn parse_float_literal(text: &str) -> Option<f32> {
    text.trim_end_matches(['f', 'F']).parse().ok()
}

/// Interprets a catalog parameter default. A constant name wins; otherwise the
/// text must be a literal of the parameter's type.
pub fn default_value(catalog: &Catalog, param: &Param, text: &str) -> Option<Expr> {
    let text = text.trim();
    if let Some(constant) = catalog.constant(text) {
        return Some(constant_expr(&constant.value));
    }
    match param.ty {
        Type::Int => parse_int_literal(text).map(Expr::Int),
        Type::Float => parse_float_literal(text).map(Expr::Float),
        Type::String => text
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .map(|s| Expr::Str(s.to_string())),
        Type::Object => match text {
            "OBJECT_SELF" => Some(Expr::Object(0)),
            "OBJECT_INVALID" => Some(Expr::Object(1)),
            _ => text.parse().ok().map(Expr::Object),
        },
        Type::Vector => {
            let inner = text.strip_prefix('[')?.strip_suffix(']')?;
            let parts = inner
                .split(',')
                .map(|p| parse_float_literal(p.trim()))
                .collect::<Option<Vec<f32>>>()?;
            match parts.as_slice() {
                [x, y, z] => Some(Expr::Vector(
                    Box::new(Expr::Float(*x)),
                    Box::new(Expr::Float(*y)),
                    Box::new(Expr::Float(*z)),
                )),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Target of an `#include "name"` line, or `None` for other directives.
fn include_target(line: &str) -> Option<Result<String, ()>> {
    let rest = line.trim_start_matches('#').trim_start();
    let rest = rest.strip_prefix("include")?;
    let name = rest
        .trim()
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .map(|s| s.to_string());
    Some(name.ok_or(()))
}

/// Recursive-descent parser for NWScript.
///
/// The parser consumes lexed `Spanned` tokens and produces a [`CodeRoot`].
/// Speculative rules (`try_*`) save the cursor, return `Ok(None)` after
/// restoring it when the construct does not match, and only report errors once
/// they have committed to a construct.
///
/// Calls whose name is a catalog routine become [`Expr::EngineCall`] with
/// omitted trailing arguments filled from the routine's defaults.
pub struct Parser<'a> {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Span of the most recently consumed token.
    last_span: Option<Span>,
    catalog: &'a Catalog,
}

impl<'a> Parser<'a> {
    /// Creates a parser from lexer output. Comments and newlines are dropped
    /// here; spans still come from the original tokens.
    pub fn new(tokens: Vec<Spanned>, catalog: &'a Catalog) -> Self {
        let tokens: Vec<Spanned> = tokens
            .into_iter()
            .filter(|t| !t.token.is_trivia())
            .collect();
        Parser {
            tokens,
            pos: 0,
            last_span: None,
            catalog,
        }
    }

    fn current(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Spanned> {
        let token = self.tokens.get(self.pos);
        if let Some(s) = token {
            self.last_span = Some(s.span.clone());
        }
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|s| &s.token)
    }

    fn rewind(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), None | Some(Token::Eof))
    }

    fn span(&self) -> Span {
        self.current()
            .map(|s| s.span.clone())
            .or_else(|| self.last_span.clone())
            .unwrap_or(Span { line: 1, col: 1 })
    }

    /// Constructs a `ParserError` at the current token, falling back to the
    /// last consumed token and then to 1:1 for empty input.
    fn error(&self, message: &str) -> ParserError {
        self.error_at(&self.span(), message)
    }

    fn error_at(&self, span: &Span, message: &str) -> ParserError {
        ParserError {
            message: message.to_string(),
            line: span.line,
            col: span.col,
        }
    }

    fn describe_current(&self) -> String {
        match self.peek() {
            Some(token) => format!("'{}'", token),
            None => "end of file".to_string(),
        }
    }

    fn check_sep(&self, sep: Separator) -> bool {
        self.peek() == Some(&Token::Separator(sep))
    }

    fn eat_sep(&mut self, sep: Separator) -> bool {
        if self.check_sep(sep) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_sep(&mut self, sep: Separator) -> Result<(), ParserError> {
        if self.eat_sep(sep) {
            Ok(())
        } else {
            Err(self.error(&format!(
                "expected '{}', found {}",
                sep.as_char(),
                self.describe_current()
            )))
        }
    }

    fn eat_op(&mut self, op: Operator) -> bool {
        if self.peek() == Some(&Token::Operator(op)) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: Operator) -> Result<(), ParserError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(&format!(
                "expected '{}', found {}",
                op.as_str(),
                self.describe_current()
            )))
        }
    }

    fn check_kw(&self, keyword: Keyword) -> bool {
        self.peek() == Some(&Token::Keyword(keyword))
    }

    fn eat_kw(&mut self, keyword: Keyword) -> bool {
        if self.check_kw(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ParserError> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(&format!(
                "expected {}, found {}",
                what,
                self.describe_current()
            ))),
        }
    }

    // =========================================================================
    // Top level
    // =========================================================================

    /// Parses a complete compilation unit.
    ///
    /// Each top-level object is tried in a fixed order: include, struct
    /// definition, function prototype or definition, global declaration.
    pub fn parse(&mut self) -> Result<CodeRoot, ParserError> {
        let mut objects = Vec::new();

        while !self.at_eof() {
            if self.eat_sep(Separator::Semicolon) {
                continue;
            }
            if let Some(include) = self.try_include()? {
                if let Some(name) = include {
                    objects.push(TopLevel::Include(name));
                }
                continue;
            }
            if let Some(def) = self.try_struct_def()? {
                objects.push(TopLevel::Struct(def));
                continue;
            }
            if let Some(function) = self.try_function()? {
                objects.push(function);
                continue;
            }
            if let Some(global) = self.try_global()? {
                objects.push(TopLevel::Global(global));
                continue;
            }
            return Err(self.error(&format!(
                "expected a declaration or function, found {}",
                self.describe_current()
            )));
        }

        tracing::debug!(objects = objects.len(), "parsed compilation unit");
        Ok(CodeRoot { objects })
    }

    /// ```text
    /// #include "name"
    /// include "name" ;
    /// ```
    ///
    /// Returns `Some(None)` for preprocessor lines that are not includes; they
    /// are consumed and ignored.
    fn try_include(&mut self) -> Result<Option<Option<String>>, ParserError> {
        match self.peek().cloned() {
            Some(Token::Preprocessor(line)) => {
                let span = self.span();
                self.advance();
                match include_target(&line) {
                    Some(Ok(name)) => Ok(Some(Some(name))),
                    Some(Err(())) => Err(self.error_at(&span, "expected #include \"name\"")),
                    None => {
                        tracing::trace!(directive = %line, "ignoring preprocessor line");
                        Ok(Some(None))
                    }
                }
            }
            Some(Token::Keyword(Keyword::Include)) => {
                self.advance();
                let name = match self.peek().cloned() {
                    Some(Token::String(name)) => {
                        self.advance();
                        name
                    }
                    _ => return Err(self.error("expected a quoted include name")),
                };
                self.eat_sep(Separator::Semicolon);
                Ok(Some(Some(name)))
            }
            _ => Ok(None),
        }
    }

    /// ```text
    /// struct Name { type member [, member]* ; ... } ;
    /// ```
    fn try_struct_def(&mut self) -> Result<Option<StructDef>, ParserError> {
        let is_def = self.check_kw(Keyword::Struct)
            && matches!(self.peek_at(1), Some(Token::Ident(_)))
            && self.peek_at(2) == Some(&Token::Separator(Separator::LBrace));
        if !is_def {
            return Ok(None);
        }
        let start = self.span();
        self.advance(); // 'struct'
        let name = self.expect_ident("struct name")?;
        self.expect_sep(Separator::LBrace)?;

        let mut members = Vec::new();
        while !self.eat_sep(Separator::RBrace) {
            if self.at_eof() {
                return Err(self.error(&format!("unexpected end of file in struct {}", name)));
            }
            let ty = self.parse_type("member type")?;
            if matches!(ty, Type::Void | Type::Action) {
                return Err(self.error(&format!("struct member cannot have type {}", ty)));
            }
            loop {
                let member = self.expect_ident("member name")?;
                members.push(StructMember {
                    name: member,
                    ty: ty.clone(),
                });
                if !self.eat_sep(Separator::Comma) {
                    break;
                }
            }
            self.expect_sep(Separator::Semicolon)?;
        }
        self.expect_sep(Separator::Semicolon)?;

        if members.is_empty() {
            return Err(self.error_at(&start, &format!("struct {} has no members", name)));
        }
        Ok(Some(StructDef { name, members }))
    }

    fn try_type(&mut self) -> Result<Option<Type>, ParserError> {
        match self.peek().cloned() {
            Some(Token::Keyword(keyword)) if keyword.is_type() => {
                self.advance();
                Ok(Type::from_keyword(keyword.as_str()))
            }
            Some(Token::Keyword(Keyword::Struct)) => {
                self.advance();
                let name = self.expect_ident("struct name")?;
                Ok(Some(Type::Struct(name)))
            }
            _ => Ok(None),
        }
    }

    fn parse_type(&mut self, what: &str) -> Result<Type, ParserError> {
        match self.try_type()? {
            Some(ty) => Ok(ty),
            None => Err(self.error(&format!(
                "expected {}, found {}",
                what,
                self.describe_current()
            ))),
        }
    }

    /// ```text
    /// type name ( [type param [= const]]* ) ;
    /// type name ( [type param [= const]]* ) { body }
    /// ```
    ///
    /// Rolls back unless a type is followed by `name (`.
    fn try_function(&mut self) -> Result<Option<TopLevel>, ParserError> {
        let save = self.pos;
        let Some(returns) = self.try_type()? else {
            return Ok(None);
        };
        let is_function = matches!(self.peek(), Some(Token::Ident(_)))
            && self.peek_at(1) == Some(&Token::Separator(Separator::LParen));
        if !is_function {
            self.rewind(save);
            return Ok(None);
        }

        let name = self.expect_ident("function name")?;
        self.expect_sep(Separator::LParen)?;
        let mut params = Vec::new();
        if !self.eat_sep(Separator::RParen) {
            loop {
                self.eat_kw(Keyword::Const);
                let ty = self.parse_type("parameter type")?;
                if ty == Type::Void {
                    return Err(self.error("parameters cannot be void"));
                }
                let param = self.expect_ident("parameter name")?;
                let default = if self.eat_op(Operator::Assign) {
                    let value = self.parse_ternary()?;
                    Some(self.fold_constant(value))
                } else {
                    None
                };
                params.push(ParamDecl {
                    name: param,
                    ty,
                    default,
                });
                if !self.eat_sep(Separator::Comma) {
                    break;
                }
            }
            self.expect_sep(Separator::RParen)?;
        }

        let sig = FunctionSig {
            name,
            returns,
            params,
        };
        if self.eat_sep(Separator::Semicolon) {
            return Ok(Some(TopLevel::Prototype(sig)));
        }
        if !self.check_sep(Separator::LBrace) {
            return Err(self.error(&format!(
                "expected ';' or '{{' after signature of {}, found {}",
                sig.name,
                self.describe_current()
            )));
        }
        let body = self.parse_block()?;
        Ok(Some(TopLevel::Function(FunctionDef { sig, body })))
    }

    fn try_global(&mut self) -> Result<Option<Declaration>, ParserError> {
        if !self.starts_declaration() {
            return Ok(None);
        }
        Ok(Some(self.parse_declaration()?))
    }

    fn starts_declaration(&self) -> bool {
        match self.peek() {
            Some(Token::Keyword(Keyword::Const)) | Some(Token::Keyword(Keyword::Struct)) => true,
            Some(Token::Keyword(keyword)) => keyword.is_type(),
            _ => false,
        }
    }

    /// ```text
    /// [const] type name [= expr] [, name [= expr]]* ;
    /// ```
    fn parse_declaration(&mut self) -> Result<Declaration, ParserError> {
        let is_const = self.eat_kw(Keyword::Const);
        let ty = self.parse_type("a type")?;
        if matches!(ty, Type::Void | Type::Action) {
            return Err(self.error(&format!("variables cannot have type {}", ty)));
        }

        let mut vars = Vec::new();
        loop {
            let name = self.expect_ident("variable name")?;
            let init = if self.eat_op(Operator::Assign) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            vars.push(Declarator { name, init });
            if !self.eat_sep(Separator::Comma) {
                break;
            }
        }
        self.expect_sep(Separator::Semicolon)?;

        Ok(Declaration { ty, is_const, vars })
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// `{ stmt* }`
    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParserError> {
        self.expect_sep(Separator::LBrace)?;
        let mut body = Vec::new();
        while !self.eat_sep(Separator::RBrace) {
            if self.at_eof() {
                return Err(self.error("unexpected end of file, expected '}'"));
            }
            body.push(self.parse_statement()?);
        }
        Ok(body)
    }

    /// Body of a control statement: a block or a single statement.
    fn parse_body(&mut self) -> Result<Vec<Stmt>, ParserError> {
        match self.parse_statement()? {
            Stmt::Block(body) => Ok(body),
            stmt => Ok(vec![stmt]),
        }
    }

    fn parse_condition(&mut self) -> Result<Expr, ParserError> {
        self.expect_sep(Separator::LParen)?;
        let cond = self.parse_expr()?;
        self.expect_sep(Separator::RParen)?;
        Ok(cond)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParserError> {
        match self.peek().cloned() {
            Some(Token::Separator(Separator::LBrace)) => Ok(Stmt::Block(self.parse_block()?)),
            Some(Token::Separator(Separator::Semicolon)) => {
                self.advance();
                Ok(Stmt::Empty)
            }
            Some(Token::Keyword(Keyword::If)) => {
                self.advance();
                let cond = self.parse_condition()?;
                let then = self.parse_body()?;
                let otherwise = if self.eat_kw(Keyword::Else) {
                    Some(self.parse_body()?)
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then,
                    otherwise,
                })
            }
            Some(Token::Keyword(Keyword::While)) => {
                self.advance();
                let cond = self.parse_condition()?;
                let body = self.parse_body()?;
                Ok(Stmt::While { cond, body })
            }
            Some(Token::Keyword(Keyword::Do)) => {
                self.advance();
                let body = self.parse_body()?;
                if !self.eat_kw(Keyword::While) {
                    return Err(self.error("expected 'while' after do body"));
                }
                let cond = self.parse_condition()?;
                self.expect_sep(Separator::Semicolon)?;
                Ok(Stmt::DoWhile { body, cond })
            }
            Some(Token::Keyword(Keyword::For)) => self.parse_for(),
            Some(Token::Keyword(Keyword::Switch)) => self.parse_switch(),
            Some(Token::Keyword(Keyword::Break)) => {
                self.advance();
                self.expect_sep(Separator::Semicolon)?;
                Ok(Stmt::Break)
            }
            Some(Token::Keyword(Keyword::Continue)) => {
                self.advance();
                self.expect_sep(Separator::Semicolon)?;
                Ok(Stmt::Continue)
            }
            Some(Token::Keyword(Keyword::Return)) => {
                self.advance();
                if self.eat_sep(Separator::Semicolon) {
                    return Ok(Stmt::Return(None));
                }
                let value = self.parse_expr()?;
                self.expect_sep(Separator::Semicolon)?;
                Ok(Stmt::Return(Some(value)))
            }
            _ if self.starts_declaration() => Ok(Stmt::Decl(self.parse_declaration()?)),
            _ => {
                let expr = self.parse_expr()?;
                self.expect_sep(Separator::Semicolon)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// ```text
    /// for ( [init] ; [cond] ; [step] ) body
    /// ```
    fn parse_for(&mut self) -> Result<Stmt, ParserError> {
        self.advance(); // 'for'
        self.expect_sep(Separator::LParen)?;
        let init = if self.check_sep(Separator::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect_sep(Separator::Semicolon)?;
        let cond = if self.check_sep(Separator::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect_sep(Separator::Semicolon)?;
        let step = if self.check_sep(Separator::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect_sep(Separator::RParen)?;
        let body = self.parse_body()?;
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
        })
    }

    /// ```text
    /// switch ( expr ) { ( case const : | default : )+ stmt* ... }
    /// ```
    fn parse_switch(&mut self) -> Result<Stmt, ParserError> {
        self.advance(); // 'switch'
        let value = self.parse_condition()?;
        self.expect_sep(Separator::LBrace)?;

        let mut arms = Vec::new();
        while !self.eat_sep(Separator::RBrace) {
            if self.at_eof() {
                return Err(self.error("unexpected end of file in switch"));
            }
            let mut labels = Vec::new();
            loop {
                if self.eat_kw(Keyword::Case) {
                    let span = self.span();
                    let label = self.parse_unary()?;
                    let label = self.fold_constant(label);
                    if !matches!(label, Expr::Int(_) | Expr::Str(_)) {
                        return Err(
                            self.error_at(&span, "case label must be an int or string constant")
                        );
                    }
                    self.expect_op(Operator::Colon)?;
                    labels.push(SwitchLabel::Case(label));
                } else if self.eat_kw(Keyword::Default) {
                    self.expect_op(Operator::Colon)?;
                    labels.push(SwitchLabel::Default);
                } else {
                    break;
                }
            }
            if labels.is_empty() {
                return Err(self.error(&format!(
                    "expected 'case' or 'default', found {}",
                    self.describe_current()
                )));
            }

            let mut body = Vec::new();
            while !self.check_kw(Keyword::Case)
                && !self.check_kw(Keyword::Default)
                && !self.check_sep(Separator::RBrace)
            {
                if self.at_eof() {
                    return Err(self.error("unexpected end of file in switch"));
                }
                body.push(self.parse_statement()?);
            }
            arms.push(SwitchArm { labels, body });
        }

        Ok(Stmt::Switch { value, arms })
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    pub fn parse_expr(&mut self) -> Result<Expr, ParserError> {
        self.parse_assignment()
    }

    /// Right-associative `access op= expr`. Falls back to a ternary when the
    /// left side is not a variable followed by an assignment operator.
    fn parse_assignment(&mut self) -> Result<Expr, ParserError> {
        let save = self.pos;
        if let Some(target) = self.try_access()? {
            if let Some(Token::Operator(op)) = self.peek().cloned() {
                if op == Operator::Assign {
                    self.advance();
                    let value = self.parse_assignment()?;
                    return Ok(Expr::Assign {
                        target,
                        value: Box::new(value),
                    });
                }
                if let Some(binary) = compound_op(op) {
                    self.advance();
                    let value = self.parse_assignment()?;
                    return Ok(Expr::CompoundAssign {
                        op: binary,
                        target,
                        value: Box::new(value),
                    });
                }
            }
        }
        self.rewind(save);
        self.parse_ternary()
    }

    /// `name [. member]*`, not followed by `(`.
    fn try_access(&mut self) -> Result<Option<Access>, ParserError> {
        let name = match self.peek() {
            Some(Token::Ident(name))
                if self.peek_at(1) != Some(&Token::Separator(Separator::LParen)) =>
            {
                name.clone()
            }
            _ => return Ok(None),
        };
        self.advance();
        let mut fields = Vec::new();
        while self.eat_sep(Separator::Dot) {
            fields.push(self.expect_ident("member name")?);
        }
        Ok(Some(Access { name, fields }))
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParserError> {
        let cond = self.parse_binary(0)?;
        if !self.eat_op(Operator::Question) {
            return Ok(cond);
        }
        let then = self.parse_expr()?;
        self.expect_op(Operator::Colon)?;
        let otherwise = self.parse_ternary()?;
        Ok(Expr::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    /// One left-associative level of the binary operator cascade.
    fn parse_binary(&mut self, level: usize) -> Result<Expr, ParserError> {
        let Some(operators) = BINARY_LEVELS.get(level) else {
            return self.parse_unary();
        };
        let mut lhs = self.parse_binary(level + 1)?;
        loop {
            let Some(Token::Operator(op)) = self.peek().cloned() else {
                break;
            };
            let Some(binary) = operators
                .iter()
                .find(|(candidate, _)| *candidate == op)
                .map(|(_, binary)| *binary)
            else {
                break;
            };
            self.advance();
            let rhs = self.parse_binary(level + 1)?;
            lhs = Expr::binary(binary, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParserError> {
        let op = match self.peek() {
            Some(Token::Operator(op)) => *op,
            _ => return self.parse_postfix(),
        };
        let unary = match op {
            Operator::Minus => UnaryOp::Neg,
            Operator::Not => UnaryOp::Not,
            Operator::Tilde => UnaryOp::BitNot,
            Operator::PlusPlus | Operator::MinusMinus => {
                self.advance();
                let Some(target) = self.try_access()? else {
                    return Err(self.error(&format!(
                        "expected a variable after '{}'",
                        op.as_str()
                    )));
                };
                return Ok(Expr::IncDec {
                    target,
                    increment: op == Operator::PlusPlus,
                    prefix: true,
                });
            }
            _ => return self.parse_postfix(),
        };
        self.advance();

        // Negative literals are folded so they stay constants.
        if unary == UnaryOp::Neg {
            match self.peek().cloned() {
                Some(Token::Int(n)) => {
                    let value = self.int_literal(-n)?;
                    self.advance();
                    return Ok(Expr::Int(value));
                }
                Some(Token::Float(x)) => {
                    self.advance();
                    return Ok(Expr::Float(-x));
                }
                _ => {}
            }
        }

        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            op: unary,
            operand: Box::new(operand),
        })
    }

    fn int_literal(&self, value: i64) -> Result<i32, ParserError> {
        i32::try_from(value).map_err(|_| self.error(&format!("integer literal {} is out of range", value)))
    }

    /// `name++`, `name--`, or a `.member` chain after any other primary.
    fn parse_postfix(&mut self) -> Result<Expr, ParserError> {
        let expr = self.parse_primary()?;
        if let Expr::Name(target) = &expr {
            for (op, increment) in [(Operator::PlusPlus, true), (Operator::MinusMinus, false)] {
                if self.eat_op(op) {
                    return Ok(Expr::IncDec {
                        target: target.clone(),
                        increment,
                        prefix: false,
                    });
                }
            }
            return Ok(expr);
        }
        let mut fields = Vec::new();
        while self.eat_sep(Separator::Dot) {
            fields.push(self.expect_ident("member name")?);
        }
        if fields.is_empty() {
            return Ok(expr);
        }
        Ok(Expr::Member {
            base: Box::new(expr),
            fields,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ParserError> {
        match self.peek().cloned() {
            Some(Token::Int(n)) => {
                let value = self.int_literal(n)?;
                self.advance();
                Ok(Expr::Int(value))
            }
            Some(Token::Float(x)) => {
                self.advance();
                Ok(Expr::Float(x))
            }
            Some(Token::String(s)) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            Some(Token::Keyword(Keyword::ObjectSelf)) => {
                self.advance();
                Ok(Expr::Object(0))
            }
            Some(Token::Keyword(Keyword::ObjectInvalid)) => {
                self.advance();
                Ok(Expr::Object(1))
            }
            Some(Token::Separator(Separator::LParen)) => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect_sep(Separator::RParen)?;
                Ok(expr)
            }
            Some(Token::Separator(Separator::LBracket)) => {
                self.advance();
                let x = self.parse_expr()?;
                self.expect_sep(Separator::Comma)?;
                let y = self.parse_expr()?;
                self.expect_sep(Separator::Comma)?;
                let z = self.parse_expr()?;
                self.expect_sep(Separator::RBracket)?;
                Ok(Expr::Vector(Box::new(x), Box::new(y), Box::new(z)))
            }
            Some(Token::Ident(name)) => {
                if self.peek_at(1) == Some(&Token::Separator(Separator::LParen)) {
                    return self.parse_call(name);
                }
                match self.try_access()? {
                    Some(access) => Ok(Expr::Name(access)),
                    None => Err(self.error(&format!("unexpected identifier '{}'", name))),
                }
            }
            _ => Err(self.error(&format!(
                "expected an expression, found {}",
                self.describe_current()
            ))),
        }
    }

    /// ```text
    /// name ( [expr [, expr]*] )
    /// ```
    fn parse_call(&mut self, name: String) -> Result<Expr, ParserError> {
        let span = self.span();
        self.advance(); // name
        self.expect_sep(Separator::LParen)?;
        let mut args = Vec::new();
        if !self.eat_sep(Separator::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat_sep(Separator::Comma) {
                    break;
                }
            }
            self.expect_sep(Separator::RParen)?;
        }

        let catalog = self.catalog;
        match catalog.routine(&name) {
            Some(routine) => self.engine_call(routine, args, &span),
            None => Ok(Expr::Call { name, args }),
        }
    }

    fn engine_call(
        &self,
        routine: &Routine,
        mut args: Vec<Expr>,
        span: &Span,
    ) -> Result<Expr, ParserError> {
        if args.len() > routine.params.len() {
            return Err(self.error_at(
                span,
                &format!(
                    "too many arguments to {}: expected at most {}, got {}",
                    routine.name,
                    routine.params.len(),
                    args.len()
                ),
            ));
        }
        for param in &routine.params[args.len()..] {
            let Some(text) = &param.default else {
                return Err(self.error_at(
                    span,
                    &format!(
                        "missing required argument '{}' to {}",
                        param.name, routine.name
                    ),
                ));
            };
            let Some(value) = default_value(self.catalog, param, text) else {
                return Err(self.error_at(
                    span,
                    &format!(
                        "cannot use default '{}' for parameter '{}' of {}",
                        text, param.name, routine.name
                    ),
                ));
            };
            args.push(value);
        }
        Ok(Expr::EngineCall {
            routine: routine.index,
            name: routine.name.clone(),
            args,
        })
    }

    /// Replaces a bare catalog constant name by its literal.
    fn fold_constant(&self, expr: Expr) -> Expr {
        match &expr {
            Expr::Name(access) if access.fields.is_empty() => {
                match self.catalog.constant(&access.name) {
                    Some(constant) => constant_expr(&constant.value),
                    None => expr,
                }
            }
            _ => expr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;

    fn parse(source: &str) -> Result<CodeRoot, ParserError> {
        let catalog = Catalog::builtin();
        let tokens = Lexer::new(source).tokenize().unwrap();
        Parser::new(tokens, &catalog).parse()
    }

    fn parse_expr(source: &str) -> Expr {
        let catalog = Catalog::builtin();
        let tokens = Lexer::new(source).tokenize().unwrap();
        Parser::new(tokens, &catalog).parse_expr().unwrap()
    }

    fn main_body(source: &str) -> Vec<Stmt> {
        let root = parse(&format!("void main() {{ {} }}", source)).unwrap();
        match root.objects.into_iter().next() {
            Some(TopLevel::Function(def)) => def.body,
            other => panic!("expected a function, got {:?}", other),
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    #[test]
    fn test_precedence() {
        let expr = parse_expr("1 + 2 * 3");
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Add,
                Expr::Int(1),
                Expr::binary(BinaryOp::Mul, Expr::Int(2), Expr::Int(3))
            )
        );
    }

    #[test]
    fn test_left_associativity() {
        let expr = parse_expr("8 - 4 - 2");
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Sub,
                Expr::binary(BinaryOp::Sub, Expr::Int(8), Expr::Int(4)),
                Expr::Int(2)
            )
        );
    }

    #[test]
    fn test_bitwise_and_logical_levels() {
        let expr = parse_expr("a & b && c | d");
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::LogicalAnd,
                Expr::binary(BinaryOp::BitAnd, Expr::name("a"), Expr::name("b")),
                Expr::binary(BinaryOp::BitOr, Expr::name("c"), Expr::name("d"))
            )
        );
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let expr = parse_expr("a = b = 3");
        assert_eq!(
            expr,
            Expr::Assign {
                target: Access::var("a"),
                value: Box::new(Expr::Assign {
                    target: Access::var("b"),
                    value: Box::new(Expr::Int(3)),
                }),
            }
        );
    }

    #[test]
    fn test_compound_assignment_stays_compound() {
        let expr = parse_expr("n >>>= 2");
        assert_eq!(
            expr,
            Expr::CompoundAssign {
                op: BinaryOp::UShr,
                target: Access::var("n"),
                value: Box::new(Expr::Int(2)),
            }
        );
    }

    #[test]
    fn test_comparison_is_not_assignment() {
        let expr = parse_expr("a == 1");
        assert_eq!(
            expr,
            Expr::binary(BinaryOp::Eq, Expr::name("a"), Expr::Int(1))
        );
    }

    #[test]
    fn test_ternary() {
        let expr = parse_expr("c ? 1 : 2");
        assert!(matches!(expr, Expr::Ternary { .. }));
    }

    #[test]
    fn test_inc_dec_forms() {
        assert_eq!(
            parse_expr("++i"),
            Expr::IncDec {
                target: Access::var("i"),
                increment: true,
                prefix: true
            }
        );
        assert_eq!(
            parse_expr("i--"),
            Expr::IncDec {
                target: Access::var("i"),
                increment: false,
                prefix: false
            }
        );
    }

    #[test]
    fn test_negative_literal_is_folded() {
        assert_eq!(parse_expr("-5"), Expr::Int(-5));
        assert!(matches!(
            parse_expr("-x"),
            Expr::Unary {
                op: UnaryOp::Neg,
                ..
            }
        ));
    }

    #[test]
    fn test_most_negative_int_literal() {
        assert_eq!(parse_expr("-2147483648"), Expr::Int(i32::MIN));
        let err = parse("void main() { int n = 2147483648; }").unwrap_err();
        assert!(err.message.contains("out of range"), "{}", err);
    }

    #[test]
    fn test_member_access_and_vector_literal() {
        assert_eq!(
            parse_expr("v.x"),
            Expr::Name(Access {
                name: "v".to_string(),
                fields: vec!["x".to_string()],
            })
        );
        assert!(matches!(parse_expr("[1.0, 2.0, 3.0]"), Expr::Vector(..)));
    }

    #[test]
    fn test_member_after_call_and_parens() {
        match parse_expr("GetPosition(OBJECT_SELF).x") {
            Expr::Member { base, fields } => {
                assert!(matches!(*base, Expr::EngineCall { ref name, .. } if name == "GetPosition"));
                assert_eq!(fields, vec!["x".to_string()]);
            }
            other => panic!("expected a member read, got {:?}", other),
        }
        match parse_expr("F().inner.a") {
            Expr::Member { base, fields } => {
                assert!(matches!(*base, Expr::Call { .. }));
                assert_eq!(fields, vec!["inner".to_string(), "a".to_string()]);
            }
            other => panic!("expected a member read, got {:?}", other),
        }
        assert!(matches!(parse_expr("(v).z"), Expr::Member { .. }));
        // a plain name keeps its access path
        assert!(matches!(parse_expr("v.z"), Expr::Name(_)));
    }

    #[test]
    fn test_object_keywords() {
        assert_eq!(parse_expr("OBJECT_SELF"), Expr::Object(0));
        assert_eq!(parse_expr("OBJECT_INVALID"), Expr::Object(1));
    }

    // =========================================================================
    // Calls
    // =========================================================================

    #[test]
    fn test_user_call() {
        assert_eq!(
            parse_expr("Foo(1, 2)"),
            Expr::Call {
                name: "Foo".to_string(),
                args: vec![Expr::Int(1), Expr::Int(2)],
            }
        );
    }

    #[test]
    fn test_engine_call_fills_defaults() {
        let expr = parse_expr("PrintFloat(1.5)");
        assert_eq!(
            expr,
            Expr::EngineCall {
                routine: 2,
                name: "PrintFloat".to_string(),
                args: vec![Expr::Float(1.5), Expr::Int(18), Expr::Int(9)],
            }
        );
    }

    #[test]
    fn test_engine_default_object_keyword() {
        let expr = parse_expr("GetLocation()");
        assert!(matches!(
            expr,
            Expr::EngineCall { ref args, .. } if args == &vec![Expr::Object(0)]
        ));
    }

    #[test]
    fn test_engine_call_too_many_arguments() {
        let err = parse("void main() { PrintString(\"a\", 1); }").unwrap_err();
        assert!(err.message.contains("too many arguments"));
    }

    #[test]
    fn test_engine_call_missing_required_argument() {
        let err = parse("void main() { PrintString(); }").unwrap_err();
        assert!(err.message.contains("missing required argument 'sString'"));
    }

    // =========================================================================
    // Statements and top level
    // =========================================================================

    #[test]
    fn test_if_else_chain() {
        let body = main_body("if (a) b = 1; else if (c) b = 2; else { b = 3; }");
        let Stmt::If {
            otherwise: Some(otherwise),
            ..
        } = &body[0]
        else {
            panic!("expected if/else");
        };
        assert!(matches!(otherwise[0], Stmt::If { .. }));
    }

    #[test]
    fn test_loops() {
        let body = main_body(
            "while (i < 3) i++; do { i--; } while (i); for (i = 0; i < 3; i++) { } for (;;) break;",
        );
        assert!(matches!(body[0], Stmt::While { .. }));
        assert!(matches!(body[1], Stmt::DoWhile { .. }));
        assert!(matches!(body[2], Stmt::For { init: Some(_), .. }));
        assert!(matches!(
            body[3],
            Stmt::For {
                init: None,
                cond: None,
                step: None,
                ..
            }
        ));
    }

    #[test]
    fn test_switch_arms() {
        let body = main_body(
            "switch (n) { case 1: case 2: a = 1; break; case TRUE: default: a = 2; }",
        );
        let Stmt::Switch { arms, .. } = &body[0] else {
            panic!("expected switch");
        };
        assert_eq!(arms.len(), 2);
        assert_eq!(arms[0].labels.len(), 2);
        assert_eq!(arms[0].body.len(), 2);
        assert_eq!(
            arms[1].labels,
            vec![SwitchLabel::Case(Expr::Int(1)), SwitchLabel::Default]
        );
    }

    #[test]
    fn test_case_label_must_be_constant() {
        let err = parse("void main() { switch (n) { case x: break; } }").unwrap_err();
        assert!(err.message.contains("case label"));
    }

    #[test]
    fn test_declarations() {
        let body = main_body("const int a = 1, b; struct Pair p;");
        assert_eq!(
            body[0],
            Stmt::Decl(Declaration {
                ty: Type::Int,
                is_const: true,
                vars: vec![
                    Declarator {
                        name: "a".to_string(),
                        init: Some(Expr::Int(1)),
                    },
                    Declarator {
                        name: "b".to_string(),
                        init: None,
                    },
                ],
            })
        );
        assert!(matches!(
            &body[1],
            Stmt::Decl(Declaration { ty: Type::Struct(name), .. }) if name == "Pair"
        ));
    }

    #[test]
    fn test_top_level_forms() {
        let root = parse(
            r#"
            #include "inc_util"
            #define IGNORED 1
            struct Pair { int a, b; string s; };
            int Add(int a, int b = TRUE);
            int nGlobal = 3;
            struct Pair MakePair() { struct Pair p; return p; }
            int Add(int a, int b) { return a + b; }
            void main() { }
            "#,
        )
        .unwrap();

        assert_eq!(root.objects.len(), 7);
        assert_eq!(root.objects[0], TopLevel::Include("inc_util".to_string()));
        let TopLevel::Struct(def) = &root.objects[1] else {
            panic!("expected struct");
        };
        assert_eq!(def.members.len(), 3);
        let TopLevel::Prototype(sig) = &root.objects[2] else {
            panic!("expected prototype");
        };
        assert_eq!(sig.params[1].default, Some(Expr::Int(1)));
        assert!(matches!(root.objects[3], TopLevel::Global(_)));
        assert!(matches!(
            &root.objects[4],
            TopLevel::Function(f) if f.sig.returns == Type::Struct("Pair".to_string())
        ));
    }

    #[test]
    fn test_empty_struct_is_rejected() {
        let err = parse("struct Empty { };").unwrap_err();
        assert!(err.message.contains("no members"));
    }

    #[test]
    fn test_void_variable_is_rejected() {
        let err = parse("void x;").unwrap_err();
        assert!(err.message.contains("void"));
    }

    #[test]
    fn test_error_location() {
        let err = parse("void main() {\n  int x = ;\n}").unwrap_err();
        assert_eq!((err.line, err.col), (2, 11));
        assert!(err.message.contains("expected an expression"));
    }

    #[test]
    fn test_missing_brace_at_eof() {
        let err = parse("void main() { int x;").unwrap_err();
        assert!(err.message.contains("expected '}'"));
    }
}
