//! Statement and program-level code generation.
//!
//! Program layout:
//!
//! ```text
//! [RSADDI]            ; only for int StartingConditional()
//! JSR  entry | JSR G  ; JSR G when there are globals
//! RETN
//! G:  <globals> SAVEBP [RSADDI] JSR entry [CPDOWNSP MOVSP] RESTOREBP MOVSP RETN
//! <functions in source order>
//! ```
//!
//! A library (no entry point) has no stub, only its functions.

use tracing::debug;

use crate::bytecode::compile::{CodeGen, CurrentFunction, FunctionInfo, JumpTarget};
use crate::bytecode::compile_error::CompileError;
use crate::bytecode::ir::{InstrId, Instruction, Program};
use crate::bytecode::op::{Opcode, Qualifier};
use crate::bytecode::scope::Frame;
use crate::lang::ast::{
    CodeRoot, Declaration, Expr, FunctionDef, FunctionSig, Stmt, SwitchArm, SwitchLabel, TopLevel,
};
use crate::lang::catalog::Catalog;
use crate::lang::types::{Type, WORD};

#[derive(Debug, Clone, Copy, PartialEq)]
enum EntryKind {
    Main,
    Conditional,
}

/// Compiles a parsed unit (with includes already spliced in) into a program.
///
/// When `entry_point_required` is false a unit without `main` or
/// `StartingConditional` compiles as a library.
pub fn compile_root(
    root: &CodeRoot,
    catalog: &Catalog,
    entry_point_required: bool,
) -> Result<Program, CompileError> {
    let mut codegen = CodeGen::new(catalog);
    codegen.compile_unit(root, entry_point_required)?;
    let mut program = codegen.into_program();
    let labels = program.remove_nops();
    debug!(labels, instructions = program.len(), "dropped label placeholders");
    Ok(program)
}

/// Type of a literal default value or case label.
fn literal_type(expr: &Expr) -> Option<Type> {
    match expr {
        Expr::Int(_) => Some(Type::Int),
        Expr::Float(_) => Some(Type::Float),
        Expr::Str(_) => Some(Type::String),
        Expr::Object(_) => Some(Type::Object),
        Expr::Vector(..) => Some(Type::Vector),
        Expr::Unary { operand, .. } => literal_type(operand),
        _ => None,
    }
}

impl<'a> CodeGen<'a> {
    pub fn compile_unit(
        &mut self,
        root: &CodeRoot,
        entry_point_required: bool,
    ) -> Result<(), CompileError> {
        self.register_structs(root)?;
        self.register_functions(root)?;

        let globals: Vec<&Declaration> = root
            .objects
            .iter()
            .filter_map(|o| match o {
                TopLevel::Global(decl) => Some(decl),
                _ => None,
            })
            .collect();

        match self.entry_point(entry_point_required)? {
            Some(kind) => self.compile_stub(kind, &globals)?,
            None => self.declare_library_globals(&globals)?,
        }

        for object in &root.objects {
            if let TopLevel::Function(def) = object {
                self.compile_function(def)?;
            }
        }

        for name in &self.called {
            let defined = self.functions.get(name).map(|f| f.defined).unwrap_or(false);
            if !defined {
                return Err(CompileError::UndefinedFunction {
                    name: name.clone(),
                    hint: Some(format!("'{}' is declared but never defined", name)),
                });
            }
        }

        debug!(
            instructions = self.program.len(),
            functions = self.functions.len(),
            globals = self.globals.size(),
            "compiled unit"
        );
        Ok(())
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    fn register_structs(&mut self, root: &CodeRoot) -> Result<(), CompileError> {
        for object in &root.objects {
            let TopLevel::Struct(def) = object else {
                continue;
            };
            if self.structs.contains_key(&def.name) {
                return Err(CompileError::Redefinition {
                    what: "struct",
                    name: def.name.clone(),
                });
            }
            for (i, member) in def.members.iter().enumerate() {
                self.check_type_known(&member.ty)?;
                if matches!(member.ty, Type::Void | Type::Action) {
                    return Err(CompileError::invalid(format!(
                        "struct member '{}' cannot have type {}",
                        member.name, member.ty
                    )));
                }
                if def.members[..i].iter().any(|m| m.name == member.name) {
                    return Err(CompileError::Redefinition {
                        what: "struct member",
                        name: member.name.clone(),
                    });
                }
            }
            self.structs.insert(def.name.clone(), def.clone());
        }
        Ok(())
    }

    fn check_signature(&self, sig: &FunctionSig) -> Result<(), CompileError> {
        self.check_type_known(&sig.returns)?;
        if sig.returns == Type::Action {
            return Err(CompileError::invalid(format!(
                "function '{}' cannot return action",
                sig.name
            )));
        }
        let mut seen_default = false;
        for (i, param) in sig.params.iter().enumerate() {
            self.check_type_known(&param.ty)?;
            if matches!(param.ty, Type::Void | Type::Action) {
                return Err(CompileError::invalid(format!(
                    "parameter '{}' of '{}' cannot have type {}",
                    param.name, sig.name, param.ty
                )));
            }
            if sig.params[..i].iter().any(|p| p.name == param.name) {
                return Err(CompileError::Redefinition {
                    what: "parameter",
                    name: param.name.clone(),
                });
            }
            match &param.default {
                Some(value) => {
                    seen_default = true;
                    if !value.is_constant() {
                        return Err(CompileError::invalid_with_hint(
                            format!("default for '{}' must be a constant", param.name),
                            "use a literal or a named constant",
                        ));
                    }
                    if let Some(found) = literal_type(value) {
                        if found != param.ty {
                            return Err(CompileError::mismatch(
                                format!("default of '{}'", param.name),
                                &param.ty,
                                &found,
                            ));
                        }
                    }
                }
                None if seen_default => {
                    return Err(CompileError::invalid(format!(
                        "parameter '{}' of '{}' needs a default: it follows a parameter with one",
                        param.name, sig.name
                    )));
                }
                None => {}
            }
        }
        Ok(())
    }

    fn register_functions(&mut self, root: &CodeRoot) -> Result<(), CompileError> {
        for object in &root.objects {
            let (sig, is_definition) = match object {
                TopLevel::Prototype(sig) => (sig, false),
                TopLevel::Function(def) => (&def.sig, true),
                _ => continue,
            };
            self.check_signature(sig)?;
            if self.catalog.routine(&sig.name).is_some() {
                return Err(CompileError::Redefinition {
                    what: "engine routine",
                    name: sig.name.clone(),
                });
            }

            if !self.functions.contains_key(&sig.name) {
                let entry = self.label();
                let retn = self.program.alloc(Instruction::retn());
                self.functions.insert(
                    sig.name.clone(),
                    FunctionInfo {
                        sig: sig.clone(),
                        entry,
                        retn,
                        defined: is_definition,
                        prototyped: !is_definition,
                    },
                );
                continue;
            }
            let Some(info) = self.functions.get_mut(&sig.name) else {
                continue;
            };

            if !info.sig.same_shape(sig) {
                return Err(CompileError::invalid_with_hint(
                    format!("'{}' does not match its earlier declaration", sig.name),
                    format!(
                        "return and parameter types must agree with {}",
                        describe_sig(&info.sig)
                    ),
                ));
            }
            if is_definition {
                if info.defined {
                    return Err(CompileError::Redefinition {
                        what: "function",
                        name: sig.name.clone(),
                    });
                }
                info.defined = true;
                if sig.params.iter().any(|p| p.default.is_some()) {
                    info.sig = sig.clone();
                } else {
                    let defaults: Vec<_> = info.sig.params.iter().map(|p| p.default.clone()).collect();
                    info.sig = sig.clone();
                    for (param, default) in info.sig.params.iter_mut().zip(defaults) {
                        param.default = default;
                    }
                }
            } else {
                if info.prototyped {
                    return Err(CompileError::Redefinition {
                        what: "prototype",
                        name: sig.name.clone(),
                    });
                }
                info.prototyped = true;
            }
        }
        Ok(())
    }

    fn entry_point(&self, required: bool) -> Result<Option<EntryKind>, CompileError> {
        let defined = |name: &str| self.functions.get(name).filter(|f| f.defined);
        match (defined("main"), defined("StartingConditional")) {
            (Some(_), Some(_)) => Err(CompileError::EntryPoint {
                message: "both main and StartingConditional are defined".to_string(),
            }),
            (Some(main), None) => {
                if main.sig.returns != Type::Void || !main.sig.params.is_empty() {
                    return Err(CompileError::EntryPoint {
                        message: format!("main must be `void main()`, found {}", describe_sig(&main.sig)),
                    });
                }
                Ok(Some(EntryKind::Main))
            }
            (None, Some(cond)) => {
                if cond.sig.returns != Type::Int || !cond.sig.params.is_empty() {
                    return Err(CompileError::EntryPoint {
                        message: format!(
                            "StartingConditional must be `int StartingConditional()`, found {}",
                            describe_sig(&cond.sig)
                        ),
                    });
                }
                Ok(Some(EntryKind::Conditional))
            }
            (None, None) if required => Err(CompileError::EntryPoint {
                message: "no entry point".to_string(),
            }),
            (None, None) => Ok(None),
        }
    }

    fn compile_stub(&mut self, kind: EntryKind, globals: &[&Declaration]) -> Result<(), CompileError> {
        let entry_name = match kind {
            EntryKind::Main => "main",
            EntryKind::Conditional => "StartingConditional",
        };
        let Some(entry) = self.functions.get(entry_name).map(|f| f.entry) else {
            return Err(CompileError::EntryPoint {
                message: format!("{} is not registered", entry_name),
            });
        };
        let conditional = kind == EntryKind::Conditional;

        if globals.is_empty() {
            if conditional {
                self.emit(Instruction::new(Opcode::RsAdd, Qualifier::Int));
            }
            self.emit(Instruction::jump_to(Opcode::Jsr, entry));
            self.emit(Instruction::retn());
            return Ok(());
        }

        let global_block = self.label();
        if conditional {
            self.emit(Instruction::new(Opcode::RsAdd, Qualifier::Int));
        }
        self.emit(Instruction::jump_to(Opcode::Jsr, global_block));
        self.emit(Instruction::retn());

        self.place(global_block);
        self.frame = Frame::new();
        for decl in globals {
            self.compile_declaration(decl, true)?;
        }
        let size = self.globals.size();

        self.emit(Instruction::new(Opcode::SaveBp, Qualifier::None));
        if conditional {
            self.emit(Instruction::new(Opcode::RsAdd, Qualifier::Int));
        }
        self.emit(Instruction::jump_to(Opcode::Jsr, entry));
        if conditional {
            // result slot, globals, saved BP, result of the entry call
            self.emit(Instruction::copy(Opcode::CpDownSp, -(size + 3 * WORD), WORD));
            self.emit(Instruction::movsp(-WORD));
        }
        self.emit(Instruction::new(Opcode::RestoreBp, Qualifier::None));
        self.emit(Instruction::movsp(-size));
        self.emit(Instruction::retn());
        Ok(())
    }

    /// Libraries have no stub to initialise globals; they are only made
    /// visible to the functions that follow.
    fn declare_library_globals(&mut self, globals: &[&Declaration]) -> Result<(), CompileError> {
        for decl in globals {
            self.check_type_known(&decl.ty)?;
            let size = self.size_of(&decl.ty);
            for var in &decl.vars {
                if !self.globals.declare(&var.name, decl.ty.clone(), size, decl.is_const) {
                    return Err(CompileError::Redefinition {
                        what: "global",
                        name: var.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// `[const] type a [= init], ...;` in the innermost block. Globals are
    /// declared in the stub's frame and in the global scope at once.
    pub(crate) fn compile_declaration(
        &mut self,
        decl: &Declaration,
        global: bool,
    ) -> Result<(), CompileError> {
        if matches!(decl.ty, Type::Void | Type::Action) {
            return Err(CompileError::invalid(format!(
                "variables cannot have type {}",
                decl.ty
            )));
        }
        let size = self.size_of(&decl.ty);
        for var in &decl.vars {
            if decl.is_const && var.init.is_none() {
                return Err(CompileError::invalid_with_hint(
                    format!("const '{}' must be initialized", var.name),
                    format!("write `const {} {} = ...;`", decl.ty, var.name),
                ));
            }
            self.declare_local(&var.name, &decl.ty, decl.is_const)?;
            if global && !self.globals.declare(&var.name, decl.ty.clone(), size, decl.is_const) {
                return Err(CompileError::Redefinition {
                    what: "global",
                    name: var.name.clone(),
                });
            }

            let Some(init) = &var.init else {
                continue;
            };
            let found = self.compile_pushed(init)?;
            if found != decl.ty {
                return Err(CompileError::assign_mismatch(&var.name, &decl.ty, &found));
            }
            let Some(place) = self.frame.lookup(&var.name) else {
                return Err(CompileError::UndefinedIdentifier {
                    name: var.name.clone(),
                });
            };
            self.emit(Instruction::copy(Opcode::CpDownSp, place.offset, size));
            self.emit(Instruction::movsp(-size));
            self.frame.bump(-size);
        }
        Ok(())
    }

    fn compile_function(&mut self, def: &FunctionDef) -> Result<(), CompileError> {
        let Some(info) = self.functions.get(&def.sig.name) else {
            return Err(CompileError::UndefinedFunction {
                name: def.sig.name.clone(),
                hint: None,
            });
        };
        let (entry, retn, returns) = (info.entry, info.retn, info.sig.returns.clone());

        self.place(entry);
        let start = self.program.len();
        self.frame = Frame::new();
        for param in def.sig.params.iter().rev() {
            let size = self.size_of(&param.ty);
            self.frame.declare(&param.name, param.ty.clone(), size, false);
        }
        self.current = Some(CurrentFunction { returns, retn });
        self.breaks.clear();
        self.continues.clear();

        self.compile_block(&def.body)?;

        let params = self.frame.height();
        if params > 0 {
            self.emit(Instruction::movsp(-params));
        }
        self.place(retn);
        self.current = None;

        debug!(
            function = %def.sig.name,
            instructions = self.program.len() - start,
            "compiled function"
        );
        Ok(())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    pub(crate) fn compile_block(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        self.frame.push_block();
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        let size = self.frame.pop_block();
        if size > 0 {
            self.emit(Instruction::movsp(-size));
        }
        Ok(())
    }

    pub(crate) fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Empty => Ok(()),
            Stmt::Expr(expr) => self.compile_discard(expr),
            Stmt::Decl(decl) => self.compile_declaration(decl, false),
            Stmt::Block(body) => self.compile_block(body),
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                let else_label = self.label();
                self.compile_condition(cond, else_label)?;
                self.compile_block(then)?;
                match otherwise {
                    Some(otherwise) => {
                        let end = self.label();
                        self.emit(Instruction::jump_to(Opcode::Jmp, end));
                        self.place(else_label);
                        self.compile_block(otherwise)?;
                        self.place(end);
                    }
                    None => self.place(else_label),
                }
                Ok(())
            }
            Stmt::While { cond, body } => {
                let start = self.label();
                let end = self.label();
                self.place(start);
                self.compile_condition(cond, end)?;
                self.compile_loop_body(body, end, start)?;
                self.emit(Instruction::jump_to(Opcode::Jmp, start));
                self.place(end);
                Ok(())
            }
            Stmt::DoWhile { body, cond } => {
                let start = self.label();
                let cond_label = self.label();
                let end = self.label();
                self.place(start);
                self.compile_loop_body(body, end, cond_label)?;
                self.place(cond_label);
                self.compile_condition(cond, end)?;
                self.emit(Instruction::jump_to(Opcode::Jmp, start));
                self.place(end);
                Ok(())
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                if let Some(init) = init {
                    self.compile_discard(init)?;
                }
                let start = self.label();
                let step_label = self.label();
                let end = self.label();
                self.place(start);
                if let Some(cond) = cond {
                    self.compile_condition(cond, end)?;
                }
                self.compile_loop_body(body, end, step_label)?;
                self.place(step_label);
                if let Some(step) = step {
                    self.compile_discard(step)?;
                }
                self.emit(Instruction::jump_to(Opcode::Jmp, start));
                self.place(end);
                Ok(())
            }
            Stmt::Switch { value, arms } => self.compile_switch(value, arms),
            Stmt::Break => {
                let Some(target) = self.breaks.last().copied() else {
                    return Err(CompileError::MisplacedJump {
                        keyword: "break",
                        context: "a loop or switch",
                    });
                };
                self.jump_out(target);
                Ok(())
            }
            Stmt::Continue => {
                let Some(target) = self.continues.last().copied() else {
                    return Err(CompileError::MisplacedJump {
                        keyword: "continue",
                        context: "a loop",
                    });
                };
                self.jump_out(target);
                Ok(())
            }
            Stmt::Return(value) => self.compile_return(value.as_ref()),
        }
    }

    /// Pushes the int condition and jumps to `on_false` when it is zero.
    fn compile_condition(&mut self, cond: &Expr, on_false: InstrId) -> Result<(), CompileError> {
        let ty = self.compile_pushed(cond)?;
        if ty != Type::Int {
            return Err(CompileError::condition(&ty));
        }
        self.emit(Instruction::jump_to(Opcode::Jz, on_false));
        self.frame.bump(-WORD);
        Ok(())
    }

    fn compile_loop_body(
        &mut self,
        body: &[Stmt],
        break_to: InstrId,
        continue_to: InstrId,
    ) -> Result<(), CompileError> {
        let depth = self.frame.depth();
        self.breaks.push(JumpTarget {
            label: break_to,
            depth,
        });
        self.continues.push(JumpTarget {
            label: continue_to,
            depth,
        });
        let result = self.compile_block(body);
        self.breaks.pop();
        self.continues.pop();
        result
    }

    /// Pops whatever the blocks being left hold, then jumps. The bookkeeping
    /// is untouched: code after the jump is unreachable.
    fn jump_out(&mut self, target: JumpTarget) {
        let pop = self.frame.height_from(target.depth);
        if pop > 0 {
            self.emit(Instruction::movsp(-pop));
        }
        self.emit(Instruction::jump_to(Opcode::Jmp, target.label));
    }

    fn compile_return(&mut self, value: Option<&Expr>) -> Result<(), CompileError> {
        let Some(current) = self.current.clone() else {
            return Err(CompileError::MisplacedJump {
                keyword: "return",
                context: "a function",
            });
        };
        match value {
            Some(value) => {
                if current.returns == Type::Void {
                    return Err(CompileError::invalid("void function cannot return a value"));
                }
                let found = self.compile_pushed(value)?;
                if found != current.returns {
                    return Err(CompileError::mismatch("return value", &current.returns, &found));
                }
                let size = self.size_of(&found);
                let height = self.frame.height();
                // the return slot sits below the whole frame, parameters included
                self.emit(Instruction::copy(Opcode::CpDownSp, -(height + size), size));
                self.emit(Instruction::movsp(-height));
                self.emit(Instruction::jump_to(Opcode::Jmp, current.retn));
                self.frame.bump(-size);
            }
            None => {
                if current.returns != Type::Void {
                    return Err(CompileError::invalid_with_hint(
                        "missing return value",
                        format!("this function returns {}", current.returns),
                    ));
                }
                let height = self.frame.height();
                if height > 0 {
                    self.emit(Instruction::movsp(-height));
                }
                self.emit(Instruction::jump_to(Opcode::Jmp, current.retn));
            }
        }
        Ok(())
    }

    /// ```text
    ///     <value>
    ///     CPTOPSP -4,4  CONST c  EQUAL  JNZ arm_n    ; per case label
    ///     JMP default | end
    /// arm_0: ...                                     ; arms fall through
    /// end:
    ///     MOVSP -4
    /// ```
    fn compile_switch(&mut self, value: &Expr, arms: &[SwitchArm]) -> Result<(), CompileError> {
        let ty = self.compile_pushed(value)?;
        let equal = match ty {
            Type::Int => Qualifier::IntInt,
            Type::String => Qualifier::StringString,
            other => {
                return Err(CompileError::invalid_with_hint(
                    format!("cannot switch on {}", other),
                    "switch values must be int or string",
                ));
            }
        };

        let end = self.label();
        let arm_labels: Vec<_> = arms.iter().map(|_| self.label()).collect();
        let mut default = None;
        let mut seen: Vec<&Expr> = Vec::new();

        for (arm, arm_label) in arms.iter().zip(&arm_labels) {
            for label in &arm.labels {
                let case = match label {
                    SwitchLabel::Default => {
                        if default.replace(*arm_label).is_some() {
                            return Err(CompileError::invalid("multiple default labels in switch"));
                        }
                        continue;
                    }
                    SwitchLabel::Case(case) => case,
                };
                if seen.contains(&case) {
                    return Err(CompileError::invalid(format!(
                        "duplicate case label {:?}",
                        case
                    )));
                }
                seen.push(case);

                self.emit(Instruction::copy(Opcode::CpTopSp, -WORD, WORD));
                self.frame.bump(WORD);
                let case_ty = self.compile_pushed(case)?;
                if case_ty != ty {
                    return Err(CompileError::mismatch("case label", &ty, &case_ty));
                }
                self.emit(Instruction::new(Opcode::Equal, equal));
                self.frame.bump(-2 * WORD + WORD);
                self.emit(Instruction::jump_to(Opcode::Jnz, *arm_label));
                self.frame.bump(-WORD);
            }
        }
        self.emit(Instruction::jump_to(Opcode::Jmp, default.unwrap_or(end)));

        self.breaks.push(JumpTarget {
            label: end,
            depth: self.frame.depth(),
        });
        let mut result = Ok(());
        for (arm, arm_label) in arms.iter().zip(arm_labels) {
            self.place(arm_label);
            result = self.compile_arm(arm);
            if result.is_err() {
                break;
            }
        }
        self.breaks.pop();
        result?;

        self.place(end);
        self.emit(Instruction::movsp(-WORD));
        self.frame.bump(-WORD);
        Ok(())
    }

    fn compile_arm(&mut self, arm: &SwitchArm) -> Result<(), CompileError> {
        for stmt in &arm.body {
            if let Stmt::Decl(decl) = stmt {
                let name = decl.vars.first().map(|v| v.name.as_str()).unwrap_or("");
                return Err(CompileError::invalid_with_hint(
                    format!("declaration of '{}' directly inside a case", name),
                    "wrap the case body in braces",
                ));
            }
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }
}

fn describe_sig(sig: &FunctionSig) -> String {
    let params: Vec<String> = sig.params.iter().map(|p| p.ty.to_string()).collect();
    format!("{} {}({})", sig.returns, sig.name, params.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::stack_check;
    use crate::frontend::lexer::Lexer;
    use crate::frontend::parser::Parser;

    fn compile_src(src: &str) -> Result<Program, CompileError> {
        let catalog = Catalog::builtin();
        let tokens = Lexer::new(src).tokenize().unwrap();
        let root = Parser::new(tokens, &catalog).parse().unwrap();
        compile_root(&root, &catalog, true)
    }

    fn listing(program: &Program) -> Vec<String> {
        program
            .iter()
            .map(|(_, i)| {
                let args: Vec<String> = i.args.iter().map(|a| a.to_string()).collect();
                if args.is_empty() {
                    i.mnemonic()
                } else {
                    format!("{} {}", i.mnemonic(), args.join(","))
                }
            })
            .collect()
    }

    // =========================================================================
    // Program layout
    // =========================================================================

    #[test]
    fn test_minimal_main() {
        let program = compile_src("void main() { }").unwrap();
        assert_eq!(listing(&program), vec!["JSR", "RETN", "RETN"]);
    }

    #[test]
    fn test_starting_conditional_stub() {
        let program = compile_src("int StartingConditional() { return 1; }").unwrap();
        assert_eq!(
            listing(&program),
            vec![
                "RSADDI",
                "JSR",
                "RETN",
                "CONSTI 1",
                "CPDOWNSP -8,4",
                "MOVSP -4",
                "JMP",
                "RETN",
            ]
        );
    }

    #[test]
    fn test_globals_stub() {
        let program = compile_src("int g = 3;\nvoid main() { g = 4; }").unwrap();
        let text = listing(&program);
        assert_eq!(
            &text[..9],
            &[
                "JSR",
                "RETN",
                "RSADDI",
                "CONSTI 3",
                "CPDOWNSP -8,4",
                "MOVSP -4",
                "SAVEBP",
                "JSR",
                "RESTOREBP",
            ]
        );
        assert_eq!(text[9], "MOVSP -4");
        assert_eq!(text[10], "RETN");
        // inside main, g is read through the base pointer
        assert!(text.contains(&"CPDOWNBP -8,4".to_string()));
    }

    #[test]
    fn test_conditional_with_globals_copies_result_down() {
        let program = compile_src("int g;\nint StartingConditional() { return g; }").unwrap();
        let text = listing(&program);
        let jsr = text.iter().rposition(|l| l == "JSR").unwrap();
        assert_eq!(text[jsr + 1], "CPDOWNSP -16,4");
        assert_eq!(text[jsr + 2], "MOVSP -4");
        assert_eq!(text[jsr + 3], "RESTOREBP");
    }

    #[test]
    fn test_library_without_entry_point() {
        let catalog = Catalog::builtin();
        let tokens = Lexer::new("int Twice(int n) { return n * 2; }").tokenize().unwrap();
        let root = Parser::new(tokens, &catalog).parse().unwrap();
        let program = compile_root(&root, &catalog, false).unwrap();
        assert_eq!(
            program.at(0).map(|i| i.mnemonic()),
            Some("CPTOPSP -4,4".to_string())
        );

        let err = compile_root(&root, &catalog, true).unwrap_err();
        assert!(matches!(err, CompileError::EntryPoint { .. }));
    }

    #[test]
    fn test_both_entry_points_rejected() {
        let err = compile_src("void main() {}\nint StartingConditional() { return 0; }").unwrap_err();
        assert!(err.to_string().contains("both"));
    }

    #[test]
    fn test_bad_main_signature() {
        let err = compile_src("int main() { return 0; }").unwrap_err();
        assert!(matches!(err, CompileError::EntryPoint { .. }));
    }

    // =========================================================================
    // Functions
    // =========================================================================

    #[test]
    fn test_function_pops_parameters() {
        let program = compile_src(
            "void Show(int n, string s) { }\nvoid main() { Show(1, \"a\"); }",
        )
        .unwrap();
        let text = listing(&program);
        assert!(text.contains(&"MOVSP -8".to_string()));
    }

    #[test]
    fn test_return_copies_below_parameters() {
        let program = compile_src(
            "int Add(int a, int b) { return a + b; }\nvoid main() { int x = Add(1, 2); }",
        )
        .unwrap();
        let text = listing(&program);
        let add = text.iter().position(|l| l == "ADDII").unwrap();
        assert_eq!(text[add + 1], "CPDOWNSP -16,4");
        assert_eq!(text[add + 2], "MOVSP -12");
        assert_eq!(text[add + 3], "JMP");
    }

    #[test]
    fn test_prototype_defaults_survive_definition() {
        let program = compile_src(
            "int Add(int a, int b = 5);\nint Add(int a, int b) { return a + b; }\nvoid main() { Add(1); }",
        );
        assert!(program.is_ok(), "{:?}", program.err());
    }

    #[test]
    fn test_prototype_mismatch() {
        let err = compile_src("int F(int a);\nint F(float a) { return 1; }\nvoid main() {}")
            .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_function_redefinition() {
        let err = compile_src("void F() {}\nvoid F() {}\nvoid main() {}").unwrap_err();
        assert!(matches!(err, CompileError::Redefinition { what: "function", .. }));
    }

    #[test]
    fn test_called_prototype_without_body() {
        let err = compile_src("void F();\nvoid main() { F(); }").unwrap_err();
        assert!(err.to_string().contains("never defined"));
    }

    #[test]
    fn test_default_before_required_parameter() {
        let err = compile_src("void F(int a = 1, int b) {}\nvoid main() {}").unwrap_err();
        assert!(err.to_string().contains("needs a default"));
    }

    #[test]
    fn test_missing_and_extra_return_values() {
        let err = compile_src("int F() { return; }\nvoid main() {}").unwrap_err();
        assert!(err.to_string().contains("missing return value"));
        let err = compile_src("void main() { return 1; }").unwrap_err();
        assert!(err.to_string().contains("cannot return a value"));
    }

    // =========================================================================
    // Statements
    // =========================================================================

    #[test]
    fn test_local_declaration_and_scope_pop() {
        let program = compile_src("void main() { int a = 1; string s; }").unwrap();
        assert_eq!(
            listing(&program)[2..],
            [
                "RSADDI",
                "CONSTI 1",
                "CPDOWNSP -8,4",
                "MOVSP -4",
                "RSADDS",
                "MOVSP -8",
                "RETN",
            ]
        );
    }

    #[test]
    fn test_expression_statement_discards_value() {
        let program = compile_src("void main() { 1 + 2; }").unwrap();
        assert_eq!(
            listing(&program)[2..],
            ["CONSTI 1", "CONSTI 2", "ADDII", "MOVSP -4", "RETN"]
        );
    }

    #[test]
    fn test_if_else_layout() {
        let program = compile_src("void main() { if (1) { } else { } }").unwrap();
        assert_eq!(
            listing(&program)[2..],
            ["CONSTI 1", "JZ", "JMP", "RETN"]
        );
        assert_eq!(program.target_position(3), Some(5));
        assert_eq!(program.target_position(4), Some(5));
    }

    #[test]
    fn test_labels_do_not_survive_compilation() {
        let program = compile_src(
            "void main() {\n\
             int i;\n\
             for (i = 0; i < 3; i++) { if (i == 1) continue; }\n\
             switch (i) { case 1: break; default: i = 0; }\n\
             do { i--; } while (i > 0);\n\
             }",
        )
        .unwrap();
        assert!(program.iter().all(|(_, i)| i.opcode != Opcode::Nop));
        for (index, (_, instruction)) in program.iter().enumerate() {
            if instruction.jump.is_some() {
                assert!(program.target_position(index).is_some(), "jump at {}", index);
            }
        }
    }

    #[test]
    fn test_condition_must_be_int() {
        let err = compile_src("void main() { if (\"a\") { } }").unwrap_err();
        assert!(err.to_string().contains("condition"));
    }

    #[test]
    fn test_break_pops_loop_locals() {
        let program = compile_src("void main() { while (1) { int x; break; } }").unwrap();
        let text = listing(&program);
        let rsadd = text.iter().position(|l| l == "RSADDI").unwrap();
        assert_eq!(text[rsadd + 1], "MOVSP -4");
        assert_eq!(text[rsadd + 2], "JMP");
    }

    #[test]
    fn test_break_outside_loop() {
        let err = compile_src("void main() { break; }").unwrap_err();
        assert!(matches!(err, CompileError::MisplacedJump { keyword: "break", .. }));
    }

    #[test]
    fn test_continue_in_for_jumps_to_step() {
        let program =
            compile_src("void main() { int i; for (i = 0; i < 3; i++) { continue; } }").unwrap();
        let jumps: Vec<usize> = program
            .iter()
            .enumerate()
            .filter(|(_, (_, ins))| ins.opcode == Opcode::Jmp)
            .map(|(pos, _)| program.target_position(pos).unwrap())
            .collect();
        // continue -> step label, loop back -> condition start
        assert!(jumps[0] > jumps[1]);
    }

    #[test]
    fn test_switch_dispatch() {
        let program = compile_src(
            "void main() { int n = 2; switch (n) { case 1: break; case 2: default: n = 0; } }",
        )
        .unwrap();
        let text = listing(&program);
        assert_eq!(text.iter().filter(|l| *l == "EQUALII").count(), 2);
        assert_eq!(text.iter().filter(|l| *l == "JNZ").count(), 2);
        let last_movsp = text.iter().rposition(|l| l == "MOVSP -4").unwrap();
        assert!(last_movsp > text.iter().rposition(|l| l == "CPDOWNSP -12,4").unwrap());
    }

    #[test]
    fn test_switch_rejects_declaration_in_case() {
        let err = compile_src("void main() { switch (1) { case 1: int x; break; } }").unwrap_err();
        assert!(err.to_string().contains("directly inside a case"));
    }

    #[test]
    fn test_switch_duplicate_default() {
        let err =
            compile_src("void main() { switch (1) { default: break; default: break; } }").unwrap_err();
        assert!(err.to_string().contains("multiple default"));
    }

    #[test]
    fn test_const_requires_initializer() {
        let err = compile_src("void main() { const int x; }").unwrap_err();
        assert!(err.to_string().contains("must be initialized"));
    }

    #[test]
    fn test_struct_declaration_reserves_members() {
        let program = compile_src(
            "struct P { int a; vector v; };\nvoid main() { struct P p; p.a = 1; }",
        )
        .unwrap();
        let text = listing(&program);
        assert_eq!(&text[2..6], &["RSADDI", "RSADDF", "RSADDF", "RSADDF"]);
        assert!(text.contains(&"CPDOWNSP -20,4".to_string()));
    }

    #[test]
    fn test_member_of_call_results() {
        let program = compile_src(
            "struct P { int a; vector v; };\n\
             struct P Make() { struct P p; p.a = 1; return p; }\n\
             void main() { int n = Make().a; float y = GetPosition(OBJECT_SELF).y; }",
        )
        .unwrap();
        let text = listing(&program);
        // a is the first word of the 16-byte struct
        let read = text.iter().rposition(|l| l == "CPTOPSP -16,4").unwrap();
        assert_eq!(text[read + 1], "CPDOWNSP -20,4");
        assert_eq!(text[read + 2], "MOVSP -16");
        let read = text.iter().rposition(|l| l == "CPTOPSP -8,4").unwrap();
        assert_eq!(text[read + 1], "CPDOWNSP -16,4");
        assert_eq!(text[read + 2], "MOVSP -12");
        assert!(stack_check::check_program(&program, Some(&Catalog::builtin())).is_ok());
    }

    #[test]
    fn test_action_argument_in_function() {
        let program = compile_src(
            "void main() { int n = 1; DelayCommand(1.0, PrintInteger(n)); }",
        )
        .unwrap();
        let text = listing(&program);
        let store = text.iter().position(|l| l.starts_with("STORE_STATE")).unwrap();
        assert_eq!(text[store], "STORE_STATE 0,4");
        // n is one word below the stack top inside the deferred block
        assert_eq!(text[store + 2], "CPTOPSP -4,4");
    }
}
