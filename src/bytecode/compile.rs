use std::collections::{BTreeSet, HashMap};

use crate::bytecode::compile_error::CompileError;
use crate::bytecode::ir::{InstrId, Instruction, Operand, Program};
use crate::bytecode::op::{Opcode, Qualifier};
use crate::bytecode::scope::{Frame, GlobalScope, Lookup, Storage};
use crate::frontend::parser::constant_expr;
use crate::lang::ast::{Access, Expr, FunctionSig};
use crate::lang::catalog::Catalog;
use crate::lang::operators::{BinaryMapping, resolve_binary, resolve_unary};
use crate::lang::types::{StructMap, Type, WORD};

/// Result of compiling one expression.
///
/// `on_stack` tells whether the node already counted its value in the current
/// block's temporary height. Leaf reads (literals, names, member access) emit
/// a push but leave the counting to their parent; every composite node counts
/// its own result.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub ty: Type,
    pub on_stack: bool,
}

impl Compiled {
    fn leaf(ty: Type) -> Self {
        Compiled { ty, on_stack: false }
    }

    fn pushed(ty: Type) -> Self {
        Compiled { ty, on_stack: true }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FunctionInfo {
    pub sig: FunctionSig,
    /// Label placed at the first instruction of the body.
    pub entry: InstrId,
    /// The function's single `RETN`; `return` statements jump here.
    pub retn: InstrId,
    pub defined: bool,
    pub prototyped: bool,
}

/// Destination of `break` or `continue`, with the block depth whose contents
/// must be popped before jumping.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JumpTarget {
    pub label: InstrId,
    pub depth: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct CurrentFunction {
    pub returns: Type,
    pub retn: InstrId,
}

/// Code generator state for one compilation unit.
///
/// Expressions are compiled here; statements, functions and the program
/// layout live in `compile_stmt`.
pub struct CodeGen<'a> {
    pub(crate) catalog: &'a Catalog,
    pub(crate) program: Program,
    pub(crate) structs: StructMap,
    pub(crate) functions: HashMap<String, FunctionInfo>,
    pub(crate) called: BTreeSet<String>,
    pub(crate) globals: GlobalScope,
    pub(crate) frame: Frame,
    pub(crate) current: Option<CurrentFunction>,
    pub(crate) breaks: Vec<JumpTarget>,
    pub(crate) continues: Vec<JumpTarget>,
}

impl<'a> CodeGen<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        CodeGen {
            catalog,
            program: Program::new(),
            structs: StructMap::new(),
            functions: HashMap::new(),
            called: BTreeSet::new(),
            globals: GlobalScope::default(),
            frame: Frame::new(),
            current: None,
            breaks: Vec::new(),
            continues: Vec::new(),
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn into_program(self) -> Program {
        self.program
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    // =========================================================================
    // Emission helpers
    // =========================================================================

    pub(crate) fn emit(&mut self, instruction: Instruction) -> InstrId {
        self.program.push(instruction)
    }

    /// Allocates a label (a `NOP`) to be placed later.
    pub(crate) fn label(&mut self) -> InstrId {
        self.program.alloc(Instruction::nop())
    }

    pub(crate) fn place(&mut self, id: InstrId) {
        self.program.place(id);
    }

    pub(crate) fn size_of(&self, ty: &Type) -> i32 {
        ty.size(&self.structs)
    }

    pub(crate) fn check_type_known(&self, ty: &Type) -> Result<(), CompileError> {
        match ty {
            Type::Struct(name) if !self.structs.contains_key(name) => {
                Err(CompileError::UnknownStruct { name: name.clone() })
            }
            _ => Ok(()),
        }
    }

    /// Emits the `RSADDx` instructions reserving one uninitialised value of
    /// `ty`. Does not touch the frame.
    pub(crate) fn reserve(&mut self, ty: &Type) -> Result<(), CompileError> {
        match ty {
            Type::Vector => {
                for _ in 0..3 {
                    self.emit(Instruction::new(Opcode::RsAdd, Qualifier::Float));
                }
            }
            Type::Struct(name) => {
                let members = match self.structs.get(name) {
                    Some(def) => def.members.clone(),
                    None => return Err(CompileError::UnknownStruct { name: name.clone() }),
                };
                for member in &members {
                    self.reserve(&member.ty)?;
                }
            }
            other => match other.qualifier() {
                Some(qualifier) => {
                    self.emit(Instruction::new(Opcode::RsAdd, qualifier));
                }
                None => {
                    return Err(CompileError::invalid(format!(
                        "cannot reserve a value of type {}",
                        other
                    )));
                }
            },
        }
        Ok(())
    }

    /// Reserves and declares a local in the innermost block.
    pub fn declare_local(&mut self, name: &str, ty: &Type, is_const: bool) -> Result<(), CompileError> {
        self.check_type_known(ty)?;
        self.reserve(ty)?;
        let size = self.size_of(ty);
        if !self.frame.declare(name, ty.clone(), size, is_const) {
            return Err(CompileError::Redefinition {
                what: "variable",
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Registers a function signature so calls to it can be compiled.
    pub fn declare_function(&mut self, sig: FunctionSig) {
        let entry = self.label();
        let retn = self.program.alloc(Instruction::retn());
        self.functions.insert(
            sig.name.clone(),
            FunctionInfo {
                sig,
                entry,
                retn,
                defined: false,
                prototyped: true,
            },
        );
    }

    // =========================================================================
    // Name resolution
    // =========================================================================

    pub(crate) fn lookup(&self, name: &str) -> Option<Lookup> {
        self.frame
            .lookup(name)
            .or_else(|| self.globals.lookup(name))
    }

    /// Resolves `name.member...` to the location and type of the final member.
    pub(crate) fn resolve_access(&self, access: &Access) -> Result<Lookup, CompileError> {
        let Some(mut place) = self.lookup(&access.name) else {
            return Err(CompileError::UndefinedIdentifier {
                name: access.name.clone(),
            });
        };
        for field in &access.fields {
            let (offset, ty) = self.member_of(&place.ty, field)?;
            place.offset += offset;
            place.ty = ty;
        }
        Ok(place)
    }

    /// Byte offset inside `ty` and type of its member `field`.
    fn member_of(&self, ty: &Type, field: &str) -> Result<(i32, Type), CompileError> {
        match ty {
            Type::Vector => match field {
                "x" => Ok((0, Type::Float)),
                "y" => Ok((WORD, Type::Float)),
                "z" => Ok((2 * WORD, Type::Float)),
                _ => Err(CompileError::UnknownMember {
                    ty: Type::Vector,
                    member: field.to_string(),
                    available: vec!["x".to_string(), "y".to_string(), "z".to_string()],
                }),
            },
            Type::Struct(name) => {
                let Some(def) = self.structs.get(name) else {
                    return Err(CompileError::UnknownStruct { name: name.clone() });
                };
                def.member(field, &self.structs)
                    .ok_or_else(|| CompileError::UnknownMember {
                        ty: ty.clone(),
                        member: field.to_string(),
                        available: def
                            .member_names()
                            .into_iter()
                            .map(str::to_string)
                            .collect(),
                    })
            }
            other => Err(CompileError::UnknownMember {
                ty: other.clone(),
                member: field.to_string(),
                available: Vec::new(),
            }),
        }
    }

    fn copy_top(&mut self, place: &Lookup, size: i32) {
        let opcode = match place.storage {
            Storage::Stack => Opcode::CpTopSp,
            Storage::Base => Opcode::CpTopBp,
        };
        self.emit(Instruction::copy(opcode, place.offset, size));
    }

    fn copy_down(&mut self, place: &Lookup, size: i32) {
        let opcode = match place.storage {
            Storage::Stack => Opcode::CpDownSp,
            Storage::Base => Opcode::CpDownBp,
        };
        self.emit(Instruction::copy(opcode, place.offset, size));
    }

    fn writable(&self, access: &Access) -> Result<Lookup, CompileError> {
        let place = self.resolve_access(access)?;
        if place.is_const {
            return Err(CompileError::ConstAssignment {
                name: access.to_string(),
            });
        }
        Ok(place)
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Compiles `expr` and makes sure its value is counted on the stack.
    /// Returns the value's type; the temp height grows by exactly its size.
    pub fn compile_pushed(&mut self, expr: &Expr) -> Result<Type, CompileError> {
        let compiled = self.compile_expr(expr)?;
        if !compiled.on_stack {
            let size = self.size_of(&compiled.ty);
            self.frame.bump(size);
        }
        Ok(compiled.ty)
    }

    /// Compiles `expr` for its side effects and pops its value.
    pub(crate) fn compile_discard(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let ty = self.compile_pushed(expr)?;
        let size = self.size_of(&ty);
        if size > 0 {
            self.emit(Instruction::movsp(-size));
            self.frame.bump(-size);
        }
        Ok(())
    }

    pub fn compile_expr(&mut self, expr: &Expr) -> Result<Compiled, CompileError> {
        match expr {
            Expr::Int(n) => {
                self.emit(Instruction::const_int(*n));
                Ok(Compiled::leaf(Type::Int))
            }
            Expr::Float(x) => {
                self.emit(Instruction::const_float(*x));
                Ok(Compiled::leaf(Type::Float))
            }
            Expr::Str(s) => {
                self.emit(Instruction::const_string(s));
                Ok(Compiled::leaf(Type::String))
            }
            Expr::Object(id) => {
                self.emit(Instruction::const_object(*id));
                Ok(Compiled::leaf(Type::Object))
            }
            Expr::Vector(x, y, z) => {
                for (axis, component) in [("x", x), ("y", y), ("z", z)] {
                    let ty = self.compile_pushed(component)?;
                    if ty != Type::Float {
                        return Err(CompileError::mismatch(
                            format!("vector component {}", axis),
                            &Type::Float,
                            &ty,
                        ));
                    }
                }
                Ok(Compiled::pushed(Type::Vector))
            }
            Expr::Name(access) => self.compile_name(access),
            Expr::Binary { op, lhs, rhs } => {
                let lhs_ty = self.compile_pushed(lhs)?;
                let rhs_ty = self.compile_pushed(rhs)?;
                let mapping = resolve_binary(*op, &lhs_ty, &rhs_ty)?;
                let lhs_size = self.size_of(&lhs_ty);
                let rhs_size = self.size_of(&rhs_ty);
                self.emit_binary(&mapping, lhs_size);
                self.frame.bump(-(lhs_size + rhs_size));
                let result_size = self.size_of(&mapping.result);
                self.frame.bump(result_size);
                Ok(Compiled::pushed(mapping.result))
            }
            Expr::Unary { op, operand } => {
                let ty = self.compile_pushed(operand)?;
                let mapping = resolve_unary(*op, &ty)?;
                self.emit(Instruction::new(mapping.opcode, mapping.qualifier));
                Ok(Compiled::pushed(mapping.result))
            }
            Expr::Assign { target, value } => {
                let ty = self.compile_pushed(value)?;
                let place = self.writable(target)?;
                if place.ty != ty {
                    return Err(CompileError::assign_mismatch(
                        &target.to_string(),
                        &place.ty,
                        &ty,
                    ));
                }
                let size = self.size_of(&ty);
                self.copy_down(&place, size);
                Ok(Compiled::pushed(ty))
            }
            Expr::CompoundAssign { op, target, value } => {
                let place = self.writable(target)?;
                let var_size = self.size_of(&place.ty);
                self.copy_top(&place, var_size);
                self.frame.bump(var_size);

                let value_ty = self.compile_pushed(value)?;
                let mapping = resolve_binary(*op, &place.ty, &value_ty)?;
                let value_size = self.size_of(&value_ty);
                self.emit_binary(&mapping, var_size);
                self.frame.bump(-(var_size + value_size));
                let result_size = self.size_of(&mapping.result);
                self.frame.bump(result_size);
                if result_size != var_size {
                    return Err(CompileError::mismatch(
                        format!("'{}' {}= ...", target, op),
                        &place.ty,
                        &mapping.result,
                    ));
                }

                let place = self.writable(target)?;
                self.copy_down(&place, var_size);
                Ok(Compiled::pushed(mapping.result))
            }
            Expr::IncDec {
                target,
                increment,
                prefix,
            } => self.compile_inc_dec(target, *increment, *prefix),
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                let cond_ty = self.compile_pushed(cond)?;
                if cond_ty != Type::Int {
                    return Err(CompileError::condition(&cond_ty));
                }
                let else_label = self.label();
                let end_label = self.label();
                self.emit(Instruction::jump_to(Opcode::Jz, else_label));
                self.frame.bump(-WORD);

                let before = self.frame.temp();
                let then_ty = self.compile_pushed(then)?;
                self.frame.set_temp(before);
                self.emit(Instruction::jump_to(Opcode::Jmp, end_label));

                self.place(else_label);
                let else_ty = self.compile_pushed(otherwise)?;
                if then_ty != else_ty {
                    return Err(CompileError::mismatch("ternary arms", &then_ty, &else_ty));
                }
                self.place(end_label);
                Ok(Compiled::pushed(then_ty))
            }
            Expr::Member { base, fields } => self.compile_member(base, fields),
            Expr::Call { name, args } => self.compile_call(name, args),
            Expr::EngineCall { routine, name, args } => {
                self.compile_engine_call(*routine, name, args)
            }
        }
    }

    fn emit_binary(&mut self, mapping: &BinaryMapping, operand_size: i32) {
        let mut instruction = Instruction::new(mapping.opcode, mapping.qualifier);
        if mapping.qualifier == Qualifier::StructStruct {
            instruction = instruction.with_args(vec![Operand::Int(operand_size)]);
        }
        self.emit(instruction);
    }

    /// A member of a value that only exists on the stack. The member is
    /// copied over the start of the value and the rest is popped:
    ///
    /// ```text
    /// <base>  CPTOPSP off-S,m  CPDOWNSP -(S+m),m  MOVSP -S
    /// ```
    fn compile_member(&mut self, base: &Expr, fields: &[String]) -> Result<Compiled, CompileError> {
        let base_ty = self.compile_pushed(base)?;
        let base_size = self.size_of(&base_ty);
        let (mut offset, mut ty) = (0, base_ty);
        for field in fields {
            let (inner, member) = self.member_of(&ty, field)?;
            offset += inner;
            ty = member;
        }
        let size = self.size_of(&ty);
        if size != base_size {
            self.emit(Instruction::copy(Opcode::CpTopSp, offset - base_size, size));
            self.emit(Instruction::copy(Opcode::CpDownSp, -(base_size + size), size));
            self.emit(Instruction::movsp(-base_size));
            self.frame.bump(size - base_size);
        }
        Ok(Compiled::pushed(ty))
    }

    /// Variables shadow catalog constants of the same name.
    fn compile_name(&mut self, access: &Access) -> Result<Compiled, CompileError> {
        if access.fields.is_empty() && self.lookup(&access.name).is_none() {
            let catalog = self.catalog;
            if let Some(constant) = catalog.constant(&access.name) {
                return self.compile_expr(&constant_expr(&constant.value));
            }
        }
        let place = self.resolve_access(access)?;
        let size = self.size_of(&place.ty);
        self.copy_top(&place, size);
        Ok(Compiled::leaf(place.ty))
    }

    /// `++x`, `x++`, `--x`, `x--` on an int. The value left on the stack is
    /// the updated one for prefix forms and the original one for postfix.
    fn compile_inc_dec(
        &mut self,
        target: &Access,
        increment: bool,
        prefix: bool,
    ) -> Result<Compiled, CompileError> {
        let place = self.writable(target)?;
        if place.ty != Type::Int {
            return Err(CompileError::mismatch(
                format!("'{}' of '{}'", if increment { "++" } else { "--" }, target),
                &Type::Int,
                &place.ty,
            ));
        }
        let opcode = match (place.storage, increment) {
            (Storage::Stack, true) => Opcode::IncSp,
            (Storage::Stack, false) => Opcode::DecSp,
            (Storage::Base, true) => Opcode::IncBp,
            (Storage::Base, false) => Opcode::DecBp,
        };
        let step = |offset: i32| {
            Instruction::new(opcode, Qualifier::Int).with_args(vec![Operand::Int(offset)])
        };

        if prefix {
            self.emit(step(place.offset));
            self.copy_top(&place, WORD);
            self.frame.bump(WORD);
        } else {
            self.copy_top(&place, WORD);
            self.frame.bump(WORD);
            let place = self.resolve_access(target)?;
            self.emit(step(place.offset));
        }
        Ok(Compiled::pushed(Type::Int))
    }

    /// Call of a user function: reserve the return slot, push arguments last
    /// first, `JSR`. The callee pops its parameters.
    fn compile_call(&mut self, name: &str, args: &[Expr]) -> Result<Compiled, CompileError> {
        let Some(info) = self.functions.get(name) else {
            return Err(CompileError::UndefinedFunction {
                name: name.to_string(),
                hint: None,
            });
        };
        let sig = info.sig.clone();
        let entry = info.entry;
        self.called.insert(name.to_string());

        let expected = if sig.required_params() == sig.params.len() {
            sig.params.len().to_string()
        } else {
            format!("{} to {}", sig.required_params(), sig.params.len())
        };
        if args.len() > sig.params.len() {
            return Err(CompileError::Arity {
                name: name.to_string(),
                expected,
                found: args.len(),
            });
        }
        let mut args: Vec<Expr> = args.to_vec();
        for param in &sig.params[args.len()..] {
            match &param.default {
                Some(value) => args.push(value.clone()),
                None => {
                    return Err(CompileError::Arity {
                        name: name.to_string(),
                        expected,
                        found: args.len(),
                    });
                }
            }
        }

        let return_size = self.size_of(&sig.returns);
        if return_size > 0 {
            self.reserve(&sig.returns)?;
            self.frame.bump(return_size);
        }

        let mut arg_bytes = 0;
        for (arg, param) in args.iter().zip(&sig.params).rev() {
            let ty = self.compile_pushed(arg)?;
            if ty != param.ty {
                return Err(CompileError::mismatch(
                    format!("argument '{}' of {}", param.name, name),
                    &param.ty,
                    &ty,
                ));
            }
            arg_bytes += self.size_of(&ty);
        }

        self.emit(Instruction::jump_to(Opcode::Jsr, entry));
        self.frame.bump(-arg_bytes);
        Ok(Compiled::pushed(sig.returns))
    }

    /// Call of a catalog routine. `action` arguments become deferred code
    /// blocks and occupy no stack space.
    fn compile_engine_call(
        &mut self,
        index: u16,
        name: &str,
        args: &[Expr],
    ) -> Result<Compiled, CompileError> {
        let catalog = self.catalog;
        let Some(routine) = catalog.routine_by_index(index) else {
            return Err(CompileError::UndefinedFunction {
                name: name.to_string(),
                hint: Some(format!("engine routine #{} is not in the catalog", index)),
            });
        };
        if args.len() != routine.params.len() {
            return Err(CompileError::Arity {
                name: routine.name.clone(),
                expected: routine.params.len().to_string(),
                found: args.len(),
            });
        }

        let mut arg_bytes = 0;
        for (arg, param) in args.iter().zip(&routine.params).rev() {
            if param.ty == Type::Action {
                self.compile_action_arg(arg)?;
                continue;
            }
            let ty = self.compile_pushed(arg)?;
            if ty != param.ty {
                return Err(CompileError::mismatch(
                    format!("argument '{}' of {}", param.name, routine.name),
                    &param.ty,
                    &ty,
                ));
            }
            arg_bytes += self.size_of(&ty);
        }

        let argc = u8::try_from(args.len()).map_err(|_| {
            CompileError::invalid(format!("too many arguments to {}", routine.name))
        })?;
        self.emit(Instruction::action(routine.index, argc));
        self.frame.bump(-arg_bytes);
        let return_size = self.size_of(&routine.returns);
        self.frame.bump(return_size);
        Ok(Compiled::pushed(routine.returns.clone()))
    }

    /// ```text
    /// STORE_STATE globals, stack
    /// JMP after
    /// <expression statement>
    /// RETN
    /// after:
    /// ```
    fn compile_action_arg(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let globals = self.globals.size();
        let stack = self.frame.height();
        self.emit(
            Instruction::new(Opcode::StoreState, Qualifier::STATE)
                .with_args(vec![Operand::Int(globals), Operand::Int(stack)]),
        );
        let after = self.label();
        self.emit(Instruction::jump_to(Opcode::Jmp, after));
        self.compile_discard(expr)?;
        self.emit(Instruction::retn());
        self.place(after);
        Ok(())
    }
}
