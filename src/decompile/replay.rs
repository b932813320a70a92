//! Stack replay.
//!
//! Runs a subroutine's instructions over a simulated stack whose entries hold
//! expression trees instead of values. Pushes build expressions, pops consume
//! them, and anything observable (an assignment, a call whose value is
//! dropped, a return) becomes a statement. Jumps are matched against the
//! shapes the compiler produces: loops from back edges (a `for` when a
//! `continue` lands on the step), `if`/`else` from a `JZ` over a forward
//! `JMP` (a ternary when both arms only push a value), `switch` from its
//! chain of `CPTOPSP`/`EQUAL`/`JNZ` tests, deferred actions from
//! `STORE_STATE`. Anything else becomes a placeholder.
//!
//! Variables are named lazily. `RSADD` only reserves a slot; the slot becomes
//! a variable the first time it is read or written, and a call's return slot
//! never does. Several reservations written at once (a vector or struct)
//! become one variable.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use tracing::warn;

use crate::bytecode::ir::{Instruction, Operand, Program};
use crate::bytecode::op::{Opcode, Qualifier};
use crate::decompile::cfg::Cfg;
use crate::decompile::expr::{CaseLabel, Expr, Stmt, SwitchArm};
use crate::lang::catalog::Catalog;
use crate::lang::operators::{binary_result, UnaryOp};
use crate::lang::types::{StructMap, Type, WORD};

const COMPONENTS: [&str; 3] = ["x", "y", "z"];

/// Calling convention of a subroutine as far as it is known.
#[derive(Debug, Clone, PartialEq)]
pub struct Callee {
    pub name: String,
    pub param_bytes: i32,
    pub return_bytes: i32,
    /// Parameter types and sizes, first parameter first, from the first call
    /// site that was replayed.
    pub params: Option<Vec<(Type, i32)>>,
    pub returns: Option<Type>,
}

/// A global variable at a base-pointer offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub offset: i32,
    pub size: i32,
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Naming {
    Local,
    Global,
}

/// Name prefix for a variable of type `ty`.
pub fn prefix(ty: &Type) -> &'static str {
    match ty {
        Type::Int => "n",
        Type::Float => "f",
        Type::String => "s",
        Type::Object => "o",
        Type::Vector => "v",
        Type::Effect => "e",
        Type::Event => "ev",
        Type::Location => "l",
        Type::Talent => "t",
        Type::ItemProperty => "ip",
        Type::Struct(_) => "st",
        Type::Action => "a",
        Type::Void => "",
    }
}

fn type_size(ty: &Type) -> i32 {
    ty.size(&StructMap::new())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Temp,
    /// Reserved by `RSADD` and not yet touched. `depth` is the statement list
    /// that was open at the time.
    Reserved { depth: usize, uid: usize },
    Var(usize),
    /// The caller's slot for this subroutine's result.
    Return,
}

#[derive(Debug, Clone)]
struct Entry {
    expr: Expr,
    ty: Type,
    size: i32,
    slot: Slot,
}

impl Entry {
    fn temp(expr: Expr, ty: Type, size: i32) -> Entry {
        Entry {
            expr,
            ty,
            size,
            slot: Slot::Temp,
        }
    }
}

#[derive(Debug, Clone)]
struct Var {
    name: String,
    ty: Type,
    declared: bool,
    depth: usize,
}

/// A construct that `break` can leave.
#[derive(Debug, Clone, Copy)]
enum Frame {
    Loop {
        header: usize,
        /// The jump back to the header.
        back: usize,
        exit: usize,
        /// Earliest forward `continue` target, the step of a `for`.
        step: Option<usize>,
    },
    Switch {
        /// Stack height with the switch value on top.
        height: i32,
        /// The `MOVSP` that drops the value, once known.
        exit: Option<usize>,
    },
}

/// The comparison chain at the head of a `switch`.
struct Dispatch {
    /// Case constant and the position its arm starts at, in test order.
    cases: Vec<(Expr, usize)>,
    default: Option<usize>,
    exit: Option<usize>,
}

/// Replayer state to go back to before replaying a range a second time.
struct Checkpoint {
    stack: Vec<Entry>,
    vars: Vec<Var>,
    bound: HashMap<usize, (usize, usize)>,
    next_uid: usize,
    /// Length of each open statement list.
    blocks: Vec<usize>,
    calls: usize,
    actions: usize,
    pending_return: Option<Expr>,
}

/// Destination of a copy-down or increment.
struct Place {
    expr: Expr,
    var: Option<usize>,
}

pub struct Replayer<'a> {
    program: &'a Program,
    catalog: &'a Catalog,
    cfg: &'a Cfg,
    offsets: &'a [usize],
    callees: &'a mut BTreeMap<usize, Callee>,
    globals: &'a [Global],
    naming: Naming,
    /// Position of the subroutine's final `RETN`.
    retn: Option<usize>,
    stack: Vec<Entry>,
    vars: Vec<Var>,
    /// Reservation uid -> (variable, reservations merged into it).
    bound: HashMap<usize, (usize, usize)>,
    next_uid: usize,
    blocks: Vec<Vec<Stmt>>,
    frames: Vec<Frame>,
    actions: Vec<Expr>,
    pending_return: Option<Expr>,
    /// Stack before a `MOVSP` that leads into a jump.
    saved: Option<Vec<Entry>>,
    /// Subroutines called, in first-call order.
    pub calls: Vec<usize>,
}

impl<'a> Replayer<'a> {
    pub fn new(
        program: &'a Program,
        catalog: &'a Catalog,
        cfg: &'a Cfg,
        offsets: &'a [usize],
        callees: &'a mut BTreeMap<usize, Callee>,
        globals: &'a [Global],
        naming: Naming,
    ) -> Self {
        Self {
            program,
            catalog,
            cfg,
            offsets,
            callees,
            globals,
            naming,
            retn: None,
            stack: Vec::new(),
            vars: Vec::new(),
            bound: HashMap::new(),
            next_uid: 0,
            blocks: Vec::new(),
            frames: Vec::new(),
            actions: Vec::new(),
            pending_return: None,
            saved: None,
            calls: Vec::new(),
        }
    }

    pub fn set_retn(&mut self, retn: Option<usize>) {
        self.retn = retn;
    }

    /// Seeds the stack with the caller's return slot and the parameters, and
    /// returns the parameter declarations.
    pub fn enter(
        &mut self,
        return_bytes: i32,
        returns: &Type,
        params: &[(Type, i32)],
    ) -> Vec<(Type, String)> {
        if return_bytes > 0 {
            self.stack.push(Entry {
                expr: Expr::Raw("/* return value */".to_string()),
                ty: returns.clone(),
                size: return_bytes,
                slot: Slot::Return,
            });
        }
        let mut declared = Vec::with_capacity(params.len());
        let mut ids = Vec::with_capacity(params.len());
        for (i, (ty, _)) in params.iter().enumerate() {
            let name = format!("{}Param{}", prefix(ty), i + 1);
            ids.push(self.vars.len());
            self.vars.push(Var {
                name: name.clone(),
                ty: ty.clone(),
                declared: true,
                depth: 0,
            });
            declared.push((ty.clone(), name));
        }
        // the first parameter is nearest the top
        for (id, (ty, size)) in ids.into_iter().zip(params).rev() {
            self.stack.push(Entry {
                expr: Expr::Var(self.vars[id].name.clone()),
                ty: ty.clone(),
                size: *size,
                slot: Slot::Var(id),
            });
        }
        declared
    }

    /// Replays `start..end` and returns its statements.
    pub fn run(&mut self, start: usize, end: usize) -> Vec<Stmt> {
        self.nested(|r| r.walk(start, end))
    }

    /// Replays a global stub up to its `SAVEBP` and returns the global
    /// declarations together with each global's base-pointer offset.
    pub fn run_globals(&mut self, start: usize, savebp: usize) -> (Vec<Stmt>, Vec<Global>) {
        self.blocks.push(Vec::new());
        self.walk(start, savebp);

        let mut index = 0;
        while index < self.stack.len() {
            if matches!(self.stack[index].slot, Slot::Reserved { .. }) {
                self.bind(index..index + 1);
            }
            let slot = self.stack[index].slot;
            if let Slot::Var(id) = slot {
                self.ensure_declared(id);
            }
            index += 1;
        }

        // SAVEBP pushes one word; BP then points just above it
        let mut globals = Vec::new();
        let mut above = 0;
        for entry in self.stack.iter().rev() {
            if let Slot::Var(id) = entry.slot {
                globals.push(Global {
                    offset: -(above + entry.size) - WORD,
                    size: entry.size,
                    name: self.vars[id].name.clone(),
                    ty: self.vars[id].ty.clone(),
                });
            }
            above += entry.size;
        }
        let stmts = self.blocks.pop().unwrap_or_default();
        (stmts, globals)
    }

    // =========================================================================
    // Structure
    // =========================================================================

    fn nested(&mut self, f: impl FnOnce(&mut Self)) -> Vec<Stmt> {
        self.blocks.push(Vec::new());
        f(self);
        self.blocks.pop().unwrap_or_default()
    }

    fn walk(&mut self, start: usize, end: usize) {
        let mut pos = start;
        while pos < end {
            pos = self.step(pos, end);
        }
        // a jump at `end` belongs to the enclosing construct
        self.saved = None;
    }

    /// Replays the construct starting at `pos` and returns where to go on.
    fn step(&mut self, pos: usize, end: usize) -> usize {
        // the outermost loop still open at this header; nested loops can
        // share it
        let back = self
            .cfg
            .back_jumps(pos)
            .iter()
            .rev()
            .copied()
            .find(|&b| b > pos && b < end);
        if let Some(back) = back {
            return self.replay_loop(pos, back);
        }
        let program = self.program;
        let Some(ins) = program.at(pos) else {
            return end;
        };
        match ins.opcode {
            Opcode::Jz => self.replay_if(pos, end),
            Opcode::StoreState => self.replay_closure(pos),
            Opcode::CpTopSp => match self.dispatch(pos, end) {
                Some(dispatch) => self.replay_switch(pos, end, dispatch),
                None => {
                    self.replay(pos, ins);
                    pos + 1
                }
            },
            _ => {
                self.replay(pos, ins);
                pos + 1
            }
        }
    }

    /// ```text
    /// header: <lead>  JZ exit  <body>  [step:] <step>  JMP header
    /// exit:
    /// ```
    /// An empty lead is a `while`, an empty body a `do`/`while`. A `while`
    /// whose body continues to a point past its own start is a `for`.
    fn replay_loop(&mut self, header: usize, back: usize) -> usize {
        let exit = back + 1;
        let snapshot = self.stack.clone();
        self.frames.push(Frame::Loop {
            header,
            back,
            exit,
            step: None,
        });

        let cond_jump = (header..back).find(|&ip| {
            self.program.at(ip).map(|i| i.opcode) == Some(Opcode::Jz)
                && self.cfg.target(ip) == Some(exit)
        });
        let stmt = match cond_jump {
            None => Stmt::While {
                cond: Expr::Int(1),
                body: self.nested(|r| r.walk(header, back)),
            },
            Some(jz) => {
                let lead = self.nested(|r| r.walk(header, jz));
                let cond = self.pop_value(jz, WORD).0;
                let checkpoint = self.checkpoint();
                let body = self.nested(|r| r.walk(jz + 1, back));
                let step = self.loop_step().filter(|&s| s > jz + 1 && s < back);
                if lead.is_empty() {
                    let recovered = step.and_then(|s| self.replay_for(&checkpoint, jz + 1, s, back));
                    match (recovered, step) {
                        (Some((body, step)), _) => Stmt::For { cond, step, body },
                        (None, Some(_)) => {
                            self.rewind(&checkpoint);
                            let body = self.nested(|r| r.walk(jz + 1, back));
                            Stmt::While { cond, body }
                        }
                        (None, None) => Stmt::While { cond, body },
                    }
                } else if body.is_empty() {
                    Stmt::DoWhile { body: lead, cond }
                } else {
                    let mut stmts = lead;
                    stmts.push(Stmt::If {
                        cond: Expr::unary(UnaryOp::Not, cond),
                        then: vec![Stmt::Break],
                        otherwise: Vec::new(),
                    });
                    stmts.extend(body);
                    Stmt::While {
                        cond: Expr::Int(1),
                        body: stmts,
                    }
                }
            }
        };

        self.frames.pop();
        self.restore(snapshot);
        self.emit(stmt);
        exit
    }

    /// Replays a loop body again as `<body> step: <step>`. The step has to be
    /// a single expression statement.
    fn replay_for(
        &mut self,
        checkpoint: &Checkpoint,
        start: usize,
        step: usize,
        back: usize,
    ) -> Option<(Vec<Stmt>, Expr)> {
        self.rewind(checkpoint);
        let body = self.nested(|r| r.walk(start, step));
        let mut tail = self.nested(|r| r.walk(step, back));
        match (tail.pop(), tail.is_empty()) {
            (Some(Stmt::Expr(expr)), true) => Some((body, expr)),
            _ => None,
        }
    }

    fn loop_step(&self) -> Option<usize> {
        match self.frames.last() {
            Some(Frame::Loop { step, .. }) => *step,
            _ => None,
        }
    }

    fn note_step(&mut self, target: usize) {
        let frame = self
            .frames
            .iter_mut()
            .rev()
            .find(|f| matches!(f, Frame::Loop { .. }));
        if let Some(Frame::Loop { step, .. }) = frame {
            *step = Some(step.map_or(target, |s| s.min(target)));
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            stack: self.stack.clone(),
            vars: self.vars.clone(),
            bound: self.bound.clone(),
            next_uid: self.next_uid,
            blocks: self.blocks.iter().map(Vec::len).collect(),
            calls: self.calls.len(),
            actions: self.actions.len(),
            pending_return: self.pending_return.clone(),
        }
    }

    /// Undoes everything replayed since `checkpoint`, including declarations
    /// emitted into enclosing blocks.
    fn rewind(&mut self, checkpoint: &Checkpoint) {
        self.stack = checkpoint.stack.clone();
        self.vars = checkpoint.vars.clone();
        self.bound = checkpoint.bound.clone();
        self.next_uid = checkpoint.next_uid;
        for (block, len) in self.blocks.iter_mut().zip(&checkpoint.blocks) {
            block.truncate(*len);
        }
        self.calls.truncate(checkpoint.calls);
        self.actions.truncate(checkpoint.actions);
        self.pending_return = checkpoint.pending_return.clone();
        self.saved = None;
    }

    /// ```text
    ///     JZ else  <then>  JMP end
    /// else: <otherwise>
    /// end:
    /// ```
    /// When neither arm has statements and both leave a value of the same
    /// size, the whole thing is a `?:` and its value stays on the stack.
    fn replay_if(&mut self, pos: usize, end: usize) -> usize {
        let cond = self.pop_value(pos, WORD).0;
        let Some(target) = self.cfg.target(pos).filter(|&t| t > pos && t <= end) else {
            let text = format!("if ({}) {}", Expr::unary(UnaryOp::Not, cond), self.jump_text(pos));
            self.placeholder(pos, text);
            return pos + 1;
        };

        let program = self.program;
        let else_end = Some(target - 1)
            .filter(|&j| j > pos)
            .filter(|&j| program.at(j).map(|i| i.opcode) == Some(Opcode::Jmp))
            .and_then(|j| self.cfg.target(j))
            .filter(|&e| e > target && e <= end && !self.is_structural(e))
            // a jump from the first arm into the second means there is no else
            .filter(|&e| !self.jumps_into(pos + 1..target - 1, target..e));

        let snapshot = self.stack.clone();
        let (then, otherwise, next) = match else_end {
            Some(e) => {
                let height = self.height();
                let then = self.nested(|r| r.walk(pos + 1, target - 1));
                let then_value = self.arm_value(&then, height);
                self.restore(snapshot.clone());
                let otherwise = self.nested(|r| r.walk(target, e));
                let else_value = self.arm_value(&otherwise, height);
                if let (Some((a, ty, n)), Some((b, _, m))) = (then_value, else_value) {
                    if n == m {
                        self.restore(snapshot);
                        self.stack
                            .push(Entry::temp(Expr::ternary(cond, a, b), ty, n));
                        return e;
                    }
                }
                (then, otherwise, e)
            }
            None => (self.nested(|r| r.walk(pos + 1, target)), Vec::new(), target),
        };
        self.restore(snapshot);
        self.emit(Stmt::If {
            cond,
            then,
            otherwise,
        });
        next
    }

    /// ```text
    /// STORE_STATE  JMP after  <expression statement>  RETN
    /// after:
    /// ```
    fn replay_closure(&mut self, pos: usize) -> usize {
        let program = self.program;
        let after = Some(pos + 1)
            .filter(|&j| program.at(j).map(|i| i.opcode) == Some(Opcode::Jmp))
            .and_then(|j| self.cfg.target(j))
            .filter(|&t| t > pos + 2);
        let Some(after) = after else {
            self.placeholder(pos, "deferred action without a body".to_string());
            return pos + 1;
        };
        let body_end = if program.at(after - 1).map(|i| i.opcode) == Some(Opcode::Retn) {
            after - 1
        } else {
            after
        };

        let snapshot = self.stack.clone();
        let frames = std::mem::take(&mut self.frames);
        let pending = self.pending_return.take();
        let retn = self.retn.take();
        let body = self.nested(|r| r.walk(pos + 2, body_end));
        self.frames = frames;
        self.pending_return = pending;
        self.retn = retn;
        self.restore(snapshot);

        let action = match body.as_slice() {
            [Stmt::Expr(expr)] => expr.clone(),
            _ => {
                warn!(index = pos, "deferred action is not a single expression");
                Expr::Raw(format!("/* deferred action at 0x{:04X} */", self.offsets[pos]))
            }
        };
        self.actions.push(action);
        after
    }

    /// ```text
    ///     <value>
    ///     CPTOPSP -4,4  CONST c  EQUAL  JNZ arm    ; per case label
    ///     JMP default | exit
    /// arm: ...                                     ; arms fall through
    /// exit: MOVSP -4
    /// ```
    fn dispatch(&self, pos: usize, end: usize) -> Option<Dispatch> {
        let program = self.program;
        if self.stack.last()?.size != WORD {
            return None;
        }
        let mut cases = Vec::new();
        let mut ip = pos;
        while let Some(dup) = program.at(ip).filter(|i| i.opcode == Opcode::CpTopSp) {
            if dup.int_arg(0) != Some(-WORD) || dup.int_arg(1) != Some(WORD) {
                return None;
            }
            let label = match program.at(ip + 1).filter(|i| i.opcode == Opcode::Const)?.args.first()? {
                Operand::Int(n) => Expr::Int(*n),
                Operand::Str(s) => Expr::Str(s.clone()),
                _ => return None,
            };
            let equal = program.at(ip + 2)?;
            if equal.opcode != Opcode::Equal
                || !matches!(equal.qualifier, Qualifier::IntInt | Qualifier::StringString)
            {
                return None;
            }
            if program.at(ip + 3)?.opcode != Opcode::Jnz {
                return None;
            }
            cases.push((label, self.cfg.target(ip + 3)?));
            ip += 4;
        }
        if cases.is_empty() || program.at(ip)?.opcode != Opcode::Jmp {
            return None;
        }
        let fallback = self.cfg.target(ip)?;
        let starts = || cases.iter().map(|(_, t)| *t).chain(Some(fallback));
        if !starts().all(|t| t > ip && t < end) {
            return None;
        }
        // arms never start by popping, so a target that does is the exit
        let exit = starts().find(|&t| self.pops_word(t));
        let default = (!self.pops_word(fallback)).then_some(fallback);
        Some(Dispatch {
            cases,
            default,
            exit,
        })
    }

    fn replay_switch(&mut self, pos: usize, end: usize, dispatch: Dispatch) -> usize {
        let value = self.read_entry(self.stack.len() - 1).expr;
        self.neutralize(WORD);
        let height = self.height();
        let snapshot = self.stack.clone();

        let mut starts: Vec<usize> = dispatch
            .cases
            .iter()
            .map(|(_, t)| *t)
            .chain(dispatch.default)
            .filter(|&t| Some(t) != dispatch.exit)
            .collect();
        starts.sort_unstable();
        starts.dedup();
        let labels_at = |start: Option<usize>| -> Vec<CaseLabel> {
            let mut labels: Vec<CaseLabel> = dispatch
                .cases
                .iter()
                .filter(|(_, t)| match start {
                    Some(s) => *t == s,
                    None => Some(*t) == dispatch.exit,
                })
                .map(|(label, _)| CaseLabel::Case(label.clone()))
                .collect();
            if start.is_some() && start == dispatch.default {
                labels.push(CaseLabel::Default);
            }
            labels
        };

        self.frames.push(Frame::Switch {
            height,
            exit: dispatch.exit,
        });
        let mut arms = Vec::with_capacity(starts.len() + 1);
        for (i, &start) in starts.iter().enumerate() {
            self.restore(snapshot.clone());
            let body = match starts.get(i + 1) {
                Some(&next) => self.nested(|r| r.walk(start, next)),
                None => self.nested(|r| r.walk_last_arm(start, end)),
            };
            arms.push(SwitchArm {
                labels: labels_at(Some(start)),
                body,
            });
        }
        let exit = match self.frames.pop() {
            Some(Frame::Switch { exit, .. }) => exit,
            _ => None,
        };
        self.restore(snapshot);

        let Some(exit) = exit else {
            self.placeholder(pos, "switch without an end".to_string());
            return end;
        };
        // labels that go straight to the exit share an empty last arm
        let trailing = labels_at(None);
        if !trailing.is_empty() {
            arms.push(SwitchArm {
                labels: trailing,
                body: Vec::new(),
            });
        }
        self.stack.pop();
        self.emit(Stmt::Switch { value, arms });
        exit + 1
    }

    /// The last arm runs until the value is back on top and about to be
    /// dropped.
    fn walk_last_arm(&mut self, start: usize, end: usize) {
        let mut pos = start;
        while pos < end {
            let at_exit = match self.frames.last() {
                Some(Frame::Switch { exit: Some(exit), .. }) => *exit == pos,
                Some(Frame::Switch { height, exit: None }) => {
                    *height == self.height() && self.pops_word(pos)
                }
                _ => false,
            };
            if at_exit {
                if let Some(Frame::Switch { exit, .. }) = self.frames.last_mut() {
                    *exit = Some(pos);
                }
                break;
            }
            pos = self.step(pos, end);
        }
        self.saved = None;
    }

    fn pops_word(&self, pos: usize) -> bool {
        self.program
            .at(pos)
            .is_some_and(|i| i.opcode == Opcode::MovSp && i.int_arg(0) == Some(-WORD))
    }

    /// Whether a jump at the current height to `target` leaves the innermost
    /// switch.
    fn leaves_switch(&self, target: usize) -> bool {
        match self.frames.last() {
            Some(Frame::Switch { exit: Some(exit), .. }) => *exit == target,
            Some(Frame::Switch { height, exit: None }) => {
                *height == self.height() && self.pops_word(target)
            }
            _ => false,
        }
    }

    fn innermost_loop(&self) -> Option<(usize, usize, usize)> {
        self.frames.iter().rev().find_map(|f| match *f {
            Frame::Loop {
                header, back, exit, ..
            } => Some((header, back, exit)),
            Frame::Switch { .. } => None,
        })
    }

    fn is_structural(&self, target: usize) -> bool {
        Some(target) == self.retn
            || self.leaves_switch(target)
            || self.frames.iter().any(|f| {
                matches!(*f, Frame::Loop { header, exit, .. } if header == target || exit == target)
            })
    }

    fn jumps_into(&self, from: Range<usize>, into: Range<usize>) -> bool {
        from.into_iter()
            .any(|ip| self.cfg.target(ip).is_some_and(|t| into.contains(&t)))
    }

    /// The value an arm of a `?:` left on the stack, if the arm did nothing
    /// else.
    fn arm_value(&mut self, stmts: &[Stmt], height: i32) -> Option<(Expr, Type, i32)> {
        let grown = self.height() - height;
        if !stmts.is_empty() || grown <= 0 {
            return None;
        }
        let (expr, ty, _) = self.top_value(grown)?;
        Some((expr, ty, grown))
    }

    // =========================================================================
    // Instructions
    // =========================================================================

    fn replay(&mut self, pos: usize, ins: &Instruction) {
        let arg = |i| ins.int_arg(i).unwrap_or(0);
        match ins.opcode {
            Opcode::Nop | Opcode::StoreStateAll | Opcode::StoreState | Opcode::Jz => {}
            Opcode::RsAdd => {
                let ty = Type::from_qualifier(ins.qualifier).unwrap_or(Type::Int);
                let uid = self.next_uid;
                self.next_uid += 1;
                let depth = self.depth();
                self.stack.push(Entry {
                    expr: Expr::Raw("/* uninitialized */".to_string()),
                    ty,
                    size: WORD,
                    slot: Slot::Reserved { depth, uid },
                });
            }
            Opcode::Const => self.push_const(ins),
            Opcode::CpTopSp => {
                let entry = self.read_sp(pos, arg(0), arg(1));
                self.stack.push(entry);
            }
            Opcode::CpDownSp => self.write_sp(pos, arg(0), arg(1)),
            Opcode::CpTopBp => {
                let entry = match self.global_place(arg(0), arg(1)) {
                    Some((expr, ty)) => Entry::temp(expr, ty, arg(1)),
                    None => self.unknown(pos, arg(1), format!("global at {}", arg(0))),
                };
                self.stack.push(entry);
            }
            Opcode::CpDownBp => {
                let size = arg(1);
                match self.global_place(arg(0), size) {
                    Some((expr, _)) => {
                        let value = self.peek_value(pos, size);
                        self.assign(pos, Place { expr, var: None }, value, size);
                    }
                    None => self.placeholder(pos, format!("copy to global at {}", arg(0))),
                }
            }
            Opcode::MovSp => self.discard(pos, -arg(0)),
            Opcode::IncSp | Opcode::DecSp => {
                let place = self
                    .locate(arg(0), WORD)
                    .and_then(|(range, inner)| self.place(range, inner, WORD));
                self.replay_step(pos, ins.opcode == Opcode::IncSp, place);
            }
            Opcode::IncBp | Opcode::DecBp => {
                let place = self
                    .global_place(arg(0), WORD)
                    .map(|(expr, _)| Place { expr, var: None });
                self.replay_step(pos, ins.opcode == Opcode::IncBp, place);
            }
            Opcode::Action => self.replay_action(pos, ins),
            Opcode::Jsr => self.replay_call(pos),
            Opcode::Jmp => self.replay_jump(pos),
            Opcode::Jnz => {
                let cond = self.pop_value(pos, WORD).0;
                let text = format!("if ({}) {}", cond, self.jump_text(pos));
                self.placeholder(pos, text);
            }
            Opcode::Retn => {
                let value = self.pending_return.take();
                self.emit(Stmt::Return(value));
            }
            Opcode::Neg | Opcode::Comp | Opcode::Not => {
                let (words, _) = ins.qualifier.operand_words();
                let (operand, ty) = self.pop_value(pos, words * WORD);
                let expr = match UnaryOp::from_opcode(ins.opcode) {
                    Some(op) => Expr::unary(op, operand),
                    None => operand,
                };
                let size = words * WORD;
                self.stack.push(Entry::temp(expr, ty, size));
            }
            Opcode::SaveBp => self.stack.push(Entry::temp(
                Expr::Raw("/* saved base pointer */".to_string()),
                Type::Int,
                WORD,
            )),
            Opcode::RestoreBp => self.drop_bytes(WORD),
            Opcode::Destruct => {
                self.drop_bytes(arg(0));
                let entry = self.unknown(pos, arg(2), "destructured value".to_string());
                self.stack.push(entry);
            }
            _ => self.replay_binary(pos, ins),
        }
    }

    fn push_const(&mut self, ins: &Instruction) {
        let (expr, ty) = match ins.args.first() {
            Some(Operand::Int(n)) => (Expr::Int(*n), Type::Int),
            Some(Operand::Float(x)) => (Expr::Float(*x), Type::Float),
            Some(Operand::Str(s)) => (Expr::Str(s.clone()), Type::String),
            Some(Operand::Object(n)) => (Expr::Object(*n), Type::Object),
            None => (Expr::Raw("/* constant */".to_string()), Type::Int),
        };
        let ty = match (ins.qualifier, ty) {
            (Qualifier::Object, _) => Type::Object,
            (_, ty) => ty,
        };
        self.stack.push(Entry::temp(expr, ty, WORD));
    }

    fn replay_binary(&mut self, pos: usize, ins: &Instruction) {
        let Some((op, result)) = binary_result(ins.opcode, ins.qualifier) else {
            self.placeholder(pos, format!("unsupported instruction {}", ins.mnemonic()));
            return;
        };
        let (lhs_size, rhs_size) = if ins.qualifier == Qualifier::StructStruct {
            let size = ins.int_arg(0).unwrap_or(WORD);
            (size, size)
        } else {
            let (lhs, rhs) = ins.qualifier.operand_words();
            (lhs * WORD, rhs * WORD)
        };
        let rhs = self.pop_value(pos, rhs_size).0;
        let lhs = self.pop_value(pos, lhs_size).0;
        let size = type_size(&result);
        self.stack.push(Entry::temp(Expr::binary(op, lhs, rhs), result, size));
    }

    /// `INC`/`DEC` right after a read of the same variable is a postfix
    /// operator on that read; anything else is a prefix statement.
    fn replay_step(&mut self, pos: usize, increment: bool, place: Option<Place>) {
        let Some(place) = place else {
            self.placeholder(pos, "increment of an unknown location".to_string());
            return;
        };
        if let Some(id) = place.var {
            self.ensure_declared(id);
        }
        let after_read = pos > 0
            && matches!(
                self.program.at(pos - 1).map(|i| i.opcode),
                Some(Opcode::CpTopSp | Opcode::CpTopBp)
            );
        let postfix = after_read
            && self
                .stack
                .last()
                .is_some_and(|top| top.slot == Slot::Temp && top.expr == place.expr);
        let step = Expr::IncDec {
            target: Box::new(place.expr),
            increment,
            prefix: !postfix,
        };
        match self.stack.last_mut() {
            Some(top) if postfix => top.expr = step,
            _ => self.emit(Stmt::Expr(step)),
        }
    }

    /// Arguments are pushed last first, so the first parameter comes off the
    /// stack first. `action` parameters come from deferred blocks instead.
    fn replay_action(&mut self, pos: usize, ins: &Instruction) {
        let index = ins.int_arg(0).unwrap_or(0);
        let argc = usize::try_from(ins.int_arg(1).unwrap_or(0)).unwrap_or(0);
        let catalog = self.catalog;
        let Some(routine) = u16::try_from(index)
            .ok()
            .and_then(|i| catalog.routine_by_index(i))
        else {
            warn!(index = pos, routine = index, "engine routine is not in the catalog");
            let mut args = Vec::with_capacity(argc);
            for _ in 0..argc {
                args.push(self.pop_value(pos, WORD).0);
            }
            self.emit(Stmt::Expr(Expr::Call(format!("Routine{}", index), args)));
            return;
        };

        let mut args = Vec::with_capacity(argc);
        for param in routine.params.iter().take(argc) {
            let arg = if param.ty == Type::Action {
                self.actions
                    .pop()
                    .unwrap_or_else(|| Expr::Raw("/* action */".to_string()))
            } else {
                self.pop_value(pos, type_size(&param.ty)).0
            };
            args.push(arg);
        }
        let call = Expr::Call(routine.name.clone(), args);
        let size = type_size(&routine.returns);
        if size > 0 {
            self.stack
                .push(Entry::temp(call, routine.returns.clone(), size));
        } else {
            self.emit(Stmt::Expr(call));
        }
    }

    fn replay_call(&mut self, pos: usize) {
        let Some(target) = self.cfg.target(pos) else {
            self.placeholder(pos, "call without a target".to_string());
            return;
        };
        if !self.calls.contains(&target) {
            self.calls.push(target);
        }
        let Some(callee) = self.callees.get(&target).cloned() else {
            let text = format!("call to 0x{:04X}", self.offsets[target]);
            self.placeholder(pos, text);
            return;
        };

        let mut args = Vec::new();
        let mut seen = Vec::new();
        match &callee.params {
            Some(params) => {
                for (_, size) in params {
                    args.push(self.pop_value(pos, *size).0);
                }
            }
            None => {
                let mut left = callee.param_bytes;
                while left > 0 {
                    let Some(top) = self.stack.last().map(|e| e.size) else {
                        break;
                    };
                    let size = top.min(left);
                    let (expr, ty) = self.pop_value(pos, size);
                    args.push(expr);
                    seen.push((ty, size));
                    left -= size;
                }
            }
        }

        let returns = if callee.return_bytes > 0 {
            let ty = callee
                .returns
                .clone()
                .unwrap_or_else(|| self.top_type(callee.return_bytes));
            self.drop_bytes(callee.return_bytes);
            Some(ty)
        } else {
            None
        };
        if let Some(entry) = self.callees.get_mut(&target) {
            if entry.params.is_none() {
                entry.params = Some(seen);
            }
            if entry.returns.is_none() {
                entry.returns = Some(returns.clone().unwrap_or(Type::Void));
            }
        }

        let call = Expr::Call(callee.name, args);
        match returns {
            Some(ty) => self
                .stack
                .push(Entry::temp(call, ty, callee.return_bytes)),
            None => self.emit(Stmt::Expr(call)),
        }
    }

    fn replay_jump(&mut self, pos: usize) {
        let target = self.cfg.target(pos);
        let innermost = self.innermost_loop();
        let breaks_loop = matches!(
            (self.frames.last(), target),
            (Some(Frame::Loop { exit, .. }), Some(t)) if *exit == t
        );
        let mut returned_value = false;
        let stmt = match (target, innermost) {
            (Some(t), _) if breaks_loop || self.leaves_switch(t) => {
                if let Some(Frame::Switch { exit, .. }) = self.frames.last_mut() {
                    *exit = Some(t);
                }
                Some(Stmt::Break)
            }
            (Some(t), Some((header, _, _))) if t == header => Some(Stmt::Continue),
            // the step of a `for` or the condition of a `do`
            (Some(t), Some((_, back, _))) if t > pos && t <= back => {
                self.note_step(t);
                Some(Stmt::Continue)
            }
            (Some(t), _) if Some(t) == self.retn => {
                let value = self.pending_return.take();
                returned_value = value.is_some();
                Some(Stmt::Return(value))
            }
            (Some(t), _) if t == pos + 1 => None,
            _ => {
                let text = self.jump_text(pos);
                warn!(index = pos, "unstructured jump: {}", text);
                Some(Stmt::Placeholder(text))
            }
        };
        if let Some(stmt) = stmt {
            self.emit(stmt);
        }
        // code after the jump sees the stack as it was before leaving
        if let Some(saved) = self.saved.take() {
            self.restore(saved);
            if returned_value {
                self.stack.pop();
            }
        }
    }

    fn discard(&mut self, pos: usize, bytes: i32) {
        if self.program.at(pos + 1).map(|i| i.opcode) == Some(Opcode::Jmp) {
            self.saved = Some(self.stack.clone());
        }
        let mut effects = Vec::new();
        let mut left = bytes;
        while left > 0 {
            let Some(mut entry) = self.stack.pop() else {
                warn!(index = pos, "stack emptied by MOVSP");
                break;
            };
            if entry.size > left {
                entry.size -= left;
                entry.expr = Expr::Raw("/* partial value */".to_string());
                entry.slot = Slot::Temp;
                self.stack.push(entry);
                break;
            }
            left -= entry.size;
            if entry.slot == Slot::Temp && entry.expr.has_effect() {
                effects.push(entry.expr);
            }
        }
        for expr in effects.into_iter().rev() {
            self.emit(Stmt::Expr(expr));
        }
    }

    // =========================================================================
    // Stack addressing
    // =========================================================================

    /// Entries covering `[SP + offset, SP + offset + size)` and where the
    /// range starts inside the lowest of them.
    fn locate(&self, offset: i32, size: i32) -> Option<(Range<usize>, i32)> {
        if offset >= 0 || size <= 0 {
            return None;
        }
        let (lo, hi) = (offset, offset + size);
        let mut upper = 0;
        let mut found: Option<(usize, usize, i32)> = None;
        for index in (0..self.stack.len()).rev() {
            let lower = upper - self.stack[index].size;
            if lower < hi && lo < upper {
                let last = found.map(|(_, last, _)| last).unwrap_or(index);
                found = Some((index, last, lo - lower));
            }
            if lower <= lo {
                break;
            }
            upper = lower;
        }
        let (first, last, inner) = found?;
        (inner >= 0).then_some((first..last + 1, inner))
    }

    fn covers(&self, range: &Range<usize>, size: i32) -> bool {
        self.stack[range.clone()].iter().map(|e| e.size).sum::<i32>() == size
    }

    fn all_reserved(&self, range: &Range<usize>) -> bool {
        self.stack[range.clone()]
            .iter()
            .all(|e| matches!(e.slot, Slot::Reserved { .. }))
    }

    fn read_sp(&mut self, pos: usize, offset: i32, size: i32) -> Entry {
        let Some((range, inner)) = self.locate(offset, size) else {
            return self.unknown(pos, size, format!("stack read at {}", offset));
        };
        if range.len() == 1 {
            let index = range.start;
            let (entry_size, is_vector) = {
                let entry = &self.stack[index];
                (entry.size, entry.ty == Type::Vector)
            };
            if inner == 0 && entry_size == size {
                return self.read_entry(index);
            }
            if is_vector && size == WORD && inner % WORD == 0 {
                let base = self.read_entry(index).expr;
                let member = COMPONENTS[(inner / WORD) as usize];
                return Entry::temp(Expr::Field(Box::new(base), member), Type::Float, WORD);
            }
        } else if inner == 0 && self.covers(&range, size) {
            if self.all_reserved(&range) {
                let index = self.bind(range);
                return self.read_entry(index);
            }
            if range.len() == 3 && size == 3 * WORD {
                let start = range.start;
                let parts = [0, 1, 2].map(|k| self.read_entry(start + k).expr);
                return Entry::temp(Expr::Vector(Box::new(parts)), Type::Vector, size);
            }
        }
        self.unknown(pos, size, format!("stack read at {}", offset))
    }

    /// A copy of the entry's value, naming it first if it is a reservation.
    fn read_entry(&mut self, index: usize) -> Entry {
        let slot = self.stack[index].slot;
        match slot {
            Slot::Reserved { .. } => {
                let index = self.bind(index..index + 1);
                self.read_entry(index)
            }
            Slot::Var(id) => {
                self.ensure_declared(id);
                let var = &self.vars[id];
                Entry::temp(
                    Expr::Var(var.name.clone()),
                    var.ty.clone(),
                    self.stack[index].size,
                )
            }
            Slot::Temp | Slot::Return => {
                let entry = &self.stack[index];
                Entry::temp(entry.expr.clone(), entry.ty.clone(), entry.size)
            }
        }
    }

    fn write_sp(&mut self, pos: usize, offset: i32, size: i32) {
        let value = self.peek_value(pos, size);
        let Some((range, inner)) = self.locate(offset, size) else {
            self.placeholder(pos, format!("copy to stack offset {}", offset));
            return;
        };
        if range.len() == 1 && inner == 0 {
            let index = range.start;
            let (slot, entry_size) = (self.stack[index].slot, self.stack[index].size);
            match slot {
                Slot::Return => {
                    self.pending_return = Some(value);
                    self.neutralize(size);
                    return;
                }
                Slot::Temp if entry_size == size => {
                    self.stack[index].expr = value;
                    return;
                }
                // `base.member`: the member copied over the start of a
                // pushed value whose remainder is popped next.
                Slot::Temp if entry_size > size && index + 2 == self.stack.len() => {
                    let ty = self.top_type(size);
                    let rest = Entry::temp(Expr::Raw(String::new()), Type::Int, entry_size - size);
                    self.stack[index] = Entry::temp(value, ty, size);
                    self.stack.insert(index + 1, rest);
                    self.neutralize(size);
                    return;
                }
                _ => {}
            }
        }
        match self.place(range, inner, size) {
            Some(place) => self.assign(pos, place, value, size),
            None => self.placeholder(pos, format!("copy to stack offset {}", offset)),
        }
    }

    fn place(&mut self, range: Range<usize>, inner: i32, size: i32) -> Option<Place> {
        let index = if range.len() == 1 {
            let entry = &self.stack[range.start];
            let exact = inner == 0 && entry.size == size;
            let component = entry.ty == Type::Vector && size == WORD && inner % WORD == 0;
            let slot = entry.slot;
            match slot {
                Slot::Reserved { .. } if exact => self.bind(range),
                Slot::Var(_) if exact => range.start,
                Slot::Var(id) if component => {
                    let base = Expr::Var(self.vars[id].name.clone());
                    let member = COMPONENTS[(inner / WORD) as usize];
                    return Some(Place {
                        expr: Expr::Field(Box::new(base), member),
                        var: Some(id),
                    });
                }
                _ => return None,
            }
        } else if inner == 0 && self.covers(&range, size) && self.all_reserved(&range) {
            self.bind(range)
        } else {
            return None;
        };
        let slot = self.stack[index].slot;
        match slot {
            Slot::Var(id) => Some(Place {
                expr: Expr::Var(self.vars[id].name.clone()),
                var: Some(id),
            }),
            _ => None,
        }
    }

    fn global_place(&self, offset: i32, size: i32) -> Option<(Expr, Type)> {
        let global = self
            .globals
            .iter()
            .find(|g| g.offset <= offset && offset + size <= g.offset + g.size)?;
        let inner = offset - global.offset;
        let base = Expr::Var(global.name.clone());
        if inner == 0 && size == global.size {
            return Some((base, global.ty.clone()));
        }
        if global.ty == Type::Vector && size == WORD && inner % WORD == 0 {
            let member = COMPONENTS[(inner / WORD) as usize];
            return Some((Expr::Field(Box::new(base), member), Type::Float));
        }
        None
    }

    /// Statement form when the copied value is popped right away, nested
    /// assignment otherwise.
    fn assign(&mut self, pos: usize, place: Place, value: Expr, size: i32) {
        let popped = self
            .program
            .at(pos + 1)
            .is_some_and(|i| i.opcode == Opcode::MovSp && i.int_arg(0) == Some(-size));
        if !popped {
            if let Some(id) = place.var {
                self.ensure_declared(id);
            }
            let ty = self.top_type(size);
            self.drop_bytes(size);
            self.stack
                .push(Entry::temp(Expr::assign(place.expr, value), ty, size));
            return;
        }

        self.neutralize(size);
        if let Some(id) = place.var {
            let var = &self.vars[id];
            let whole = place.expr == Expr::Var(var.name.clone());
            if whole && !var.declared && var.depth + 1 == self.blocks.len() {
                let stmt = Stmt::Declare {
                    ty: var.ty.clone(),
                    name: var.name.clone(),
                    init: Some(value),
                };
                self.vars[id].declared = true;
                self.emit(stmt);
                return;
            }
            self.ensure_declared(id);
        }
        self.emit(Stmt::Expr(Expr::assign(place.expr, value)));
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// The value held by the top `size` bytes, and how many entries hold it.
    fn top_value(&mut self, size: i32) -> Option<(Expr, Type, usize)> {
        let len = self.stack.len();
        let top = self.stack.last()?;
        if top.size == size {
            let entry = self.read_entry(len - 1);
            return Some((entry.expr, entry.ty, 1));
        }
        if size == 3 * WORD && len >= 3 && self.stack[len - 3..].iter().all(|e| e.size == WORD) {
            let parts = [0, 1, 2].map(|k| self.read_entry(len - 3 + k).expr);
            return Some((Expr::Vector(Box::new(parts)), Type::Vector, 3));
        }
        None
    }

    fn peek_value(&mut self, pos: usize, size: i32) -> Expr {
        match self.top_value(size) {
            Some((expr, _, _)) => expr,
            None => {
                warn!(index = pos, size, "value of unexpected shape on the stack");
                Expr::Raw("/* ? */".to_string())
            }
        }
    }

    fn pop_value(&mut self, pos: usize, size: i32) -> (Expr, Type) {
        match self.top_value(size) {
            Some((expr, ty, count)) => {
                let len = self.stack.len();
                self.stack.truncate(len - count);
                (expr, ty)
            }
            None => {
                warn!(index = pos, size, "value of unexpected shape on the stack");
                self.drop_bytes(size);
                (Expr::Raw("/* ? */".to_string()), Type::Int)
            }
        }
    }

    fn height(&self) -> i32 {
        self.stack.iter().map(|e| e.size).sum()
    }

    fn top_type(&self, size: i32) -> Type {
        match self.stack.last() {
            Some(top) if top.size == size => top.ty.clone(),
            _ if size == 3 * WORD => Type::Vector,
            _ => Type::Int,
        }
    }

    fn drop_bytes(&mut self, bytes: i32) {
        let mut left = bytes;
        while left > 0 {
            let Some(mut entry) = self.stack.pop() else {
                return;
            };
            if entry.size > left {
                entry.size -= left;
                entry.expr = Expr::Raw("/* partial value */".to_string());
                entry.slot = Slot::Temp;
                self.stack.push(entry);
                return;
            }
            left -= entry.size;
        }
    }

    /// Marks the top `size` bytes as already used so popping them emits
    /// nothing.
    fn neutralize(&mut self, size: i32) {
        let mut left = size;
        for entry in self.stack.iter_mut().rev() {
            if left <= 0 {
                break;
            }
            left -= entry.size;
            if entry.slot == Slot::Temp {
                entry.expr = Expr::Raw(String::new());
            }
        }
    }

    fn unknown(&self, pos: usize, size: i32, what: String) -> Entry {
        warn!(index = pos, "cannot resolve {}", what);
        Entry::temp(Expr::Raw(format!("/* {} */", what)), Type::Int, size)
    }

    // =========================================================================
    // Variables
    // =========================================================================

    fn depth(&self) -> usize {
        self.blocks.len().saturating_sub(1)
    }

    /// Turns the reservations in `range` into one variable and returns its
    /// stack index.
    fn bind(&mut self, range: Range<usize>) -> usize {
        let start = range.start;
        let entries: Vec<Entry> = self.stack.drain(range).collect();
        let size: i32 = entries.iter().map(|e| e.size).sum();
        let ty = match entries.as_slice() {
            [single] => single.ty.clone(),
            parts if size == 3 * WORD && parts.iter().all(|e| e.ty == Type::Float) => Type::Vector,
            _ => Type::Struct(format!("Anonymous{}", size)),
        };
        let (depth, uid) = match entries.first().map(|e| e.slot) {
            Some(Slot::Reserved { depth, uid }) => (depth, Some(uid)),
            _ => (self.depth(), None),
        };
        let id = self.new_var(ty.clone(), depth);
        if let Some(uid) = uid {
            self.bound.insert(uid, (id, entries.len()));
        }
        self.stack.insert(
            start,
            Entry {
                expr: Expr::Var(self.vars[id].name.clone()),
                ty,
                size,
                slot: Slot::Var(id),
            },
        );
        start
    }

    fn new_var(&mut self, ty: Type, depth: usize) -> usize {
        let kind = match self.naming {
            Naming::Local => "Var",
            Naming::Global => "Global",
        };
        let locals = self.vars.iter().filter(|v| !v.name.contains("Param")).count();
        let name = format!("{}{}{}", prefix(&ty), kind, locals + 1);
        self.vars.push(Var {
            name,
            ty,
            declared: false,
            depth,
        });
        self.vars.len() - 1
    }

    /// Declares a variable without an initializer in the statement list it
    /// was reserved in, if nothing has declared it yet.
    fn ensure_declared(&mut self, id: usize) {
        let var = &mut self.vars[id];
        if var.declared {
            return;
        }
        var.declared = true;
        let stmt = Stmt::Declare {
            ty: var.ty.clone(),
            name: var.name.clone(),
            init: None,
        };
        let depth = var.depth.min(self.blocks.len().saturating_sub(1));
        if let Some(list) = self.blocks.get_mut(depth) {
            list.push(stmt);
        }
    }

    /// Puts back a saved stack, re-applying the variable bindings made since.
    fn restore(&mut self, snapshot: Vec<Entry>) {
        self.stack = snapshot;
        let mut index = 0;
        while index < self.stack.len() {
            let slot = self.stack[index].slot;
            if let Slot::Reserved { uid, .. } = slot {
                if let Some(&(id, count)) = self.bound.get(&uid) {
                    let end = (index + count).min(self.stack.len());
                    let size = self.stack[index..end].iter().map(|e| e.size).sum();
                    let var = &self.vars[id];
                    let entry = Entry {
                        expr: Expr::Var(var.name.clone()),
                        ty: var.ty.clone(),
                        size,
                        slot: Slot::Var(id),
                    };
                    self.stack.drain(index..end);
                    self.stack.insert(index, entry);
                }
            }
            index += 1;
        }
    }

    // =========================================================================
    // Output
    // =========================================================================

    fn emit(&mut self, stmt: Stmt) {
        if let Some(list) = self.blocks.last_mut() {
            list.push(stmt);
        }
    }

    fn placeholder(&mut self, pos: usize, text: String) {
        warn!(index = pos, "decompiler placeholder: {}", text);
        self.emit(Stmt::Placeholder(text));
    }

    fn jump_text(&self, pos: usize) -> String {
        match self.cfg.target(pos) {
            Some(target) => format!("jump to 0x{:04X}", self.offsets[target]),
            None => "jump to an unknown target".to_string(),
        }
    }
}
