//! # NCS decompiler
//!
//! Turns compiled bytecode back into NWScript source.
//!
//! ## Pipeline
//!
//! 1. Decode the bytes into a [`Program`].
//! 2. Build the control-flow graph and find subroutines ([`cfg`]).
//! 3. Recognise the entry stub and the global block, if any.
//! 4. Size every subroutine's parameters and result with the stack checker.
//! 5. Replay each subroutine over a symbolic stack ([`replay`]), callers
//!    before callees so argument types are known when a callee is replayed.
//! 6. Render globals, prototypes and definitions ([`expr`]).
//!
//! The output is meant to recompile to equivalent bytecode, not to reproduce
//! the original source. Names are synthesized from types (`nVar1`,
//! `fParam2`, `sub3`), and control flow the replayer cannot structure shows
//! up as an `#error` line, so the text never recompiles to something else.

pub mod cfg;
pub mod decompile_error;
pub mod expr;
pub mod replay;

pub use decompile_error::DecompileError;

use std::collections::{BTreeMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::bytecode::decode::decode;
use crate::bytecode::encode;
use crate::bytecode::ir::Program;
use crate::bytecode::op::{Opcode, Qualifier};
use crate::bytecode::stack_check::summarize;
use crate::decompile::cfg::{subroutines, Cfg};
use crate::decompile::expr::{render_block, Stmt};
use crate::decompile::replay::{Callee, Global, Naming, Replayer};
use crate::lang::catalog::Catalog;
use crate::lang::types::{Type, WORD};

#[derive(Debug, Clone, Default)]
pub struct DecompileOptions {
    /// Append the original bytecode to the source as a comment block, so
    /// compiling the output reproduces the input exactly.
    pub embed_bytecode: bool,
}

/// One reconstructed function.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    /// Position of the first instruction.
    pub entry: usize,
    pub returns: Type,
    pub params: Vec<(Type, String)>,
    pub body: Vec<Stmt>,
    /// `main` or `StartingConditional`.
    pub is_entry: bool,
}

impl Function {
    fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(ty, name)| format!("{} {}", ty, name))
            .collect();
        format!("{} {}({})", self.returns, self.name, params.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecompiledUnit {
    pub instructions: usize,
    pub globals: Vec<Stmt>,
    /// Ordered by entry position.
    pub functions: Vec<Function>,
}

impl DecompiledUnit {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// NWScript source text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "// Decompiled NCS bytecode: {} instructions, {} functions\n",
            self.instructions,
            self.functions.len()
        ));
        if !self.globals.is_empty() {
            out.push('\n');
            render_block(&mut out, &self.globals, 0);
        }

        let prototypes: Vec<&Function> = self.functions.iter().filter(|f| !f.is_entry).collect();
        if !prototypes.is_empty() {
            out.push('\n');
            for function in prototypes {
                out.push_str(&format!("{};\n", function.signature()));
            }
        }

        for function in &self.functions {
            out.push_str(&format!("\n{} {{\n", function.signature()));
            render_block(&mut out, &function.body, 1);
            out.push_str("}\n");
        }
        out
    }
}

/// Decodes and decompiles an NCS file.
pub fn decompile_bytes(bytes: &[u8], catalog: &Catalog) -> Result<DecompiledUnit, DecompileError> {
    let program = decode(bytes)?;
    decompile_program(&program, catalog)
}

/// How the program is entered.
struct Layout {
    /// Position of the stub at 0, when there is one.
    stub: Option<usize>,
    /// The global block and its `SAVEBP`.
    globals: Option<(usize, usize)>,
    /// The entry function and whether it is `StartingConditional`.
    entry: Option<(usize, bool)>,
}

impl Layout {
    /// ```text
    /// [RSADDI] JSR entry RETN
    /// [RSADDI] JSR G     RETN   G: <globals> SAVEBP [RSADDI] JSR entry ...
    /// ```
    /// Anything else is a library: every subroutine is a plain function.
    fn recognize(program: &Program, cfg: &Cfg) -> Layout {
        let opcode = |ip: usize| program.at(ip).map(|i| (i.opcode, i.qualifier));
        let (jsr, conditional) = match (opcode(0), opcode(1), opcode(2)) {
            (Some((Opcode::RsAdd, Qualifier::Int)), Some((Opcode::Jsr, _)), Some((Opcode::Retn, _))) => {
                (1, true)
            }
            (Some((Opcode::Jsr, _)), Some((Opcode::Retn, _)), _) => (0, false),
            _ => {
                return Layout {
                    stub: None,
                    globals: None,
                    entry: None,
                };
            }
        };
        let Some(first) = cfg.target(jsr) else {
            return Layout {
                stub: Some(0),
                globals: None,
                entry: None,
            };
        };

        let last = cfg.last_reachable(first).unwrap_or(first);
        let savebp = (first..=last).find(|&ip| opcode(ip).map(|o| o.0) == Some(Opcode::SaveBp));
        let Some(savebp) = savebp else {
            return Layout {
                stub: Some(0),
                globals: None,
                entry: Some((first, conditional)),
            };
        };
        let entry = (savebp..=last)
            .find(|&ip| opcode(ip).map(|o| o.0) == Some(Opcode::Jsr))
            .and_then(|ip| cfg.target(ip));
        Layout {
            stub: Some(0),
            globals: Some((first, savebp)),
            entry: entry.map(|e| (e, conditional)),
        }
    }

    fn is_function(&self, position: usize) -> bool {
        self.stub != Some(position) && self.globals.map(|g| g.0) != Some(position)
    }
}

/// Decompiles a decoded program.
pub fn decompile_program(program: &Program, catalog: &Catalog) -> Result<DecompiledUnit, DecompileError> {
    if program.is_empty() {
        return Err(DecompileError::new("program has no instructions"));
    }
    let cfg = Cfg::build(program);
    let offsets = encode::offsets(program);
    let subs = subroutines(program, &cfg);
    debug!(blocks = cfg.blocks.len(), subroutines = subs.len(), "built control-flow graph");

    let layout = Layout::recognize(program, &cfg);
    let functions: Vec<usize> = subs.iter().copied().filter(|&s| layout.is_function(s)).collect();
    if functions.is_empty() {
        return Err(DecompileError::at(0, "no functions found"));
    }

    let mut callees = BTreeMap::new();
    let mut counter = 0;
    for &entry in &functions {
        let (param_bytes, return_bytes) = match summarize(program, entry, Some(catalog)) {
            Ok(Some(summary)) => {
                let net = summary.net.unwrap_or(0);
                (-net, summary.reach + net)
            }
            Ok(None) => (0, 0),
            Err(err) => {
                warn!(index = entry, error = %err, "cannot size subroutine");
                (0, 0)
            }
        };
        let (name, returns) = match layout.entry {
            Some((e, true)) if e == entry => ("StartingConditional".to_string(), Some(Type::Int)),
            Some((e, false)) if e == entry => ("main".to_string(), Some(Type::Void)),
            _ => {
                counter += 1;
                let returns = (return_bytes == 0).then_some(Type::Void);
                (format!("sub{}", counter), returns)
            }
        };
        callees.insert(
            entry,
            Callee {
                name,
                param_bytes,
                return_bytes,
                params: (param_bytes == 0).then(Vec::new),
                returns,
            },
        );
    }

    let (globals_text, globals) = match layout.globals {
        Some((start, savebp)) => {
            let mut replayer = Replayer::new(
                program,
                catalog,
                &cfg,
                &offsets,
                &mut callees,
                &[],
                Naming::Global,
            );
            replayer.run_globals(start, savebp)
        }
        None => (Vec::new(), Vec::new()),
    };

    let mut order: VecDeque<usize> = layout.entry.map(|(e, _)| e).into_iter().collect();
    let mut done = HashSet::new();
    let mut remaining = functions.iter().copied();
    let mut decompiled = Vec::new();
    loop {
        let entry = match order.pop_front() {
            Some(entry) => entry,
            None => match remaining.next() {
                Some(entry) => entry,
                None => break,
            },
        };
        if !done.insert(entry) || !callees.contains_key(&entry) {
            continue;
        }
        let (function, calls) = replay_function(
            program,
            catalog,
            &cfg,
            &offsets,
            &mut callees,
            &globals,
            entry,
            layout.entry.map(|e| e.0) == Some(entry),
        );
        decompiled.push(function);
        order.extend(calls);
    }
    decompiled.sort_by_key(|f| f.entry);

    debug!(functions = decompiled.len(), globals = globals.len(), "decompiled program");
    Ok(DecompiledUnit {
        instructions: program.len(),
        globals: globals_text,
        functions: decompiled,
    })
}

#[allow(clippy::too_many_arguments)]
fn replay_function(
    program: &Program,
    catalog: &Catalog,
    cfg: &Cfg,
    offsets: &[usize],
    callees: &mut BTreeMap<usize, Callee>,
    globals: &[Global],
    entry: usize,
    is_entry: bool,
) -> (Function, Vec<usize>) {
    let Some(callee) = callees.get(&entry).cloned() else {
        return (
            Function {
                name: format!("sub_{}", entry),
                entry,
                returns: Type::Void,
                params: Vec::new(),
                body: Vec::new(),
                is_entry,
            },
            Vec::new(),
        );
    };

    // parameter types seen at a call site, unless they disagree with the
    // stack summary
    let params = match &callee.params {
        Some(params) if params.iter().map(|p| p.1).sum::<i32>() == callee.param_bytes => params.clone(),
        _ => (0..callee.param_bytes / WORD).map(|_| (Type::Int, WORD)).collect(),
    };
    let returns = callee.returns.clone().unwrap_or(match callee.return_bytes {
        0 => Type::Void,
        n if n == 3 * WORD => Type::Vector,
        _ => Type::Int,
    });

    let last = cfg.last_reachable(entry).unwrap_or(entry);
    let ends_in_retn = program.at(last).map(|i| i.opcode) == Some(Opcode::Retn);
    let end = if ends_in_retn { last } else { last + 1 };

    let mut replayer = Replayer::new(program, catalog, cfg, offsets, callees, globals, Naming::Local);
    replayer.set_retn(ends_in_retn.then_some(last));
    let declared = replayer.enter(callee.return_bytes, &returns, &params);
    let body = replayer.run(entry, end);
    let calls = std::mem::take(&mut replayer.calls);

    (
        Function {
            name: callee.name,
            entry,
            returns,
            params: declared,
            body,
            is_entry,
        },
        calls,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile_root;
    use crate::frontend::lexer::Lexer;
    use crate::frontend::parser::Parser;

    fn compile(src: &str, entry_point_required: bool) -> Program {
        let catalog = Catalog::builtin();
        let tokens = Lexer::new(src).tokenize().unwrap();
        let root = Parser::new(tokens, &catalog).parse().unwrap();
        compile_root(&root, &catalog, entry_point_required).unwrap()
    }

    fn decompile_src(src: &str) -> String {
        let program = compile(src, true);
        decompile_program(&program, &Catalog::builtin()).unwrap().render()
    }

    // =========================================================================
    // Statements and expressions
    // =========================================================================

    #[test]
    fn test_declaration_with_initializer() {
        let text = decompile_src("void main() { int x = 1 + 2 * 3; }");
        assert!(text.contains("void main() {\n    int nVar1 = 1 + 2 * 3;\n}"), "{}", text);
    }

    #[test]
    fn test_loop_with_break_and_call() {
        let text = decompile_src(
            "int Add(int a, int b) { return a + b; }\n\
             void main() {\n\
                 int n = 0;\n\
                 while (n < 10) {\n\
                     if (n == 5) { break; }\n\
                     n = Add(n, 2);\n\
                 }\n\
                 PrintInteger(n);\n\
             }",
        );
        assert!(text.contains("int sub1(int nParam1, int nParam2);"), "{}", text);
        assert!(
            text.contains("int sub1(int nParam1, int nParam2) {\n    return nParam1 + nParam2;\n}"),
            "{}",
            text
        );
        let main = "void main() {\n\
                    \x20   int nVar1 = 0;\n\
                    \x20   while (nVar1 < 10) {\n\
                    \x20       if (nVar1 == 5) {\n\
                    \x20           break;\n\
                    \x20       }\n\
                    \x20       nVar1 = sub1(nVar1, 2);\n\
                    \x20   }\n\
                    \x20   PrintInteger(nVar1);\n\
                    }";
        assert!(text.contains(main), "{}", text);
    }

    #[test]
    fn test_if_else() {
        let text = decompile_src(
            "void main() {\n\
                 int n = Random(10);\n\
                 if (n > 5) { PrintString(\"big\"); } else { PrintString(\"small\"); }\n\
             }",
        );
        assert!(text.contains("int nVar1 = Random(10);"), "{}", text);
        assert!(text.contains("if (nVar1 > 5) {"), "{}", text);
        assert!(text.contains("} else {\n        PrintString(\"small\");"), "{}", text);
    }

    #[test]
    fn test_do_while_with_postfix_increment() {
        let text = decompile_src("void main() { int n = 0; do { n++; } while (n < 3); }");
        assert!(text.contains("nVar1++;"), "{}", text);
        assert!(text.contains("} while (nVar1 < 3);"), "{}", text);
    }

    #[test]
    fn test_deferred_action_argument() {
        let text = decompile_src("void main() { DelayCommand(1.0, PrintString(\"hi\")); }");
        assert!(text.contains("DelayCommand(1.0, PrintString(\"hi\"));"), "{}", text);
    }

    #[test]
    fn test_continue_to_the_step_makes_a_for() {
        let text = decompile_src(
            "void main() {\n\
                 int i;\n\
                 for (i = 0; i < 4; i++) {\n\
                     if (i > 0) { if (i == 2) { continue; } PrintInteger(i); }\n\
                     PrintInteger(0);\n\
                 }\n\
             }",
        );
        let expected = "    int nVar1 = 0;\n\
                        \x20   for (; nVar1 < 4; nVar1++) {\n\
                        \x20       if (nVar1 > 0) {\n\
                        \x20           if (nVar1 == 2) {\n\
                        \x20               continue;\n\
                        \x20           }\n\
                        \x20           PrintInteger(nVar1);\n\
                        \x20       }\n\
                        \x20       PrintInteger(0);\n\
                        \x20   }\n";
        assert!(text.contains(expected), "{}", text);
    }

    #[test]
    fn test_member_of_call_result() {
        let text = decompile_src(
            "void main() { float y = GetPosition(OBJECT_SELF).y; PrintFloat(y); }",
        );
        assert!(text.contains("float fVar1 = GetPosition(OBJECT_SELF).y;"), "{}", text);
        assert!(!text.contains("/*"), "{}", text);
    }

    #[test]
    fn test_switch_with_break_and_default() {
        let text = decompile_src(
            "void main() { int n = 2; switch (n) { case 1: PrintInteger(1); break; default: break; } }",
        );
        let expected = "    switch (nVar1) {\n\
                        \x20       case 1:\n\
                        \x20           PrintInteger(1);\n\
                        \x20           break;\n\
                        \x20       default:\n\
                        \x20           break;\n\
                        \x20   }\n";
        assert!(text.contains(expected), "{}", text);
        assert!(!text.contains("#error"), "{}", text);
    }

    #[test]
    fn test_switch_fall_through_and_string_cases() {
        let text = decompile_src(
            "void main() {\n\
                 string s = \"b\";\n\
                 switch (s) { case \"a\": case \"b\": PrintString(s); default: PrintInteger(0); }\n\
             }",
        );
        assert!(text.contains("case \"a\":\n        case \"b\":\n"), "{}", text);
        assert!(text.contains("default:\n            PrintInteger(0);\n    }"), "{}", text);
    }

    #[test]
    fn test_ternary_value() {
        let text = decompile_src(
            "void main() { int n = Random(10); int m = n > 5 ? 1 : 2; PrintInteger(m); }",
        );
        assert!(text.contains("int nVar2 = nVar1 > 5 ? 1 : 2;"), "{}", text);
        assert!(!text.contains("if ("), "{}", text);
    }

    #[test]
    fn test_unstructured_jump_renders_as_error_directive() {
        use crate::bytecode::ir::Instruction;

        let mut program = Program::new();
        let sub = program.alloc(Instruction::const_int(1));
        let skip = program.alloc(Instruction::retn());
        program.push(Instruction::jump_to(Opcode::Jsr, sub));
        program.push(Instruction::retn());
        program.place(sub);
        program.push(Instruction::jump_to(Opcode::Jnz, skip));
        program.push(Instruction::retn());
        program.place(skip);

        let text = decompile_program(&program, &Catalog::builtin()).unwrap().render();
        assert!(text.contains("\n#error if (1) jump to 0x"), "{}", text);
        let err = Lexer::new(&text).tokenize().unwrap_err();
        assert!(err.message.starts_with("#error if (1) jump to 0x"), "{}", err);
    }

    // =========================================================================
    // Program layout
    // =========================================================================

    #[test]
    fn test_globals_and_starting_conditional() {
        let program = compile("int g = 5;\nint StartingConditional() { return g > 3; }", true);
        let unit = decompile_program(&program, &Catalog::builtin()).unwrap();
        let text = unit.render();
        assert!(text.contains("int nGlobal1 = 5;"), "{}", text);
        let entry = unit.function("StartingConditional").unwrap();
        assert!(entry.is_entry);
        assert_eq!(entry.returns, Type::Int);
        assert!(text.contains("return nGlobal1 > 3;"), "{}", text);
    }

    #[test]
    fn test_library_functions() {
        let program = compile("int Twice(int n) { return n * 2; }", false);
        let unit = decompile_program(&program, &Catalog::builtin()).unwrap();
        assert_eq!(unit.functions.len(), 1);
        let text = unit.render();
        assert!(
            text.contains("int sub1(int nParam1) {\n    return nParam1 * 2;\n}"),
            "{}",
            text
        );
    }

    #[test]
    fn test_header_counts() {
        let program = compile("void main() { }", true);
        let unit = decompile_program(&program, &Catalog::builtin()).unwrap();
        assert!(unit.render().starts_with(&format!(
            "// Decompiled NCS bytecode: {} instructions, 1 functions",
            program.len()
        )));
        assert!(unit.function("main").is_some());
    }

    #[test]
    fn test_empty_program_is_an_error() {
        let err = decompile_program(&Program::new(), &Catalog::builtin()).unwrap_err();
        assert!(err.to_string().contains("no instructions"));
    }

    #[test]
    fn test_decompile_bytes_reports_decode_errors() {
        let err = decompile_bytes(b"NCS V1.0", &Catalog::builtin()).unwrap_err();
        assert!(err.source.is_some());
    }
}
