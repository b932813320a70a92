use proptest::prelude::*;

use nwscript::bytecode::compile::CodeGen;
use nwscript::bytecode::ir::{InstrId, Instruction, Operand, Program};
use nwscript::bytecode::op::{Opcode, Qualifier};
use nwscript::bytecode::{decode, encode, stack_check, CompileError};
use nwscript::decompile::decompile_program;
use nwscript::decompile::expr::{Expr as Rebuilt, Stmt as RebuiltStmt};
use nwscript::lang::ast::{Access, Expr, FunctionSig, ParamDecl};
use nwscript::lang::operators::{binary_mappings, BinaryOp};
use nwscript::lang::types::{StructMap, Type};
use nwscript::{Catalog, CompileOptions, Error};

fn compile(src: &str) -> Result<Program, Error> {
    nwscript::compile_program(src, &Catalog::builtin(), &CompileOptions::default())
}

/// Opcode, qualifier, arguments and target position of every instruction.
fn shape(program: &Program) -> Vec<(Opcode, Qualifier, Vec<Operand>, Option<usize>)> {
    program
        .iter()
        .enumerate()
        .map(|(ip, (_, ins))| {
            (
                ins.opcode,
                ins.qualifier,
                ins.args.clone(),
                program.target_position(ip),
            )
        })
        .collect()
}

// =============================================================================
// Generated expressions
// =============================================================================

/// An expression and its source text.
#[derive(Debug, Clone)]
struct Sample {
    expr: Expr,
    text: String,
}

fn sample(expr: Expr, text: String) -> Sample {
    Sample { expr, text }
}

fn binary(op: BinaryOp, lhs: Sample, rhs: Sample) -> Sample {
    let text = format!("({} {} {})", lhs.text, op.symbol(), rhs.text);
    sample(Expr::binary(op, lhs.expr, rhs.expr), text)
}

fn arithmetic() -> impl Strategy<Value = BinaryOp> {
    prop_oneof![Just(BinaryOp::Add), Just(BinaryOp::Sub), Just(BinaryOp::Mul)]
}

fn int_expr() -> impl Strategy<Value = Sample> {
    let leaf = prop_oneof![
        (-50i32..50).prop_map(|n| sample(Expr::Int(n), format!("({})", n))),
        Just(sample(Expr::name("n"), "n".to_string())),
    ];
    leaf.prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            (arithmetic(), inner.clone(), inner.clone()).prop_map(|(op, l, r)| binary(op, l, r)),
            inner.clone().prop_map(|v| sample(
                Expr::Call {
                    name: "Twice".to_string(),
                    args: vec![v.expr],
                },
                format!("Twice({})", v.text),
            )),
            inner.clone().prop_map(|v| sample(
                Expr::EngineCall {
                    routine: 0,
                    name: "Random".to_string(),
                    args: vec![v.expr],
                },
                format!("Random({})", v.text),
            )),
            inner.clone().prop_map(|v| sample(
                Expr::Assign {
                    target: Access::var("n"),
                    value: Box::new(v.expr),
                },
                format!("(n = {})", v.text),
            )),
            (inner.clone(), inner.clone(), inner).prop_map(|(c, t, o)| sample(
                Expr::Ternary {
                    cond: Box::new(c.expr),
                    then: Box::new(t.expr),
                    otherwise: Box::new(o.expr),
                },
                format!("({} ? {} : {})", c.text, t.text, o.text),
            )),
        ]
    })
}

fn float_expr() -> impl Strategy<Value = Sample> {
    let leaf = prop_oneof![
        prop_oneof![Just(0.5f32), Just(1.0f32), Just(2.25f32)]
            .prop_map(|x| sample(Expr::Float(x), format!("{:?}", x))),
        Just(sample(Expr::name("f"), "f".to_string())),
    ];
    leaf.prop_recursive(3, 16, 2, |inner| {
        prop_oneof![
            (arithmetic(), inner.clone(), inner.clone()).prop_map(|(op, l, r)| binary(op, l, r)),
            (int_expr(), inner.clone()).prop_map(|(l, r)| binary(BinaryOp::Add, l, r)),
            inner.prop_map(|v| sample(
                Expr::Assign {
                    target: Access::var("f"),
                    value: Box::new(v.expr),
                },
                format!("(f = {})", v.text),
            )),
        ]
    })
}

fn string_expr() -> impl Strategy<Value = Sample> {
    let leaf = prop_oneof![
        "[a-z]{0,6}".prop_map(|s| sample(Expr::Str(s.clone()), format!("\"{}\"", s))),
        Just(sample(Expr::name("s"), "s".to_string())),
        int_expr().prop_map(|v| sample(
            Expr::EngineCall {
                routine: 92,
                name: "IntToString".to_string(),
                args: vec![v.expr],
            },
            format!("IntToString({})", v.text),
        )),
    ];
    leaf.prop_recursive(3, 12, 2, |inner| {
        (inner.clone(), inner).prop_map(|(l, r)| binary(BinaryOp::Add, l, r))
    })
}

fn any_expr() -> impl Strategy<Value = Sample> {
    prop_oneof![int_expr(), float_expr(), string_expr()]
}

fn codegen(catalog: &Catalog) -> CodeGen<'_> {
    let mut codegen = CodeGen::new(catalog);
    codegen.declare_function(FunctionSig {
        name: "Twice".to_string(),
        returns: Type::Int,
        params: vec![ParamDecl {
            name: "x".to_string(),
            ty: Type::Int,
            default: None,
        }],
    });
    codegen.declare_local("n", &Type::Int, false).unwrap();
    codegen.declare_local("f", &Type::Float, false).unwrap();
    codegen.declare_local("s", &Type::String, false).unwrap();
    codegen
}

// =============================================================================
// 1. Encode/decode round trip
// =============================================================================

fn plain_instruction() -> impl Strategy<Value = Instruction> {
    prop_oneof![
        any::<i32>().prop_map(Instruction::const_int),
        (-1000.0f32..1000.0).prop_map(Instruction::const_float),
        "[ -~]{0,12}".prop_map(|s| Instruction::const_string(&s)),
        (0i32..2).prop_map(Instruction::const_object),
        (-64i32..0).prop_map(|n| Instruction::movsp(n * 4)),
        (1i32..16).prop_map(|n| Instruction::copy(Opcode::CpTopSp, -4 * n, 4)),
        (1i32..16).prop_map(|n| Instruction::copy(Opcode::CpDownBp, -4 * n, 4)),
        (any::<u16>(), 0u8..8).prop_map(|(r, argc)| Instruction::action(r, argc)),
        Just(Instruction::new(Opcode::Add, Qualifier::IntInt)),
        Just(Instruction::new(Opcode::Mul, Qualifier::VectorFloat)),
        Just(Instruction::new(Opcode::RsAdd, Qualifier::Location)),
        Just(Instruction::nop()),
        Just(Instruction::retn()),
    ]
}

/// `None` is a plain instruction, `Some((opcode, n))` a jump to position
/// `n % len`.
fn generated_program() -> impl Strategy<Value = Program> {
    let jump = (
        prop_oneof![
            Just(Opcode::Jmp),
            Just(Opcode::Jsr),
            Just(Opcode::Jz),
            Just(Opcode::Jnz)
        ],
        any::<usize>(),
    );
    prop::collection::vec((plain_instruction(), prop::option::weighted(0.2, jump)), 1..40).prop_map(
        |rows| {
            let mut program = Program::new();
            let ids: Vec<InstrId> = rows.iter().map(|_| program.alloc(Instruction::nop())).collect();
            for (i, (plain, jump)) in rows.into_iter().enumerate() {
                *program.get_mut(ids[i]) = match jump {
                    Some((opcode, n)) => Instruction::jump_to(opcode, ids[n % ids.len()]),
                    None => plain,
                };
                program.place(ids[i]);
            }
            program
        },
    )
}

proptest! {
    #[test]
    fn test_round_trip_generated_programs(program in generated_program()) {
        let once = decode(&encode(&program).unwrap()).unwrap();
        let twice = decode(&encode(&once).unwrap()).unwrap();
        prop_assert_eq!(shape(&once), shape(&twice));
        prop_assert_eq!(shape(&once), shape(&program));
    }

    // =========================================================================
    // 2. Stack height
    // =========================================================================

    #[test]
    fn test_pushed_value_grows_temp_by_its_size(sample in any_expr()) {
        let catalog = Catalog::builtin();
        let mut codegen = codegen(&catalog);
        let before = codegen.frame().temp();
        let ty = codegen.compile_pushed(&sample.expr).unwrap();
        prop_assert_eq!(codegen.frame().temp(), before + ty.size(&StructMap::new()));
    }

    #[test]
    fn test_compiled_node_counts_only_what_it_pushed(sample in any_expr()) {
        let catalog = Catalog::builtin();
        let mut codegen = codegen(&catalog);
        let before = codegen.frame().temp();
        let compiled = codegen.compile_expr(&sample.expr).unwrap();
        let counted = if compiled.on_stack { compiled.ty.size(&StructMap::new()) } else { 0 };
        prop_assert_eq!(codegen.frame().temp(), before + counted);
    }

    #[test]
    fn test_generated_sources_pass_stack_check(
        int in int_expr(),
        float in float_expr(),
        string in string_expr(),
    ) {
        let src = format!(
            "int Twice(int x) {{ return x * 2; }}\n\
             void main() {{\n\
                 int n = 1; float f = 2.0; string s = \"a\";\n\
                 int r = {};\n\
                 float g = {};\n\
                 string t = {};\n\
                 PrintString(t);\n\
             }}",
            int.text, float.text, string.text
        );
        let program = compile(&src).unwrap();
        prop_assert!(stack_check::check_program(&program, Some(&Catalog::builtin())).is_ok());
        let once = decode(&encode(&program).unwrap()).unwrap();
        prop_assert_eq!(shape(&once), shape(&program));
        prop_assert!(decompile_program(&program, &Catalog::builtin()).is_ok());
    }
}

#[test]
fn test_nested_call_in_right_operand() {
    let catalog = Catalog::builtin();
    let mut codegen = codegen(&catalog);
    let expr = Expr::binary(
        BinaryOp::Add,
        Expr::name("n"),
        Expr::Call {
            name: "Twice".to_string(),
            args: vec![Expr::binary(BinaryOp::Mul, Expr::name("n"), Expr::Int(3))],
        },
    );
    let before = codegen.frame().temp();
    assert_eq!(codegen.compile_pushed(&expr).unwrap(), Type::Int);
    assert_eq!(codegen.frame().temp(), before + 4);
}

// =============================================================================
// 3. Type-checked rejection
// =============================================================================

#[test]
fn test_assigning_string_to_int() {
    let err = compile("void main() { int x; x = \"hello\"; }").unwrap_err();
    let text = err.to_string();
    assert!(matches!(err, Error::Compile(CompileError::TypeMismatch { .. })), "{}", text);
    assert!(text.contains("int") && text.contains("string"), "{}", text);
}

#[test]
fn test_assigning_to_const() {
    let err = compile("const int x = 1;\nvoid main() { x = 2; }").unwrap_err();
    assert!(
        matches!(err, Error::Compile(CompileError::ConstAssignment { ref name }) if name == "x"),
        "{}",
        err
    );
}

// =============================================================================
// 4. Operator resolution
// =============================================================================

const OPERAND_TYPES: [Type; 8] = [
    Type::Int,
    Type::Float,
    Type::String,
    Type::Object,
    Type::Vector,
    Type::Effect,
    Type::Location,
    Type::Talent,
];

fn compile_operator(op: BinaryOp, lhs: &Type, rhs: &Type) -> Result<(Type, Opcode, Qualifier), CompileError> {
    let catalog = Catalog::builtin();
    let mut codegen = CodeGen::new(&catalog);
    codegen.declare_local("a", lhs, false)?;
    codegen.declare_local("b", rhs, false)?;
    let ty = codegen.compile_pushed(&Expr::binary(op, Expr::name("a"), Expr::name("b")))?;
    let last = codegen.program().iter().last().map(|(_, i)| (i.opcode, i.qualifier));
    let (opcode, qualifier) = last.unwrap_or((Opcode::Nop, Qualifier::None));
    Ok((ty, opcode, qualifier))
}

#[test]
fn test_every_table_row_emits_its_opcode() {
    for op in BinaryOp::ALL {
        for row in binary_mappings(op) {
            if matches!(row.lhs, Type::Struct(_)) {
                continue;
            }
            let (ty, opcode, qualifier) = compile_operator(op, &row.lhs, &row.rhs)
                .unwrap_or_else(|e| panic!("{:?} {} {}: {}", op, row.lhs, row.rhs, e));
            assert_eq!(ty, row.result, "{:?} {} {}", op, row.lhs, row.rhs);
            assert_eq!((opcode, qualifier), (row.opcode, row.qualifier), "{:?}", op);
        }
    }
}

#[test]
fn test_combinations_outside_the_table_fail() {
    for op in BinaryOp::ALL {
        let rows = binary_mappings(op);
        for lhs in &OPERAND_TYPES {
            for rhs in &OPERAND_TYPES {
                if rows.iter().any(|r| &r.lhs == lhs && &r.rhs == rhs) {
                    continue;
                }
                assert!(
                    compile_operator(op, lhs, rhs).is_err(),
                    "{:?} accepted {} and {}",
                    op,
                    lhs,
                    rhs
                );
            }
        }
    }
}

// =============================================================================
// 5. Jump patching
// =============================================================================

/// Encoded jump distance of the instruction at byte `offset`.
fn relative_jump(bytes: &[u8], offset: usize) -> i64 {
    let start = offset + 2;
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[start..start + 4]);
    i64::from(i32::from_be_bytes(word))
}

#[test]
fn test_if_else_jumps_land_on_branch_boundaries() {
    let program = compile(
        "void main() { int c = 1; if (c) { PrintInteger(1); } else { PrintInteger(2); } PrintInteger(3); }",
    )
    .unwrap();
    let bytes = encode(&program).unwrap();
    let decoded = decode(&bytes).unwrap();
    let offsets = nwscript::bytecode::encode::offsets(&decoded);

    let jz = (0..decoded.len())
        .find(|&ip| decoded.at(ip).map(|i| i.opcode) == Some(Opcode::Jz))
        .unwrap();
    let else_start = decoded.target_position(jz).unwrap();
    // labels are gone: the jump lands on the first instruction of the branch
    assert_eq!(decoded.at(else_start), Some(&Instruction::const_int(2)));
    let distance = offsets[else_start] as i64 - offsets[jz] as i64;
    assert_eq!(relative_jump(&bytes, offsets[jz]), distance);

    let jmp = else_start - 1;
    assert_eq!(decoded.at(jmp).map(|i| i.opcode), Some(Opcode::Jmp));
    let end = decoded.target_position(jmp).unwrap();
    assert_eq!(decoded.at(end), Some(&Instruction::const_int(3)));
    let distance = offsets[end] as i64 - offsets[jmp] as i64;
    assert_eq!(relative_jump(&bytes, offsets[jmp]), distance);
}

#[test]
fn test_if_without_else_jumps_to_end() {
    let program = compile("void main() { int c = 0; if (c) { PrintInteger(1); } PrintInteger(2); }").unwrap();
    let decoded = decode(&encode(&program).unwrap()).unwrap();
    let jz = (0..decoded.len())
        .find(|&ip| decoded.at(ip).map(|i| i.opcode) == Some(Opcode::Jz))
        .unwrap();
    let end = decoded.target_position(jz).unwrap();
    assert_eq!(decoded.at(end), Some(&Instruction::const_int(2)));
}

// =============================================================================
// 6. Decompile plausibility
// =============================================================================

#[test]
fn test_decompiled_tree_keeps_precedence() {
    let program = compile("void main() { int x = 1 + 2 * 3; }").unwrap();
    let unit = decompile_program(&program, &Catalog::builtin()).unwrap();
    let main = unit.function("main").unwrap();
    let expected = Rebuilt::binary(
        BinaryOp::Add,
        Rebuilt::Int(1),
        Rebuilt::binary(BinaryOp::Mul, Rebuilt::Int(2), Rebuilt::Int(3)),
    );
    assert_eq!(
        main.body,
        vec![RebuiltStmt::Declare {
            ty: Type::Int,
            name: "nVar1".to_string(),
            init: Some(expected),
        }]
    );
}

// =============================================================================
// 7. Scope shadowing
// =============================================================================

#[test]
fn test_inner_binding_shadows_outer() {
    let program = compile(
        "void main() { int x = 1; { int x = 2; int y = 3; PrintInteger(x); } PrintInteger(x); }",
    )
    .unwrap();
    let reads: Vec<i32> = program
        .iter()
        .filter(|(_, i)| i.opcode == Opcode::CpTopSp)
        .filter_map(|(_, i)| i.int_arg(0))
        .collect();
    // inner x sits under y; outer x is on top once the block is gone
    assert_eq!(reads, vec![-8, -4]);
}
