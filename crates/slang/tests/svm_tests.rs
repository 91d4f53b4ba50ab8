//! Tests for the stack-VM pipeline: compiler, assembler and executor, plus
//! agreement between the stack VM and the step evaluator on the shared
//! semantic subset.

use pretty_assertions::assert_eq;
use slang::{
    CollectHooks, Level, Outcome, Session, Variant,
    ast::{BinaryOp, LogicalOp, Node},
    source_builtins,
    svm::{self, CompileError, DecodeError, Instr},
};

/// `const f = n => n === 0 ? 1 : n * f(n - 1); f(n);`
fn factorial_program(n: f64) -> Node {
    Node::program(vec![
        Node::const_decl(
            "f",
            Node::arrow(
                vec!["n"],
                Node::conditional(
                    Node::binary(BinaryOp::Eq, Node::name("n"), Node::number(0.0)),
                    Node::number(1.0),
                    Node::binary(
                        BinaryOp::Mul,
                        Node::name("n"),
                        Node::call_name("f", vec![Node::binary(BinaryOp::Sub, Node::name("n"), Node::number(1.0))]),
                    ),
                ),
            ),
        ),
        Node::expr_stmt(Node::call_name("f", vec![Node::number(n)])),
    ])
}

/// `const f = (n, a) => n === 0 ? a : f(n - 1, n * a); f(n, 1);`
fn tail_factorial_program(n: f64) -> Node {
    Node::program(vec![
        Node::const_decl(
            "f",
            Node::arrow(
                vec!["n", "a"],
                Node::conditional(
                    Node::binary(BinaryOp::Eq, Node::name("n"), Node::number(0.0)),
                    Node::name("a"),
                    Node::call_name(
                        "f",
                        vec![
                            Node::binary(BinaryOp::Sub, Node::name("n"), Node::number(1.0)),
                            Node::binary(BinaryOp::Mul, Node::name("n"), Node::name("a")),
                        ],
                    ),
                ),
            ),
        ),
        Node::expr_stmt(Node::call_name("f", vec![Node::number(n), Node::number(1.0)])),
    ])
}

/// Evaluates on the step machine, returning the rendered result and displays.
fn cse_eval(level: Level, program: &Node) -> (String, Vec<String>) {
    let mut session = Session::new(level, Variant::Default);
    session.inject_builtins(source_builtins(level));
    let mut hooks = CollectHooks::new();
    let outcome = session.run(program, &mut hooks).unwrap();
    match outcome {
        Outcome::Finished { value } => (session.render(value), hooks.displayed),
        other => panic!("step machine did not finish: {other:?}\n{}", session.format_errors(true)),
    }
}

/// Compiles and runs on the stack VM, returning the same observables.
fn svm_eval(level: Level, program: &Node) -> (String, Vec<String>) {
    let compiled = svm::compile(program, level).expect("program must compile");
    let mut hooks = CollectHooks::new();
    let result = svm::run(&compiled, level, &mut hooks).expect("program must run");
    (result.render(), hooks.displayed)
}

fn assert_agreement(level: Level, program: &Node) {
    assert_eq!(cse_eval(level, program), svm_eval(level, program));
}

// =============================================================================
// 1. Compilation shape
// =============================================================================

#[test]
fn simple_sum_compiles_to_a_done_terminated_stream() {
    // 1 + 2;
    let program = Node::program(vec![Node::expr_stmt(Node::binary(
        BinaryOp::Add,
        Node::number(1.0),
        Node::number(2.0),
    ))]);
    let compiled = svm::compile(&program, Level::Source1).unwrap();

    assert_eq!(compiled.entry, 0);
    assert_eq!(compiled.functions.len(), 1);
    assert!(compiled.strings.is_empty(), "no string constants expected");
    assert_eq!(
        compiled.functions[0].instrs,
        vec![Instr::LgcI(1), Instr::LgcI(2), Instr::AddG, Instr::Done]
    );
}

#[test]
fn string_constants_are_deduplicated() {
    // "aa" + "bb"; "aa";
    let program = Node::program(vec![
        Node::expr_stmt(Node::binary(BinaryOp::Add, Node::string("aa"), Node::string("bb"))),
        Node::expr_stmt(Node::string("aa")),
    ]);
    let compiled = svm::compile(&program, Level::Source1).unwrap();
    assert_eq!(compiled.strings, vec!["aa".to_owned(), "bb".to_owned()]);
}

#[test]
fn fractional_literals_use_the_f64_form() {
    let program = Node::program(vec![Node::expr_stmt(Node::number(0.5))]);
    let compiled = svm::compile(&program, Level::Source1).unwrap();
    assert_eq!(compiled.functions[0].instrs[0], Instr::LgcF64(0.5));
}

#[test]
fn return_position_calls_compile_to_tail_calls() {
    let compiled = svm::compile(&tail_factorial_program(10.0), Level::Source1).unwrap();
    let has_tail_call = compiled
        .functions
        .iter()
        .flat_map(|f| f.instrs.iter())
        .any(|i| matches!(i, Instr::CallT(_)));
    assert!(has_tail_call, "expected a CALLT in {compiled:?}");
}

#[test]
fn lambdas_become_their_own_functions() {
    let compiled = svm::compile(&factorial_program(5.0), Level::Source1).unwrap();
    assert_eq!(compiled.functions.len(), 2);
    let lambda = &compiled.functions[1];
    assert_eq!(lambda.arity, 1);
    assert_eq!(lambda.env_size, 1);
}

#[test]
fn undeclared_identifiers_are_compile_errors() {
    let program = Node::program(vec![Node::expr_stmt(Node::name("ghost"))]);
    match svm::compile(&program, Level::Source1) {
        Err(CompileError::UndefinedVariable { name, .. }) => assert_eq!(name, "ghost"),
        other => panic!("expected an undefined-variable error, got {other:?}"),
    }
}

#[test]
fn primitives_cannot_be_taken_as_values() {
    let program = Node::program(vec![Node::const_decl("d", Node::name("display"))]);
    assert!(matches!(
        svm::compile(&program, Level::Source1),
        Err(CompileError::UnsupportedConstruct { .. })
    ));
}

// =============================================================================
// 2. Assembly round trips
// =============================================================================

#[test]
fn encode_decode_is_the_identity_on_compiled_programs() {
    for program in [
        Node::program(vec![Node::expr_stmt(Node::binary(
            BinaryOp::Add,
            Node::number(1.0),
            Node::number(2.0),
        ))]),
        factorial_program(5.0),
        tail_factorial_program(10.0),
        Node::program(vec![Node::expr_stmt(Node::binary(
            BinaryOp::Add,
            Node::string("a"),
            Node::string("b"),
        ))]),
    ] {
        let compiled = svm::compile(&program, Level::Source1).unwrap();
        let bytes = svm::encode(&compiled);
        assert_eq!(&bytes[..4], b"SVMC");
        let decoded = svm::decode(&bytes).unwrap();
        assert_eq!(decoded, compiled);
    }
}

#[test]
fn decoder_rejects_a_foreign_magic() {
    let compiled = svm::compile(&factorial_program(3.0), Level::Source1).unwrap();
    let mut bytes = svm::encode(&compiled);
    bytes[..4].copy_from_slice(b"OMGB");
    assert!(matches!(svm::decode(&bytes), Err(DecodeError::BadMagic(_))));
}

// =============================================================================
// 3. Compile-run agreement with the step evaluator
// =============================================================================

#[test]
fn agreement_on_arithmetic() {
    let program = Node::program(vec![Node::expr_stmt(Node::binary(
        BinaryOp::Add,
        Node::number(1.0),
        Node::binary(BinaryOp::Mul, Node::number(2.0), Node::number(3.0)),
    ))]);
    assert_agreement(Level::Source1, &program);
}

#[test]
fn agreement_on_recursion() {
    assert_agreement(Level::Source1, &factorial_program(5.0));
}

#[test]
fn agreement_on_deep_tail_recursion() {
    // deep enough that a frame-per-call executor would overflow
    assert_agreement(Level::Source1, &tail_factorial_program(10_000.0));
}

#[test]
fn agreement_on_conditionals_and_logic() {
    let program = Node::program(vec![Node::expr_stmt(Node::conditional(
        Node::logical(
            LogicalOp::And,
            Node::boolean(true),
            Node::binary(BinaryOp::Lt, Node::number(1.0), Node::number(2.0)),
        ),
        Node::string("yes"),
        Node::string("no"),
    ))]);
    assert_agreement(Level::Source1, &program);
}

#[test]
fn agreement_on_string_operations() {
    let program = Node::program(vec![Node::expr_stmt(Node::binary(
        BinaryOp::Add,
        Node::binary(BinaryOp::Add, Node::string("a"), Node::string("b")),
        Node::string("c"),
    ))]);
    assert_agreement(Level::Source1, &program);
}

#[test]
fn agreement_on_while_loops() {
    let program = Node::program(vec![
        Node::let_decl("i", Node::number(0.0)),
        Node::let_decl("sum", Node::number(0.0)),
        Node::while_stmt(
            Node::binary(BinaryOp::Lt, Node::name("i"), Node::number(100.0)),
            Node::block(vec![
                Node::expr_stmt(Node::assign(
                    Node::name("sum"),
                    Node::binary(BinaryOp::Add, Node::name("sum"), Node::name("i")),
                )),
                Node::expr_stmt(Node::assign(
                    Node::name("i"),
                    Node::binary(BinaryOp::Add, Node::name("i"), Node::number(1.0)),
                )),
            ]),
        ),
        Node::expr_stmt(Node::name("sum")),
    ]);
    assert_agreement(Level::Source3, &program);
}

#[test]
fn agreement_on_arrays() {
    // const a = [10, 20, 30]; a[0] + a[2];
    let program = Node::program(vec![
        Node::const_decl(
            "a",
            Node::array(vec![Node::number(10.0), Node::number(20.0), Node::number(30.0)]),
        ),
        Node::expr_stmt(Node::binary(
            BinaryOp::Add,
            Node::member(Node::name("a"), Node::number(0.0)),
            Node::member(Node::name("a"), Node::number(2.0)),
        )),
    ]);
    assert_agreement(Level::Source3, &program);
}

#[test]
fn agreement_on_list_display() {
    // display(pair(1, pair(2, null)));
    let program = Node::program(vec![Node::expr_stmt(Node::call_name(
        "display",
        vec![Node::call_name(
            "pair",
            vec![
                Node::number(1.0),
                Node::call_name("pair", vec![Node::number(2.0), Node::null()]),
            ],
        )],
    ))]);
    let (cse_value, cse_displays) = cse_eval(Level::Source2, &program);
    let (svm_value, svm_displays) = svm_eval(Level::Source2, &program);
    assert_eq!(cse_value, svm_value);
    assert_eq!(cse_displays, svm_displays);
    assert_eq!(cse_displays, vec!["[1, [2, null]]"]);
}

#[test]
fn agreement_on_closures_over_block_scopes() {
    // const make = x => y => x + y; make(2)(3);
    let program = Node::program(vec![
        Node::const_decl(
            "make",
            Node::arrow(
                vec!["x"],
                Node::arrow(vec!["y"], Node::binary(BinaryOp::Add, Node::name("x"), Node::name("y"))),
            ),
        ),
        Node::expr_stmt(Node::call(
            Node::call_name("make", vec![Node::number(2.0)]),
            vec![Node::number(3.0)],
        )),
    ]);
    assert_agreement(Level::Source1, &program);
}
