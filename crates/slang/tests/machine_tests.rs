//! Behavioural tests for the CSE machine driven through `Session`.
//!
//! Covers the evaluation scenarios the machine guarantees: arithmetic and
//! recursion, tail-call boundedness, const-assignment failures, list display
//! with cycle termination, suspension on step budgets and breakpoints,
//! resumption, interrupts, timeouts, and the level gates.

use std::{collections::BTreeSet, time::Duration};

use pretty_assertions::assert_eq;
use slang::{
    CollectHooks, EvalOptions, Level, Outcome, RuntimeError, RuntimeErrorKind, Session, SessionState, SlangError,
    Suspension, Variant,
    ast::{BinaryOp, Loc, LogicalOp, Node, Position},
    source_builtins,
    tracer::RecordingTracer,
};

fn session(level: Level) -> Session {
    let mut session = Session::new(level, Variant::Default);
    session.inject_builtins(source_builtins(level));
    session
}

fn session_with(level: Level, options: EvalOptions) -> Session {
    let mut session = Session::with_options(level, Variant::Default, options);
    session.inject_builtins(source_builtins(level));
    session
}

/// Runs a program to completion and renders its result.
fn eval(level: Level, program: &Node) -> String {
    let mut session = session(level);
    let mut hooks = CollectHooks::new();
    let outcome = session.run(program, &mut hooks).unwrap();
    match outcome {
        Outcome::Finished { value } => session.render(value),
        other => panic!("expected the program to finish, got {other:?}\n{}", session.format_errors(true)),
    }
}

fn runtime_error_kind(outcome: &Outcome) -> &RuntimeErrorKind {
    let Outcome::Error { errors } = outcome else {
        panic!("expected an error outcome, got {outcome:?}");
    };
    let Some(SlangError::Runtime(RuntimeError { kind, .. })) = errors.last() else {
        panic!("expected a runtime error, got {errors:?}");
    };
    kind
}

/// `const f = n => n === 0 ? 1 : n * f(n - 1); f(5);`
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

/// `while (true) {}` at level 3.
fn endless_loop() -> Node {
    Node::program(vec![Node::while_stmt(Node::boolean(true), Node::block(vec![]))])
}

// =============================================================================
// 1. Expressions and functions
// =============================================================================

#[test]
fn arithmetic_respects_precedence_built_into_the_tree() {
    let program = Node::program(vec![Node::expr_stmt(Node::binary(
        BinaryOp::Add,
        Node::number(1.0),
        Node::binary(BinaryOp::Mul, Node::number(2.0), Node::number(3.0)),
    ))]);
    assert_eq!(eval(Level::Source1, &program), "7");
}

#[test]
fn recursive_factorial() {
    assert_eq!(eval(Level::Source1, &factorial_program(5.0)), "120");
}

#[test]
fn closures_capture_their_defining_environment() {
    // const make = x => y => x + y; const add2 = make(2); add2(3);
    let program = Node::program(vec![
        Node::const_decl(
            "make",
            Node::arrow(
                vec!["x"],
                Node::arrow(vec!["y"], Node::binary(BinaryOp::Add, Node::name("x"), Node::name("y"))),
            ),
        ),
        Node::const_decl("add2", Node::call_name("make", vec![Node::number(2.0)])),
        Node::expr_stmt(Node::call_name("add2", vec![Node::number(3.0)])),
    ]);
    assert_eq!(eval(Level::Source1, &program), "5");
}

#[test]
fn function_declarations_bind_like_constants() {
    // function double(n) { return n * 2; } double(21);
    let program = Node::program(vec![
        Node::function_decl(
            "double",
            vec!["n"],
            Node::block(vec![Node::ret(Node::binary(
                BinaryOp::Mul,
                Node::name("n"),
                Node::number(2.0),
            ))]),
        ),
        Node::expr_stmt(Node::call_name("double", vec![Node::number(21.0)])),
    ]);
    assert_eq!(eval(Level::Source1, &program), "42");
}

#[test]
fn function_body_without_return_produces_undefined() {
    let program = Node::program(vec![
        Node::const_decl(
            "f",
            Node::arrow(vec![], Node::block(vec![Node::expr_stmt(Node::number(1.0))])),
        ),
        Node::expr_stmt(Node::call_name("f", vec![])),
    ]);
    assert_eq!(eval(Level::Source1, &program), "undefined");
}

#[test]
fn string_concatenation_and_equality() {
    let program = Node::program(vec![Node::expr_stmt(Node::binary(
        BinaryOp::Eq,
        Node::binary(BinaryOp::Add, Node::string("foo"), Node::string("bar")),
        Node::string("foobar"),
    ))]);
    assert_eq!(eval(Level::Source1, &program), "true");
}

#[test]
fn logical_operators_short_circuit() {
    // false && error("boom") must not reach error()
    let and_program = Node::program(vec![Node::expr_stmt(Node::logical(
        LogicalOp::And,
        Node::boolean(false),
        Node::call_name("error", vec![Node::string("boom")]),
    ))]);
    assert_eq!(eval(Level::Source1, &and_program), "false");

    let or_program = Node::program(vec![Node::expr_stmt(Node::logical(
        LogicalOp::Or,
        Node::boolean(true),
        Node::call_name("error", vec![Node::string("boom")]),
    ))]);
    assert_eq!(eval(Level::Source1, &or_program), "true");
}

#[test]
fn statement_sequences_share_the_enclosing_environment() {
    let program = Node::program(vec![Node::sequence(vec![
        Node::const_decl("x", Node::number(1.0)),
        Node::expr_stmt(Node::name("x")),
    ])]);
    assert_eq!(eval(Level::Source1, &program), "1");
}

#[test]
fn empty_program_evaluates_to_undefined() {
    assert_eq!(eval(Level::Source1, &Node::program(vec![])), "undefined");
}

// =============================================================================
// 2. Tail calls
// =============================================================================

#[test]
fn tail_recursion_runs_in_bounded_control_depth() {
    // const f = (n, a) => n === 0 ? a : f(n - 1, n + a); f(10000, 0);
    // A tight control-depth guard proves the marker is reused: without tail
    // handling 10000 iterations would trip it immediately.
    let program = Node::program(vec![
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
                            Node::binary(BinaryOp::Add, Node::name("n"), Node::name("a")),
                        ],
                    ),
                ),
            ),
        ),
        Node::expr_stmt(Node::call_name("f", vec![Node::number(10_000.0), Node::number(0.0)])),
    ]);

    let mut session = session_with(
        Level::Source1,
        EvalOptions {
            max_control_depth: 64,
            ..EvalOptions::default()
        },
    );
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&program, &mut hooks).unwrap();
    let value = outcome.into_finished().expect("tail recursion must complete");
    assert_eq!(session.render(value), "50005000");
}

#[test]
fn non_tail_recursion_trips_the_control_depth_guard() {
    // const f = n => f(n + 1) + 1; f(0);
    let program = Node::program(vec![
        Node::const_decl(
            "f",
            Node::arrow(
                vec!["n"],
                Node::binary(
                    BinaryOp::Add,
                    Node::call_name("f", vec![Node::binary(BinaryOp::Add, Node::name("n"), Node::number(1.0))]),
                    Node::number(1.0),
                ),
            ),
        ),
        Node::expr_stmt(Node::call_name("f", vec![Node::number(0.0)])),
    ]);
    let mut session = session_with(
        Level::Source1,
        EvalOptions {
            max_control_depth: 2048,
            ..EvalOptions::default()
        },
    );
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&program, &mut hooks).unwrap();
    assert!(
        matches!(runtime_error_kind(&outcome), RuntimeErrorKind::StackOverflow { .. }),
        "expected a stack overflow, got {:?}",
        session.format_errors(false)
    );
}

// =============================================================================
// 3. Bindings and mutation
// =============================================================================

#[test]
fn assigning_to_a_constant_is_a_runtime_error() {
    // const x = 1; x = 2;  -- reaches the machine even at level 1
    let program = Node::program(vec![
        Node::const_decl("x", Node::number(1.0)),
        Node::expr_stmt(Node::assign(Node::name("x"), Node::number(2.0))),
    ]);
    let mut session = session(Level::Source1);
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&program, &mut hooks).unwrap();
    match runtime_error_kind(&outcome) {
        RuntimeErrorKind::ConstAssignment(name) => assert_eq!(name, "x"),
        other => panic!("expected a constant-assignment error, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Errored);
    // an errored session stays inspectable but cannot be resumed
    assert!(session.resume(&mut hooks).is_err());
}

#[test]
fn use_before_declaration_is_reported() {
    // const a = b; const b = 1;
    let program = Node::program(vec![
        Node::const_decl("a", Node::name("b")),
        Node::const_decl("b", Node::number(1.0)),
    ]);
    let mut session = session(Level::Source1);
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&program, &mut hooks).unwrap();
    assert!(matches!(
        runtime_error_kind(&outcome),
        RuntimeErrorKind::UseBeforeDeclaration(name) if name == "b"
    ));
}

#[test]
fn undefined_variable_is_reported() {
    let program = Node::program(vec![Node::expr_stmt(Node::name("ghost"))]);
    let mut session = session(Level::Source1);
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&program, &mut hooks).unwrap();
    assert!(matches!(
        runtime_error_kind(&outcome),
        RuntimeErrorKind::UndefinedVariable(name) if name == "ghost"
    ));
}

#[test]
fn calling_a_non_function_is_reported() {
    let program = Node::program(vec![Node::expr_stmt(Node::call(Node::number(1.0), vec![Node::number(2.0)]))]);
    let mut session = session(Level::Source1);
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&program, &mut hooks).unwrap();
    assert!(matches!(runtime_error_kind(&outcome), RuntimeErrorKind::NotAFunction { .. }));
}

#[test]
fn arity_mismatch_is_reported() {
    let program = Node::program(vec![
        Node::const_decl("f", Node::arrow(vec!["a", "b"], Node::name("a"))),
        Node::expr_stmt(Node::call_name("f", vec![Node::number(1.0)])),
    ]);
    let mut session = session(Level::Source1);
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&program, &mut hooks).unwrap();
    assert!(matches!(
        runtime_error_kind(&outcome),
        RuntimeErrorKind::ArityMismatch { expected: 2, got: 1, .. }
    ));
}

#[test]
fn assignment_is_an_expression() {
    // let x = 0; x = 5;
    let program = Node::program(vec![
        Node::let_decl("x", Node::number(0.0)),
        Node::expr_stmt(Node::assign(Node::name("x"), Node::number(5.0))),
    ]);
    assert_eq!(eval(Level::Source3, &program), "5");
}

// =============================================================================
// 4. Lists and display
// =============================================================================

#[test]
fn display_renders_nested_pairs_in_bracket_notation() {
    // const xs = pair(1, pair(2, pair(3, null))); display(xs);
    let program = Node::program(vec![
        Node::const_decl(
            "xs",
            Node::call_name(
                "pair",
                vec![
                    Node::number(1.0),
                    Node::call_name(
                        "pair",
                        vec![
                            Node::number(2.0),
                            Node::call_name("pair", vec![Node::number(3.0), Node::null()]),
                        ],
                    ),
                ],
            ),
        ),
        Node::expr_stmt(Node::call_name("display", vec![Node::name("xs")])),
    ]);
    let mut session = session(Level::Source2);
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&program, &mut hooks).unwrap();
    assert!(outcome.into_finished().is_some());
    assert_eq!(hooks.displayed, vec!["[1, [2, [3, null]]]"]);
}

#[test]
fn display_of_cyclic_structure_terminates() {
    // const p = pair(1, null); set_tail(p, p); display(p);
    let program = Node::program(vec![
        Node::const_decl("p", Node::call_name("pair", vec![Node::number(1.0), Node::null()])),
        Node::expr_stmt(Node::call_name("set_tail", vec![Node::name("p"), Node::name("p")])),
        Node::expr_stmt(Node::call_name("display", vec![Node::name("p")])),
    ]);
    let mut session = session(Level::Source3);
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&program, &mut hooks).unwrap();
    assert!(outcome.into_finished().is_some());
    assert_eq!(hooks.displayed, vec!["[1, ...<circular>]"]);
}

#[test]
fn displayed_strings_are_quoted() {
    let program = Node::program(vec![Node::expr_stmt(Node::call_name(
        "display",
        vec![Node::string("hi")],
    ))]);
    let mut session = session(Level::Source1);
    let mut hooks = CollectHooks::new();
    session.run(&program, &mut hooks).unwrap();
    assert_eq!(hooks.displayed, vec!["\"hi\""]);
}

#[test]
fn list_builtin_builds_a_null_terminated_chain() {
    let program = Node::program(vec![Node::expr_stmt(Node::call_name(
        "display",
        vec![Node::call_name(
            "list",
            vec![Node::number(1.0), Node::number(2.0), Node::number(3.0)],
        )],
    ))]);
    let mut session = session(Level::Source2);
    let mut hooks = CollectHooks::new();
    session.run(&program, &mut hooks).unwrap();
    assert_eq!(hooks.displayed, vec!["[1, [2, [3, null]]]"]);
}

#[test]
fn user_error_builtin_aborts_evaluation() {
    let program = Node::program(vec![Node::expr_stmt(Node::call_name(
        "error",
        vec![Node::string("boom")],
    ))]);
    let mut session = session(Level::Source1);
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&program, &mut hooks).unwrap();
    assert!(matches!(
        runtime_error_kind(&outcome),
        RuntimeErrorKind::UserRaised(message) if message == "boom"
    ));
}

// =============================================================================
// 5. Arrays and loops (level 3)
// =============================================================================

#[test]
fn array_literals_and_indexing() {
    let program = Node::program(vec![Node::expr_stmt(Node::member(
        Node::array(vec![Node::number(1.0), Node::number(2.0), Node::number(3.0)]),
        Node::number(1.0),
    ))]);
    assert_eq!(eval(Level::Source3, &program), "2");
}

#[test]
fn array_reads_past_the_end_are_errors() {
    let program = Node::program(vec![Node::expr_stmt(Node::member(
        Node::array(vec![Node::number(1.0)]),
        Node::number(5.0),
    ))]);
    let mut session = session(Level::Source3);
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&program, &mut hooks).unwrap();
    assert!(matches!(
        runtime_error_kind(&outcome),
        RuntimeErrorKind::IndexOutOfRange { length: 1, .. }
    ));
}

#[test]
fn array_writes_extend_the_array() {
    // let a = [1]; a[3] = 9; a[3];
    let program = Node::program(vec![
        Node::let_decl("a", Node::array(vec![Node::number(1.0)])),
        Node::expr_stmt(Node::assign(
            Node::member(Node::name("a"), Node::number(3.0)),
            Node::number(9.0),
        )),
        Node::expr_stmt(Node::member(Node::name("a"), Node::number(3.0))),
    ]);
    assert_eq!(eval(Level::Source3, &program), "9");
}

#[test]
fn while_loop_accumulates() {
    // let i = 0; let sum = 0; while (i < 100) { sum = sum + i; i = i + 1; } sum;
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
    assert_eq!(eval(Level::Source3, &program), "4950");
}

#[test]
fn for_loop_with_scoped_counter() {
    // let s = 0; for (let i = 0; i < 5; i = i + 1) { s = s + i; } s;
    let program = Node::program(vec![
        Node::let_decl("s", Node::number(0.0)),
        Node::for_stmt(
            Some(Node::let_decl("i", Node::number(0.0))),
            Node::binary(BinaryOp::Lt, Node::name("i"), Node::number(5.0)),
            Node::assign(Node::name("i"), Node::binary(BinaryOp::Add, Node::name("i"), Node::number(1.0))),
            Node::block(vec![Node::expr_stmt(Node::assign(
                Node::name("s"),
                Node::binary(BinaryOp::Add, Node::name("s"), Node::name("i")),
            ))]),
        ),
        Node::expr_stmt(Node::name("s")),
    ]);
    assert_eq!(eval(Level::Source3, &program), "10");
}

// =============================================================================
// 6. Level gates
// =============================================================================

#[test]
fn loops_are_rejected_below_level_3() {
    let mut session = session(Level::Source1);
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&endless_loop(), &mut hooks).unwrap();
    let Outcome::Error { errors } = outcome else {
        panic!("expected a syntax error outcome");
    };
    assert!(matches!(errors.last(), Some(SlangError::Syntax(_))));
}

#[test]
fn array_literals_are_rejected_below_level_3() {
    let program = Node::program(vec![Node::expr_stmt(Node::array(vec![Node::number(1.0)]))]);
    let mut session = session(Level::Source2);
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&program, &mut hooks).unwrap();
    let Outcome::Error { errors } = outcome else {
        panic!("expected a syntax error outcome");
    };
    assert!(matches!(errors.last(), Some(SlangError::Syntax(_))));
}

// =============================================================================
// 7. Suspension, resumption, breakpoints, interrupts
// =============================================================================

#[test]
fn endless_loop_suspends_at_the_step_limit_and_resumes() {
    let mut session = session_with(
        Level::Source3,
        EvalOptions {
            step_limit: Some(1000),
            ..EvalOptions::default()
        },
    );
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&endless_loop(), &mut hooks).unwrap();
    assert!(matches!(outcome, Outcome::Suspended { reason: Suspension::StepLimit }));
    assert_eq!(session.state(), SessionState::Suspended);
    let steps_after_run = session.steps();
    assert!(steps_after_run >= 1000, "ran {steps_after_run} steps");

    // resuming continues from the same point and suspends again
    let outcome = session.resume(&mut hooks).unwrap();
    assert!(outcome.is_suspended());
    assert!(session.steps() > steps_after_run);
}

#[test]
fn step_limit_reports_infinite_loops_when_asked() {
    let mut session = session_with(
        Level::Source3,
        EvalOptions {
            step_limit: Some(1000),
            throw_infinite_loops: true,
            ..EvalOptions::default()
        },
    );
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&endless_loop(), &mut hooks).unwrap();
    assert!(matches!(
        runtime_error_kind(&outcome),
        RuntimeErrorKind::PotentialInfiniteLoop { .. }
    ));
}

#[test]
fn step_resume_equivalence() {
    // driving the program in 7-step slices must produce the same result as
    // an unbounded run
    let unbounded = eval(Level::Source1, &factorial_program(5.0));

    let mut session = session_with(
        Level::Source1,
        EvalOptions {
            step_limit: Some(7),
            ..EvalOptions::default()
        },
    );
    let mut hooks = CollectHooks::new();
    let mut outcome = session.run(&factorial_program(5.0), &mut hooks).unwrap();
    let mut slices = 0;
    while outcome.is_suspended() {
        outcome = session.resume(&mut hooks).unwrap();
        slices += 1;
        assert!(slices < 10_000, "evaluation did not converge");
    }
    let value = outcome.into_finished().expect("sliced run must finish");
    assert_eq!(session.render(value), unbounded);
    assert!(slices > 1, "the step limit never triggered");
}

#[test]
fn breakpoints_suspend_at_exact_step_indices() {
    let mut session = session_with(
        Level::Source1,
        EvalOptions {
            breakpoints: BTreeSet::from([5]),
            ..EvalOptions::default()
        },
    );
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&factorial_program(5.0), &mut hooks).unwrap();
    assert!(matches!(outcome, Outcome::Suspended { reason: Suspension::Breakpoint(5) }));
    assert_eq!(session.steps(), 5);

    let outcome = session.resume(&mut hooks).unwrap();
    let value = outcome.into_finished().expect("resume past the breakpoint");
    assert_eq!(session.render(value), "120");
}

#[test]
fn interrupting_a_suspended_session_surfaces_on_resume() {
    let mut session = session_with(
        Level::Source3,
        EvalOptions {
            step_limit: Some(100),
            ..EvalOptions::default()
        },
    );
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&endless_loop(), &mut hooks).unwrap();
    assert!(outcome.is_suspended());

    session.interrupt_handle().interrupt();
    let outcome = session.resume(&mut hooks).unwrap();
    assert!(matches!(runtime_error_kind(&outcome), RuntimeErrorKind::Interrupted));
}

#[test]
fn wall_clock_timeout_aborts_evaluation() {
    let mut session = session_with(
        Level::Source3,
        EvalOptions {
            max_exec_time: Some(Duration::from_millis(30)),
            ..EvalOptions::default()
        },
    );
    let mut hooks = CollectHooks::new();
    let outcome = session.run(&endless_loop(), &mut hooks).unwrap();
    assert!(matches!(runtime_error_kind(&outcome), RuntimeErrorKind::Timeout { .. }));
}

// =============================================================================
// 8. Determinism and traces
// =============================================================================

#[test]
fn evaluation_is_deterministic_including_the_instruction_trace() {
    let run = |program: &Node| {
        let mut session = session(Level::Source1);
        let mut hooks = CollectHooks::new();
        let mut tracer = RecordingTracer::new();
        let outcome = session.run_traced(program, &mut hooks, &mut tracer).unwrap();
        let value = outcome.into_finished().unwrap();
        (session.render(value), tracer.tags())
    };
    let (first_value, first_trace) = run(&factorial_program(6.0));
    let (second_value, second_trace) = run(&factorial_program(6.0));
    assert_eq!(first_value, "720");
    assert_eq!(first_value, second_value);
    assert_eq!(first_trace, second_trace);
}

#[test]
fn applying_pair_shows_the_allocation_instruction_in_the_trace() {
    let program = Node::program(vec![Node::expr_stmt(Node::call_name(
        "pair",
        vec![Node::number(1.0), Node::number(2.0)],
    ))]);
    let mut session = session(Level::Source2);
    let mut hooks = CollectHooks::new();
    let mut tracer = RecordingTracer::new();
    session.run_traced(&program, &mut hooks, &mut tracer).unwrap();
    assert!(
        tracer.tags().contains(&"PairCons"),
        "pair application should lower to PairCons, trace was {:?}",
        tracer.tags()
    );
}

// =============================================================================
// 9. Error formatting
// =============================================================================

#[test]
fn errors_format_with_file_line_and_column() {
    let loc = Loc {
        source: Some("test.js".to_owned()),
        start: Position::new(2, 4),
        end: Position::new(2, 9),
    };
    let program = Node::program(vec![
        Node::const_decl("x", Node::number(1.0)),
        Node::expr_stmt(Node::assign(Node::name("x"), Node::number(2.0)).at(loc)),
    ]);
    let mut session = session(Level::Source1);
    let mut hooks = CollectHooks::new();
    session.run(&program, &mut hooks).unwrap();
    let formatted = session.format_errors(false);
    assert_eq!(formatted, "[test.js] Line 2, Column 4: Cannot assign new value to constant x.");

    let verbose = session.format_errors(true);
    assert!(verbose.contains("you cannot assign a new value to it"), "verbose was: {verbose}");
}

// =============================================================================
// 10. Transformers
// =============================================================================

#[test]
fn registered_transformers_rewrite_the_program() {
    // a transformer that replaces the whole program with `42;`
    let mut session = session(Level::Source1);
    session.register_transformer("answer", |_| {
        Node::program(vec![Node::expr_stmt(Node::number(42.0))])
    });
    let mut hooks = CollectHooks::new();
    let outcome = session
        .run(&Node::program(vec![Node::expr_stmt(Node::number(1.0))]), &mut hooks)
        .unwrap();
    let value = outcome.into_finished().unwrap();
    assert_eq!(session.render(value), "42");
}
