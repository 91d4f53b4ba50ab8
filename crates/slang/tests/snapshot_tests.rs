//! Tests for binary serialisation of sessions.
//!
//! A suspended session dumps to bytes and restores in a fresh process image;
//! builtin implementations are function pointers and are re-attached on
//! load, so `load` takes the same builtin set the session was created with.

use pretty_assertions::assert_eq;
use slang::{
    CollectHooks, EvalOptions, Level, Session, SessionState, Variant,
    ast::{BinaryOp, Node},
    source_builtins,
};

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

#[test]
fn suspended_session_survives_dump_and_load() {
    let mut session = Session::with_options(
        Level::Source1,
        Variant::Default,
        EvalOptions {
            step_limit: Some(10),
            ..EvalOptions::default()
        },
    );
    session.inject_builtins(source_builtins(Level::Source1));

    let mut hooks = CollectHooks::new();
    let outcome = session.run(&factorial_program(5.0), &mut hooks).unwrap();
    assert!(outcome.is_suspended());
    let steps_before = session.steps();

    let bytes = session.dump().unwrap();
    drop(session);

    let mut restored = Session::load(&bytes, source_builtins(Level::Source1)).unwrap();
    assert_eq!(restored.state(), SessionState::Suspended);
    assert_eq!(restored.steps(), steps_before);

    let mut outcome = restored.resume(&mut hooks).unwrap();
    let mut guard = 0;
    while outcome.is_suspended() {
        outcome = restored.resume(&mut hooks).unwrap();
        guard += 1;
        assert!(guard < 10_000, "restored evaluation did not converge");
    }
    let value = outcome.into_finished().expect("restored run must finish");
    assert_eq!(restored.render(value), "120");
}

#[test]
fn idle_session_round_trips() {
    let mut session = Session::new(Level::Source2, Variant::Default);
    session.inject_builtins(source_builtins(Level::Source2));
    let bytes = session.dump().unwrap();

    let mut restored = Session::load(&bytes, source_builtins(Level::Source2)).unwrap();
    assert_eq!(restored.state(), SessionState::Idle);
    assert_eq!(restored.level(), Level::Source2);

    // the restored builtin table still answers calls
    let program = Node::program(vec![Node::expr_stmt(Node::call_name(
        "pair",
        vec![Node::number(1.0), Node::number(2.0)],
    ))]);
    let mut hooks = CollectHooks::new();
    let outcome = restored.run(&program, &mut hooks).unwrap();
    let value = outcome.into_finished().unwrap();
    assert_eq!(restored.render(value), "[1, 2]");
}

#[test]
fn error_log_survives_the_round_trip() {
    let mut session = Session::new(Level::Source1, Variant::Default);
    session.inject_builtins(source_builtins(Level::Source1));
    let program = Node::program(vec![Node::expr_stmt(Node::name("ghost"))]);
    let mut hooks = CollectHooks::new();
    session.run(&program, &mut hooks).unwrap();
    assert_eq!(session.errors().len(), 1);

    let bytes = session.dump().unwrap();
    let restored = Session::load(&bytes, source_builtins(Level::Source1)).unwrap();
    assert_eq!(restored.state(), SessionState::Errored);
    assert_eq!(restored.errors(), session.errors());
    assert!(restored.format_errors(false).contains("ghost"));
}
