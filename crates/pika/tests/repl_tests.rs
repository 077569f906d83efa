//! The persistent REPL session: state across executes, result echoing,
//! continuation detection, and recovery from bad input.

mod common;

use pika::{CollectSink, CollectStringPrint, ErrorKind, PikaError, ReplOutcome, ReplSession};

fn session() -> (ReplSession, CollectStringPrint) {
    let output = CollectStringPrint::new();
    let mut session = ReplSession::new();
    session.set_writer(Box::new(output.clone()));
    session.set_sink(Box::new(CollectSink::new()));
    (session, output)
}

#[test]
fn globals_persist_across_executes() {
    let (mut repl, output) = session();
    assert_eq!(repl.execute("x = 42").unwrap(), ReplOutcome::Done);
    assert_eq!(repl.execute("x + 1").unwrap(), ReplOutcome::Done);
    assert_eq!(output.output(), "43\n");
    assert_eq!(repl.global_display("x"), Some("42".to_owned()));
}

#[test]
fn functions_and_classes_persist() {
    let (mut repl, output) = session();
    repl.execute("def double(n) return n * 2 end").unwrap();
    repl.execute("class Box def _init(v) self.v = v end end").unwrap();
    repl.execute("print(double(Box(21).v))").unwrap();
    assert_eq!(output.output(), "42\n");
}

#[test]
fn non_null_expression_results_are_echoed_as_repr() {
    let (mut repl, output) = session();
    repl.execute("1 + 2").unwrap();
    repl.execute("\"hi\"").unwrap();
    repl.execute("[1, \"a\"]").unwrap();
    assert_eq!(output.output(), "3\n\"hi\"\n[1, \"a\"]\n");
}

#[test]
fn assignments_and_null_results_are_not_echoed() {
    let (mut repl, output) = session();
    repl.execute("x = 5").unwrap();
    repl.execute("print(7)").unwrap();
    assert_eq!(output.output(), "7\n");
}

#[test]
fn incomplete_input_requests_more_lines() {
    let (mut repl, output) = session();
    assert_eq!(repl.execute("def f(n)").unwrap(), ReplOutcome::NeedMore);
    assert_eq!(repl.execute("if true then").unwrap(), ReplOutcome::NeedMore);
    assert_eq!(repl.execute("x = \"unterminated").unwrap(), ReplOutcome::NeedMore);
    assert_eq!(
        repl.execute("def f(n)\nreturn n * 2\nend").unwrap(),
        ReplOutcome::Done
    );
    repl.execute("print(f(21))").unwrap();
    assert_eq!(output.output(), "42\n");
}

#[test]
fn failed_parses_roll_the_module_back() {
    let (mut repl, _output) = session();
    let err = repl.execute("zzz = )").unwrap_err();
    assert!(matches!(err, PikaError::Compile(_)));
    // The global created for the bad statement was rolled back.
    assert_eq!(repl.global_display("zzz"), None);
    // And the session still works.
    assert_eq!(repl.execute("zzz = 1").unwrap(), ReplOutcome::Done);
    assert_eq!(repl.global_display("zzz"), Some("1".to_owned()));
}

#[test]
fn runtime_errors_do_not_poison_the_session() {
    let (mut repl, output) = session();
    let err = repl.execute("1 + \"a\"").unwrap_err();
    match err {
        PikaError::Runtime { kind, .. } => assert_eq!(kind, ErrorKind::Type),
        other => panic!("expected a runtime error, got {other:?}"),
    }
    repl.execute("print(\"alive\")").unwrap();
    assert_eq!(output.output(), "alive\n");
}
