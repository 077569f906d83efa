//! The fiber state machine: run/yield/resume, value delivery in both
//! directions, completion, and misuse errors.

mod common;

use common::{run, runtime_kind};
use pika::ErrorKind;

#[test]
fn run_delivers_the_first_yield() {
    assert_eq!(run("f = Fiber(fn() yield(7) end)\nprint(f.run())"), "7\n");
}

#[test]
fn run_passes_arguments_to_the_fiber_function() {
    let out = run("f = Fiber(fn(a, b) yield(a + b); return a * b end)\nprint(f.run(3, 4))\nprint(f.resume())");
    assert_eq!(out, "7\n12\n");
}

#[test]
fn resume_delivers_a_value_into_the_pending_yield() {
    let out = run(
        "f = Fiber(fn() got = yield(1); return got + 10 end)\nprint(f.run())\nprint(f.resume(5))",
    );
    assert_eq!(out, "1\n15\n");
}

#[test]
fn values_alternate_without_loss() {
    let out = run(
        "f = Fiber(fn() i = 0\nwhile i < 3 do yield(i); i += 1 end\nreturn -1 end)\nprint(f.run())\nprint(f.resume())\nprint(f.resume())\nprint(f.resume())",
    );
    assert_eq!(out, "0\n1\n2\n-1\n");
}

#[test]
fn is_done_and_function_attributes() {
    let out = run(
        "body = fn() yield(1); return 2 end\nf = Fiber(body)\nprint(f.is_done)\nf.run()\nprint(f.is_done)\nf.resume()\nprint(f.is_done)\nprint(f.function == body)",
    );
    assert_eq!(out, "false\nfalse\ntrue\ntrue\n");
}

#[test]
fn fibers_can_nest() {
    let out = run(
        "inner = Fiber(fn() yield(\"deep\") end)\nouter = Fiber(fn() yield(inner.run()) end)\nprint(outer.run())",
    );
    assert_eq!(out, "deep\n");
}

#[test]
fn rerunning_a_finished_fiber_raises() {
    assert_eq!(
        runtime_kind("f = Fiber(fn() return 1 end)\nf.run()\nf.run()"),
        ErrorKind::State
    );
}

#[test]
fn resuming_a_fiber_that_never_yielded_raises() {
    assert_eq!(
        runtime_kind("f = Fiber(fn() return 1 end)\nf.resume()"),
        ErrorKind::State
    );
    assert_eq!(
        runtime_kind("f = Fiber(fn() return 1 end)\nf.run()\nf.resume()"),
        ErrorKind::State
    );
}

#[test]
fn yield_outside_a_fiber_raises() {
    assert_eq!(runtime_kind("yield(1)"), ErrorKind::State);
}

#[test]
fn fiber_needs_a_script_function() {
    assert_eq!(runtime_kind("Fiber(3)"), ErrorKind::Type);
    assert_eq!(runtime_kind("Fiber(print)"), ErrorKind::Type);
}

#[test]
fn fiber_run_checks_arity() {
    assert_eq!(
        runtime_kind("f = Fiber(fn(a) return a end)\nf.run()"),
        ErrorKind::Arity
    );
}

#[test]
fn error_inside_a_fiber_terminates_the_chain() {
    let err = common::run_err("f = Fiber(fn() x = 1 + \"a\" end)\nf.run()");
    match err {
        pika::PikaError::Runtime { kind, .. } => assert_eq!(kind, ErrorKind::Type),
        other => panic!("expected a runtime error, got {other:?}"),
    }
}
