//! Compiler emission tests driven through the bytecode dump: verify the
//! instruction shapes the compiler is specified to produce without running
//! anything.

mod common;

use pika::{CollectSink, Config, Engine, PikaError};

fn dump(source: &str) -> String {
    dump_with(Config::default(), source)
}

fn dump_with(config: Config, source: &str) -> String {
    let mut engine = Engine::with_config(config);
    engine.set_sink(Box::new(CollectSink::new()));
    engine.dump_source("dump", source).expect("source should compile")
}

/// Extracts the opcode column of every instruction line.
fn ops(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter(|line| line.starts_with("  "))
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_owned)
        .collect()
}

#[test]
fn returned_calls_become_tail_calls() {
    let source = "def f(a) return f(a) end";
    let normal = ops(&dump(source));
    assert!(normal.iter().any(|op| op == "TAIL_CALL"), "ops: {normal:?}");
    assert!(!normal.iter().any(|op| op == "CALL"));

    let debug = ops(&dump_with(
        Config {
            debug: true,
            ..Config::default()
        },
        source,
    ));
    assert!(debug.iter().any(|op| op == "CALL"), "ops: {debug:?}");
    assert!(!debug.iter().any(|op| op == "TAIL_CALL"));
}

#[test]
fn returned_expressions_are_not_tail_calls() {
    let listing = ops(&dump("def f(a) return f(a) + 1 end"));
    assert!(!listing.iter().any(|op| op == "TAIL_CALL"), "ops: {listing:?}");
}

#[test]
fn for_loops_lower_to_the_iteration_protocol() {
    let listing = ops(&dump("for x in [1, 2] do x end"));
    assert!(listing.iter().any(|op| op == "ITER_TEST"), "ops: {listing:?}");
    assert!(listing.iter().any(|op| op == "ITER"));
    assert!(listing.iter().any(|op| op == "LOOP"));
}

#[test]
fn small_locals_use_dedicated_opcodes() {
    let listing = ops(&dump("def f(a, b) return a + b end"));
    assert!(
        listing.iter().any(|op| op.starts_with("PUSH_LOCAL")),
        "ops: {listing:?}"
    );
    assert!(listing.iter().any(|op| op == "ADD"));
}

#[test]
fn interpolation_desugars_to_list_join() {
    let listing = ops(&dump("x = 1\ny = \"v=$x\""));
    assert!(
        listing.iter().any(|op| op == "PUSH_BUILTIN_FN"),
        "ops: {listing:?}"
    );
    assert!(listing.iter().any(|op| op == "PUSH_LIST"));
    assert!(listing.iter().filter(|op| *op == "LIST_APPEND").count() >= 3);
}

#[test]
fn captured_locals_close_on_scope_exit() {
    let listing = ops(&dump(
        "def mk()\n  x = 0\n  f = fn() return x end\n  return f\nend",
    ));
    assert!(
        listing.iter().any(|op| op == "PUSH_CLOSURE"),
        "ops: {listing:?}"
    );
    assert!(listing.iter().any(|op| op == "CLOSE_UPVALUE"));
    assert!(listing.iter().any(|op| op == "PUSH_UPVALUE"));
}

#[test]
fn class_declarations_emit_class_opcodes() {
    let listing = ops(&dump(
        "class A def m() return super.m() end end\nA().m()",
    ));
    assert!(
        listing.iter().any(|op| op == "CREATE_CLASS"),
        "ops: {listing:?}"
    );
    assert!(listing.iter().any(|op| op == "BIND_METHOD"));
    assert!(listing.iter().any(|op| op == "METHOD_CALL"));
    assert!(listing.iter().any(|op| op == "SUPER_CALL"));
}

#[test]
fn logic_operators_short_circuit_with_dedicated_jumps() {
    let listing = ops(&dump("x = 1 or 2\ny = 1 and 2"));
    assert!(listing.iter().any(|op| op == "OR"), "ops: {listing:?}");
    assert!(listing.iter().any(|op| op == "AND"));
}

#[test]
fn compound_assignment_sets_the_inplace_flag() {
    let listing = dump("x = [1]\nx += [2]");
    // The ADD emitted for += carries the inplace operand 1.
    assert!(
        listing.lines().any(|line| line.trim_start().contains("ADD 1")),
        "listing: {listing}"
    );
}

#[test]
fn dumping_invalid_source_reports_the_compile_error() {
    let mut engine = Engine::new();
    engine.set_sink(Box::new(CollectSink::new()));
    let err = engine.dump_source("dump", "def (").unwrap_err();
    assert!(matches!(err, PikaError::Compile(_)));
}
