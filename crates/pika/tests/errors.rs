//! The error taxonomy: compile diagnostics by kind, runtime errors by kind,
//! and the REPL-facing unexpected-EOF signal.

mod common;

use common::{compile_kinds, run_err, runtime_kind};
use pika::{ErrorKind, PikaError};

#[test]
fn unterminated_string_is_lexical_and_flags_eof() {
    let err = run_err("x = \"abc");
    match err {
        PikaError::Compile(compile) => {
            assert!(compile.unexpected_eof);
            assert_eq!(compile.diagnostics[0].kind, ErrorKind::Lexical);
        }
        other => panic!("expected a compile error, got {other:?}"),
    }
}

#[test]
fn missing_end_flags_eof() {
    let err = run_err("def f()\nreturn 1\n");
    match err {
        PikaError::Compile(compile) => assert!(compile.unexpected_eof),
        other => panic!("expected a compile error, got {other:?}"),
    }
}

#[test]
fn invalid_escape_is_lexical() {
    assert_eq!(compile_kinds("x = \"\\q\""), vec![ErrorKind::Lexical]);
}

#[test]
fn numeric_literal_overflow() {
    assert_eq!(
        compile_kinds("x = 0x10000000000000000"),
        vec![ErrorKind::Overflow]
    );
    assert_eq!(compile_kinds("x = 1e999"), vec![ErrorKind::Overflow]);
}

#[test]
fn interpolation_depth_is_limited() {
    // Eight nested levels compile; nine do not.
    let mut ok = String::from("print(");
    for _ in 0..8 {
        ok.push_str("\"${");
    }
    ok.push('1');
    for _ in 0..8 {
        ok.push_str("}\"");
    }
    ok.push(')');
    assert_eq!(common::run(&ok), "1\n");

    let mut too_deep = String::from("print(");
    for _ in 0..9 {
        too_deep.push_str("\"${");
    }
    too_deep.push('1');
    for _ in 0..9 {
        too_deep.push_str("}\"");
    }
    too_deep.push(')');
    assert_eq!(compile_kinds(&too_deep), vec![ErrorKind::Lexical]);
}

#[test]
fn return_at_top_level_is_syntax() {
    assert_eq!(compile_kinds("return 1"), vec![ErrorKind::Syntax]);
}

#[test]
fn break_outside_a_loop_is_syntax() {
    assert_eq!(compile_kinds("break"), vec![ErrorKind::Syntax]);
}

#[test]
fn invalid_assignment_target_is_syntax() {
    assert_eq!(compile_kinds("1 + 2 = 3"), vec![ErrorKind::Syntax]);
}

#[test]
fn only_the_first_syntax_error_is_reported() {
    let kinds = compile_kinds("if then\nwhile do\n]");
    assert_eq!(kinds.iter().filter(|k| **k == ErrorKind::Syntax).count(), 1);
}

#[test]
fn undefined_name_at_global_scope_is_semantic() {
    assert_eq!(compile_kinds("x = missing + 1"), vec![ErrorKind::Semantic]);
}

#[test]
fn unresolved_forward_reference_is_semantic() {
    assert_eq!(
        compile_kinds("def f() return missing end"),
        vec![ErrorKind::Semantic]
    );
}

#[test]
fn forward_references_resolve_to_later_globals() {
    let out = common::run("def f() return g() end\ndef g() return 7 end\nprint(f())");
    assert_eq!(out, "7\n");
}

#[test]
fn duplicate_parameter_is_semantic() {
    assert_eq!(
        compile_kinds("def f(a, a) return a end"),
        vec![ErrorKind::Semantic]
    );
}

#[test]
fn compound_assignment_to_a_builtin_is_semantic() {
    assert_eq!(compile_kinds("print += 1"), vec![ErrorKind::Semantic]);
}

#[test]
fn compound_assignment_to_an_undefined_name_is_semantic() {
    assert_eq!(compile_kinds("nope += 1"), vec![ErrorKind::Semantic]);
}

#[test]
fn constructors_cannot_return_values() {
    assert_eq!(
        compile_kinds("class A def _init() return 3 end end"),
        vec![ErrorKind::Semantic]
    );
}

#[test]
fn self_outside_a_method_is_semantic() {
    assert_eq!(compile_kinds("x = self"), vec![ErrorKind::Semantic]);
}

#[test]
fn arithmetic_type_errors() {
    assert_eq!(runtime_kind("x = 1 + \"a\""), ErrorKind::Type);
    assert_eq!(runtime_kind("x = -\"a\""), ErrorKind::Type);
    assert_eq!(runtime_kind("x = 1.5 | 2"), ErrorKind::Type);
    assert_eq!(runtime_kind("x = 1 << 64"), ErrorKind::Type);
    assert_eq!(runtime_kind("x = 1 << -1"), ErrorKind::Type);
}

#[test]
fn cross_type_ordering_raises() {
    assert_eq!(runtime_kind("x = 1 < \"a\""), ErrorKind::Type);
    assert_eq!(runtime_kind("x = [] < []"), ErrorKind::Type);
}

#[test]
fn equality_is_defined_everywhere() {
    assert_eq!(common::run("print(1 == \"a\", [] == [], \"x\" == \"x\")"), "false false true\n");
}

#[test]
fn non_iterable_for_loop_raises() {
    assert_eq!(runtime_kind("for x in 3 do print(x) end"), ErrorKind::Type);
    assert_eq!(runtime_kind("for x in null do print(x) end"), ErrorKind::Type);
}

#[test]
fn wrong_argument_count_raises() {
    assert_eq!(runtime_kind("def f(a) return a end\nf(1, 2)"), ErrorKind::Arity);
    assert_eq!(runtime_kind("def f(a) return a end\nf()"), ErrorKind::Arity);
    assert_eq!(runtime_kind("to_string(1, 2)"), ErrorKind::Arity);
}

#[test]
fn calling_a_non_callable_raises() {
    assert_eq!(runtime_kind("x = 3\nx()"), ErrorKind::Type);
}

#[test]
fn range_endpoints_must_be_whole_numbers() {
    assert_eq!(runtime_kind("r = 0.5..2"), ErrorKind::Type);
}

#[test]
fn assert_raises_with_the_given_message() {
    let err = run_err("assert(false, \"boom\")");
    match err {
        PikaError::Runtime { kind, message, .. } => {
            assert_eq!(kind, ErrorKind::State);
            assert_eq!(message, "boom");
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn runtime_traces_walk_the_frames() {
    let err = run_err("def inner() x = 1 + \"a\" end\ndef outer() inner() end\nouter()");
    match err {
        PikaError::Runtime { trace, .. } => {
            assert!(trace.contains("inner"), "trace: {trace}");
            assert!(trace.contains("(module)"), "trace: {trace}");
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn diagnostics_carry_path_and_line() {
    let err = run_err("x = 1\ny = missing");
    match err {
        PikaError::Compile(compile) => {
            let diag = &compile.diagnostics[0];
            assert_eq!(diag.path, "<test>");
            assert_eq!(diag.line, 2);
            assert!(diag.message.contains("missing"));
        }
        other => panic!("expected a compile error, got {other:?}"),
    }
}
