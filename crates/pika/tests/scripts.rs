//! End-to-end scripts: the language working as a whole.

mod common;

use common::{run, try_run_with};
use pika::Config;

#[test]
fn fibonacci() {
    let out = run(
        "def fib(n) if n < 2 then return n end; return fib(n-1)+fib(n-2) end\nprint(fib(10))",
    );
    assert_eq!(out, "55\n");
}

#[test]
fn string_iteration() {
    assert_eq!(run("for c in \"abc\" do print(c) end"), "a\nb\nc\n");
}

#[test]
fn map_of_lists() {
    let out = run("m = {}; m[\"k\"] = [1,2]; m[\"k\"].append(3); print(m[\"k\"].length)");
    assert_eq!(out, "3\n");
}

#[test]
fn closure_counter() {
    let out = run(
        "def mk() x=0; return fn() x += 1; return x end end\nf = mk(); print(f()); print(f()); print(f())",
    );
    assert_eq!(out, "1\n2\n3\n");
}

#[test]
fn fiber_round_trip() {
    let out = run(
        "f = Fiber(fn() yield(1); yield(2); return 3 end)\nprint(f.run()); print(f.resume()); print(f.resume())",
    );
    assert_eq!(out, "1\n2\n3\n");
}

#[test]
fn super_dispatch() {
    let out = run(
        "class A def m() return \"A\" end end\nclass B is A def m() return super() + \"B\" end end\nprint(B().m())",
    );
    assert_eq!(out, "AB\n");
}

#[test]
fn empty_module_runs() {
    assert_eq!(run(""), "");
}

#[test]
fn arithmetic_normalizes_integral_results() {
    assert_eq!(run("print(4 / 2)"), "2\n");
    assert_eq!(run("print(1 / 2)"), "0.5\n");
    assert_eq!(run("print(2 ** 10)"), "1024\n");
    assert_eq!(run("print(7 % 3)"), "1\n");
    assert_eq!(run("print(-2 ** 2)"), "-4\n");
}

#[test]
fn number_round_trips_through_strings() {
    assert_eq!(run("print(to_number(to_string(0.1)) == 0.1)"), "true\n");
    assert_eq!(run("print(to_number(to_string(1e300)) == 1e300)"), "true\n");
    assert_eq!(run("print(to_number(to_string(-12345.678)) == -12345.678)"), "true\n");
}

#[test]
fn hash_agrees_across_numeric_variants() {
    assert_eq!(run("print(hash(7) == hash(7.0))"), "true\n");
    assert_eq!(run("print(hash(\"ab\") == hash(\"a\" + \"b\"))"), "true\n");
}

#[test]
fn string_interpolation() {
    assert_eq!(run("x = 5\nprint(\"x is $x!\")"), "x is 5!\n");
    assert_eq!(run("a = 2; b = 3\nprint(\"${a} + ${b} = ${a + b}\")"), "2 + 3 = 5\n");
    assert_eq!(run("print(\"${ \"${1 + 1}\" }\")"), "2\n");
}

#[test]
fn short_circuit_keeps_the_tested_value() {
    assert_eq!(run("print(false or 7)"), "7\n");
    assert_eq!(run("print(3 or 99)"), "3\n");
    assert_eq!(run("print(null and 99)"), "null\n");
    assert_eq!(run("print(1 and 2)"), "2\n");
}

#[test]
fn while_loop_with_break_and_continue() {
    let out = run(
        "i = 0; total = 0\nwhile true do\n  i += 1\n  if i > 10 then break end\n  if i % 2 == 1 then continue end\n  total += i\nend\nprint(total)",
    );
    assert_eq!(out, "30\n");
}

#[test]
fn for_over_range_and_list() {
    assert_eq!(run("for i in 0..3 do print(i) end"), "0\n1\n2\n");
    assert_eq!(run("for i in 3..0 do print(i) end"), "3\n2\n1\n");
    assert_eq!(run("for x in [10, 20] do print(x) end"), "10\n20\n");
}

#[test]
fn for_over_map_yields_keys() {
    let out = run("m = {\"a\": 1}\nfor k in m do print(k) end");
    assert_eq!(out, "a\n");
}

#[test]
fn tail_calls_survive_deep_recursion() {
    let out = run("def count(n) if n == 0 then return 0 end; return count(n - 1) end\nprint(count(100000))");
    assert_eq!(out, "0\n");
}

#[test]
fn debug_mode_disables_tail_calls() {
    let config = Config {
        debug: true,
        ..Config::default()
    };
    let err = try_run_with(
        config,
        "def count(n) if n == 0 then return 0 end; return count(n - 1) end\nprint(count(100000))",
    )
    .unwrap_err();
    match err {
        pika::PikaError::Runtime { kind, message, .. } => {
            assert_eq!(kind, pika::ErrorKind::Overflow);
            assert!(message.contains("stack overflow"), "message: {message}");
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn compound_assignment_operators() {
    let out = run("x = 1\nx += 4; x -= 2; x *= 6; x /= 3; x %= 4\nprint(x)");
    // ((1+4-2)*6)/3 = 6, 6 % 4 = 2
    assert_eq!(out, "2\n");
    assert_eq!(run("x = 1\nx <<= 4; x >>= 2; x |= 8; x &= 12; x ^= 1\nprint(x)"), "13\n");
}

#[test]
fn builtins_cover_the_core_set() {
    assert_eq!(run("print(min(3, 2), max(3, 2), abs(-5))"), "2 3 5\n");
    assert_eq!(run("print(chr(65), ord(\"A\"))"), "A 65\n");
    assert_eq!(run("print(list_join([\"a\", 1, \"b\"]))"), "a1b\n");
    assert_eq!(run("assert(true)\nprint(\"ok\")"), "ok\n");
}

#[test]
fn builtin_names_can_be_shadowed_by_plain_assignment() {
    let out = run("keep = print\nprint = 5\nkeep(print)");
    assert_eq!(out, "5\n");
}
