//! Closures and the upvalue model: shared captures, mutation visibility
//! while open and after closing, and capture through intermediate
//! functions.

mod common;

use common::run;

#[test]
fn open_upvalues_alias_the_stack_slot() {
    let out = run(
        "def mk()\n  x = 1\n  set = fn() x = 2 end\n  get = fn() return x end\n  set()\n  return get()\nend\nprint(mk())",
    );
    assert_eq!(out, "2\n");
}

#[test]
fn closures_share_one_closed_upvalue() {
    let out = run(
        "def mk()\n  c = 0\n  inc = fn() c += 1; return c end\n  get = fn() return c end\n  return [inc, get]\nend\np = mk()\np[0](); p[0]()\nprint(p[1]())",
    );
    assert_eq!(out, "2\n");
}

#[test]
fn capture_chains_through_intermediate_functions() {
    let out = run(
        "def outer()\n  v = \"captured\"\n  middle = fn() return fn() return v end end\n  return middle()()\nend\nprint(outer())",
    );
    assert_eq!(out, "captured\n");
}

#[test]
fn each_call_gets_fresh_locals() {
    let out = run(
        "def counter() n = 0; return fn() n += 1; return n end end\na = counter()\nb = counter()\na(); a()\nprint(a(), b())",
    );
    assert_eq!(out, "3 1\n");
}

#[test]
fn loop_variable_capture_shares_one_upvalue() {
    // The loop variable lives in the for statement's scope, so every closure
    // created in the body captures the same slot and observes its final
    // value once the loop closes it.
    let out = run(
        "fns = []\nfor i in 0..3 do fns.append(fn() return i end) end\nprint(fns[0](), fns[1](), fns[2]())",
    );
    assert_eq!(out, "2 2 2\n");
}

#[test]
fn body_locals_close_per_iteration() {
    let out = run(
        "fns = []\nfor i in 0..3 do\n  j = i * 10\n  fns.append(fn() return j end)\nend\nprint(fns[0](), fns[1](), fns[2]())",
    );
    assert_eq!(out, "0 10 20\n");
}

#[test]
fn parameters_can_be_captured() {
    let out = run(
        "def adder(n) return fn(x) return x + n end end\nadd5 = adder(5)\nprint(add5(37))",
    );
    assert_eq!(out, "42\n");
}

#[test]
fn lambdas_are_first_class_values() {
    let out = run(
        "apply = fn(f, v) return f(v) end\nprint(apply(fn(x) return x * x end, 9))",
    );
    assert_eq!(out, "81\n");
}
