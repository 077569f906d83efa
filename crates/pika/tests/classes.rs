//! Classes: constructors, inheritance, method binds, statics, and the
//! attribute surface.

mod common;

use common::{run, runtime_kind};
use pika::ErrorKind;

#[test]
fn constructor_binds_self_attributes() {
    let out = run("class P def _init(x, y) self.x = x; self.y = y end end\np = P(3, 4)\nprint(p.x, p.y)");
    assert_eq!(out, "3 4\n");
}

#[test]
fn constructor_result_is_the_instance() {
    assert_eq!(run("class A def _init() self.v = 1 end end\nprint(A() is A)"), "true\n");
}

#[test]
fn class_without_constructor_takes_no_arguments() {
    assert_eq!(run("class A end\nprint(A() is A)"), "true\n");
    assert_eq!(runtime_kind("class A end\nA(1)"), ErrorKind::Arity);
}

#[test]
fn inherited_constructor_runs_for_the_subclass() {
    let out = run(
        "class A def _init() self.tag = \"from A\" end end\nclass B is A end\nprint(B().tag)",
    );
    assert_eq!(out, "from A\n");
}

#[test]
fn methods_dispatch_through_the_chain() {
    let out = run(
        "class A def hello() return \"hi\" end end\nclass B is A end\nprint(B().hello())",
    );
    assert_eq!(out, "hi\n");
}

#[test]
fn super_reaches_the_parent_method() {
    let out = run(
        "class A def m() return 1 end end\nclass B is A def m() return super() + 1 end end\nclass C is B def m() return super() + 1 end end\nprint(C().m())",
    );
    assert_eq!(out, "3\n");
}

#[test]
fn super_constructor_chains() {
    let out = run(
        "class A def _init() self.a = 1 end end\nclass B is A def _init() super(); self.b = 2 end end\nx = B()\nprint(x.a, x.b)",
    );
    assert_eq!(out, "1 2\n");
}

#[test]
fn bound_methods_are_first_class() {
    let out = run(
        "class A def m() return \"A\" end end\nclass B is A def m() return super() + \"B\" end end\ng = B().m\nprint(g())",
    );
    assert_eq!(out, "AB\n");
}

#[test]
fn unbound_methods_cannot_be_called() {
    assert_eq!(
        runtime_kind("class A def m() return 1 end end\nf = A.m\nf()"),
        ErrorKind::Type
    );
}

#[test]
fn class_statics_read_and_write() {
    assert_eq!(run("class A end\nA.version = 3\nprint(A.version)"), "3\n");
}

#[test]
fn class_surface_attributes() {
    assert_eq!(run("class A end\nclass B is A end\nprint(B.name, B.parent.name)"), "B A\n");
    assert_eq!(run("class A end\nprint(A.parent)"), "null\n");
}

#[test]
fn instance_class_and_chain() {
    let out = run("class A end\nclass B is A end\nb = B()\nprint(b is B, b is A, b._class.name)");
    assert_eq!(out, "true true B\n");
}

#[test]
fn instance_attributes_can_hold_callables() {
    let out = run("class A end\na = A()\na.f = fn() return 9 end\nprint(a.f())");
    assert_eq!(out, "9\n");
}

#[test]
fn missing_attribute_raises_name_error() {
    assert_eq!(runtime_kind("class A end\nprint(A().missing)"), ErrorKind::Name);
    assert_eq!(runtime_kind("print(\"s\".missing)"), ErrorKind::Name);
    assert_eq!(runtime_kind("x = 1\nx.length = 2"), ErrorKind::Name);
}

#[test]
fn cannot_inherit_from_non_classes() {
    assert_eq!(runtime_kind("class A is 3 end"), ErrorKind::Type);
    assert_eq!(runtime_kind("class A is String end"), ErrorKind::Type);
}

#[test]
fn callable_builtin_classes_construct_values() {
    assert_eq!(run("print(String(42))"), "42\n");
    assert_eq!(run("print(Number(\" 1.5 \") + 0.5)"), "2\n");
    assert_eq!(run("l = List()\nl.append(1)\nprint(l)"), "[1]\n");
    assert_eq!(run("m = Map()\nm[\"k\"] = 1\nprint(m[\"k\"])"), "1\n");
    assert_eq!(runtime_kind("Null()"), ErrorKind::Type);
}

#[test]
fn callables_expose_name_and_arity() {
    assert_eq!(run("def f(a, b) return a end\nprint(f.name, f.arity)"), "f 2\n");
    assert_eq!(run("print(print.arity)"), "-1\n");
}
