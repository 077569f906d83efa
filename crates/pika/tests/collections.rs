//! Lists, maps, strings, ranges: subscripts, slices, methods, and the
//! containment and type-test operators.

mod common;

use common::{run, runtime_kind};
use pika::ErrorKind;

#[test]
fn list_subscripts_and_negative_indices() {
    assert_eq!(run("l = [10, 20, 30]\nprint(l[0], l[2], l[-1], l[-3])"), "10 30 30 10\n");
    assert_eq!(run("l = [1, 2, 3]\nl[1] = 9\nprint(l)"), "[1, 9, 3]\n");
}

#[test]
fn list_slices() {
    assert_eq!(run("l = [1, 2, 3, 4]\nprint(l[1..3])"), "[2, 3]\n");
    assert_eq!(run("l = [1, 2, 3, 4]\nprint(l[1..-1])"), "[2, 3]\n");
    assert_eq!(run("l = [1, 2, 3, 4]\nprint(l[0..4])"), "[1, 2, 3, 4]\n");
    // Reversed slice reads backwards.
    assert_eq!(run("l = [1, 2, 3, 4]\nprint(l[3..0])"), "[4, 3, 2]\n");
}

#[test]
fn string_subscripts_and_slices() {
    assert_eq!(run("print(\"hello\"[1])"), "e\n");
    assert_eq!(run("print(\"hello\"[-1])"), "o\n");
    assert_eq!(run("print(\"hello\"[1..3])"), "el\n");
    assert_eq!(run("print(\"abc\"[2..0])"), "cb\n");
}

#[test]
fn list_methods() {
    assert_eq!(run("l = [1]\nl.append(2).append(3)\nprint(l)"), "[1, 2, 3]\n");
    assert_eq!(run("l = [1, 3]\nl.insert(1, 2)\nprint(l)"), "[1, 2, 3]\n");
    assert_eq!(run("l = [1, 2, 3]\nprint(l.pop(), l)"), "3 [1, 2]\n");
    assert_eq!(run("l = [1, 2, 3]\nprint(l.pop(0), l)"), "1 [2, 3]\n");
    assert_eq!(run("l = [5, 6]\nprint(l.find(6), l.find(7))"), "1 -1\n");
    assert_eq!(run("l = [1, 2]\nl.clear()\nprint(l.length)"), "0\n");
}

#[test]
fn list_extend_and_reverse() {
    assert_eq!(run("l = [1]\nl.extend([2, 3])\nprint(l)"), "[1, 2, 3]\n");
    assert_eq!(run("l = [1, 2, 3]\nprint(l.reverse())"), "[3, 2, 1]\n");
}

#[test]
fn map_get_with_default() {
    assert_eq!(run("m = {\"a\": 1}\nprint(m.get(\"a\"), m.get(\"b\"), m.get(\"b\", 9))"), "1 null 9\n");
}

#[test]
fn string_replace_and_affix_tests() {
    assert_eq!(run("print(\"a-b-c\".replace(\"-\", \"+\"))"), "a+b+c\n");
    assert_eq!(run("print(\"hello\".startswith(\"he\"), \"hello\".endswith(\"lo\"))"), "true true\n");
    assert_eq!(run("print(\"hello\".startswith(\"x\"))"), "false\n");
}

#[test]
fn map_methods_and_keys() {
    assert_eq!(run("m = {\"a\": 1}\nprint(m.has(\"a\"), m.has(\"b\"))"), "true false\n");
    assert_eq!(run("m = {\"a\": 1, \"b\": 2}\nprint(m.pop(\"a\"), m.has(\"a\"))"), "1 false\n");
    assert_eq!(run("m = {\"a\": 1, \"b\": 2}\nprint(m.keys(), m.values())"), "[\"a\", \"b\"] [1, 2]\n");
    assert_eq!(run("m = {\"a\": 1}\nm.clear()\nprint(m.has(\"a\"))"), "false\n");
}

#[test]
fn map_accepts_null_and_numeric_keys() {
    assert_eq!(run("m = {}\nm[null] = 1\nprint(m[null])"), "1\n");
    assert_eq!(run("m = {}\nm[2] = \"two\"\nprint(m[2.0])"), "two\n");
    // Ranges hash by value but compare by identity, so the same range
    // object must be used to look the entry up again.
    assert_eq!(run("m = {}\nr = 1..3\nm[true] = 1\nm[r] = 2\nprint(m[true], m[r])"), "1 2\n");
}

#[test]
fn map_iteration_skips_removed_entries() {
    let out = run("m = {\"a\": 1, \"b\": 2, \"c\": 3}\nm.pop(\"b\")\nfor k in m do print(k) end");
    assert_eq!(out, "a\nc\n");
}

#[test]
fn string_methods() {
    assert_eq!(run("print(\"aBc\".upper(), \"aBc\".lower())"), "ABC abc\n");
    assert_eq!(run("print(\"  hi  \".strip())"), "hi\n");
    assert_eq!(run("print(\"hello\".find(\"llo\"), \"hello\".find(\"x\"))"), "2 -1\n");
    assert_eq!(run("print(\"a,b,c\".split(\",\"))"), "[\"a\", \"b\", \"c\"]\n");
}

#[test]
fn range_attributes() {
    assert_eq!(run("r = 2..5\nprint(r.first, r.last)"), "2 5\n");
    assert_eq!(run("print((1..4).as_list)"), "[1, 2, 3]\n");
}

#[test]
fn containment_operator() {
    assert_eq!(run("print(2 in [1, 2], 5 in [1, 2])"), "true false\n");
    assert_eq!(run("print(\"bc\" in \"abcd\", \"x\" in \"abcd\")"), "true false\n");
    assert_eq!(run("print(\"k\" in {\"k\": 1})"), "true\n");
    assert_eq!(run("print(2 in 0..3, 3 in 0..3)"), "true false\n");
}

#[test]
fn type_test_operator() {
    assert_eq!(run("print(3 is Number, 3 is String)"), "true false\n");
    assert_eq!(run("print([] is List, {} is Map, \"\" is String)"), "true true true\n");
    assert_eq!(run("print(null is Null, true is Bool)"), "true true\n");
}

#[test]
fn every_value_knows_its_class() {
    assert_eq!(run("print(3._class.name)"), "Number\n");
    assert_eq!(run("print(\"s\"._class.name)"), "String\n");
    assert_eq!(run("print([]._class.name, {}._class.name)"), "List Map\n");
    assert_eq!(run("print(null._class.name)"), "Null\n");
}

#[test]
fn length_attributes() {
    assert_eq!(run("print(\"héllo\".length)"), "5\n");
    assert_eq!(run("print([1, 2, 3].length)"), "3\n");
}

#[test]
fn inplace_add_mutates_the_list() {
    let out = run("a = [1]\nb = a\na += [2]\nprint(b)");
    assert_eq!(out, "[1, 2]\n");
}

#[test]
fn subscript_failures() {
    assert_eq!(runtime_kind("print([1][5])"), ErrorKind::Bound);
    assert_eq!(runtime_kind("print([1][-2])"), ErrorKind::Bound);
    assert_eq!(runtime_kind("m = {}\nprint(m[\"missing\"])"), ErrorKind::Bound);
    assert_eq!(runtime_kind("print([1, 2][0..5])"), ErrorKind::Bound);
    assert_eq!(runtime_kind("print(3[0])"), ErrorKind::Type);
    assert_eq!(runtime_kind("\"abc\"[0] = \"x\""), ErrorKind::Type);
}

#[test]
fn unhashable_map_keys_raise() {
    assert_eq!(runtime_kind("m = {}\nm[[1]] = 1"), ErrorKind::Type);
    assert_eq!(runtime_kind("m = {}\nm[{}] = 1"), ErrorKind::Type);
}
