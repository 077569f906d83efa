//! Module imports through a custom in-memory loader: path mapping, name
//! binding, run-at-most-once semantics, cycles, and failure propagation.

mod common;

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use pika::{
    CollectSink, CollectStringPrint, Engine, ErrorKind, ModuleLoader, ModuleSource, PikaError,
};

/// Loader that serves modules from a map, recording every requested spec.
struct MemoryLoader {
    modules: HashMap<String, String>,
    loads: Rc<RefCell<Vec<String>>>,
}

impl ModuleLoader for MemoryLoader {
    fn load(
        &mut self,
        spec: &str,
        _importer_dir: Option<&str>,
        _search_paths: &[String],
    ) -> Result<ModuleSource, String> {
        self.loads.borrow_mut().push(spec.to_owned());
        match self.modules.get(spec) {
            Some(text) => Ok(ModuleSource {
                name: spec.rsplit('/').next().unwrap_or(spec).to_owned(),
                path: Some(format!("/mem/{spec}")),
                text: text.clone(),
            }),
            None => Err(format!("module '{spec}' not found")),
        }
    }
}

fn engine_with(modules: &[(&str, &str)]) -> (Engine, CollectStringPrint, Rc<RefCell<Vec<String>>>) {
    let output = CollectStringPrint::new();
    let loads = Rc::new(RefCell::new(Vec::new()));
    let mut engine = Engine::new();
    engine.set_writer(Box::new(output.clone()));
    engine.set_sink(Box::new(CollectSink::new()));
    engine.set_loader(Box::new(MemoryLoader {
        modules: modules
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect(),
        loads: Rc::clone(&loads),
    }));
    (engine, output, loads)
}

#[test]
fn import_binds_the_module_and_reads_globals() {
    let (mut engine, output, _) = engine_with(&[("util", "def twice(x) return x * 2 end")]);
    engine
        .run_source("main", "import util\nprint(util.twice(21))")
        .unwrap();
    assert_eq!(output.output(), "42\n");
}

#[test]
fn dotted_paths_map_to_slashes_and_bind_the_last_segment() {
    let (mut engine, output, loads) = engine_with(&[("pkg/tools", "x = 9")]);
    engine
        .run_source("main", "import pkg.tools\nprint(tools.x)")
        .unwrap();
    assert_eq!(output.output(), "9\n");
    assert!(loads.borrow().contains(&"pkg/tools".to_owned()));
}

#[test]
fn import_as_renames_the_binding() {
    let (mut engine, output, _) = engine_with(&[("util", "x = 1")]);
    engine
        .run_source("main", "import util as u\nprint(u.x)")
        .unwrap();
    assert_eq!(output.output(), "1\n");
}

#[test]
fn from_import_pulls_globals_with_aliases() {
    let (mut engine, output, _) = engine_with(&[(
        "util",
        "def twice(x) return x * 2 end\ndef thrice(x) return x * 3 end",
    )]);
    engine
        .run_source(
            "main",
            "from util import twice, thrice as t3\nprint(twice(2), t3(2))",
        )
        .unwrap();
    assert_eq!(output.output(), "4 6\n");
}

#[test]
fn relative_and_parent_prefixes_reach_the_loader() {
    let (mut engine, output, loads) = engine_with(&[("./sib", "y = 5"), ("../par", "z = 6")]);
    engine
        .run_source("main", "import .sib\nimport ^par\nprint(sib.y, par.z)")
        .unwrap();
    assert_eq!(output.output(), "5 6\n");
    let loads = loads.borrow();
    assert!(loads.contains(&"./sib".to_owned()));
    assert!(loads.contains(&"../par".to_owned()));
}

#[test]
fn module_bodies_run_at_most_once() {
    let (mut engine, output, _) = engine_with(&[("util", "print(\"loaded\")\nx = 1")]);
    engine
        .run_source("main", "import util\nimport util\nprint(util.x)")
        .unwrap();
    assert_eq!(output.output(), "loaded\n1\n");
}

#[test]
fn cyclic_imports_do_not_rerun_bodies() {
    let (mut engine, output, _) = engine_with(&[
        ("a", "import b\nprint(\"a done\")"),
        ("b", "import a\nprint(\"b done\")"),
    ]);
    engine.run_source("main", "import a").unwrap();
    assert_eq!(output.output(), "b done\na done\n");
}

#[test]
fn missing_modules_raise_import_errors() {
    let (mut engine, _, _) = engine_with(&[]);
    let err = engine.run_source("main", "import nope").unwrap_err();
    match err {
        PikaError::Runtime { kind, .. } => assert_eq!(kind, ErrorKind::Import),
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn module_body_failures_surface_to_the_importer() {
    let (mut engine, _, _) = engine_with(&[("bad", "x = 1 + \"a\"")]);
    let err = engine.run_source("main", "import bad").unwrap_err();
    match err {
        PikaError::Runtime { kind, message, .. } => {
            assert_eq!(kind, ErrorKind::Import);
            assert!(message.contains("bad"), "message: {message}");
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn module_compile_failures_surface_to_the_importer() {
    let (mut engine, _, _) = engine_with(&[("broken", "def f(")]);
    let err = engine.run_source("main", "import broken").unwrap_err();
    match err {
        PikaError::Runtime { kind, .. } => assert_eq!(kind, ErrorKind::Import),
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn module_globals_are_writable_through_the_module() {
    let (mut engine, output, _) = engine_with(&[("store", "value = 0")]);
    engine
        .run_source("main", "import store\nstore.value = 7\nprint(store.value)")
        .unwrap();
    assert_eq!(output.output(), "7\n");
}
