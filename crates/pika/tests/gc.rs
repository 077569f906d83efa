//! Garbage collector behavior through the public API: automatic cycles
//! under allocation pressure, manual collection, cycle reclamation, and
//! root coverage for closed-over values.

mod common;

use pika::{CollectSink, CollectStringPrint, Config, Engine, ReplSession};

fn quiet_engine(config: Config) -> (Engine, CollectStringPrint) {
    let output = CollectStringPrint::new();
    let mut engine = Engine::with_config(config);
    engine.set_writer(Box::new(output.clone()));
    engine.set_sink(Box::new(CollectSink::new()));
    (engine, output)
}

#[test]
fn allocation_pressure_triggers_collection() {
    let config = Config {
        min_heap_size: 4096,
        heap_fill_percent: 25,
        ..Config::default()
    };
    let (mut engine, output) = quiet_engine(config);
    engine
        .run_source(
            "churn",
            "i = 0\nlast = \"\"\nwhile i < 2000 do\n  last = \"value-\" + to_string(i)\n  i += 1\nend\nprint(last)",
        )
        .expect("script should survive collection");
    assert_eq!(output.output(), "value-1999\n");
    assert!(
        engine.heap_stats().gc_cycles >= 1,
        "expected at least one collection, stats: {:?}",
        engine.heap_stats()
    );
}

#[test]
fn manual_collection_frees_unreachable_objects() {
    let (mut engine, _output) = quiet_engine(Config::default());
    engine
        .run_source("garbage", "l = [1, 2, 3]\nl = null")
        .unwrap();
    let before = engine.heap_stats().live_objects;
    let freed = engine.collect_garbage();
    assert!(freed > 0, "expected garbage to be freed");
    assert!(engine.heap_stats().live_objects < before);
}

#[test]
fn reference_cycles_are_reclaimed() {
    let (mut engine, _output) = quiet_engine(Config::default());
    engine
        .run_source("cycle", "l = []\nl.append(l)\nm = {}\nm[\"self\"] = m\nl = null\nm = null")
        .unwrap();
    let freed = engine.collect_garbage();
    assert!(freed >= 2, "cyclic list and map should be freed, freed {freed}");
}

#[test]
fn reachable_globals_survive_collection() {
    let (mut engine, output) = quiet_engine(Config::default());
    engine
        .run_source("keep", "kept = [\"still\", \"here\"]")
        .unwrap();
    engine.collect_garbage();
    engine.collect_garbage();
    assert_eq!(
        engine.global_display("keep", "kept"),
        Some("[\"still\", \"here\"]".to_owned())
    );
    let _ = output;
}

#[test]
fn closed_upvalues_keep_their_values_alive() {
    let output = CollectStringPrint::new();
    let mut session = ReplSession::with_config(Config {
        min_heap_size: 2048,
        heap_fill_percent: 25,
        ..Config::default()
    });
    session.set_writer(Box::new(output.clone()));
    session.set_sink(Box::new(CollectSink::new()));

    session
        .execute("def mk() x = [41, 42]\nreturn fn() return x end end")
        .unwrap();
    session.execute("f = mk()").unwrap();
    // Churn enough garbage to force collections between uses.
    session
        .execute("i = 0\nwhile i < 500 do\n  tmp = \"junk-\" + to_string(i)\n  i += 1\nend")
        .unwrap();
    session.execute("print(f()[1])").unwrap();
    assert!(output.output().ends_with("42\n"));
}
