//! Shared helpers for the integration tests: run a source snippet through a
//! fresh engine with captured output and silenced stderr.

#![allow(dead_code)]

use pika::{CollectSink, CollectStringPrint, Config, Engine, ErrorKind, PikaError};

/// Runs a snippet and returns its printed output, panicking on failure.
pub fn run(source: &str) -> String {
    match try_run(source) {
        Ok(output) => output,
        Err(err) => panic!("script failed: {err}"),
    }
}

/// Runs a snippet, returning its printed output or the error.
pub fn try_run(source: &str) -> Result<String, PikaError> {
    try_run_with(Config::default(), source)
}

/// Runs a snippet under a specific configuration.
pub fn try_run_with(config: Config, source: &str) -> Result<String, PikaError> {
    let output = CollectStringPrint::new();
    let mut engine = Engine::with_config(config);
    engine.set_writer(Box::new(output.clone()));
    engine.set_sink(Box::new(CollectSink::new()));
    engine.run_source("test", source)?;
    Ok(output.output())
}

/// Runs a snippet that must fail, returning the error.
pub fn run_err(source: &str) -> PikaError {
    match try_run(source) {
        Ok(output) => panic!("expected a failure, got output {output:?}"),
        Err(err) => err,
    }
}

/// Runs a snippet that must fail at runtime, returning the error kind.
pub fn runtime_kind(source: &str) -> ErrorKind {
    match run_err(source) {
        PikaError::Runtime { kind, .. } => kind,
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

/// Runs a snippet that must fail to compile, returning the diagnostic kinds.
pub fn compile_kinds(source: &str) -> Vec<ErrorKind> {
    match run_err(source) {
        PikaError::Compile(err) => err.diagnostics.iter().map(|d| d.kind).collect(),
        other => panic!("expected a compile error, got {other:?}"),
    }
}
