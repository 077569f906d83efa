#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is range-checked at the call sites")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional in the numeric model")]
#![expect(clippy::cast_possible_wrap, reason = "hash and bit-op wrapping is intentional")]

mod builtins;
mod codegen;
mod compiler;
mod dump;
mod error;
mod heap;
mod io;
mod lexer;
mod opcode;
mod repl;
mod resolve;
mod run;
mod tracer;
mod types;
mod value;
mod vm;

pub use crate::{
    error::{CollectSink, CompileError, Diagnostic, ErrorKind, ErrorSink, PikaError, StderrSink},
    heap::HeapStats,
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    repl::{ReplOutcome, ReplSession},
    resolve::{FsLoader, ModuleLoader, ModuleSource},
    run::{Config, Engine},
    tracer::{NoopTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer},
};
