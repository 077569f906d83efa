//! Persistent REPL session support.
//!
//! A `ReplSession` keeps one module (and the whole interpreter) alive across
//! `execute` calls, so snippets share globals, functions, and heap objects.
//! Incomplete input is detected through the compiler's unexpected-EOF signal
//! and reported as [`ReplOutcome::NeedMore`] so the driver can prompt for a
//! continuation line.

use crate::{
    compiler::{compile, CompileOptions},
    error::{ErrorSink, PikaError},
    heap::{HeapData, HeapId},
    io::PrintWriter,
    resolve::ModuleLoader,
    run::Config,
    tracer::VmTracer,
    types::{Fiber, Module},
    vm::Vm,
};

/// Result of feeding a chunk of input to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplOutcome {
    /// The input compiled and ran; non-null expression results were printed.
    Done,
    /// The input stopped mid-construct; feed more lines and try again.
    NeedMore,
}

pub struct ReplSession {
    vm: Vm,
    module: HeapId,
}

impl Default for ReplSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplSession {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    #[must_use]
    pub fn with_config(config: Config) -> Self {
        let mut vm = Vm::new(config);
        let module = vm.alloc(HeapData::Module(Module::new("<repl>".to_owned(), None)));
        vm.modules.insert("<repl>".to_owned(), module);
        vm.heap.get_module_mut(module).initialized = true;
        Self { vm, module }
    }

    pub fn set_writer(&mut self, writer: Box<dyn PrintWriter>) {
        self.vm.writer = writer;
    }

    pub fn set_sink(&mut self, sink: Box<dyn ErrorSink>) {
        self.vm.sink = sink;
    }

    pub fn set_tracer(&mut self, tracer: Box<dyn VmTracer>) {
        self.vm.tracer = tracer;
    }

    pub fn set_loader(&mut self, loader: Box<dyn ModuleLoader>) {
        self.vm.loader = loader;
    }

    /// Compiles `source` into the persistent module and runs it.
    ///
    /// A failed parse rolls the module's pools back, so the session survives
    /// arbitrary bad input. Compile diagnostics and runtime traces go to the
    /// session's error sink before the error is returned.
    pub fn execute(&mut self, source: &str) -> Result<ReplOutcome, PikaError> {
        let options = CompileOptions {
            repl_mode: true,
            debug: self.vm.config.debug,
            path: "<repl>".to_owned(),
        };
        let closure = match compile(&mut self.vm, self.module, source, options) {
            Ok(closure) => closure,
            Err(err) if err.unexpected_eof => return Ok(ReplOutcome::NeedMore),
            Err(err) => {
                for diagnostic in &err.diagnostics {
                    self.vm.sink.report(diagnostic);
                }
                return Err(PikaError::Compile(err));
            }
        };

        let fiber = self.vm.alloc(HeapData::Fiber(Fiber::new(closure)));
        match self.vm.run_fiber(fiber, &[]) {
            Ok(_) => Ok(ReplOutcome::Done),
            Err(err) => Err(PikaError::Runtime {
                kind: err.kind,
                message: err.message,
                trace: self.vm.last_trace.clone(),
            }),
        }
    }

    /// Reads a session global as its display string, for tests and host
    /// inspection.
    #[must_use]
    pub fn global_display(&self, name: &str) -> Option<String> {
        let m = self.vm.heap.get_module(self.module);
        let index = m.global_index(name, &self.vm.heap)?;
        Some(m.globals[index].display(&self.vm.heap))
    }
}
