//! The public embedding surface: configuration and the [`Engine`].

use std::{fs, path::Path};

use crate::{
    compiler::{compile, CompileOptions},
    error::{ErrorSink, PikaError},
    heap::{HeapData, HeapStats},
    io::PrintWriter,
    resolve::ModuleLoader,
    tracer::VmTracer,
    types::{Fiber, Module},
    value::Value,
    vm::Vm,
};

/// Per-interpreter configuration. Every long-lived table the interpreter
/// uses is owned by the [`Engine`]; there is no process-wide state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directories probed for imports, in order. The current directory is
    /// always probed last.
    pub search_paths: Vec<String>,
    /// Disables the tail-call rewrite so every frame shows in tracebacks.
    pub debug: bool,
    /// Maximum value-stack size per fiber, in values.
    pub max_stack: usize,
    /// The collection threshold never drops below this many bytes.
    pub min_heap_size: usize,
    /// After a collection the threshold grows by this percentage over the
    /// live byte count.
    pub heap_fill_percent: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            debug: false,
            // ~800 KiB of 16-byte values.
            max_stack: 50_000,
            min_heap_size: 1024 * 1024,
            heap_fill_percent: 75,
        }
    }
}

/// An interpreter instance: compile and run sources, scripts, and files.
///
/// # Example
/// ```
/// use pika::{CollectStringPrint, Engine};
///
/// let output = CollectStringPrint::new();
/// let mut engine = Engine::new();
/// engine.set_writer(Box::new(output.clone()));
/// engine.run_source("demo", "print(1 + 2)").unwrap();
/// assert_eq!(output.output(), "3\n");
/// ```
pub struct Engine {
    vm: Vm,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            vm: Vm::new(config),
        }
    }

    /// Redirects `print` output.
    pub fn set_writer(&mut self, writer: Box<dyn PrintWriter>) {
        self.vm.writer = writer;
    }

    /// Redirects compile diagnostics and runtime frame walks.
    pub fn set_sink(&mut self, sink: Box<dyn ErrorSink>) {
        self.vm.sink = sink;
    }

    /// Installs an execution tracer.
    pub fn set_tracer(&mut self, tracer: Box<dyn VmTracer>) {
        self.vm.tracer = tracer;
    }

    /// Replaces the module loader.
    pub fn set_loader(&mut self, loader: Box<dyn ModuleLoader>) {
        self.vm.loader = loader;
    }

    pub fn add_search_path(&mut self, path: impl Into<String>) {
        self.vm.search_paths.push(path.into());
    }

    /// Compiles and runs a source string as a module named `name`.
    pub fn run_source(&mut self, name: &str, source: &str) -> Result<(), PikaError> {
        self.run_module_source(name.to_owned(), None, source)
    }

    /// Loads, compiles, and runs a script file.
    pub fn run_file(&mut self, path: &str) -> Result<(), PikaError> {
        let text = fs::read_to_string(path).map_err(|err| PikaError::Io(format!("cannot read '{path}': {err}")))?;
        let text = text.strip_prefix('\u{feff}').map_or_else(|| text.clone(), str::to_owned);
        let name = Path::new(path)
            .file_stem()
            .map_or_else(|| "main".to_owned(), |s| s.to_string_lossy().into_owned());
        self.run_module_source(name, Some(path.to_owned()), &text)
    }

    fn run_module_source(
        &mut self,
        name: String,
        path: Option<String>,
        source: &str,
    ) -> Result<(), PikaError> {
        let diag_path = path.clone().unwrap_or_else(|| format!("<{name}>"));
        let key = path.clone().unwrap_or_else(|| name.clone());

        let module = self
            .vm
            .alloc(HeapData::Module(Module::new(name, path)));
        self.vm.modules.insert(key.clone(), module);

        let options = CompileOptions {
            repl_mode: false,
            debug: self.vm.config.debug,
            path: diag_path,
        };
        let closure = match compile(&mut self.vm, module, source, options) {
            Ok(closure) => closure,
            Err(err) => {
                self.vm.modules.remove(&key);
                for diagnostic in &err.diagnostics {
                    self.vm.sink.report(diagnostic);
                }
                return Err(PikaError::Compile(err));
            }
        };

        self.vm.heap.get_module_mut(module).initialized = true;
        let fiber = self.vm.alloc(HeapData::Fiber(Fiber::new(closure)));
        match self.vm.run_fiber(fiber, &[]) {
            Ok(_) => Ok(()),
            Err(err) => Err(PikaError::Runtime {
                kind: err.kind,
                message: err.message,
                trace: self.vm.last_trace.clone(),
            }),
        }
    }

    /// Compiles `source` without running it and returns a bytecode listing
    /// of every function in the unit.
    pub fn dump_source(&mut self, name: &str, source: &str) -> Result<String, PikaError> {
        let module = self
            .vm
            .alloc(HeapData::Module(Module::new(name.to_owned(), None)));
        let key = format!("<dump:{name}>");
        self.vm.modules.insert(key.clone(), module);

        let options = CompileOptions {
            repl_mode: false,
            debug: self.vm.config.debug,
            path: format!("<{name}>"),
        };
        let result = match compile(&mut self.vm, module, source, options) {
            Ok(_) => Ok(crate::dump::dump_module(&self.vm.heap, module)),
            Err(err) => {
                for diagnostic in &err.diagnostics {
                    self.vm.sink.report(diagnostic);
                }
                Err(PikaError::Compile(err))
            }
        };
        self.vm.modules.remove(&key);
        result
    }

    /// Reads a global of a previously run module as its display string.
    ///
    /// Mostly useful for tests and quick host inspection.
    #[must_use]
    pub fn global_display(&self, module_name: &str, global: &str) -> Option<String> {
        let (_, &module) = self
            .vm
            .modules
            .iter()
            .find(|(_, &id)| self.vm.heap.get_module(id).name == module_name)?;
        let m = self.vm.heap.get_module(module);
        let index = m.global_index(global, &self.vm.heap)?;
        let value: Value = m.globals[index];
        Some(value.display(&self.vm.heap))
    }

    /// Snapshot of the heap for diagnostics and tests.
    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.vm.heap.stats()
    }

    /// Forces a full collection cycle; returns the number of objects freed.
    pub fn collect_garbage(&mut self) -> usize {
        self.vm.collect_garbage()
    }
}
