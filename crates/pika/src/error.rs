//! Error types for the compiler, the runtime, and the public embedding surface.
//!
//! Compile-time problems are accumulated as [`Diagnostic`]s and delivered to a
//! host-supplied [`ErrorSink`]. Runtime problems travel as [`RuntimeError`]
//! through [`RunResult`] until the VM attaches them to the failing fiber and
//! reports the frame walk.

use std::{
    cell::RefCell,
    fmt::{self, Display},
    rc::Rc,
};

use strum::{Display as StrumDisplay, IntoStaticStr};

/// Result type alias for operations that can produce a runtime error.
pub(crate) type RunResult<T> = Result<T, RuntimeError>;

/// Classification of every error the core produces.
///
/// The split mirrors where an error can arise: `Lexical`/`Syntax`/`Semantic`
/// during compilation, the rest at runtime. `State` covers fiber misuse
/// (re-running a running fiber, resuming one that never yielded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, IntoStaticStr)]
pub enum ErrorKind {
    /// Bad input at the character level: unterminated string, invalid escape.
    Lexical,
    /// Structurally invalid source: missing `end`, bad assignment target.
    Syntax,
    /// Valid structure with invalid meaning: undefined name, too many locals.
    Semantic,
    /// Operation applied to a value of the wrong kind.
    Type,
    /// Index or slice outside the valid range, missing map key.
    Bound,
    /// Missing or immutable attribute.
    Name,
    /// Wrong argument count or wrong argument type in a native call.
    Arity,
    /// Stack overflow or numeric literal out of range.
    Overflow,
    /// Path resolution or module load/compile failure.
    Import,
    /// Invalid runtime state: fiber machine misuse, failed `assert()`.
    State,
}

/// A runtime error before it is attached to a fiber.
///
/// Carries a kind for programmatic matching and a formatted message that
/// becomes the fiber's error string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RuntimeError {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub(crate) fn bound(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Bound, message)
    }

    pub(crate) fn name(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Name, message)
    }

    pub(crate) fn arity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Arity, message)
    }

    pub(crate) fn overflow(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Overflow, message)
    }

    pub(crate) fn import(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Import, message)
    }

    pub(crate) fn state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::State, message)
    }
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A single compile-time diagnostic with its source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    /// Path (or pseudo-path such as `<repl>`) of the unit being compiled.
    pub path: String,
    /// 1-based source line.
    pub line: u32,
    /// Byte span within the source, when known.
    pub span: Option<(usize, usize)>,
    pub message: String,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: error: {}", self.path, self.line, self.message)
    }
}

/// The outcome of a failed compilation.
///
/// `unexpected_eof` is set when the only problem was running out of input
/// mid-construct, which the REPL uses to prompt for continuation lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
    pub unexpected_eof: bool,
}

impl Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diag) in self.diagnostics.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{diag}")?;
        }
        Ok(())
    }
}

/// Destination for diagnostics and runtime error reports.
///
/// Implement this to capture or redirect error output; the default
/// [`StderrSink`] writes to stderr.
pub trait ErrorSink {
    /// Called once per compile-time diagnostic as it is recorded.
    fn report(&mut self, diagnostic: &Diagnostic);

    /// Called once per runtime failure with the formatted frame walk.
    fn runtime(&mut self, trace: &str);
}

/// Default `ErrorSink` writing to stderr.
#[derive(Debug, Default)]
pub struct StderrSink;

impl ErrorSink for StderrSink {
    fn report(&mut self, diagnostic: &Diagnostic) {
        eprintln!("{diagnostic}");
    }

    fn runtime(&mut self, trace: &str) {
        eprintln!("{trace}");
    }
}

/// An `ErrorSink` that collects everything into a shared string buffer.
///
/// Clones share the same buffer, so a test can keep one clone, hand the other
/// to the engine, and read the output afterwards.
#[derive(Debug, Default, Clone)]
pub struct CollectSink {
    buf: Rc<RefCell<String>>,
}

impl CollectSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything reported so far.
    #[must_use]
    pub fn output(&self) -> String {
        self.buf.borrow().clone()
    }
}

impl ErrorSink for CollectSink {
    fn report(&mut self, diagnostic: &Diagnostic) {
        let mut buf = self.buf.borrow_mut();
        buf.push_str(&diagnostic.to_string());
        buf.push('\n');
    }

    fn runtime(&mut self, trace: &str) {
        let mut buf = self.buf.borrow_mut();
        buf.push_str(trace);
        buf.push('\n');
    }
}

/// Top-level error surfaced by the public API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PikaError {
    /// Compilation failed; every diagnostic was also delivered to the sink.
    Compile(CompileError),
    /// Execution failed; the trace was also delivered to the sink.
    Runtime {
        kind: ErrorKind,
        message: String,
        trace: String,
    },
    /// A script file could not be read.
    Io(String),
}

impl Display for PikaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile(err) => write!(f, "{err}"),
            Self::Runtime { message, .. } => write!(f, "{message}"),
            Self::Io(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for PikaError {}
