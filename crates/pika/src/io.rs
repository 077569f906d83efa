//! Output abstraction for the `print` builtin and the REPL echo.
//!
//! Implement [`PrintWriter`] to capture or redirect script output; the
//! default [`StdPrint`] writes to stdout.

use std::{
    cell::RefCell,
    io::{self, Write as _},
    rc::Rc,
};

/// Destination for script output.
pub trait PrintWriter {
    /// Writes the text of a single printed value, without separators or a
    /// trailing newline. Those arrive through [`PrintWriter::stdout_push`].
    fn stdout_write(&mut self, output: &str);

    /// Writes a single character: the separators between printed values and
    /// the line terminator after them.
    fn stdout_push(&mut self, end: char);
}

/// Default `PrintWriter` writing to stdout, flushing on newlines.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(output.as_bytes());
        if output.contains('\n') {
            let _ = stdout.flush();
        }
    }

    fn stdout_push(&mut self, end: char) {
        let mut stdout = io::stdout().lock();
        let mut buf = [0u8; 4];
        let _ = stdout.write_all(end.encode_utf8(&mut buf).as_bytes());
        if end == '\n' {
            let _ = stdout.flush();
        }
    }
}

/// A `PrintWriter` that collects all output into a shared string buffer.
///
/// Clones share the buffer: keep one clone, hand the other to the engine,
/// and read the output afterwards. Useful for tests and for capturing
/// output programmatically.
#[derive(Debug, Default, Clone)]
pub struct CollectStringPrint {
    buf: Rc<RefCell<String>>,
}

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the collected output.
    #[must_use]
    pub fn output(&self) -> String {
        self.buf.borrow().clone()
    }

    /// Clears the buffer and returns what was collected.
    #[must_use]
    pub fn take_output(&self) -> String {
        std::mem::take(&mut *self.buf.borrow_mut())
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: &str) {
        self.buf.borrow_mut().push_str(output);
    }

    fn stdout_push(&mut self, end: char) {
        self.buf.borrow_mut().push(end);
    }
}

/// `PrintWriter` that ignores all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn stdout_write(&mut self, _output: &str) {}

    fn stdout_push(&mut self, _end: char) {}
}
