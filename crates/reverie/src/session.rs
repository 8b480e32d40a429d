//! The execution engine: a persistent CPython namespace plus the two-phase
//! execute pipeline.
//!
//! The session owns a synthetic `__main__` module whose dict is the
//! namespace all submitted code runs in. Nothing else mutates it; it lives
//! until the process exits. `execute` is split into [`Session::check`]
//! (compile-validate every fragment, no side effects) and [`Session::run`]
//! (execute fragments in order, committing each one's effects before the
//! next starts), so the dispatcher can flush the validation acknowledgment
//! before execution begins.

use std::ffi::CString;

use pyo3::{
    exceptions::PySyntaxError,
    prelude::*,
    types::{PyDict, PyList},
};
use tracing::debug;

use crate::{introspect, split::split};

/// Python-side bootstrap for the result display hook.
///
/// Executed in a scratch namespace at session start; the hook instance is
/// installed as `sys.displayhook` so expression statements run in "single"
/// mode report their values through it. It keeps a bounded history of
/// results, binds `_` in the user namespace, and prints either `repr` or
/// `pprint.pformat` output depending on the pretty-print flag.
const RESULT_KEEPER_DEF: &std::ffi::CStr = c"import pprint as _pprint
import sys as _sys

class ResultKeeper:
    def __init__(self, namespace, max_size):
        self.namespace = namespace
        self.history = []
        self.max_size = max_size
        self.pretty = True

    def __call__(self, value):
        if value is None:
            return
        self.history.append(value)
        if len(self.history) > self.max_size:
            del self.history[:len(self.history) - self.max_size]
        self.namespace['_'] = value
        text = _pprint.pformat(value) if self.pretty else repr(value)
        _sys.stdout.write(text + '\\n')

    def set_size(self, size):
        self.max_size = max(size, 0)
        if len(self.history) > self.max_size:
            del self.history[:len(self.history) - self.max_size]

    def clear(self):
        del self.history[:]
        self.namespace.pop('_', None)
";

/// Installs CPython's default SIGINT handler so an interrupt raises
/// `KeyboardInterrupt` inside running user code instead of killing the
/// process (the embedded interpreter is initialized without signal
/// handlers). Guarded because handlers can only be set on the main thread.
const SIGINT_BOOTSTRAP: &std::ffi::CStr = c"import signal
try:
    signal.signal(signal.SIGINT, signal.default_int_handler)
except ValueError:
    pass
";

const DEFAULT_HISTORY_SIZE: i64 = 30;

/// A definite syntax error, located in whole-submission coordinates.
///
/// `line` and `column` are 0-based; the line already includes the newline
/// counts of every fragment before the failing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxErrorReport {
    pub message: String,
    pub line: i64,
    pub column: i64,
}

/// Outcome of the validation phase.
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    /// A fragment failed to compile; nothing was or will be executed.
    Invalid(SyntaxErrorReport),
    /// The submission is a valid prefix of a longer construct.
    Incomplete,
    /// Every fragment compiled; the carried fragments are ready to run.
    /// The last one has a newline appended for the compiler's benefit.
    Ready(Vec<String>),
}

/// Final report of the execution phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub success: bool,
    /// Sanitized traceback text when `success` is false and the failure was
    /// a raised exception (always starts at user code).
    pub exception_text: Option<String>,
    /// Bytes that were already buffered on stdin after the run; never blocks.
    pub remaining_stdin: String,
}

/// Persistent execution session around the embedded interpreter.
pub struct Session {
    /// Dict of the synthetic `__main__` module registered in `sys.modules`.
    namespace: Py<PyDict>,
    /// The installed displayhook instance.
    keeper: Py<PyAny>,
    /// Generation counter for `<pyshell#N>` fragment filenames.
    generation: u64,
}

impl Session {
    /// Boots the embedded interpreter and builds the persistent namespace.
    ///
    /// Installs a fresh `__main__` module (so pdb, pickle and friends see a
    /// main module), the result display hook, and the SIGINT handler.
    pub fn new() -> PyResult<Self> {
        Python::attach(|py| {
            let types = py.import("types")?;
            let main_module = types.getattr("ModuleType")?.call1(("__main__",))?;
            let sys = py.import("sys")?;
            sys.getattr("modules")?.set_item("__main__", &main_module)?;
            let namespace: Bound<'_, PyDict> = main_module.getattr("__dict__")?.extract()?;
            namespace.set_item("__builtins__", py.import("builtins")?)?;

            py.run(SIGINT_BOOTSTRAP, None, None)?;

            let scratch = PyDict::new(py);
            py.run(RESULT_KEEPER_DEF, Some(&scratch), None)?;
            let keeper = py
                .eval(c"ResultKeeper", Some(&scratch), None)?
                .call1((&namespace, DEFAULT_HISTORY_SIZE))?;
            sys.setattr("displayhook", &keeper)?;

            debug!("session namespace initialized");
            Ok(Self {
                namespace: namespace.unbind(),
                keeper: keeper.unbind(),
                generation: 0,
            })
        })
    }

    /// Phase 1 of `execute`: split and compile-validate without running.
    ///
    /// Fragments are compiled in "single statement" mode in order. The first
    /// failure wins: a definite error stops validation with its location
    /// rebased onto the whole submission, and an incomplete trailing
    /// construct reports `Incomplete`. Validation never mutates the
    /// namespace.
    pub fn check(&self, source: &str) -> Check {
        Python::attach(|py| {
            let fragments = split(source);
            let mut prepared: Vec<String> = fragments.iter().map(|f| (*f).to_owned()).collect();
            if let Some(last) = prepared.last_mut() {
                // "single" mode wants a terminated last line; the reported
                // fragment texts are not changed by this.
                last.push('\n');
            }

            let mut preceding_lines = 0i64;
            for (index, padded) in prepared.iter().enumerate() {
                match compile_single(py, padded, "<pyshell>") {
                    Ok(()) => {}
                    Err(failure) => {
                        if is_incomplete_input(py, fragments[index]) {
                            return Check::Incomplete;
                        }
                        let mut report = failure;
                        report.line += preceding_lines;
                        return Check::Invalid(report);
                    }
                }
                preceding_lines += i64::try_from(fragments[index].matches('\n').count())
                    .unwrap_or(i64::MAX);
            }
            Check::Ready(prepared)
        })
    }

    /// Validation-only entry point for the front end's "should pressing
    /// return execute or insert a newline?" decision.
    pub fn is_incomplete(&self, source: &str) -> bool {
        matches!(self.check(source), Check::Incomplete)
    }

    /// Phase 2 of `execute`: run validated fragments against the namespace.
    ///
    /// Each fragment is recompiled under a fresh `<pyshell#N>` filename
    /// (registered in `linecache` so tracebacks show the executed text) and
    /// run to completion. A raised exception or a pending interrupt stops
    /// the loop at that fragment: earlier fragments stay committed, later
    /// ones never run. The report always carries whatever input was already
    /// buffered on stdin.
    pub fn run(&mut self, fragments: &[String]) -> ExecutionReport {
        Python::attach(|py| {
            let mut success = true;
            let mut exception_text = None;
            for fragment in fragments {
                if let Err(error) = self.run_fragment(py, fragment) {
                    success = false;
                    exception_text = Some(self.format_failure(py, &error));
                    break;
                }
            }
            ExecutionReport {
                success,
                exception_text,
                remaining_stdin: drain_stdin(py),
            }
        })
    }

    fn run_fragment(&mut self, py: Python<'_>, source: &str) -> PyResult<()> {
        // Interrupts delivered between fragments surface here.
        py.check_signals()?;

        let filename = format!("<pyshell#{}>", self.generation);
        self.generation += 1;

        // Seed linecache so tracebacks and inspect.getsource resolve the
        // synthetic filename to the text that actually ran.
        let lines: Vec<String> = source.split_inclusive('\n').map(str::to_owned).collect();
        py.import("linecache")?
            .getattr("cache")?
            .set_item(&filename, (source.len(), py.None(), lines, &filename))?;

        let builtins = py.import("builtins")?;
        let code =
            builtins
                .getattr("compile")?
                .call1((source, filename.as_str(), "single"))?;
        builtins.getattr("exec")?.call1((code, self.namespace.bind(py)))?;
        Ok(())
    }

    /// Formats a runtime failure as traceback text starting at user code.
    ///
    /// Frames above the first `<pyshell#N>` frame belong to the engine side
    /// of the call and are discarded; if no fragment frame is present (for
    /// example an interrupt with no traceback at all) everything is kept.
    fn format_failure(&self, py: Python<'_>, error: &PyErr) -> String {
        format_failure_impl(py, error).unwrap_or_else(|_| error.to_string())
    }

    pub fn set_result_history_size(&self, size: i64) -> PyResult<()> {
        Python::attach(|py| {
            self.keeper.bind(py).call_method1("set_size", (size,))?;
            Ok(())
        })
    }

    pub fn set_pretty_print(&self, enabled: bool) -> PyResult<()> {
        Python::attach(|py| self.keeper.bind(py).setattr("pretty", enabled))
    }

    pub fn clear_result_history(&self) -> PyResult<()> {
        Python::attach(|py| {
            self.keeper.bind(py).call_method0("clear")?;
            Ok(())
        })
    }

    /// Banner line the front end shows when the worker comes up.
    pub fn welcome_text(&self) -> PyResult<String> {
        Python::attach(|py| {
            let sys = py.import("sys")?;
            let version: String = sys.getattr("version")?.extract()?;
            let platform: String = sys.getattr("platform")?.extract()?;
            Ok(format!("Python {version} on {platform}\n"))
        })
    }

    // Introspection entry points. All of them evaluate against the live
    // namespace and swallow evaluation failures into `None`.

    pub fn complete_attributes(&self, expr: &str) -> Option<(Vec<String>, Vec<String>)> {
        Python::attach(|py| introspect::complete_attributes(py, self.namespace.bind(py), expr))
    }

    pub fn func_args(&self, expr: &str) -> Option<Vec<String>> {
        Python::attach(|py| introspect::func_args(py, self.namespace.bind(py), expr))
    }

    pub fn dict_keys(&self, expr: &str) -> Option<Vec<String>> {
        Python::attach(|py| introspect::dict_keys(py, self.namespace.bind(py), expr))
    }

    pub fn find_modules(&self, prefix: &str) -> Option<Vec<String>> {
        Python::attach(|py| introspect::find_modules(py, prefix))
    }

    pub fn module_members(&self, path: &str) -> Option<(Vec<String>, Vec<String>)> {
        Python::attach(|py| introspect::module_members(py, path))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Compiles one fragment in "single" mode, mapping any compilation failure
/// (syntax errors, null bytes, ...) to a located report.
fn compile_single(py: Python<'_>, source: &str, filename: &str) -> Result<(), SyntaxErrorReport> {
    let compiled = py
        .import("builtins")
        .and_then(|builtins| builtins.getattr("compile"))
        .and_then(|compile| compile.call1((source, filename, "single")));
    match compiled {
        Ok(_) => Ok(()),
        Err(error) => Err(syntax_error_report(py, &error)),
    }
}

fn syntax_error_report(py: Python<'_>, error: &PyErr) -> SyntaxErrorReport {
    let value = error.value(py);
    if value.is_instance_of::<PySyntaxError>() {
        let message = value
            .getattr("msg")
            .ok()
            .and_then(|msg| msg.extract::<String>().ok())
            .unwrap_or_else(|| value.to_string());
        let line = value
            .getattr("lineno")
            .ok()
            .and_then(|line| line.extract::<i64>().ok())
            .unwrap_or(1);
        let column = value
            .getattr("offset")
            .ok()
            .and_then(|offset| offset.extract::<i64>().ok())
            .unwrap_or(1);
        SyntaxErrorReport {
            message,
            line: (line - 1).max(0),
            column: (column - 1).max(0),
        }
    } else {
        SyntaxErrorReport {
            message: value.to_string(),
            line: 0,
            column: 0,
        }
    }
}

/// Decides whether a fragment that failed plain compilation is actually an
/// unfinished construct. `codeop.compile_command` applies the interactive
/// rules (no implied dedent at end of input) and returns `None` for input
/// that could still grow into something valid.
fn is_incomplete_input(py: Python<'_>, source: &str) -> bool {
    let result = py
        .import("codeop")
        .and_then(|codeop| codeop.getattr("compile_command"))
        .and_then(|compile_command| compile_command.call1((source, "<pyshell>", "single")));
    matches!(result, Ok(code) if code.is_none())
}

fn format_failure_impl(py: Python<'_>, error: &PyErr) -> PyResult<String> {
    let sys = py.import("sys")?;
    // User code may have buffered output; get it out before the report.
    if let Ok(stdout) = sys.getattr("stdout") {
        let _ = stdout.call_method0("flush");
    }

    let value = error.value(py);
    let tb_obj = match error.traceback(py) {
        Some(tb) => tb.into_any(),
        None => py.None().into_bound(py),
    };
    sys.setattr("last_type", value.get_type())?;
    sys.setattr("last_value", value)?;
    sys.setattr("last_traceback", &tb_obj)?;

    let traceback = py.import("traceback")?;
    if let Ok(checkcache) = py.import("linecache").and_then(|lc| lc.getattr("checkcache")) {
        let _ = checkcache.call0();
    }

    let entries: Vec<Bound<'_, PyAny>> = traceback
        .getattr("extract_tb")?
        .call1((&tb_obj,))?
        .try_iter()?
        .collect::<PyResult<_>>()?;
    let mut start = 0;
    for (index, entry) in entries.iter().enumerate() {
        let filename: String = entry.getattr("filename")?.extract()?;
        if filename.starts_with("<pyshell#") {
            start = index;
            break;
        }
    }

    let mut text = String::from("Traceback (most recent call last):\n");
    let kept = PyList::new(py, &entries[start..])?;
    let formatted: Vec<String> = traceback.getattr("format_list")?.call1((kept,))?.extract()?;
    for piece in formatted {
        text.push_str(&piece);
    }
    let only: Vec<String> = traceback
        .getattr("format_exception_only")?
        .call1((value.get_type(), value))?
        .extract()?;
    for piece in only {
        text.push_str(&piece);
    }
    Ok(text)
}

/// Reads whatever is already buffered on the process's stdin, without ever
/// blocking for more. Any failure (closed stream, platform without stdin
/// select support) yields an empty string.
fn drain_stdin(py: Python<'_>) -> String {
    drain_stdin_impl(py).unwrap_or_default()
}

fn drain_stdin_impl(py: Python<'_>) -> PyResult<String> {
    let sys = py.import("sys")?;
    let stdin = sys.getattr("stdin")?;
    let fileno: i32 = stdin.call_method0("fileno")?.extract()?;
    let select = py.import("select")?.getattr("select")?;
    let os_read = py.import("os")?.getattr("read")?;

    let mut collected: Vec<u8> = Vec::new();
    loop {
        let watched = PyList::new(py, [&stdin])?;
        let ready = select
            .call1((watched, PyList::empty(py), PyList::empty(py), 0))?
            .get_item(0)?;
        if ready.len()? == 0 {
            break;
        }
        let chunk: Vec<u8> = os_read.call1((fileno, 8192))?.extract()?;
        if chunk.is_empty() {
            break;
        }
        collected.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&collected).into_owned())
}

// Expression evaluation shared with the introspection module.
pub(crate) fn eval_in<'py>(
    py: Python<'py>,
    namespace: &Bound<'py, PyDict>,
    expr: &str,
) -> Option<Bound<'py, PyAny>> {
    let code = CString::new(expr).ok()?;
    py.eval(&code, Some(namespace), None).ok()
}
