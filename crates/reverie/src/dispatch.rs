//! The request/response loop between the front end and the engine.
//!
//! One request is in flight at a time: the dispatcher pumps any active GUI
//! loops until the channel has data, reads one `[name, [args...]]` request,
//! invokes the operation, and writes its response values in order before
//! reading again. Every recoverable failure (syntax errors, runtime
//! exceptions, evaluation failures) travels inside response values; the
//! only errors that escape this loop are protocol violations and transport
//! loss, and those terminate the worker.

use std::fmt;

use pyo3::{PyErr, Python};
use tracing::{debug, warn};

use crate::{
    pump::{LoopPump, toolkit_pumps},
    session::{Check, Session},
    value::Value,
    wire::{Channel, WireError},
};

/// Fatal dispatcher failures. Anything of this type ends the process.
#[derive(Debug)]
pub enum DispatchError {
    Wire(WireError),
    /// The front end named an operation that is not registered. The
    /// contract is to die without replying; the front end restarts a fresh
    /// worker on connection loss.
    UnknownOperation(String),
    /// A request that is not `[name, [args...]]` with the expected arity
    /// and types.
    Malformed(String),
    /// The embedded interpreter failed outside of user code.
    Python(PyErr),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wire(error) => write!(f, "channel failure: {error}"),
            Self::UnknownOperation(name) => write!(f, "unknown operation: {name}"),
            Self::Malformed(detail) => write!(f, "malformed request: {detail}"),
            Self::Python(error) => write!(f, "interpreter failure: {error}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<WireError> for DispatchError {
    fn from(error: WireError) -> Self {
        Self::Wire(error)
    }
}

impl From<PyErr> for DispatchError {
    fn from(error: PyErr) -> Self {
        Self::Python(error)
    }
}

/// Dispatch loop state: the channel, the session, and the GUI pumps.
pub struct Dispatcher {
    channel: Channel,
    session: Session,
    pumps: Vec<Box<dyn LoopPump>>,
}

impl Dispatcher {
    pub fn new(channel: Channel, session: Session) -> Self {
        Self {
            channel,
            session,
            pumps: toolkit_pumps(),
        }
    }

    /// Runs until the peer closes the connection (Ok) or a fatal error
    /// occurs (Err). Responses are strictly FIFO with requests.
    pub fn run(&mut self) -> Result<(), DispatchError> {
        loop {
            self.pump_until_readable()?;
            let request = match self.channel.recv() {
                Err(WireError::Closed) => return Ok(()),
                other => other?,
            };
            let (name, args) = parse_request(&request)?;
            debug!(operation = name, "request");
            self.dispatch(name, args)?;
        }
    }

    /// Drives active GUI loops until the channel has data. Returns
    /// immediately when no toolkit is active, so the subsequent blocking
    /// read adds no latency in the common case.
    fn pump_until_readable(&mut self) -> Result<(), DispatchError> {
        loop {
            let active: Vec<usize> = Python::attach(|py| {
                self.pumps
                    .iter()
                    .enumerate()
                    .filter(|(_, pump)| pump.is_active(py))
                    .map(|(index, _)| index)
                    .collect()
            });
            if active.is_empty() || self.channel.is_readable()? {
                return Ok(());
            }
            Python::attach(|py| {
                for index in active {
                    let pump = &self.pumps[index];
                    if let Err(error) = pump.pump(py) {
                        warn!(toolkit = pump.name(), "event loop pump failed: {error}");
                    }
                }
            });
        }
    }

    fn dispatch(&mut self, name: &str, args: &[Value]) -> Result<(), DispatchError> {
        match name {
            "execute" => {
                let source = expect_str(name, args, 0)?;
                self.execute(source)
            }
            "is_incomplete" => {
                let source = expect_str(name, args, 0)?;
                let incomplete = self.session.is_incomplete(source);
                self.send(Value::Bool(incomplete))
            }
            "complete_attributes" => {
                let expr = expect_str(name, args, 0)?;
                let result = self.session.complete_attributes(expr);
                self.send(name_pair(result))
            }
            "complete_firstlevels" => {
                let result = self.session.complete_attributes("");
                self.send(name_pair(result))
            }
            "get_func_args" => {
                let expr = expect_str(name, args, 0)?;
                let result = self.session.func_args(expr);
                self.send(result.map_or(Value::None, Value::strings))
            }
            "complete_filenames" => {
                let prefix = expect_str(name, args, 0)?;
                let partial_path = expect_str(name, args, 1)?;
                let quote_char = expect_str(name, args, 2)?;
                let add_quote = expect_bool(name, args, 3)?;
                let result =
                    crate::introspect::complete_filenames(prefix, partial_path, quote_char, add_quote);
                let reply = result.map_or(Value::None, |(public, private, case_insensitive)| {
                    Value::List(vec![
                        Value::strings(public),
                        Value::strings(private),
                        Value::Bool(case_insensitive),
                    ])
                });
                self.send(reply)
            }
            "complete_dict_keys" => {
                let expr = expect_str(name, args, 0)?;
                let result = self.session.dict_keys(expr);
                self.send(result.map_or(Value::None, Value::strings))
            }
            "find_modules" => {
                let prefix = expect_str(name, args, 0)?;
                let result = self.session.find_modules(prefix);
                self.send(result.map_or(Value::None, Value::strings))
            }
            "get_module_members" => {
                let path = expect_str(name, args, 0)?;
                let result = self.session.module_members(path);
                self.send(name_pair(result))
            }
            "set_result_history_size" => {
                let size = expect_int(name, args, 0)?;
                self.session.set_result_history_size(size)?;
                self.send(Value::None)
            }
            "set_pretty_print" => {
                let enabled = expect_bool(name, args, 0)?;
                self.session.set_pretty_print(enabled)?;
                self.send(Value::None)
            }
            "clear_result_history" => {
                self.session.clear_result_history()?;
                self.send(Value::None)
            }
            "get_welcome_text" => {
                let text = self.session.welcome_text()?;
                self.send(Value::Str(text))
            }
            _ => Err(DispatchError::UnknownOperation(name.to_owned())),
        }
    }

    /// The `execute` operation: one terminal value on validation failure,
    /// otherwise an acknowledgment flushed *before* execution starts,
    /// followed by the final report once the fragment loop ends.
    fn execute(&mut self, source: &str) -> Result<(), DispatchError> {
        match self.session.check(source) {
            Check::Invalid(report) => self.send(Value::List(vec![
                Value::Bool(false),
                Value::List(vec![
                    Value::Str(report.message),
                    Value::Int(report.line),
                    Value::Int(report.column),
                ]),
            ])),
            Check::Incomplete => {
                self.send(Value::List(vec![Value::Bool(false), Value::None]))
            }
            Check::Ready(fragments) => {
                self.send(Value::List(vec![Value::Bool(true), Value::None]))?;
                let report = self.session.run(&fragments);
                self.send(Value::List(vec![
                    Value::Bool(report.success),
                    report.exception_text.into(),
                    Value::Str(report.remaining_stdin),
                ]))
            }
        }
    }

    fn send(&mut self, value: Value) -> Result<(), DispatchError> {
        self.channel.send(&value)?;
        Ok(())
    }
}

fn parse_request(request: &Value) -> Result<(&str, &[Value]), DispatchError> {
    let items = request
        .as_list()
        .ok_or_else(|| DispatchError::Malformed("request is not a list".to_owned()))?;
    let [name, args] = items else {
        return Err(DispatchError::Malformed(format!(
            "expected [name, args], got {} elements",
            items.len()
        )));
    };
    let name = name
        .as_str()
        .ok_or_else(|| DispatchError::Malformed("operation name is not a string".to_owned()))?;
    let args = args
        .as_list()
        .ok_or_else(|| DispatchError::Malformed("arguments are not a list".to_owned()))?;
    Ok((name, args))
}

fn name_pair(result: Option<(Vec<String>, Vec<String>)>) -> Value {
    result.map_or(Value::None, |(public, private)| {
        Value::List(vec![Value::strings(public), Value::strings(private)])
    })
}

fn expect_str<'a>(operation: &str, args: &'a [Value], index: usize) -> Result<&'a str, DispatchError> {
    args.get(index).and_then(Value::as_str).ok_or_else(|| {
        DispatchError::Malformed(format!("{operation}: argument {index} must be a string"))
    })
}

fn expect_bool(operation: &str, args: &[Value], index: usize) -> Result<bool, DispatchError> {
    args.get(index).and_then(Value::as_bool).ok_or_else(|| {
        DispatchError::Malformed(format!("{operation}: argument {index} must be a boolean"))
    })
}

fn expect_int(operation: &str, args: &[Value], index: usize) -> Result<i64, DispatchError> {
    args.get(index).and_then(Value::as_int).ok_or_else(|| {
        DispatchError::Malformed(format!("{operation}: argument {index} must be an integer"))
    })
}
