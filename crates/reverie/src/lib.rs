#![doc = include_str!("../../../README.md")]

mod dispatch;
pub mod introspect;
mod pump;
mod session;
mod split;
mod value;
mod wire;

pub use crate::{
    dispatch::{DispatchError, Dispatcher},
    pump::{GtkPump, LoopPump, PUMP_SLICE, QtPump, TkPump, toolkit_pumps},
    session::{Check, ExecutionReport, Session, SyntaxErrorReport},
    split::split,
    value::Value,
    wire::{Channel, WireError},
};
