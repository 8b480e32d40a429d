//! Cooperative pumping of GUI toolkit event loops started by user code.
//!
//! The worker is single-threaded, so a Tk/GTK/Qt window created in the
//! session would freeze the moment execution finishes and the worker goes
//! back to waiting for a request. Between requests the dispatcher asks each
//! registered pump whether its toolkit has been activated (its module shows
//! up in `sys.modules`) and, if so, drives one bounded slice of that
//! toolkit's event dispatch. Activation is re-checked every cycle; an
//! `import tkinter` during one slice makes Tk active on the next.

use std::{thread, time::Duration};

use pyo3::prelude::*;

/// How long one pump slice may run before the channel is polled again.
pub const PUMP_SLICE: Duration = Duration::from_millis(100);

/// One supported foreign event loop.
///
/// Implementations must never block longer than roughly [`PUMP_SLICE`] per
/// `pump` call, and must tolerate being called when the toolkit is loaded
/// but idle (no application object, no windows).
pub trait LoopPump {
    fn name(&self) -> &'static str;

    /// True when the toolkit has been activated by executed code.
    fn is_active(&self, py: Python<'_>) -> bool;

    /// Runs one bounded slice of the toolkit's event dispatch.
    fn pump(&self, py: Python<'_>) -> PyResult<()>;
}

/// All pumps the dispatcher polls, in a fixed order.
pub fn toolkit_pumps() -> Vec<Box<dyn LoopPump>> {
    vec![Box::new(TkPump), Box::new(GtkPump), Box::new(QtPump)]
}

fn module_loaded(py: Python<'_>, name: &str) -> bool {
    py.import("sys")
        .and_then(|sys| sys.getattr("modules"))
        .and_then(|modules| modules.contains(name))
        .unwrap_or(false)
}

/// Tk: drain every pending event without waiting, then idle for the rest of
/// the slice. Events are only handled once a root window exists.
pub struct TkPump;

impl LoopPump for TkPump {
    fn name(&self) -> &'static str {
        "tk"
    }

    fn is_active(&self, py: Python<'_>) -> bool {
        module_loaded(py, "tkinter")
    }

    fn pump(&self, py: Python<'_>) -> PyResult<()> {
        let tkinter = py.import("tkinter")?;
        let root = tkinter.getattr("_default_root")?;
        if root.is_truthy()? {
            let backend = tkinter.getattr("_tkinter")?;
            let dont_wait = backend.getattr("DONT_WAIT")?;
            let dooneevent = backend.getattr("dooneevent")?;
            while dooneevent.call1((&dont_wait,))?.is_truthy()? {}
        }
        thread::sleep(PUMP_SLICE);
        Ok(())
    }
}

/// GTK (PyGObject): iterate the default GLib main context until it has no
/// pending events, then idle for the rest of the slice.
pub struct GtkPump;

impl LoopPump for GtkPump {
    fn name(&self) -> &'static str {
        "gtk"
    }

    fn is_active(&self, py: Python<'_>) -> bool {
        module_loaded(py, "gi.repository.Gtk")
    }

    fn pump(&self, py: Python<'_>) -> PyResult<()> {
        let glib = py.import("gi.repository.GLib")?;
        let context = glib
            .getattr("MainContext")?
            .call_method0("default")?;
        while context.call_method0("pending")?.is_truthy()? {
            context.call_method1("iteration", (false,))?;
        }
        thread::sleep(PUMP_SLICE);
        Ok(())
    }
}

/// Qt (PyQt5/PyQt6/PySide6): process posted events on the application
/// instance, then idle for the rest of the slice.
pub struct QtPump;

const QT_CORE_MODULES: &[&str] = &["PyQt5.QtCore", "PyQt6.QtCore", "PySide6.QtCore"];

impl LoopPump for QtPump {
    fn name(&self) -> &'static str {
        "qt"
    }

    fn is_active(&self, py: Python<'_>) -> bool {
        QT_CORE_MODULES.iter().any(|name| module_loaded(py, name))
    }

    fn pump(&self, py: Python<'_>) -> PyResult<()> {
        for name in QT_CORE_MODULES {
            if !module_loaded(py, name) {
                continue;
            }
            let core = py.import(*name)?;
            let app = core
                .getattr("QCoreApplication")?
                .call_method0("instance")?;
            if app.is_truthy()? {
                app.call_method0("processEvents")?;
            }
            break;
        }
        thread::sleep(PUMP_SLICE);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::toolkit_pumps;

    #[test]
    fn all_known_toolkits_are_registered() {
        let names: Vec<&str> = toolkit_pumps().iter().map(|pump| pump.name()).collect();
        assert_eq!(names, vec!["tk", "gtk", "qt"]);
    }
}
