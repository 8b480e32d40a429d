//! Introspection services behind the front end's completion and call-tip
//! features.
//!
//! Everything here evaluates against the live namespace (or the filesystem,
//! for filename completion) and follows one contract: a lookup that fails
//! for any reason returns `None`, never an error. The user is mid-keystroke
//! when these run; there is nothing useful to report about a broken
//! expression beyond "no completions".

use std::{
    collections::HashSet,
    fs,
    path::{MAIN_SEPARATOR, Path, PathBuf},
};

use pyo3::{prelude::*, types::PyDict};

use crate::session::eval_in;

/// Splits `names` into public and private lists, both sorted.
///
/// With an explicit export list, membership decides; otherwise a leading
/// underscore marks a name as private.
fn split_names(names: Vec<String>, exports: Option<&HashSet<String>>) -> (Vec<String>, Vec<String>) {
    let mut public = Vec::new();
    let mut private = Vec::new();
    for name in names {
        let is_public = match exports {
            Some(exports) => exports.contains(&name),
            None => !name.starts_with('_'),
        };
        if is_public {
            public.push(name);
        } else {
            private.push(name);
        }
    }
    public.sort();
    public.dedup();
    private.sort();
    private.dedup();
    (public, private)
}

fn export_set(object: &Bound<'_, PyAny>) -> Option<HashSet<String>> {
    let all = object.getattr("__all__").ok()?;
    let names: Vec<String> = all.extract().ok()?;
    Some(names.into_iter().collect())
}

/// Attribute completion for `expr`, or first-level completion when `expr`
/// is empty (namespace + builtins + keywords).
pub fn complete_attributes<'py>(
    py: Python<'py>,
    namespace: &Bound<'py, PyDict>,
    expr: &str,
) -> Option<(Vec<String>, Vec<String>)> {
    if expr.is_empty() {
        let mut names: Vec<String> = namespace
            .keys()
            .iter()
            .filter_map(|key| key.extract().ok())
            .collect();
        let builtins = py.import("builtins").ok()?;
        let builtin_names: Vec<String> = builtins.dir().ok()?.extract().ok()?;
        names.extend(builtin_names);
        let keyword = py.import("keyword").ok()?;
        let keywords: Vec<String> = keyword.getattr("kwlist").ok()?.extract().ok()?;
        names.extend(keywords);

        let exports = namespace
            .get_item("__all__")
            .ok()
            .flatten()
            .and_then(|all| all.extract::<Vec<String>>().ok())
            .map(|names| names.into_iter().collect::<HashSet<_>>());
        Some(split_names(names, exports.as_ref()))
    } else {
        let entity = eval_in(py, namespace, expr)?;
        let names: Vec<String> = entity.dir().ok()?.extract().ok()?;
        let exports = export_set(&entity);
        Some(split_names(names, exports.as_ref()))
    }
}

/// Parameter names of the callable `expr` evaluates to, for call tips.
/// Variadic catch-alls (`*args`, `**kwargs`) are omitted.
pub fn func_args<'py>(py: Python<'py>, namespace: &Bound<'py, PyDict>, expr: &str) -> Option<Vec<String>> {
    let entity = eval_in(py, namespace, expr)?;
    let inspect = py.import("inspect").ok()?;
    let signature = inspect.getattr("signature").ok()?.call1((&entity,)).ok()?;
    let parameter_cls = inspect.getattr("Parameter").ok()?;
    let var_positional = parameter_cls.getattr("VAR_POSITIONAL").ok()?;
    let var_keyword = parameter_cls.getattr("VAR_KEYWORD").ok()?;

    let mut names = Vec::new();
    let values = signature.getattr("parameters").ok()?.call_method0("values").ok()?;
    for parameter in values.try_iter().ok()? {
        let parameter = parameter.ok()?;
        let kind = parameter.getattr("kind").ok()?;
        if kind.eq(&var_positional).ok()? || kind.eq(&var_keyword).ok()? {
            continue;
        }
        names.push(parameter.getattr("name").ok()?.extract().ok()?);
    }
    Some(names)
}

/// Key representations (`repr`) of the mapping `expr` evaluates to, sorted.
pub fn dict_keys<'py>(py: Python<'py>, namespace: &Bound<'py, PyDict>, expr: &str) -> Option<Vec<String>> {
    let entity = eval_in(py, namespace, expr)?;
    let keys = entity.call_method0("keys").ok()?;
    let mut reprs = Vec::new();
    for key in keys.try_iter().ok()? {
        let key = key.ok()?;
        reprs.push(key.repr().ok()?.extract().ok()?);
    }
    reprs.sort();
    Some(reprs)
}

/// Importable module names under `prefix` (a dotted package path), or
/// top-level importables when `prefix` is empty.
pub fn find_modules(py: Python<'_>, prefix: &str) -> Option<Vec<String>> {
    let pkgutil = py.import("pkgutil").ok()?;
    let iter_modules = pkgutil.getattr("iter_modules").ok()?;
    let mut names: Vec<String> = Vec::new();

    if prefix.is_empty() {
        for info in iter_modules.call0().ok()?.try_iter().ok()? {
            names.push(info.ok()?.getattr("name").ok()?.extract().ok()?);
        }
        let sys = py.import("sys").ok()?;
        let builtin: Vec<String> = sys.getattr("builtin_module_names").ok()?.extract().ok()?;
        names.extend(builtin);
    } else {
        let importlib = py.import("importlib").ok()?;
        let package = importlib
            .getattr("import_module")
            .ok()?
            .call1((prefix,))
            .ok()?;
        let search_path = package.getattr("__path__").ok()?;
        for info in iter_modules.call1((search_path,)).ok()?.try_iter().ok()? {
            names.push(info.ok()?.getattr("name").ok()?.extract().ok()?);
        }
    }
    names.sort();
    names.dedup();
    Some(names)
}

/// Public/private member names of the module at dotted `path`.
///
/// Importing runs module top-level code; that is the contract the shell
/// already lives with for its own `import` statements.
pub fn module_members(py: Python<'_>, path: &str) -> Option<(Vec<String>, Vec<String>)> {
    let importlib = py.import("importlib").ok()?;
    let module = importlib.getattr("import_module").ok()?.call1((path,)).ok()?;
    let names: Vec<String> = module.dir().ok()?.extract().ok()?;
    let exports = export_set(&module);
    Some(split_names(names, exports.as_ref()))
}

/// Filename completion inside a string literal.
///
/// `partial_path` is the directory part the user has typed so far (empty
/// means the working directory; a leading `~` is expanded); `prefix` is the
/// typed start of the final component. Directory completions get a trailing
/// separator; plain files get the closing `quote_char` appended when
/// `add_quote` is set. Hidden (dot-prefixed) entries form the private list.
/// The returned flag tells the front end whether matching was
/// case-insensitive (Windows and macOS filesystems).
pub fn complete_filenames(
    prefix: &str,
    partial_path: &str,
    quote_char: &str,
    add_quote: bool,
) -> Option<(Vec<String>, Vec<String>, bool)> {
    let case_insensitive = cfg!(any(windows, target_os = "macos"));
    let directory = expand_user(partial_path);
    let directory: &Path = if directory.as_os_str().is_empty() {
        Path::new(".")
    } else {
        &directory
    };

    let lowered_prefix = prefix.to_lowercase();
    let mut public = Vec::new();
    let mut private = Vec::new();
    for entry in fs::read_dir(directory).ok()? {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name().to_string_lossy().into_owned();
        let matches = if case_insensitive {
            name.to_lowercase().starts_with(&lowered_prefix)
        } else {
            name.starts_with(prefix)
        };
        if !matches {
            continue;
        }
        let Ok(file_type) = entry.file_type() else { continue };
        let mut completion = name.clone();
        if file_type.is_dir() {
            completion.push(MAIN_SEPARATOR);
        } else if add_quote {
            completion.push_str(quote_char);
        }
        if name.starts_with('.') {
            private.push(completion);
        } else {
            public.push(completion);
        }
    }
    public.sort();
    private.sort();
    Some((public, private, case_insensitive))
}

fn expand_user(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = std::env::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
