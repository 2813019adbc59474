//! Native function registry backing the `Call` task (spec.md §4.4/§4.5).
//!
//! This repo has no embedded interpreter to call out to (pyo3 is dropped,
//! see DESIGN.md), so `mod::func` dispatches to Rust functions registered at
//! link time. The mechanism is the teacher's own `tascii::task_trait`
//! pattern (`TaskMarker` + `mark_task!` + `inventory::submit!`), repurposed
//! from "register a `Runnable` task type" to "register a named callable".

use std::collections::{BTreeMap, HashMap};

pub use inventory;

/// Positional args use digit-string keys ("0", "1", ...); keyword args use
/// their own name. Mirrors `Spec::Python`'s `params` map (spec.md §3).
pub type Args = BTreeMap<String, serde_json::Value>;
pub type FnResult = Result<serde_json::Value, String>;
pub type NativeFn = fn(&Args) -> FnResult;

pub struct Registration {
    pub module: &'static str,
    pub name: &'static str,
    pub func: NativeFn,
}

inventory::collect!(Registration);

#[macro_export]
macro_rules! register_fn {
    ($module:expr, $name:expr, $func:path) => {
        $crate::inventory::submit! {
            $crate::Registration { module: $module, name: $name, func: $func }
        }
    };
}

pub fn positional(args: &Args, index: usize) -> Option<&serde_json::Value> {
    args.get(&index.to_string())
}

pub struct Registry {
    table: HashMap<(String, String), NativeFn>,
}

impl Registry {
    fn build() -> Self {
        let mut table = HashMap::new();
        for reg in inventory::iter::<Registration> {
            table.insert((reg.module.to_string(), reg.name.to_string()), reg.func);
        }
        Registry { table }
    }

    pub fn global() -> &'static Registry {
        lazy_static::lazy_static! {
            static ref REGISTRY: Registry = Registry::build();
        }
        &REGISTRY
    }

    pub fn call(&self, module: &str, name: &str, args: &Args) -> FnResult {
        match self.table.get(&(module.to_string(), name.to_string())) {
            Some(f) => f(args),
            None => Err(format!("no such function `{module}::{name}`")),
        }
    }
}

/// A handful of builtins used by the engine's scenario tests and as a
/// starting library for programs; not a claim of completeness.
pub mod builtins {
    use super::{positional, Args, FnResult};

    pub fn identity(args: &Args) -> FnResult {
        positional(args, 0)
            .cloned()
            .ok_or_else(|| "identity expects one positional argument".to_string())
    }

    pub fn succ(args: &Args) -> FnResult {
        let n = positional(args, 0)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| "succ expects a numeric argument".to_string())?;
        Ok(serde_json::json!(n + 1.0))
    }

    pub fn add(args: &Args) -> FnResult {
        let a = positional(args, 0)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| "add expects two numeric arguments".to_string())?;
        let b = positional(args, 1)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| "add expects two numeric arguments".to_string())?;
        Ok(serde_json::json!(a + b))
    }

    pub fn always_false(_args: &Args) -> FnResult {
        Ok(serde_json::json!(false))
    }

    pub fn raises(_args: &Args) -> FnResult {
        Err("builtins::raises always fails".to_string())
    }

    crate::register_fn!("builtins", "identity", identity);
    crate::register_fn!("builtins", "succ", succ);
    crate::register_fn!("builtins", "add", add);
    crate::register_fn!("builtins", "always_false", always_false);
    crate::register_fn!("builtins", "raises", raises);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered_and_callable() {
        let registry = Registry::global();
        let mut args = Args::new();
        args.insert("0".to_string(), serde_json::json!(41));
        let result = registry.call("builtins", "succ", &args).unwrap();
        assert_eq!(result, serde_json::json!(42.0));
    }

    #[test]
    fn unknown_function_is_an_error() {
        let registry = Registry::global();
        assert!(registry.call("nope", "nope", &Args::new()).is_err());
    }
}
