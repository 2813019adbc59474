//! Value/Result model (spec.md §3) and the data-wins-over-env name resolution
//! rule confirmed against `original_source/src/tx/parallex/task.py::arg_spec_to_arg`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::queue::TaskId;

/// Either a concrete datum or a name reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Value {
    #[serde(rename = "data")]
    Data(serde_json::Value),
    #[serde(rename = "name")]
    Name(String),
}

impl Value {
    pub fn free_names(&self) -> std::collections::HashSet<String> {
        match self {
            Value::Data(_) => Default::default(),
            Value::Name(n) => std::iter::once(n.clone()).collect(),
        }
    }
}

/// A task output: tagged success/failure (spec.md §3 "Result").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Res {
    #[serde(rename = "ok")]
    Ok(serde_json::Value),
    #[serde(rename = "err")]
    Err { message: String, trace: String },
}

impl Res {
    pub fn is_err(&self) -> bool {
        matches!(self, Res::Err { .. })
    }

    pub fn err(message: impl Into<String>) -> Self {
        Res::Err {
            message: message.into(),
            trace: String::new(),
        }
    }
}

/// The outcome of resolving a `Value` against the generator's two environments.
pub enum Resolved {
    /// Already a concrete value, taken from the initial data environment or a literal.
    Known(Res),
    /// Depends on a not-yet-produced task output.
    Pending { task_id: TaskId, name: String },
    /// Free name that is neither in `data` nor `env` — a preprocessing bug if seen here.
    Unresolved(String),
}

/// Resolve a `Value` consulting `data` before `env` ("data wins when present",
/// spec.md §9 Open Question, resolved against the Python original).
pub fn resolve(
    value: &Value,
    data: &HashMap<String, Res>,
    env: &HashMap<String, TaskId>,
) -> Resolved {
    match value {
        Value::Data(v) => Resolved::Known(Res::Ok(v.clone())),
        Value::Name(name) => {
            if let Some(res) = data.get(name) {
                Resolved::Known(res.clone())
            } else if let Some(task_id) = env.get(name) {
                Resolved::Pending {
                    task_id: task_id.clone(),
                    name: name.clone(),
                }
            } else {
                Resolved::Unresolved(name.clone())
            }
        }
    }
}

/// `mbind`-style short-circuit combinator (`task.py::mbind`): the first `Err`
/// among `values` wins; otherwise `f` combines the unwrapped payloads.
pub fn bind_results<F>(values: Vec<Res>, f: F) -> Res
where
    F: FnOnce(Vec<serde_json::Value>) -> serde_json::Value,
{
    let mut payloads = Vec::with_capacity(values.len());
    for v in values {
        match v {
            Res::Err { message, trace } => return Res::Err { message, trace },
            Res::Ok(v) => payloads.push(v),
        }
    }
    Res::Ok(f(payloads))
}

/// Truthiness used by `Cond` (spec.md §3: "choose a branch by truthiness of `on`").
pub fn truthy(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}
