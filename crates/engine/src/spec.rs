//! The algebraic spec model (spec.md §3), grounded directly on
//! `original_source/src/tx/parallex/spec.py`'s `AbsSpec` dataclasses.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A parameter key in a `Python` call: positional keys are plain digit
/// strings, keyword keys are anything else. Kept as `String` on the wire
/// (JSON object keys are always strings) and classified on use.
pub type ParamKey = String;

#[derive(Clone, Debug, PartialEq)]
pub enum ParamKind {
    Positional(u32),
    Keyword(String),
}

pub fn classify_param_key(key: &str) -> ParamKind {
    match key.parse::<u32>() {
        Ok(n) => ParamKind::Positional(n),
        Err(_) => ParamKind::Keyword(key.to_string()),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Spec {
    #[serde(rename = "let")]
    Let { name: String, obj: Value },

    #[serde(rename = "python")]
    Python {
        name: String,
        #[serde(rename = "mod")]
        module: String,
        func: String,
        params: BTreeMap<ParamKey, Value>,
    },

    #[serde(rename = "map")]
    Map {
        var: String,
        coll: Value,
        sub: Box<Spec>,
    },

    #[serde(rename = "cond")]
    Cond {
        on: Value,
        then: Box<Spec>,
        #[serde(rename = "else")]
        else_: Box<Spec>,
    },

    #[serde(rename = "top")]
    Top { sub: Vec<Spec> },

    #[serde(rename = "seq")]
    Seq { sub: Vec<Spec> },

    #[serde(rename = "ret")]
    Ret { obj: Value },
}

impl Spec {
    pub fn no_op() -> Spec {
        Spec::Top { sub: vec![] }
    }

    pub fn is_no_op(&self) -> bool {
        matches!(self, Spec::Top { sub } if sub.is_empty())
    }

    /// Names introduced directly by this node (spec.md §4.3 bound names).
    pub fn bound_names(&self) -> HashSet<String> {
        match self {
            Spec::Let { name, .. } => std::iter::once(name.clone()).collect(),
            Spec::Python { name, .. } => std::iter::once(name.clone()).collect(),
            Spec::Map { .. } => HashSet::new(),
            Spec::Cond { .. } => HashSet::new(),
            Spec::Top { sub } => sub.iter().flat_map(Spec::bound_names).collect(),
            Spec::Seq { sub } => sub.iter().flat_map(Spec::bound_names).collect(),
            Spec::Ret { .. } => HashSet::new(),
        }
    }

    /// Names referenced by this node but not bound within it.
    pub fn free_names(&self) -> HashSet<String> {
        match self {
            Spec::Let { obj, .. } => obj.free_names(),
            Spec::Python { params, .. } => {
                params.values().flat_map(Value::free_names).collect()
            }
            Spec::Map { var, coll, sub } => {
                let mut f = sub.free_names();
                f.remove(var);
                f.extend(coll.free_names());
                f
            }
            Spec::Cond { on, then, else_ } => {
                let mut f = on.free_names();
                f.extend(then.free_names());
                f.extend(else_.free_names());
                f
            }
            Spec::Top { sub } | Spec::Seq { sub } => {
                let bound_all: HashSet<String> =
                    sub.iter().flat_map(Spec::bound_names).collect();
                let mut f = HashSet::new();
                for s in sub {
                    f.extend(s.free_names());
                }
                f.retain(|n| !bound_all.contains(n));
                f
            }
            Spec::Ret { obj } => obj.free_names(),
        }
    }

    /// Whether a `Ret` occurs anywhere within this subtree
    /// (`original_source/src/tx/parallex/spec.py::has_ret`).
    pub fn contains_ret(&self) -> bool {
        match self {
            Spec::Ret { .. } => true,
            Spec::Let { .. } | Spec::Python { .. } => false,
            Spec::Map { sub, .. } => sub.contains_ret(),
            Spec::Cond { then, else_, .. } => then.contains_ret() || else_.contains_ret(),
            Spec::Top { sub } | Spec::Seq { sub } => sub.iter().any(Spec::contains_ret),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_hides_outer_binding_of_var() {
        let spec = Spec::Map {
            var: "x".into(),
            coll: Value::Name("xs".into()),
            sub: Box::new(Spec::Ret {
                obj: Value::Name("x".into()),
            }),
        };
        assert_eq!(spec.free_names(), ["xs".to_string()].into_iter().collect());
    }

    #[test]
    fn top_free_names_excludes_bound_siblings() {
        let spec = Spec::Top {
            sub: vec![
                Spec::Let {
                    name: "a".into(),
                    obj: Value::Name("y".into()),
                },
                Spec::Ret {
                    obj: Value::Name("a".into()),
                },
            ],
        };
        assert_eq!(spec.free_names(), ["y".to_string()].into_iter().collect());
    }
}
