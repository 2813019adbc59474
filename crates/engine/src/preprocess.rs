//! Static dependency analysis (spec.md §4.3), grounded on
//! `original_source/src/tx/parallex/spec.py::sort_tasks` /
//! `remove_unreachable_tasks`.

use std::collections::HashSet;

use crate::error::EngineError;
use crate::spec::Spec;

/// Topologically sort siblings of a `Top`/`Seq` group and rewrite nested
/// groups with the same treatment, raising `UnresolvedOrCycle` when a sibling
/// set can't be fully ordered against the names visible so far.
/// Sorting always runs (it's required for correctness, not an optimization);
/// `prune` toggles whether unreachable-from-any-`Ret` tasks are collapsed to
/// no-ops, per SPEC_FULL.md §8's pruning round-trip law and §10.4's `prune`
/// config flag.
pub fn preprocess(spec: Spec, initial_names: &HashSet<String>, prune: bool) -> Result<Spec, EngineError> {
    let sorted = sort_tree(spec, initial_names)?;
    Ok(if prune { self::prune(sorted) } else { sorted })
}

fn sort_tree(spec: Spec, visible: &HashSet<String>) -> Result<Spec, EngineError> {
    match spec {
        Spec::Top { sub } => {
            let sorted_sub = sort_siblings(visible, sub)?;
            let mut env = visible.clone();
            for s in &sorted_sub {
                env.extend(s.bound_names());
            }
            let mut out = Vec::with_capacity(sorted_sub.len());
            for s in sorted_sub {
                out.push(sort_tree(s, &env)?);
            }
            Ok(Spec::Top { sub: out })
        }
        Spec::Seq { sub } => {
            let sorted_sub = sort_siblings(visible, sub)?;
            let mut env = visible.clone();
            for s in &sorted_sub {
                env.extend(s.bound_names());
            }
            let mut out = Vec::with_capacity(sorted_sub.len());
            for s in sorted_sub {
                out.push(sort_tree(s, &env)?);
            }
            Ok(Spec::Seq { sub: out })
        }
        Spec::Map { var, coll, sub } => {
            let mut inner = visible.clone();
            inner.insert(var.clone());
            Ok(Spec::Map {
                var,
                coll,
                sub: Box::new(sort_tree(*sub, &inner)?),
            })
        }
        Spec::Cond { on, then, else_ } => Ok(Spec::Cond {
            on,
            then: Box::new(sort_tree(*then, visible)?),
            else_: Box::new(sort_tree(*else_, visible)?),
        }),
        leaf => Ok(leaf),
    }
}

/// Repeatedly move subs whose free names are already satisfied into the
/// sorted list, extending `visible` as we go within the same pass (mirrors
/// `spec.py::sort_tasks`'s single-pass progressive visibility).
fn sort_siblings(visible: &HashSet<String>, subs: Vec<Spec>) -> Result<Vec<Spec>, EngineError> {
    let mut remaining = subs;
    let mut seen = visible.clone();
    let mut sorted = Vec::new();

    while !remaining.is_empty() {
        let mut next_remaining = Vec::new();
        let mut progressed = false;

        for s in remaining {
            if s.free_names().is_subset(&seen) {
                seen.extend(s.bound_names());
                sorted.push(s);
                progressed = true;
            } else {
                next_remaining.push(s);
            }
        }

        if !progressed {
            let stuck: Vec<String> = next_remaining
                .iter()
                .flat_map(|s| s.free_names().into_iter().filter(|n| !seen.contains(n)))
                .collect();
            return Err(EngineError::UnresolvedOrCycle(stuck.join(", ")));
        }

        remaining = next_remaining;
    }

    Ok(sorted)
}

/// Replace tasks unreachable from any `Ret` sink with no-ops (spec.md §4.3.3).
fn prune(spec: Spec) -> Spec {
    match spec {
        Spec::Ret { .. } => spec,
        Spec::Let { .. } | Spec::Python { .. } => spec,
        Spec::Map { var, coll, sub } => {
            if !sub.contains_ret() {
                Spec::no_op()
            } else {
                Spec::Map {
                    var,
                    coll,
                    sub: Box::new(prune(*sub)),
                }
            }
        }
        Spec::Cond { on, then, else_ } => {
            let keep_then = then.contains_ret();
            let keep_else = else_.contains_ret();
            if !keep_then && !keep_else {
                Spec::no_op()
            } else {
                Spec::Cond {
                    on,
                    then: Box::new(if keep_then {
                        prune(*then)
                    } else {
                        Spec::no_op()
                    }),
                    else_: Box::new(if keep_else {
                        prune(*else_)
                    } else {
                        Spec::no_op()
                    }),
                }
            }
        }
        Spec::Seq { sub } => {
            if !sub.iter().any(Spec::contains_ret) {
                Spec::no_op()
            } else {
                // Seq is an atomic, opaque unit: its own contents are not
                // independently pruned (spec.py treats Seq as a black box
                // for graph purposes).
                Spec::Seq { sub }
            }
        }
        Spec::Top { sub } => {
            let kept = prune_siblings(sub);
            if kept.iter().all(Spec::is_no_op) {
                Spec::no_op()
            } else {
                Spec::Top { sub: kept }
            }
        }
    }
}

/// Backward pass: a sibling survives if it directly reaches a `Ret`, or if it
/// binds a name a surviving later sibling needs.
fn prune_siblings(subs: Vec<Spec>) -> Vec<Spec> {
    let n = subs.len();
    let mut needed: HashSet<String> = HashSet::new();
    let mut keep = vec![false; n];

    for i in (0..n).rev() {
        let self_reachable = subs[i].contains_ret();
        let binds_needed = subs[i].bound_names().iter().any(|nm| needed.contains(nm));
        if self_reachable || binds_needed {
            keep[i] = true;
            needed.extend(subs[i].free_names());
        }
    }

    subs.into_iter()
        .zip(keep)
        .map(|(s, k)| if k { prune(s) } else { Spec::no_op() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::collections::HashSet;

    #[test]
    fn unreachable_let_is_pruned() {
        let spec = Spec::Top {
            sub: vec![
                Spec::Let {
                    name: "unused".into(),
                    obj: Value::Data(serde_json::json!(1)),
                },
                Spec::Ret {
                    obj: Value::Data(serde_json::json!(2)),
                },
            ],
        };
        let out = preprocess(spec, &HashSet::new(), true).unwrap();
        match out {
            Spec::Top { sub } => {
                assert!(sub[0].is_no_op());
                assert!(matches!(sub[1], Spec::Ret { .. }));
            }
            _ => panic!("expected Top"),
        }
    }

    #[test]
    fn cycle_is_rejected() {
        let spec = Spec::Top {
            sub: vec![
                Spec::Let {
                    name: "a".into(),
                    obj: Value::Name("b".into()),
                },
                Spec::Let {
                    name: "b".into(),
                    obj: Value::Name("a".into()),
                },
            ],
        };
        assert!(matches!(
            preprocess(spec, &HashSet::new(), true),
            Err(EngineError::UnresolvedOrCycle(_))
        ));
    }
}
