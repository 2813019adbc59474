//! Compiles a preprocessed `Spec` tree into queued tasks (spec.md §4.4),
//! grounded on `original_source/src/tx/parallex/task.py::generate_tasks`/
//! `enqueue` and the node-id scheme of `spec.py::generate_dependency_graph`.
//!
//! Every node either resolves entirely at generation time (a literal `Let`,
//! an already-known `Map` collection, a statically-taken `Cond` branch) or
//! becomes a `Dynamic*` task that re-enters `generate` once its one missing
//! value lands (spec.md §4.5 "dynamic variants").

use std::collections::{HashMap, HashSet};

use crate::error::EngineError;
use crate::queue::{DependentQueue, TaskId};
use crate::spec::Spec;
use crate::task::{ParamSource, TaskBody};
use crate::value::{resolve, truthy, Res, Resolved, Value};

/// The ambient evaluation context threaded through recursive `generate`
/// calls: the data scope visible at this point in the tree (outer `Map`
/// bindings, the original input) and the current nesting `level`, carried
/// along purely as a diagnostic (spec.md §9 "nesting depth").
pub struct GenCtx<'a> {
    pub data: &'a HashMap<String, Res>,
    pub level: i32,
}

/// Concatenates a path prefix and the next segment (spec.md §8's `@`-paths).
pub fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

fn hold_deps(hold: &HashSet<TaskId>) -> HashMap<TaskId, HashSet<String>> {
    hold.iter().map(|h| (h.clone(), HashSet::new())).collect()
}

/// Computes the dependency edges a `DynamicMap`/`DynamicGuard` task needs for
/// every outer-scope name its not-yet-generated subtree references beyond its
/// own collection/guard value, mirroring the Python original's
/// `DynamicMap.baseRun`/`DynamicGuard.baseRun` populating `subnode_depends_on`
/// from `get_task_depends_on(top, subspec)` before recursing. Without this,
/// a value some sibling `Python`/`Call` already produced by the time the
/// dynamic task runs would hold no reference and could be garbage-collected
/// out from under the subtree that is about to ask for it.
fn extra_subtree_deps(
    free_names: HashSet<String>,
    exclude: &[&str],
    ctx_data: &HashMap<String, Res>,
    env: &HashMap<String, TaskId>,
) -> HashMap<TaskId, HashSet<String>> {
    let mut out: HashMap<TaskId, HashSet<String>> = HashMap::new();
    for name in free_names {
        if exclude.contains(&name.as_str()) || ctx_data.contains_key(&name) {
            continue;
        }
        if let Some(task_id) = env.get(&name) {
            out.entry(task_id.clone())
                .or_insert_with(HashSet::new)
                .insert(name);
        }
        // Otherwise the name is statically unresolvable here; the nested
        // `generate` call will surface the same `UnresolvedOrCycle` error
        // `resolve()` would have raised eagerly.
    }
    out
}

/// Generates one `Map` row, honoring `level` (spec.md §9, SPEC_FULL.md §10.4):
/// at `level <= 0` the row's whole subtree is packaged as a single `Seq` task
/// rather than expanded into independent queued tasks, trading parallelism
/// for fewer tasks-in-flight; each level below that consumes one unit of
/// budget before falling back to packaging again for any map nested inside.
pub fn generate_row(
    sub: &Spec,
    row_data: &HashMap<String, Res>,
    level: i32,
    env: &HashMap<String, TaskId>,
    row_prefix: &str,
    hold: &HashSet<TaskId>,
    queue: &DependentQueue,
) -> Result<(), EngineError> {
    if level <= 0 {
        let packaged = Spec::Seq {
            sub: vec![sub.clone()],
        };
        let ctx = GenCtx {
            data: row_data,
            level,
        };
        generate(&packaged, &ctx, env, row_prefix, hold, queue)?;
    } else {
        let ctx = GenCtx {
            data: row_data,
            level: level - 1,
        };
        generate(sub, &ctx, env, row_prefix, hold, queue)?;
    }
    Ok(())
}

/// Walks `spec`, queuing one or more tasks under `prefix`. Returns the
/// name -> task_id bindings this subtree contributes to its enclosing
/// scope (empty unless `spec` is a `Let`/`Python`/`Seq`, matching
/// `Spec::bound_names`).
pub fn generate(
    spec: &Spec,
    ctx: &GenCtx,
    env: &HashMap<String, TaskId>,
    prefix: &str,
    hold: &HashSet<TaskId>,
    queue: &DependentQueue,
) -> Result<HashMap<String, TaskId>, EngineError> {
    match spec {
        Spec::Let { name, obj } => gen_let(name, obj, ctx, env, prefix, hold, queue),
        Spec::Python {
            name,
            module,
            func,
            params,
        } => gen_python(name, module, func, params, ctx, env, prefix, hold, queue),
        Spec::Map { var, coll, sub } => gen_map(var, coll, sub, ctx, env, prefix, hold, queue),
        Spec::Cond { on, then, else_ } => gen_cond(on, then, else_, ctx, env, prefix, hold, queue),
        Spec::Top { sub } => gen_top(sub, ctx, env, prefix, hold, queue),
        Spec::Seq { sub } => gen_seq(sub, ctx, env, prefix, hold, queue),
        Spec::Ret { obj } => gen_ret(obj, ctx, env, prefix, hold, queue),
    }
}

fn gen_let(
    name: &str,
    obj: &Value,
    ctx: &GenCtx,
    env: &HashMap<String, TaskId>,
    prefix: &str,
    hold: &HashSet<TaskId>,
    queue: &DependentQueue,
) -> Result<HashMap<String, TaskId>, EngineError> {
    let id = join(prefix, name);
    let mut depends_on = hold_deps(hold);

    let body = match resolve(obj, ctx.data, env) {
        Resolved::Known(res) => TaskBody::Let {
            name: name.to_string(),
            value: res,
        },
        Resolved::Pending { task_id, name: up } => {
            depends_on
                .entry(task_id)
                .or_insert_with(HashSet::new)
                .insert(up.clone());
            TaskBody::DynamicLet {
                name: name.to_string(),
                obj_name: up,
            }
        }
        Resolved::Unresolved(n) => return Err(EngineError::UnresolvedOrCycle(n)),
    };

    let produces: HashSet<String> = std::iter::once(name.to_string()).collect();
    queue.put(id.clone(), body, depends_on, HashMap::new(), produces, false)?;
    Ok(std::iter::once((name.to_string(), id)).collect())
}

#[allow(clippy::too_many_arguments)]
fn gen_python(
    name: &str,
    module: &str,
    func: &str,
    params: &std::collections::BTreeMap<String, Value>,
    ctx: &GenCtx,
    env: &HashMap<String, TaskId>,
    prefix: &str,
    hold: &HashSet<TaskId>,
    queue: &DependentQueue,
) -> Result<HashMap<String, TaskId>, EngineError> {
    let id = join(prefix, name);
    let mut depends_on = hold_deps(hold);
    let mut task_params = HashMap::new();

    for (key, value) in params {
        match resolve(value, ctx.data, env) {
            Resolved::Known(res) => {
                task_params.insert(key.clone(), ParamSource::Literal(res));
            }
            Resolved::Pending { task_id, name: up } => {
                depends_on
                    .entry(task_id)
                    .or_insert_with(HashSet::new)
                    .insert(up.clone());
                task_params.insert(key.clone(), ParamSource::FromDep(up));
            }
            Resolved::Unresolved(n) => return Err(EngineError::UnresolvedOrCycle(n)),
        }
    }

    let produces: HashSet<String> = std::iter::once(name.to_string()).collect();
    let body = TaskBody::Call {
        name: name.to_string(),
        module: module.to_string(),
        func: func.to_string(),
        params: task_params,
    };
    queue.put(id.clone(), body, depends_on, HashMap::new(), produces, false)?;
    Ok(std::iter::once((name.to_string(), id)).collect())
}

fn gen_map(
    var: &str,
    coll: &Value,
    sub: &Spec,
    ctx: &GenCtx,
    env: &HashMap<String, TaskId>,
    prefix: &str,
    hold: &HashSet<TaskId>,
    queue: &DependentQueue,
) -> Result<HashMap<String, TaskId>, EngineError> {
    match resolve(coll, ctx.data, env) {
        Resolved::Known(Res::Ok(json)) => {
            if let Some(rows) = json.as_array() {
                for (i, row) in rows.iter().enumerate() {
                    let mut row_data = ctx.data.clone();
                    row_data.insert(var.to_string(), Res::Ok(row.clone()));
                    let row_prefix = join(prefix, &format!("@map{i}"));
                    generate_row(sub, &row_data, ctx.level, env, &row_prefix, hold, queue)?;
                }
            }
            // A non-array `coll` produces no rows; the generation layer
            // doesn't reject it, matching the runtime boundary behavior.
            Ok(HashMap::new())
        }
        // An already-Err collection produces no rows (spec.md §8).
        Resolved::Known(Res::Err { .. }) => Ok(HashMap::new()),
        Resolved::Pending { task_id, name } => {
            let id = join(prefix, "@map");
            let mut depends_on = hold_deps(hold);
            depends_on
                .entry(task_id)
                .or_insert_with(HashSet::new)
                .insert(name.clone());
            let subtree_depends_on =
                extra_subtree_deps(sub.free_names(), &[var, name.as_str()], ctx.data, env);
            let body = TaskBody::DynamicMap {
                var: var.to_string(),
                coll_name: name,
                sub: Box::new(sub.clone()),
                prefix: prefix.to_string(),
                data: ctx.data.clone(),
                env: env.clone(),
                hold: hold.clone(),
                level: ctx.level,
            };
            queue.put(id, body, depends_on, subtree_depends_on, HashSet::new(), false)?;
            Ok(HashMap::new())
        }
        Resolved::Unresolved(n) => Err(EngineError::UnresolvedOrCycle(n)),
    }
}

fn gen_cond(
    on: &Value,
    then: &Spec,
    else_: &Spec,
    ctx: &GenCtx,
    env: &HashMap<String, TaskId>,
    prefix: &str,
    hold: &HashSet<TaskId>,
    queue: &DependentQueue,
) -> Result<HashMap<String, TaskId>, EngineError> {
    match resolve(on, ctx.data, env) {
        Resolved::Known(Res::Ok(v)) => {
            let (branch, seg) = if truthy(&v) {
                (then, "@cond.@then")
            } else {
                (else_, "@cond.@else")
            };
            generate(branch, ctx, env, &join(prefix, seg), hold, queue)
        }
        Resolved::Known(Res::Err { message, trace }) => {
            // `on` is already known to be an error: neither branch runs, but
            // the error still needs to reach the sink, deferred to execution
            // time via a plain `Ret` task (mirrors `DynamicGuard`'s runtime
            // `emit_error`, since `generate` itself has no sink).
            let id = join(prefix, "@cond");
            let depends_on = hold_deps(hold);
            queue.put(
                id.clone(),
                TaskBody::Ret {
                    path: id,
                    value: Res::Err { message, trace },
                },
                depends_on,
                HashMap::new(),
                HashSet::new(),
                false,
            )?;
            Ok(HashMap::new())
        }
        Resolved::Pending { task_id, name } => {
            let id = join(prefix, "@cond");
            let mut depends_on = hold_deps(hold);
            depends_on
                .entry(task_id)
                .or_insert_with(HashSet::new)
                .insert(name.clone());
            let mut branch_free = then.free_names();
            branch_free.extend(else_.free_names());
            let subtree_depends_on =
                extra_subtree_deps(branch_free, &[name.as_str()], ctx.data, env);
            let body = TaskBody::DynamicGuard {
                on_name: name,
                then: Box::new(then.clone()),
                else_: Box::new(else_.clone()),
                prefix: prefix.to_string(),
                data: ctx.data.clone(),
                env: env.clone(),
                hold: hold.clone(),
                level: ctx.level,
            };
            queue.put(id, body, depends_on, subtree_depends_on, HashSet::new(), false)?;
            Ok(HashMap::new())
        }
        Resolved::Unresolved(n) => Err(EngineError::UnresolvedOrCycle(n)),
    }
}

/// `Top`'s siblings are already topologically sorted (`preprocess::sort_tree`),
/// so a single left-to-right pass, extending `env` as each child's bindings
/// land, is enough.
fn gen_top(
    sub: &[Spec],
    ctx: &GenCtx,
    env: &HashMap<String, TaskId>,
    prefix: &str,
    hold: &HashSet<TaskId>,
    queue: &DependentQueue,
) -> Result<HashMap<String, TaskId>, EngineError> {
    let mut local_env = env.clone();
    let mut added = HashMap::new();
    for (i, s) in sub.iter().enumerate() {
        let child_prefix = join(prefix, &format!("@top{i}"));
        let bound = generate(s, ctx, &local_env, &child_prefix, hold, queue)?;
        for (name, id) in bound {
            local_env.insert(name.clone(), id.clone());
            added.insert(name, id);
        }
    }
    Ok(added)
}

/// A `Seq` subtree runs as a single worker-side unit (spec.md §4.5), so
/// `generate` queues exactly one task for it rather than recursing.
fn gen_seq(
    sub: &[Spec],
    ctx: &GenCtx,
    env: &HashMap<String, TaskId>,
    prefix: &str,
    hold: &HashSet<TaskId>,
    queue: &DependentQueue,
) -> Result<HashMap<String, TaskId>, EngineError> {
    let whole = Spec::Seq { sub: sub.to_vec() };
    let free = whole.free_names();
    let produces = whole.bound_names();

    let id = join(prefix, "@seq");
    let mut depends_on = hold_deps(hold);
    let mut literals = HashMap::new();

    for name in &free {
        match resolve(&Value::Name(name.clone()), ctx.data, env) {
            Resolved::Known(res) => {
                literals.insert(name.clone(), res);
            }
            Resolved::Pending { task_id, name: up } => {
                depends_on
                    .entry(task_id)
                    .or_insert_with(HashSet::new)
                    .insert(up);
            }
            Resolved::Unresolved(n) => return Err(EngineError::UnresolvedOrCycle(n)),
        }
    }

    queue.put(
        id.clone(),
        TaskBody::Seq {
            sub: sub.to_vec(),
            prefix: prefix.to_string(),
            produces: produces.clone(),
            literals,
        },
        depends_on,
        HashMap::new(),
        produces.clone(),
        false,
    )?;

    Ok(produces.into_iter().map(|name| (name, id.clone())).collect())
}

fn gen_ret(
    obj: &Value,
    ctx: &GenCtx,
    env: &HashMap<String, TaskId>,
    prefix: &str,
    hold: &HashSet<TaskId>,
    queue: &DependentQueue,
) -> Result<HashMap<String, TaskId>, EngineError> {
    let id = join(prefix, "@ret");
    let mut depends_on = hold_deps(hold);

    let body = match resolve(obj, ctx.data, env) {
        Resolved::Known(res) => TaskBody::Ret {
            path: id.clone(),
            value: res,
        },
        Resolved::Pending { task_id, name } => {
            depends_on
                .entry(task_id)
                .or_insert_with(HashSet::new)
                .insert(name.clone());
            TaskBody::DynamicRet {
                path: id.clone(),
                obj_name: name,
            }
        }
        Resolved::Unresolved(n) => return Err(EngineError::UnresolvedOrCycle(n)),
    };

    queue.put(id, body, depends_on, HashMap::new(), HashSet::new(), false)?;
    Ok(HashMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::GetOutcome;
    use crate::store::MapStore;
    use std::sync::Arc;

    fn new_queue() -> DependentQueue {
        DependentQueue::new(Arc::new(MapStore::new()))
    }

    #[test]
    fn let_with_known_value_is_immediately_ready() {
        let queue = new_queue();
        let data = HashMap::new();
        let env = HashMap::new();
        let ctx = GenCtx { data: &data, level: 0 };
        let spec = Spec::Let {
            name: "a".into(),
            obj: Value::Data(serde_json::json!(1)),
        };
        let bound = generate(&spec, &ctx, &env, "", &HashSet::new(), &queue).unwrap();
        assert_eq!(bound.get("a"), Some(&"a".to_string()));
        assert!(matches!(queue.get(), GetOutcome::Task { id, .. } if id == "a"));
    }

    #[test]
    fn map_over_known_collection_expands_eagerly_with_no_upward_binding() {
        let queue = new_queue();
        let mut data = HashMap::new();
        data.insert("xs".to_string(), Res::Ok(serde_json::json!([1, 2, 3])));
        let env = HashMap::new();
        let ctx = GenCtx { data: &data, level: 0 };
        let spec = Spec::Map {
            var: "x".into(),
            coll: Value::Name("xs".into()),
            sub: Box::new(Spec::Ret {
                obj: Value::Name("x".into()),
            }),
        };
        let bound = generate(&spec, &ctx, &env, "", &HashSet::new(), &queue).unwrap();
        assert!(bound.is_empty());
        assert_eq!(queue.in_flight_count(), 3);
    }

    #[test]
    fn map_over_pending_collection_creates_a_single_dynamic_map_task() {
        let queue = new_queue();
        let data = HashMap::new();
        let mut env = HashMap::new();
        env.insert("xs".to_string(), "producer".to_string());
        let ctx = GenCtx { data: &data, level: 0 };
        let spec = Spec::Map {
            var: "x".into(),
            coll: Value::Name("xs".into()),
            sub: Box::new(Spec::Ret {
                obj: Value::Name("x".into()),
            }),
        };
        // Register the upstream so the dynamic task registers a real dependency.
        queue
            .put(
                "producer".into(),
                TaskBody::Hold,
                HashMap::new(),
                HashMap::new(),
                ["xs".to_string()].into_iter().collect(),
                false,
            )
            .unwrap();
        let bound = generate(&spec, &ctx, &env, "", &HashSet::new(), &queue).unwrap();
        assert!(bound.is_empty());
        // "producer" ready, "@map" held back on it.
        assert_eq!(queue.in_flight_count(), 2);
    }
}
