//! The worker-visible task variants (spec.md §4.5), shaped after the
//! teacher's `Runnable` trait (`tascii/src/task_trait.rs`) but collapsed to a
//! single synchronous, panic-caught `run` — this engine's workers never
//! suspend mid-task (spec.md §5), so the retry/timeout machinery the teacher
//! builds into `AsyncRunnable::run` is deliberately not carried over.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use crate::queue::{DependentQueue, TaskId, TaskOutcome};
use crate::sink::OutputSink;
use crate::spec::Spec;
use crate::value::Res;
use functions::Registry;

/// Either a literal value known at generation time, or a name to be read
/// from the running task's `deps_values` (spec.md §4.4 "Python" split).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ParamSource {
    Literal(Res),
    FromDep(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TaskBody {
    Call {
        name: String,
        module: String,
        func: String,
        params: HashMap<String, ParamSource>,
    },
    Let {
        name: String,
        value: Res,
    },
    DynamicLet {
        name: String,
        obj_name: String,
    },
    Ret {
        path: String,
        value: Res,
    },
    DynamicRet {
        path: String,
        obj_name: String,
    },
    DynamicMap {
        var: String,
        coll_name: String,
        sub: Box<Spec>,
        prefix: String,
        /// The ambient data scope at generation time (e.g. an enclosing
        /// Map's row binding) — re-threaded into `generate` once the
        /// collection is known, since `RunCtx::base_data` only holds the
        /// top-level input.
        data: HashMap<String, Res>,
        env: HashMap<String, TaskId>,
        hold: HashSet<TaskId>,
        level: i32,
    },
    DynamicGuard {
        on_name: String,
        then: Box<Spec>,
        else_: Box<Spec>,
        prefix: String,
        data: HashMap<String, Res>,
        env: HashMap<String, TaskId>,
        hold: HashSet<TaskId>,
        level: i32,
    },
    Seq {
        sub: Vec<Spec>,
        prefix: String,
        produces: HashSet<String>,
        /// Free names already known at generation time, embedded as literals
        /// since `eval_sequential` only otherwise sees `base_data` + `deps`.
        literals: HashMap<String, Res>,
    },
    /// A pure ordering sentinel (spec.md §9 "Hold task"); never does work.
    Hold,
}

/// Context shared by every task execution: the initial data environment,
/// the registry of native callables, the queue (for Dynamic* re-enqueueing)
/// and the sink (for Ret/error emission).
pub struct RunCtx<'a> {
    pub base_data: &'a HashMap<String, Res>,
    pub registry: &'a Registry,
    pub queue: &'a DependentQueue,
    pub sink: &'a dyn OutputSink,
}

pub fn run(id: &TaskId, body: &TaskBody, deps: &HashMap<String, Res>, ctx: &RunCtx) -> TaskOutcome {
    let result = catch_unwind(AssertUnwindSafe(|| run_inner(id, body, deps, ctx)));
    match result {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(&panic);
            TaskOutcome::Err {
                message: format!("panicked: {message}"),
                trace: String::new(),
            }
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn run_inner(
    id: &TaskId,
    body: &TaskBody,
    deps: &HashMap<String, Res>,
    ctx: &RunCtx,
) -> TaskOutcome {
    match body {
        TaskBody::Hold => TaskOutcome::Ok(HashMap::new()),

        TaskBody::Let { name, value } => {
            let mut out = HashMap::new();
            out.insert(name.clone(), res_payload_or_err(value.clone()));
            match value {
                Res::Err { message, trace } => TaskOutcome::Err {
                    message: message.clone(),
                    trace: trace.clone(),
                },
                Res::Ok(_) => TaskOutcome::Ok(out),
            }
        }

        TaskBody::DynamicLet { name, obj_name } => {
            let value = deps.get(obj_name).cloned().unwrap_or_else(|| {
                Res::err(format!("DynamicLet: missing dependency `{obj_name}`"))
            });
            match value {
                Res::Err { message, trace } => TaskOutcome::Err { message, trace },
                Res::Ok(v) => {
                    let mut out = HashMap::new();
                    out.insert(name.clone(), v);
                    TaskOutcome::Ok(out)
                }
            }
        }

        TaskBody::Call {
            name,
            module,
            func,
            params,
        } => run_call(name, module, func, params, deps, ctx),

        TaskBody::Ret { path, value } => {
            ctx.sink.emit_ret(path, value.clone());
            if let Res::Err { message, trace } = value {
                ctx.sink
                    .emit_error(message.clone(), trace.clone());
            }
            TaskOutcome::Ok(HashMap::new())
        }

        TaskBody::DynamicRet { path, obj_name } => {
            let value = deps.get(obj_name).cloned().unwrap_or_else(|| {
                Res::err(format!("DynamicRet: missing dependency `{obj_name}`"))
            });
            ctx.sink.emit_ret(path, value.clone());
            if let Res::Err { message, trace } = &value {
                ctx.sink.emit_error(message.clone(), trace.clone());
            }
            TaskOutcome::Ok(HashMap::new())
        }

        TaskBody::DynamicMap {
            var,
            coll_name,
            sub,
            prefix,
            data,
            env,
            hold,
            level,
        } => run_dynamic_map(id, var, coll_name, sub, prefix, data, env, hold, *level, deps, ctx),

        TaskBody::DynamicGuard {
            on_name,
            then,
            else_,
            prefix,
            data,
            env,
            hold,
            level,
        } => run_dynamic_guard(
            id, on_name, then, else_, prefix, data, env, hold, *level, deps, ctx,
        ),

        TaskBody::Seq {
            sub,
            prefix,
            produces,
            literals,
        } => run_seq(sub, prefix, produces, literals, deps, ctx),
    }
}

fn res_payload_or_err(res: Res) -> serde_json::Value {
    match res {
        Res::Ok(v) => v,
        Res::Err { message, trace } => serde_json::json!({"error": message, "trace": trace}),
    }
}

fn run_call(
    name: &str,
    module: &str,
    func: &str,
    params: &HashMap<String, ParamSource>,
    deps: &HashMap<String, Res>,
    ctx: &RunCtx,
) -> TaskOutcome {
    let mut args = functions::Args::new();
    for (key, source) in params {
        let resolved = match source {
            ParamSource::Literal(res) => res.clone(),
            ParamSource::FromDep(dep_name) => deps
                .get(dep_name)
                .cloned()
                .unwrap_or_else(|| Res::err(format!("Call: missing dependency `{dep_name}`"))),
        };
        match resolved {
            Res::Err { message, trace } => return TaskOutcome::Err { message, trace },
            Res::Ok(v) => {
                args.insert(key.clone(), v);
            }
        }
    }

    match ctx.registry.call(module, func, &args) {
        Ok(value) => {
            let mut out = HashMap::new();
            out.insert(name.to_string(), value);
            TaskOutcome::Ok(out)
        }
        Err(message) => TaskOutcome::Err {
            message,
            trace: String::new(),
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn run_dynamic_map(
    id: &TaskId,
    var: &str,
    coll_name: &str,
    sub: &Spec,
    prefix: &str,
    data: &HashMap<String, Res>,
    env: &HashMap<String, TaskId>,
    hold: &HashSet<TaskId>,
    level: i32,
    deps: &HashMap<String, Res>,
    ctx: &RunCtx,
) -> TaskOutcome {
    let hold_id = format!("{id}/hold");
    let _ = ctx.queue.put(
        hold_id.clone(),
        TaskBody::Hold,
        HashMap::new(),
        HashMap::new(),
        HashSet::new(),
        true,
    );

    let mut new_hold = hold.clone();
    new_hold.insert(hold_id.clone());

    let coll = deps
        .get(coll_name)
        .cloned()
        .unwrap_or_else(|| Res::err(format!("DynamicMap: missing dependency `{coll_name}`")));

    // `deps` also carries every other outer-scope name the subtree needs
    // (pre-fetched via `subtree_depends_on`, see `generate::extra_subtree_deps`);
    // fold those into the base scope before regenerating so the subtree
    // never has to re-resolve a name whose producer may since have been
    // garbage-collected.
    let mut base_data = data.clone();
    for (name, value) in deps {
        if name != coll_name {
            base_data.insert(name.clone(), value.clone());
        }
    }

    if let Res::Ok(json) = coll {
        if let Some(rows) = json.as_array() {
            for (i, row) in rows.iter().enumerate() {
                let mut row_data = base_data.clone();
                row_data.insert(var.to_string(), Res::Ok(row.clone()));
                let row_prefix = crate::generate::join(prefix, &format!("@map{i}"));
                let _ = crate::generate::generate_row(
                    sub, &row_data, level, env, &row_prefix, &new_hold, ctx.queue,
                );
            }
        }
    }
    // A coll that evaluated to Err produces no rows, matching the "empty
    // collection" boundary behavior (spec.md §8).

    let _ = ctx.queue.complete(hold_id, TaskOutcome::Ok(HashMap::new()));
    TaskOutcome::Ok(HashMap::new())
}

#[allow(clippy::too_many_arguments)]
fn run_dynamic_guard(
    id: &TaskId,
    on_name: &str,
    then: &Spec,
    else_: &Spec,
    prefix: &str,
    data: &HashMap<String, Res>,
    env: &HashMap<String, TaskId>,
    hold: &HashSet<TaskId>,
    level: i32,
    deps: &HashMap<String, Res>,
    ctx: &RunCtx,
) -> TaskOutcome {
    let hold_id = format!("{id}/hold");
    let _ = ctx.queue.put(
        hold_id.clone(),
        TaskBody::Hold,
        HashMap::new(),
        HashMap::new(),
        HashSet::new(),
        true,
    );

    let mut new_hold = hold.clone();
    new_hold.insert(hold_id.clone());

    let on = deps
        .get(on_name)
        .cloned()
        .unwrap_or_else(|| Res::err(format!("DynamicGuard: missing dependency `{on_name}`")));

    // Pre-fetched outer-scope names the taken branch needs (see
    // `generate::extra_subtree_deps`), folded in before regenerating so they
    // don't have to be re-resolved against a possibly-completed-and-freed task.
    let mut base_data = data.clone();
    for (name, value) in deps {
        if name != on_name {
            base_data.insert(name.clone(), value.clone());
        }
    }

    match on {
        Res::Err { message, trace } => {
            // Cond whose `on` is Err emits the error and skips both branches.
            ctx.sink.emit_error(message, trace);
        }
        Res::Ok(v) => {
            let (branch, branch_prefix) = if crate::value::truthy(&v) {
                (then, crate::generate::join(prefix, "@cond.@then"))
            } else {
                (else_, crate::generate::join(prefix, "@cond.@else"))
            };
            let gen_ctx = crate::generate::GenCtx {
                data: &base_data,
                level,
            };
            let _ = crate::generate::generate(
                branch,
                &gen_ctx,
                env,
                &branch_prefix,
                &new_hold,
                ctx.queue,
            );
        }
    }

    let _ = ctx.queue.complete(hold_id, TaskOutcome::Ok(HashMap::new()));
    TaskOutcome::Ok(HashMap::new())
}

/// Runs an entire subtree on this worker's thread, sequentially, writing any
/// nested `Ret` directly to the sink (spec.md §4.5 "Seq").
fn run_seq(
    sub: &[Spec],
    prefix: &str,
    produces: &HashSet<String>,
    literals: &HashMap<String, Res>,
    deps: &HashMap<String, Res>,
    ctx: &RunCtx,
) -> TaskOutcome {
    let mut env_data = ctx.base_data.clone();
    for (name, value) in literals {
        env_data.insert(name.clone(), value.clone());
    }
    for (name, value) in deps {
        env_data.insert(name.clone(), value.clone());
    }

    for s in sub {
        crate::eval::eval_sequential(s, prefix, &mut env_data, ctx);
    }

    let mut out = HashMap::new();
    for name in produces {
        if let Some(Res::Ok(v)) = env_data.get(name) {
            out.insert(name.clone(), v.clone());
        }
    }
    TaskOutcome::Ok(out)
}
