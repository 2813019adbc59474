//! The sequential in-process evaluator used by `Seq` tasks (spec.md §4.5):
//! walks a subtree directly, without going back through the queue, since a
//! `Seq` must run end-to-end on a single worker.

use std::collections::HashMap;

use crate::generate::join;
use crate::spec::Spec;
use crate::task::RunCtx;
use crate::value::{truthy, Res, Value};

pub fn eval_sequential(spec: &Spec, prefix: &str, env: &mut HashMap<String, Res>, ctx: &RunCtx) {
    match spec {
        Spec::Let { name, obj } => {
            let v = eval_value(obj, env);
            env.insert(name.clone(), v);
        }

        Spec::Python {
            name,
            module,
            func,
            params,
        } => {
            let mut args = functions::Args::new();
            let mut short_circuit = None;
            for (k, val) in params {
                match eval_value(val, env) {
                    Res::Err { message, trace } => {
                        short_circuit = Some(Res::Err { message, trace });
                        break;
                    }
                    Res::Ok(v) => {
                        args.insert(k.clone(), v);
                    }
                }
            }
            let outcome = match short_circuit {
                Some(err) => err,
                None => match ctx.registry.call(module, func, &args) {
                    Ok(v) => Res::Ok(v),
                    Err(message) => Res::Err {
                        message,
                        trace: String::new(),
                    },
                },
            };
            env.insert(name.clone(), outcome);
        }

        Spec::Map { var, coll, sub } => match eval_value(coll, env) {
            Res::Err { .. } => {}
            Res::Ok(v) => {
                if let Some(rows) = v.as_array() {
                    for (i, row) in rows.iter().enumerate() {
                        let mut row_env = env.clone();
                        row_env.insert(var.clone(), Res::Ok(row.clone()));
                        let row_prefix = join(prefix, &format!("@map{i}"));
                        eval_sequential(sub, &row_prefix, &mut row_env, ctx);
                    }
                }
            }
        },

        Spec::Cond { on, then, else_ } => match eval_value(on, env) {
            Res::Err { message, trace } => ctx.sink.emit_error(message, trace),
            Res::Ok(v) => {
                if truthy(&v) {
                    eval_sequential(then, &join(prefix, "@cond.@then"), env, ctx);
                } else {
                    eval_sequential(else_, &join(prefix, "@cond.@else"), env, ctx);
                }
            }
        },

        // `Top`'s children get distinct `@top{i}` segments, exactly as
        // `generate::gen_top` does, so a `Seq` that packages a subtree
        // containing a `Top` emits the same ret paths it would have if that
        // `Top` had instead been expanded eagerly into separate tasks.
        Spec::Top { sub } => {
            for (i, s) in sub.iter().enumerate() {
                let child_prefix = join(prefix, &format!("@top{i}"));
                eval_sequential(s, &child_prefix, env, ctx);
            }
        }

        // A `Seq` nested inside another `Seq`'s subtree is still one atomic
        // scope; its children share the enclosing prefix.
        Spec::Seq { sub } => {
            for s in sub {
                eval_sequential(s, prefix, env, ctx);
            }
        }

        Spec::Ret { obj } => {
            let v = eval_value(obj, env);
            let path = join(prefix, "@ret");
            ctx.sink.emit_ret(&path, v.clone());
            if let Res::Err { message, trace } = v {
                ctx.sink.emit_error(message, trace);
            }
        }
    }
}

fn eval_value(v: &Value, env: &HashMap<String, Res>) -> Res {
    match v {
        Value::Data(j) => Res::Ok(j.clone()),
        Value::Name(n) => env
            .get(n)
            .cloned()
            .unwrap_or_else(|| Res::err(format!("undefined name `{n}`"))),
    }
}
