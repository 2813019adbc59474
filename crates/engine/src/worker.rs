//! The worker pool (spec.md §4.6): `W` threads pulling from the shared
//! `DependentQueue`, each running one task to completion and pushing its
//! outcome back, grounded on `original_source/src/tx/parallex/__init__.py::start`
//! (spawn workers, then join) and the teacher's own `std::thread::spawn`
//! task dispatch in `tascii/src/scheduler.rs`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::queue::{DependentQueue, GetOutcome};
use crate::sink::OutputSink;
use crate::task::{self, RunCtx};
use crate::value::Res;
use functions::Registry;

pub struct Pool {
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl Pool {
    /// Spawns `workers` threads (minimum 1), each looping
    /// `get -> run -> complete` until the queue reports `EndOfQueue`.
    pub fn spawn(
        workers: usize,
        base_data: Arc<HashMap<String, Res>>,
        queue: Arc<DependentQueue>,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        let registry = Registry::global();
        let mut handles = Vec::with_capacity(workers.max(1));
        for _ in 0..workers.max(1) {
            let base_data = Arc::clone(&base_data);
            let queue = Arc::clone(&queue);
            let sink = Arc::clone(&sink);
            handles.push(std::thread::spawn(move || loop {
                match queue.get() {
                    GetOutcome::EndOfQueue => break,
                    GetOutcome::Task {
                        id,
                        body,
                        mut deps,
                        subtree,
                    } => {
                        deps.extend(subtree);
                        let ctx = RunCtx {
                            base_data: &*base_data,
                            registry,
                            queue: &*queue,
                            sink: sink.as_ref(),
                        };
                        let outcome = task::run(&id, &body, &deps, &ctx);
                        if let Err(err) = queue.complete(id.clone(), outcome) {
                            tracing::error!(task = %id, error = %err, "failed to complete task");
                        }
                    }
                }
            }));
        }
        Pool { handles }
    }

    /// Blocks until every worker thread has observed `EndOfQueue` and exited.
    pub fn join(self) {
        for handle in self.handles {
            if let Err(panic) = handle.join() {
                tracing::error!(?panic, "worker thread panicked outside task::run");
            }
        }
    }
}
