//! Core scheduling engine: compiles a `Spec` tree into a dependency graph and
//! runs it to completion on a worker pool (spec.md §1-§5), grounded
//! end-to-end on `original_source/src/tx/parallex/` and the teacher's
//! `tascii` runtime (`laas-reflab`'s `crates/tascii`).

pub mod error;
pub mod eval;
pub mod generate;
pub mod preprocess;
pub mod queue;
pub mod sink;
pub mod spec;
pub mod store;
pub mod task;
pub mod value;
pub mod worker;

pub use error::EngineError;
pub use spec::Spec;
pub use value::{Res, Value};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sink::OutputSink;
use store::MapStore;

/// Runs `spec` against the initial `data` environment to completion, writing
/// every `Ret` (and any top-level error) to `sink`. Mirrors
/// `original_source/src/tx/parallex/__init__.py::start`: preprocess, generate
/// the root task graph, run `workers` worker threads to drain it, then assert
/// the object store emptied out (spec.md §8's "no leaked references").
///
/// `level` is the Map-expansion-depth budget (GLOSSARY "Level"); `prune`
/// toggles the preprocessor's unreachable-task collapse (§8's round-trip law
/// says both settings must yield the same sink records for side-effect-free
/// specs).
pub fn run(
    spec: Spec,
    data: HashMap<String, Res>,
    workers: usize,
    level: i32,
    prune: bool,
    sink: Arc<dyn OutputSink>,
) -> Result<(), EngineError> {
    let initial_names: HashSet<String> = data.keys().cloned().collect();
    let spec = preprocess::preprocess(spec, &initial_names, prune)?;

    let store: Arc<dyn store::ObjectStore> = Arc::new(MapStore::new());
    let queue = Arc::new(queue::DependentQueue::new(store));
    let base_data = Arc::new(data);

    let gen_ctx = generate::GenCtx {
        data: &*base_data,
        level,
    };
    generate::generate(
        &spec,
        &gen_ctx,
        &HashMap::new(),
        "",
        &HashSet::new(),
        &queue,
    )?;

    // A program with no reachable `Ret` generates zero tasks; nothing will
    // ever call `complete` to notice the queue is drained, so close it here.
    if queue.in_flight_count() == 0 {
        queue.close();
    }

    let pool = worker::Pool::spawn(workers, Arc::clone(&base_data), Arc::clone(&queue), sink);
    pool.join();

    debug_assert!(
        queue.store().is_empty(),
        "object store did not drain by end of run"
    );

    Ok(())
}
