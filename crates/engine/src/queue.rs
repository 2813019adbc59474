//! The dependency queue (spec.md §4.2), grounded on
//! `original_source/src/tx/parallex/dependentqueue.py` (`NodeMap`,
//! `DependentQueue`), using `crossbeam-channel` for the ready queue the way
//! the teacher's `src/tascii/src/scheduler.rs` does for its message loop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::EngineError;
use crate::store::{gen_oid, ObjectStore};
use crate::task::TaskBody;
use crate::value::Res;

pub type TaskId = String;

#[derive(Clone)]
pub struct TaskNode {
    pub id: TaskId,
    pub body: TaskBody,
    pub depends_on: HashMap<TaskId, HashSet<String>>,
    pub subtree_depends_on: HashMap<TaskId, HashSet<String>>,
    pub produces: HashSet<String>,
    pub hold: bool,
}

#[derive(Default, Clone)]
struct Meta {
    refs: HashSet<TaskId>,
    subtree_refs: HashSet<TaskId>,
    pending_deps: i64,
    pending_subtree_deps: i64,
}

enum ReadyItem {
    Task(TaskId),
    EndOfQueue,
}

/// What a worker gets back from `get()`.
pub enum GetOutcome {
    Task {
        id: TaskId,
        body: TaskBody,
        deps: HashMap<String, Res>,
        subtree: HashMap<String, Res>,
    },
    EndOfQueue,
}

/// The outcome a task hands to `complete` (spec.md §4.5's per-task `Result`,
/// applied uniformly to every name the task produces unless it is itself a
/// per-name map).
pub enum TaskOutcome {
    Ok(HashMap<String, serde_json::Value>),
    Err { message: String, trace: String },
}

pub struct DependentQueue {
    store: Arc<dyn ObjectStore>,
    nodes: Mutex<HashMap<TaskId, TaskNode>>,
    meta: Mutex<HashMap<TaskId, Meta>>,
    ready_tx: Sender<ReadyItem>,
    ready_rx: Receiver<ReadyItem>,
}

impl DependentQueue {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        let (ready_tx, ready_rx) = unbounded();
        Self {
            store,
            nodes: Mutex::new(HashMap::new()),
            meta: Mutex::new(HashMap::new()),
            ready_tx,
            ready_rx,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn in_flight_count(&self) -> usize {
        self.nodes.lock().len()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn put(
        &self,
        id: TaskId,
        body: TaskBody,
        depends_on: HashMap<TaskId, HashSet<String>>,
        subtree_depends_on: HashMap<TaskId, HashSet<String>>,
        produces: HashSet<String>,
        hold: bool,
    ) -> Result<TaskId, EngineError> {
        let mut nodes = self.nodes.lock();
        let mut meta = self.meta.lock();

        if nodes.contains_key(&id) {
            return Err(EngineError::DuplicateTask(id));
        }

        let mut pending_deps = 0i64;
        for up in depends_on.keys() {
            if nodes.contains_key(up) {
                meta.entry(up.clone()).or_default().refs.insert(id.clone());
                pending_deps += 1;
            }
            // Upstream already completed: equivalent to pre-decrementing at
            // registration, so it does not count toward pending_deps.
        }

        let mut pending_subtree = 0i64;
        for up in subtree_depends_on.keys() {
            if nodes.contains_key(up) {
                meta.entry(up.clone())
                    .or_default()
                    .subtree_refs
                    .insert(id.clone());
                pending_subtree += 1;
            }
        }

        nodes.insert(
            id.clone(),
            TaskNode {
                id: id.clone(),
                body,
                depends_on,
                subtree_depends_on,
                produces,
                hold,
            },
        );

        let m = meta.entry(id.clone()).or_default();
        m.pending_deps = pending_deps;
        m.pending_subtree_deps = pending_subtree;

        let ready = !hold && pending_deps == 0 && pending_subtree == 0;

        drop(meta);
        drop(nodes);

        if ready {
            let _ = self.ready_tx.send(ReadyItem::Task(id.clone()));
        }

        Ok(id)
    }

    pub fn get(&self) -> GetOutcome {
        match self.ready_rx.recv() {
            Ok(ReadyItem::Task(id)) => {
                let node = { self.nodes.lock().get(&id).cloned() };
                let Some(node) = node else {
                    // Defensive: a task could in principle be completed twice
                    // under a bug elsewhere; treat as drained.
                    return GetOutcome::EndOfQueue;
                };

                let deps = self.retrieve(&node.depends_on);
                let subtree = self.retrieve(&node.subtree_depends_on);

                GetOutcome::Task {
                    id,
                    body: node.body,
                    deps,
                    subtree,
                }
            }
            Ok(ReadyItem::EndOfQueue) | Err(_) => {
                // Re-insert so every remaining worker also observes the
                // sentinel (`dependentqueue.py::NodeMap.get_next_ready_node`).
                let _ = self.ready_tx.send(ReadyItem::EndOfQueue);
                GetOutcome::EndOfQueue
            }
        }
    }

    fn retrieve(&self, wants: &HashMap<TaskId, HashSet<String>>) -> HashMap<String, Res> {
        let mut out = HashMap::new();
        for (upstream, names) in wants {
            for name in names {
                let oid = gen_oid(upstream, name);
                if let Ok(val) = self.store.get(&oid) {
                    self.store.decrement(&oid);
                    out.insert(name.clone(), val);
                }
            }
        }
        out
    }

    pub fn complete(&self, id: TaskId, outcome: TaskOutcome) -> Result<(), EngineError> {
        let node = {
            let nodes = self.nodes.lock();
            nodes
                .get(&id)
                .cloned()
                .ok_or_else(|| EngineError::UnknownTask(id.clone()))?
        };

        // (i) put each output, (ii) retain +1 for ourselves.
        let mut oids = Vec::with_capacity(node.produces.len());
        for name in &node.produces {
            let value = match &outcome {
                TaskOutcome::Err { message, trace } => Res::Err {
                    message: message.clone(),
                    trace: trace.clone(),
                },
                TaskOutcome::Ok(map) => map
                    .get(name)
                    .map(|v| Res::Ok(v.clone()))
                    .unwrap_or_else(|| Res::err(format!("task {id} never produced `{name}`"))),
            };
            let oid = gen_oid(&id, name);
            self.store.put(oid.clone(), value);
            self.store.increment(&oid);
            oids.push(oid);
        }

        // (iii)/(iv): gather referencing nodes + the exact names they need
        // from us, snapshotted before we mutate anything.
        let (refs, subtree_refs) = {
            let meta = self.meta.lock();
            meta.get(&id)
                .map(|m| (m.refs.clone(), m.subtree_refs.clone()))
                .unwrap_or_default()
        };

        let mut referencing: HashSet<TaskId> = HashSet::new();
        referencing.extend(refs.iter().cloned());
        referencing.extend(subtree_refs.iter().cloned());

        let mut to_enqueue = Vec::new();
        let mut ref_deltas: HashMap<String, i64> = HashMap::new();

        for rid in &referencing {
            let maybe_names = {
                let nodes = self.nodes.lock();
                nodes.get(rid).map(|n| {
                    (
                        n.depends_on.get(&id).cloned(),
                        n.subtree_depends_on.get(&id).cloned(),
                        n.hold,
                    )
                })
            };
            let Some((via_deps, via_subtree, hold_flag)) = maybe_names else {
                continue;
            };

            let mut meta = self.meta.lock();
            let Some(rmeta) = meta.get_mut(rid) else {
                continue;
            };

            if let Some(names) = &via_subtree {
                for name in names {
                    *ref_deltas.entry(gen_oid(&id, name)).or_insert(0) += 1;
                }
                rmeta.pending_subtree_deps -= 1;
            }
            if let Some(names) = &via_deps {
                for name in names {
                    *ref_deltas.entry(gen_oid(&id, name)).or_insert(0) += 1;
                }
                rmeta.pending_deps -= 1;
            }

            if rmeta.pending_deps <= 0 && rmeta.pending_subtree_deps <= 0 && !hold_flag {
                to_enqueue.push(rid.clone());
            }
        }

        self.store
            .update_refs(ref_deltas.into_iter().collect::<Vec<_>>());

        // (v) release our own retention.
        for oid in &oids {
            self.store.decrement(oid);
        }

        {
            let mut nodes = self.nodes.lock();
            nodes.remove(&id);
        }
        {
            let mut meta = self.meta.lock();
            meta.remove(&id);
        }

        for rid in to_enqueue {
            let _ = self.ready_tx.send(ReadyItem::Task(rid));
        }

        if self.nodes.lock().is_empty() {
            self.close();
        }

        Ok(())
    }

    pub fn close(&self) {
        let _ = self.ready_tx.send(ReadyItem::EndOfQueue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MapStore;
    use crate::task::TaskBody;

    fn queue() -> DependentQueue {
        DependentQueue::new(Arc::new(MapStore::new()))
    }

    #[test]
    fn independent_task_is_immediately_ready() {
        let q = queue();
        q.put(
            "t1".into(),
            TaskBody::Hold,
            HashMap::new(),
            HashMap::new(),
            HashSet::new(),
            false,
        )
        .unwrap();
        match q.get() {
            GetOutcome::Task { id, .. } => assert_eq!(id, "t1"),
            GetOutcome::EndOfQueue => panic!("expected a task"),
        }
    }

    #[test]
    fn dependent_becomes_ready_after_complete() {
        let q = queue();
        q.put(
            "a".into(),
            TaskBody::Hold,
            HashMap::new(),
            HashMap::new(),
            ["x".to_string()].into_iter().collect(),
            false,
        )
        .unwrap();

        let mut deps = HashMap::new();
        deps.insert("a".to_string(), ["x".to_string()].into_iter().collect());
        q.put(
            "b".into(),
            TaskBody::Hold,
            deps,
            HashMap::new(),
            HashSet::new(),
            false,
        )
        .unwrap();

        // "a" is ready, "b" is not yet.
        let a = q.get();
        let a_id = match a {
            GetOutcome::Task { id, .. } => id,
            _ => panic!("expected a"),
        };
        assert_eq!(a_id, "a");

        let mut out = HashMap::new();
        out.insert("x".to_string(), serde_json::json!(42));
        q.complete(a_id, TaskOutcome::Ok(out)).unwrap();

        match q.get() {
            GetOutcome::Task { id, deps, .. } => {
                assert_eq!(id, "b");
                assert_eq!(deps.get("x"), Some(&Res::Ok(serde_json::json!(42))));
            }
            GetOutcome::EndOfQueue => panic!("expected b"),
        }
    }

    #[test]
    fn queue_closes_when_drained() {
        let q = queue();
        q.put(
            "only".into(),
            TaskBody::Hold,
            HashMap::new(),
            HashMap::new(),
            HashSet::new(),
            false,
        )
        .unwrap();
        let id = match q.get() {
            GetOutcome::Task { id, .. } => id,
            _ => panic!(),
        };
        q.complete(id, TaskOutcome::Ok(HashMap::new())).unwrap();
        assert!(matches!(q.get(), GetOutcome::EndOfQueue));
        // get() must be re-entrant past the sentinel.
        assert!(matches!(q.get(), GetOutcome::EndOfQueue));
    }
}
