//! Reference-counted object store (spec.md §4.1), grounded on
//! `original_source/src/tx/parallex/objectstore.py::SimpleStore` (per-oid lock
//! + refcount dict) and the teacher's `dashmap`-based concurrent maps.

use dashmap::DashMap;

use crate::error::EngineError;
use crate::value::Res;

/// Build an object-store key from a task id and one of its produced names.
pub fn gen_oid(task_id: &str, name: &str) -> String {
    format!("{task_id}/{name}")
}

pub trait ObjectStore: Send + Sync {
    /// Insert `value` at `oid` with a ref count of zero.
    fn put(&self, oid: String, value: Res);
    fn increment(&self, oid: &str);
    fn decrement(&self, oid: &str);
    /// Bulk ref-count update; any oid whose count reaches zero is removed.
    fn update_refs(&self, deltas: Vec<(String, i64)>);
    fn get(&self, oid: &str) -> Result<Res, EngineError>;
    /// For the §8 invariant "at run end, the store is empty".
    fn is_empty(&self) -> bool;
    fn len(&self) -> usize;
}

/// Count dropping below zero is a programming error (spec.md §4.1), distinct
/// from the clean "count hit zero, drop the entry" path. `debug_assert!`s in
/// tests/dev builds; in release, surfaces as a logged `RefCountUnderflow`
/// rather than a panic, since a ref-count bug here shouldn't take down an
/// otherwise-unaffected run.
fn report_underflow(oid: &str) {
    let err = EngineError::RefCountUnderflow(oid.to_string());
    debug_assert!(false, "{err}");
    tracing::error!(%err, "ref count underflow");
}

struct Entry {
    value: Res,
    count: i64,
}

#[derive(Default)]
pub struct MapStore {
    entries: DashMap<String, Entry>,
}

impl MapStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MapStore {
    fn put(&self, oid: String, value: Res) {
        self.entries.insert(oid, Entry { value, count: 0 });
    }

    fn increment(&self, oid: &str) {
        if let Some(mut e) = self.entries.get_mut(oid) {
            e.count += 1;
        }
    }

    fn decrement(&self, oid: &str) {
        let mut drop_it = false;
        let mut underflow = false;
        if let Some(mut e) = self.entries.get_mut(oid) {
            e.count -= 1;
            if e.count < 0 {
                underflow = true;
            }
            if e.count <= 0 {
                drop_it = true;
            }
        }
        if underflow {
            report_underflow(oid);
        }
        if drop_it {
            self.entries.remove(oid);
        }
    }

    fn update_refs(&self, mut deltas: Vec<(String, i64)>) {
        // Sorted key order avoids lock-order inversion across concurrent
        // callers touching overlapping oid sets (spec.md §4.1).
        deltas.sort_by(|a, b| a.0.cmp(&b.0));
        for (oid, delta) in deltas {
            let mut drop_it = false;
            let mut underflow = false;
            if let Some(mut e) = self.entries.get_mut(&oid) {
                e.count += delta;
                if e.count < 0 {
                    underflow = true;
                }
                if e.count <= 0 {
                    drop_it = true;
                }
            }
            if underflow {
                report_underflow(&oid);
            }
            if drop_it {
                self.entries.remove(&oid);
            }
        }
    }

    fn get(&self, oid: &str) -> Result<Res, EngineError> {
        self.entries
            .get(oid)
            .map(|e| e.value.clone())
            .ok_or_else(|| EngineError::MissingObject(oid.to_string()))
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_increment_decrement_removes_at_zero() {
        let store = MapStore::new();
        store.put("t/x".into(), Res::Ok(serde_json::json!(1)));
        store.increment("t/x");
        store.increment("t/x");
        assert_eq!(store.len(), 1);
        store.decrement("t/x");
        assert_eq!(store.len(), 1);
        store.decrement("t/x");
        assert!(store.is_empty());
    }

    #[test]
    fn missing_get_is_engine_error() {
        let store = MapStore::new();
        assert!(matches!(
            store.get("nope"),
            Err(EngineError::MissingObject(_))
        ));
    }
}
