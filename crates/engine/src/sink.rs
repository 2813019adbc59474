//! Output sink (spec.md §6) and the monoidal aggregate merge (spec.md §9),
//! grounded on `original_source/src/tx/parallex/task.py::write_to_disk` /
//! `read_from_disk` (one JSON-encoded record per line).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde_json::{Map, Value as Json};

use crate::value::Res;

pub const ERROR_PATH: &str = ":error:";

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Record {
    pub path: String,
    pub result: Res,
}

pub trait OutputSink: Send + Sync {
    fn emit(&self, path: &str, result: Res);

    fn emit_ret(&self, path: &str, result: Res) {
        self.emit(path, result);
    }

    fn emit_error(&self, message: String, trace: String) {
        self.emit(ERROR_PATH, Res::Err { message, trace });
    }
}

/// Append-only, one-JSON-line-per-record sink (or stdout when no path is given).
pub struct FileSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl FileSink {
    pub fn to_path(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Mutex::new(Box::new(file)),
        })
    }

    pub fn to_stdout() -> Self {
        Self {
            writer: Mutex::new(Box::new(std::io::stdout())),
        }
    }
}

impl OutputSink for FileSink {
    fn emit(&self, path: &str, result: Res) {
        let record = Record {
            path: path.to_string(),
            result,
        };
        if let Ok(line) = serde_json::to_string(&record) {
            let mut w = self.writer.lock().expect("sink writer lock poisoned");
            let _ = writeln!(w, "{line}");
        }
    }
}

/// In-memory sink backing `--aggregate` read-back and test assertions.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().expect("sink lock poisoned").clone()
    }

    /// Merge all records into a single mapping (spec.md §9 / §6).
    pub fn aggregate(&self) -> Map<String, Json> {
        merge_records(&self.records())
    }
}

impl OutputSink for MemorySink {
    fn emit(&self, path: &str, result: Res) {
        self.records
            .lock()
            .expect("sink lock poisoned")
            .push(Record {
                path: path.to_string(),
                result,
            });
    }
}

fn res_to_json(res: &Res) -> Json {
    match res {
        Res::Ok(v) => v.clone(),
        Res::Err { message, trace } => {
            serde_json::json!({"error": message, "trace": trace})
        }
    }
}

pub fn merge_records(records: &[Record]) -> Map<String, Json> {
    let mut out: Map<String, Json> = Map::new();
    for record in records {
        let value = res_to_json(&record.result);
        let is_err = record.result.is_err();
        match out.get_mut(&record.path) {
            None => {
                out.insert(record.path.clone(), value);
            }
            Some(existing) => {
                *existing = merge_values(existing.clone(), value, is_err);
            }
        }
    }
    out
}

/// list ∪ list concatenates; dict ∪ dict merges key-wise recursively;
/// `Err` (flagged by the caller) dominates; otherwise latter overwrites former.
fn merge_values(prev: Json, next: Json, next_is_err: bool) -> Json {
    if next_is_err {
        return next;
    }
    match (prev, next) {
        (Json::Array(mut a), Json::Array(b)) => {
            a.extend(b);
            Json::Array(a)
        }
        (Json::Object(mut a), Json::Object(b)) => {
            for (k, v) in b {
                let merged = match a.remove(&k) {
                    Some(existing) => merge_values(existing, v, false),
                    None => v,
                };
                a.insert(k, merged);
            }
            Json::Object(a)
        }
        (_, next) => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_concatenates_lists() {
        let records = vec![
            Record {
                path: "@map.@ret".into(),
                result: Res::Ok(serde_json::json!([1])),
            },
            Record {
                path: "@map.@ret".into(),
                result: Res::Ok(serde_json::json!([2])),
            },
        ];
        let agg = merge_records(&records);
        assert_eq!(agg.get("@map.@ret"), Some(&serde_json::json!([1, 2])));
    }

    #[test]
    fn error_dominates_ok() {
        let records = vec![
            Record {
                path: "@ret".into(),
                result: Res::Ok(serde_json::json!(1)),
            },
            Record {
                path: "@ret".into(),
                result: Res::Err {
                    message: "boom".into(),
                    trace: String::new(),
                },
            },
        ];
        let agg = merge_records(&records);
        assert_eq!(
            agg.get("@ret"),
            Some(&serde_json::json!({"error": "boom", "trace": ""}))
        );
    }
}
