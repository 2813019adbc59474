use thiserror::Error;

/// Fatal scheduler-level errors. Distinct from per-task application errors
/// (`value::Res::Err`), which are ordinary data that flows through the graph.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("unresolved dependency or cycle: {0}")]
    UnresolvedOrCycle(String),

    #[error("duplicate task: {0}")]
    DuplicateTask(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("missing object: {0}")]
    MissingObject(String),

    #[error("ref count underflow: {0}")]
    RefCountUnderflow(String),
}
