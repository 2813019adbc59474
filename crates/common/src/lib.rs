// Copyright (c) 2023 University of New Hampshire
// SPDX-License-Identifier: MIT

//! Shared prelude, trimmed to the ambient crates the engine and binary
//! actually use (no web/RPC plumbing — this repo has no HTTP surface).
//! Grounded on `crates/common`'s `prelude` module, with the
//! `axum`/`tokio`/`reqwest`/db-facing re-exports dropped (DESIGN.md).

pub mod prelude {
    pub use anyhow;
    pub use config;
    pub use serde_json;
    pub use thiserror;
    pub use tracing;

    pub use serde::{Deserialize, Serialize};
}
