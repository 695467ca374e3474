//! # RAG Coder
//!
//! Retrieval-augmented, auditable qualitative coding of open-ended survey
//! responses.
//!
//! Each response is paired with the codebook entries most relevant to it,
//! rendered into a prompt, and sent to a generative model through a
//! retrying gateway. The answer is parsed against the codebook, and every
//! attempt is appended to a SQLite audit log that cannot be rewritten.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │ Codebook │──▶│ Context  │──▶│  Prompt  │──▶│ Gateway  │
//! │  (CSV)   │   │ Selector │   │ Builder  │   │ (retry)  │
//! └──────────┘   └──────────┘   └──────────┘   └────┬─────┘
//!                                                   │
//!                ┌──────────┐   ┌──────────┐        │
//!                │  Audit   │◀──│  Parser  │◀───────┘
//!                │ (SQLite) │   └──────────┘
//!                └──────────┘
//! ```
//!
//! The [`orchestrator`] drives this pipeline over a batch with bounded
//! concurrency. Pure logic lives in the `rag-coder-core` crate; this crate
//! adds configuration, I/O, HTTP providers, and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`input`] | Codebook and response CSV loaders |
//! | [`gateway`] | Retrying model gateway and HTTP providers |
//! | [`orchestrator`] | Batch runner |
//! | [`cancel`] | Ctrl-C and time-budget cancellation |
//! | [`sqlite_audit`] | Append-only SQLite audit sink |
//! | [`output`] | Coded dataset and error report writers |
//! | [`progress`] | Progress reporting on stderr |
//! | [`run`] | The `run` command |
//! | [`preview`] | The `validate` and `preview` commands |
//! | [`export`] | Audit JSON Lines export |
//! | [`stats`] | Audit log summary |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cancel;
pub mod config;
pub mod db;
pub mod export;
pub mod gateway;
pub mod input;
pub mod migrate;
pub mod orchestrator;
pub mod output;
pub mod preview;
pub mod progress;
pub mod run;
pub mod sqlite_audit;
pub mod stats;
