//! # RAG Coder Core
//!
//! Runtime-free logic for RAG Coder: data models, the codebook store,
//! context selection, prompt rendering, response parsing, the retry
//! state machine, and the [`model::ModelClient`] / [`audit::AuditSink`]
//! seams that the application crate implements.
//!
//! This crate contains no tokio, sqlx, reqwest, or filesystem I/O. Every
//! function here is deterministic given its inputs, apart from the jitter
//! applied by [`retry::RetryPolicy::delay_for`].

pub mod audit;
pub mod codebook;
pub mod error;
pub mod model;
pub mod models;
pub mod parse;
pub mod prompt;
pub mod retry;
pub mod select;

pub use codebook::Codebook;
pub use error::CodingError;
