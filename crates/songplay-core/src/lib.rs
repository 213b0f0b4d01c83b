//! Core of the songplay star-schema pipeline.
//!
//! Turns the song catalog and the application usage log into the `songs`,
//! `artists`, `users`, `time` and `songplays` tables. This crate performs no
//! I/O of its own: records come in through a [`store::RecordSource`] and
//! tables leave through a [`store::TableSink`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod catalog;
pub mod dedup;
pub mod error;
pub mod join;
pub mod logs;
pub mod pipeline;
pub mod record;
pub mod store;
pub mod table;

pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, PipelineState, RunReport};
