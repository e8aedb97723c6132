//! Driver for the debate aggregation pipeline.
//!
//! Wires the `aggregation` library to files: JSONL batches in and out, a
//! JSONL transcript, layered configuration and built-in format scorers.

pub mod batch_io;
pub mod config;
pub mod runner;
pub mod scorers;
pub mod transcript_file;
