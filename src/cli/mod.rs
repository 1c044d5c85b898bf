//! CLI module for the storyline command-line interface.
//!
//! Command handlers run the pipelines against a JSON snapshot loaded into
//! the in-memory store.

mod commands;
mod output;

pub use commands::*;
