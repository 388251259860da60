//! Shared data model, errors, ids, clock and output writers.

pub mod error;
pub mod hash;
pub mod output;
pub mod time;
pub mod types;
