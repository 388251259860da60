//! Command-line surface of the `autotriage` binary.

pub mod commands;
pub mod flags;
