//! Shell-command jobs: what gets submitted and how results are collected.

mod runner;
mod types;

pub use runner::{InvocationRunner, PollSettings};
pub use types::*;

#[cfg(test)]
pub(crate) use runner::tests as testing;
