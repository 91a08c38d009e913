pub mod harness;
pub mod runner;

pub use harness::{Harness, HarnessOutcome};
pub use runner::{RunOutput, RunPolicy, Runner};
