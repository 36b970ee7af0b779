pub mod agent;
pub mod cancel;
pub mod commands;
pub mod progress;
pub mod runtime;
pub mod scan;
pub mod status;
pub mod tools;

pub use commands::{Cli, Commands};
