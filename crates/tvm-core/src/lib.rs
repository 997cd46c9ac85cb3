//! Core types for tvm.
//!
//! Errors, environment variable names, input validation and the version
//! command runner shared by the other tvm crates.

pub mod command;
pub mod env;
pub mod error;
pub mod validate;

pub use command::{CommandOutput, CommandRunner};
pub use env::EnvVars;
pub use error::{Error, ErrorCode, Result};
