//! Domain types for the SQL batch runner.
//!
//! Pure data and validation: script definitions, execution results, the run
//! summary, and the script file loader. Nothing in this crate touches the
//! database.

pub mod error;
pub mod loader;
pub mod result;
pub mod script;
pub mod types;
