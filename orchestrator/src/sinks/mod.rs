//! Reporting sinks
//!
//! Each sink turns coordinator events into one report artifact. Sinks are
//! owned by the coordinator and only ever called from its task.

pub mod console;
pub mod json_store;
pub mod teamcity;

pub use console::ConsoleSink;
pub use json_store::JsonStoreSink;
pub use teamcity::TeamCitySink;
