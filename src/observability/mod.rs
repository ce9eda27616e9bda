//! Observability: structured logging to the console and to the persistent
//! application log file.

mod tracing_init;

pub use tracing_init::*;
