//! Scheduled log retention.
//!
//! `logsweep` deletes log files older than a retention window from a tree laid
//! out as `base/<site>/<file>`, either on demand or on a daily, weekly or
//! monthly plan. The [`cleaner::Cleaner`] is the entry point for both.

pub mod cleaner;
pub mod config;
pub mod observability;
pub mod retention;
pub mod scheduler;

#[cfg(test)]
mod tests;
