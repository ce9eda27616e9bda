//! Crate-level scenario tests.
//!
//! These drive the public entry points against real directory trees.

mod end_to_end;
