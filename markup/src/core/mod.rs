//! Deterministic, pure logic shared by the orchestration engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod candidates;
pub mod content_scan;
pub mod guard;
pub mod imports;
pub mod tokens;
pub mod transitions;
pub mod types;
