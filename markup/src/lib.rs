//! Request-orchestration engine for chat-driven frontend edits.
//!
//! A chat mention becomes a run; the run is planned by a generation agent,
//! approved by the requester, patched, and committed as a merge request. The
//! crate keeps the same split throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (path guard, candidate selection,
//!   import parsing, status transitions). No I/O.
//! - **[`io`]**: Collaborator traits and their HTTP adapters, configuration,
//!   chat message rendering, and the in-process run store.
//!
//! Orchestration modules ([`context`], [`orchestrator`], [`conversation`])
//! combine core logic with the collaborators to drive a conversation.

pub mod context;
pub mod conversation;
pub mod core;
pub mod deadline;
pub mod error;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
