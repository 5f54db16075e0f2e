//! Task domain model: meetings, votes and to-dos attached to a group tree.
//!
//! # Responsibility
//! - Define the pure domain types and their invariants.
//! - Stay free of I/O and logging; persistence lives in `repo`.
//!
//! # Invariants
//! - Every task is bound to exactly one ancestor group at construction.
//! - Parent kinds are closed sum types; unsupported kinds fail early.

pub mod daytime;
pub mod error;
pub mod event;
pub mod event_request;
pub mod group;
pub mod ids;
pub mod meeting;
pub mod task;
pub mod todo;
pub mod todo_confirmation;
pub mod vote;
