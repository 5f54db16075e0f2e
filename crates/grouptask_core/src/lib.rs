//! Group task core: meetings, votes and to-dos attached to nested groups.
//! This crate is the single source of truth for task invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, TaskConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::error::{DomainError, DomainResult, ErrorKind};
pub use model::event::{Event, EventFields, EventRecord, EventReminderType};
pub use model::event_request::{EventRequest, MeetingRequest, VoteRequest};
pub use model::group::{Group, GroupDirectory, InMemoryGroupDirectory, Role};
pub use model::ids::{EntityKind, EntityRef, EventId, GroupId, TaskKind, TaskRef, TodoId, UserId};
pub use model::meeting::{Meeting, MeetingParent};
pub use model::task::{ContainerRef, ParentChange, Task, TaskContainer};
pub use model::todo::{Todo, TodoCompletionStatus, TodoFields, TodoParent, TodoType};
pub use model::todo_confirmation::{TodoAssignment, TodoCompletionConfirmation, TodoConfirmType};
pub use model::vote::{Locale, Vote, VoteOptions, VoteParent};
pub use repo::event_repo::{EventRepository, SqliteEventRepository};
pub use repo::todo_repo::{SqliteTodoRepository, TodoRepository};
pub use repo::{RepoError, RepoResult};
pub use service::event_service::EventService;
pub use service::todo_service::TodoService;
pub use service::{ServiceError, ServiceResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
