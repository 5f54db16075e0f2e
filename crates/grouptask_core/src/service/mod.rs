//! Task use-case services.
//!
//! # Responsibility
//! - Orchestrate group lookup, domain operations and repository writes into
//!   use-case level APIs.
//! - Emit metadata-only log lines for state transitions.
//!
//! # Invariants
//! - Services never retry. Version conflicts propagate to the caller.
//! - Every mutating call persists through the versioned repository update.

use crate::config::ConfigError;
use crate::model::error::{DomainError, ErrorKind};
use crate::model::event::EventRecord;
use crate::model::group::GroupDirectory;
use crate::model::ids::{EntityKind, EntityRef, EventId, TaskKind, TaskRef};
use crate::model::task::{ContainerRef, Task};
use crate::repo::event_repo::EventRepository;
use crate::repo::todo_repo::TodoRepository;
use crate::repo::RepoError;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod event_service;
pub mod todo_service;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Clock used by services; injectable for tests.
pub type Clock = fn() -> DateTime<Utc>;

/// Service error for task use-cases.
#[derive(Debug)]
pub enum ServiceError {
    /// Persistence-layer failure.
    Repo(RepoError),
    /// Domain rule rejected the operation.
    Domain(DomainError),
    /// Injected configuration is invalid.
    Config(ConfigError),
    /// Referenced task or container does not exist.
    NotFound(EntityRef),
    /// No meeting or vote is stored under this uid.
    EventNotFound(EventId),
}

impl ServiceError {
    /// Domain classification, when this error carries one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Domain(err) => Some(err.kind()),
            Self::Repo(err) => err.domain_kind(),
            _ => None,
        }
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::Domain(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::NotFound(entity) => write!(f, "{entity} not found"),
            Self::EventNotFound(uid) => write!(f, "event {uid} not found"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Domain(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::NotFound(_) | Self::EventNotFound(_) => None,
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Domain(err) => Self::Domain(err),
            RepoError::NotFound(task) => Self::NotFound(task.into()),
            other => Self::Repo(other),
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::GroupNotFound(uid) => Self::NotFound(EntityRef::Group(uid)),
            other => Self::Domain(other),
        }
    }
}

impl From<ConfigError> for ServiceError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// Looks up `entity` and returns it with its resolved ancestor group.
///
/// A meeting or vote reference must name a stored event of that kind.
pub(crate) fn resolve_container<E, T, G>(
    entity: EntityRef,
    child: TaskKind,
    events: &E,
    todos: &T,
    groups: &G,
) -> ServiceResult<ContainerRef>
where
    E: EventRepository,
    T: TodoRepository,
    G: GroupDirectory,
{
    let ancestor_group = match entity {
        EntityRef::Group(uid) => groups.require_group(uid)?.uid,
        EntityRef::Todo(uid) => todos
            .get_todo(uid)?
            .ok_or(ServiceError::NotFound(entity))?
            .ancestor_group(),
        EntityRef::Meeting(uid) | EntityRef::Vote(uid) => {
            let event = events
                .get_event(uid)?
                .ok_or(ServiceError::NotFound(entity))?;
            if EntityRef::from(event.task_ref()) != entity {
                return Err(ServiceError::NotFound(entity));
            }
            event.ancestor_group()
        }
        EntityRef::User(_) => {
            return Err(DomainError::UnsupportedParent {
                child,
                parent: EntityKind::User,
            }
            .into())
        }
    };
    Ok(ContainerRef {
        entity,
        ancestor_group,
    })
}

/// Fails when `task` already sits on the parent chain of `container`.
pub(crate) fn ensure_not_within<E, T>(
    task: TaskRef,
    container: EntityRef,
    events: &E,
    todos: &T,
) -> ServiceResult<()>
where
    E: EventRepository,
    T: TodoRepository,
{
    let task = EntityRef::from(task);
    let mut seen = BTreeSet::new();
    let mut current = container;
    while seen.insert(current) {
        if current == task {
            let reason = "task cannot move under its own subtree";
            return Err(DomainError::validation("parent", reason).into());
        }
        current = match current {
            EntityRef::Todo(uid) => match todos.get_todo(uid)? {
                Some(todo) => todo.parent().into(),
                None => return Ok(()),
            },
            EntityRef::Meeting(uid) | EntityRef::Vote(uid) => match events.get_event(uid)? {
                Some(event) => event.parent_ref(),
                None => return Ok(()),
            },
            EntityRef::Group(_) | EntityRef::User(_) => return Ok(()),
        };
    }
    Ok(())
}

pub(crate) fn require_event<E: EventRepository>(
    events: &E,
    uid: EventId,
) -> ServiceResult<EventRecord> {
    events
        .get_event(uid)?
        .ok_or(ServiceError::EventNotFound(uid))
}
