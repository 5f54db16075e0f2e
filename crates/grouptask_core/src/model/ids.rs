//! Identifiers and cross-entity references.
//!
//! # Responsibility
//! - Name every identifier kind used by the task model.
//! - Describe "what a task is attached to" as closed sum types instead of
//!   one nullable reference per container kind.
//!
//! # Invariants
//! - Identifiers are random v4 UUIDs and are never reused.
//! - A reference always names exactly one entity kind.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of a group (external collaborator).
pub type GroupId = Uuid;
/// Stable identifier of a user / group member (external collaborator).
pub type UserId = Uuid;
/// Stable identifier of a meeting or vote.
pub type EventId = Uuid;
/// Stable identifier of a to-do.
pub type TodoId = Uuid;

/// Every entity kind a caller can point a task at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Group,
    Meeting,
    Vote,
    Todo,
    User,
}

impl EntityKind {
    /// Stable lowercase name, also used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Meeting => "meeting",
            Self::Vote => "vote",
            Self::Todo => "todo",
            Self::User => "user",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Untyped pointer at one entity. Parent setters accept this and reject the
/// kinds they do not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "uid", rename_all = "snake_case")]
pub enum EntityRef {
    Group(GroupId),
    Meeting(EventId),
    Vote(EventId),
    Todo(TodoId),
    User(UserId),
}

impl EntityRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Group(_) => EntityKind::Group,
            Self::Meeting(_) => EntityKind::Meeting,
            Self::Vote(_) => EntityKind::Vote,
            Self::Todo(_) => EntityKind::Todo,
            Self::User(_) => EntityKind::User,
        }
    }

    pub fn uid(&self) -> Uuid {
        match self {
            Self::Group(uid)
            | Self::Meeting(uid)
            | Self::Vote(uid)
            | Self::Todo(uid)
            | Self::User(uid) => *uid,
        }
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.uid())
    }
}

/// Concrete task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Meeting,
    Vote,
    Todo,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Meeting => "meeting",
            Self::Vote => "vote",
            Self::Todo => "todo",
        }
    }
}

impl Display for TaskKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pointer at one task; the element type of a group's reverse collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "uid", rename_all = "snake_case")]
pub enum TaskRef {
    Meeting(EventId),
    Vote(EventId),
    Todo(TodoId),
}

impl TaskRef {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Meeting(_) => TaskKind::Meeting,
            Self::Vote(_) => TaskKind::Vote,
            Self::Todo(_) => TaskKind::Todo,
        }
    }

    pub fn uid(&self) -> Uuid {
        match self {
            Self::Meeting(uid) | Self::Vote(uid) | Self::Todo(uid) => *uid,
        }
    }
}

impl Display for TaskRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.uid())
    }
}

impl From<TaskRef> for EntityRef {
    fn from(value: TaskRef) -> Self {
        match value {
            TaskRef::Meeting(uid) => Self::Meeting(uid),
            TaskRef::Vote(uid) => Self::Vote(uid),
            TaskRef::Todo(uid) => Self::Todo(uid),
        }
    }
}
