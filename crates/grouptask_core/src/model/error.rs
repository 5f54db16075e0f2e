//! Domain error taxonomy.
//!
//! Every failure is returned to the caller synchronously. Nothing in the
//! model layer retries or swallows an error.

use crate::model::ids::{EntityKind, GroupId, TaskKind, TaskRef, TodoId, UserId};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type DomainResult<T> = Result<T, DomainError>;

/// Field-less classification of [`DomainError`] for callers that only branch
/// on the failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoParent,
    UnsupportedParent,
    MemberNotEligible,
    ConcurrentModification,
    MissingCompletionTime,
    GroupNotFound,
    GroupMismatch,
    Validation,
    IncompleteRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Stored task has no resolvable container. Construction bug, fatal.
    NoParent(TaskRef),
    /// Parent setter received a container kind the task does not accept.
    UnsupportedParent { child: TaskKind, parent: EntityKind },
    /// Member is not in the resolved eligible set of the task.
    MemberNotEligible { task: TaskRef, member: UserId },
    /// Stored version differs from the one the caller read.
    ConcurrentModification {
        task: TaskRef,
        expected_version: u32,
        actual_version: u32,
    },
    /// First completion confirmation of a to-do omitted its completion time.
    MissingCompletionTime(TodoId),
    /// Group provider does not know the group.
    GroupNotFound(GroupId),
    /// A group snapshot was passed for a task bound to another group.
    GroupMismatch { expected: GroupId, actual: GroupId },
    /// Input value rejected.
    Validation { field: &'static str, reason: String },
    /// Staged request is missing a required field.
    IncompleteRequest { missing: &'static str },
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoParent(_) => ErrorKind::NoParent,
            Self::UnsupportedParent { .. } => ErrorKind::UnsupportedParent,
            Self::MemberNotEligible { .. } => ErrorKind::MemberNotEligible,
            Self::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
            Self::MissingCompletionTime(_) => ErrorKind::MissingCompletionTime,
            Self::GroupNotFound(_) => ErrorKind::GroupNotFound,
            Self::GroupMismatch { .. } => ErrorKind::GroupMismatch,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::IncompleteRequest { .. } => ErrorKind::IncompleteRequest,
        }
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

impl Display for DomainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoParent(task) => write!(f, "no parent defined for {task}"),
            Self::UnsupportedParent { child, parent } => {
                write!(f, "{child} does not accept a {parent} parent")
            }
            Self::MemberNotEligible { task, member } => {
                write!(f, "member {member} is not eligible to respond to {task}")
            }
            Self::ConcurrentModification {
                task,
                expected_version,
                actual_version,
            } => write!(
                f,
                "{task} was modified concurrently: expected version {expected_version}, found {actual_version}"
            ),
            Self::MissingCompletionTime(uid) => write!(
                f,
                "completion time is required for first confirmation of todo {uid}"
            ),
            Self::GroupNotFound(uid) => write!(f, "group not found: {uid}"),
            Self::GroupMismatch { expected, actual } => {
                write!(f, "expected group {expected}, got {actual}")
            }
            Self::Validation { field, reason } => write!(f, "invalid {field}: {reason}"),
            Self::IncompleteRequest { missing } => {
                write!(f, "request is missing required field `{missing}`")
            }
        }
    }
}

impl Error for DomainError {}
