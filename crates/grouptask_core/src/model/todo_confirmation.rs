//! Per-member join records of a to-do.
//!
//! - [`TodoCompletionConfirmation`]: one live response per (todo, member),
//!   feeding the completion quorum.
//! - [`TodoAssignment`]: finer-grained record of who must act and who may
//!   confirm, including members outside the group.

use crate::model::ids::{TodoId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TodoConfirmType {
    Completed,
    NotCompleted,
    NotApplicable,
}

impl TodoConfirmType {
    /// Only `Completed` counts toward the quorum.
    pub fn is_completing(self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::NotCompleted => "not_completed",
            Self::NotApplicable => "not_applicable",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "completed" => Some(Self::Completed),
            "not_completed" => Some(Self::NotCompleted),
            "not_applicable" => Some(Self::NotApplicable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoCompletionConfirmation {
    pub todo: TodoId,
    pub member: UserId,
    pub confirm_type: TodoConfirmType,
    pub completion_time: Option<DateTime<Utc>>,
    /// When the first response from this member was recorded.
    pub creation_time: DateTime<Utc>,
}

impl TodoCompletionConfirmation {
    pub fn new(
        todo: TodoId,
        member: UserId,
        confirm_type: TodoConfirmType,
        completion_time: Option<DateTime<Utc>>,
        creation_time: DateTime<Utc>,
    ) -> Self {
        Self {
            todo,
            member,
            confirm_type,
            completion_time,
            creation_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoAssignment {
    pub todo: TodoId,
    pub user: UserId,
    /// Expected to carry out the action.
    pub assigned: bool,
    /// May confirm completion (validator).
    pub can_confirm: bool,
    pub confirm_type: Option<TodoConfirmType>,
    pub response_text: Option<String>,
    pub confirmation_time: Option<DateTime<Utc>>,
}

impl TodoAssignment {
    pub fn new(todo: TodoId, user: UserId, assigned: bool, can_confirm: bool) -> Self {
        Self {
            todo,
            user,
            assigned,
            can_confirm,
            confirm_type: None,
            response_text: None,
            confirmation_time: None,
        }
    }

    /// Only validators answer on their assignment; doers confirm through
    /// completion confirmations.
    pub fn can_respond(&self) -> bool {
        self.can_confirm
    }

    pub fn has_responded(&self) -> bool {
        self.confirmation_time.is_some()
    }

    pub fn has_confirmed(&self) -> bool {
        self.confirm_type.is_some_and(TodoConfirmType::is_completing)
    }
}
