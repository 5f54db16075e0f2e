//! To-do aggregate.
//!
//! # Responsibility
//! - Track an action item under a group or an event: deadline, reminder
//!   countdown, per-member responses and the derived completion percentage.
//! - Detect the one-shot "quorum just reached" transition.
//!
//! # Invariants
//! - `ancestor_group` is fixed at construction.
//! - At most one completion confirmation per member; a repeat overwrites.
//! - `completion_percentage` only counts members eligible at the time of the
//!   latest confirmation call. Members who left are excluded from numerator
//!   and denominator.

use crate::config::TaskConfig;
use crate::model::daytime::{
    minutes_after, minutes_before, validate_offset_minutes, DaytimeClamp, MAX_OFFSET_MINUTES,
};
use crate::model::error::{DomainError, DomainResult};
use crate::model::group::{Group, GroupDirectory};
use crate::model::ids::{EntityRef, EventId, GroupId, TaskKind, TaskRef, TodoId, UserId};
use crate::model::task::{ContainerRef, ParentChange, Task, TaskContainer};
use crate::model::todo_confirmation::{TodoAssignment, TodoCompletionConfirmation, TodoConfirmType};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const MAX_TODO_MESSAGE_CHARS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TodoType {
    ActionRequired,
    InformationRequired,
    VolunteersNeeded,
    ValidationRequired,
}

impl TodoType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ActionRequired => "action_required",
            Self::InformationRequired => "information_required",
            Self::VolunteersNeeded => "volunteers_needed",
            Self::ValidationRequired => "validation_required",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "action_required" => Some(Self::ActionRequired),
            "information_required" => Some(Self::InformationRequired),
            "volunteers_needed" => Some(Self::VolunteersNeeded),
            "validation_required" => Some(Self::ValidationRequired),
            _ => None,
        }
    }
}

/// Containers a to-do may be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "uid", rename_all = "snake_case")]
pub enum TodoParent {
    Group(GroupId),
    Meeting(EventId),
    Vote(EventId),
}

impl TryFrom<EntityRef> for TodoParent {
    type Error = DomainError;

    fn try_from(value: EntityRef) -> Result<Self, Self::Error> {
        match value {
            EntityRef::Group(uid) => Ok(Self::Group(uid)),
            EntityRef::Meeting(uid) => Ok(Self::Meeting(uid)),
            EntityRef::Vote(uid) => Ok(Self::Vote(uid)),
            other => Err(DomainError::UnsupportedParent {
                child: TaskKind::Todo,
                parent: other.kind(),
            }),
        }
    }
}

impl From<TodoParent> for EntityRef {
    fn from(value: TodoParent) -> Self {
        match value {
            TodoParent::Group(uid) => Self::Group(uid),
            TodoParent::Meeting(uid) => Self::Meeting(uid),
            TodoParent::Vote(uid) => Self::Vote(uid),
        }
    }
}

/// Caller-supplied inputs for a new to-do. `None` takes the configured default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoFields {
    pub todo_type: TodoType,
    pub message: String,
    pub description: Option<String>,
    pub action_by: DateTime<Utc>,
    pub created_by: UserId,
    pub reminder_minutes: Option<i64>,
    pub reminder_count: Option<u32>,
    pub recur_interval_minutes: Option<i64>,
}

impl TodoFields {
    pub fn new(
        todo_type: TodoType,
        message: impl Into<String>,
        action_by: DateTime<Utc>,
        created_by: UserId,
    ) -> Self {
        Self {
            todo_type,
            message: message.into(),
            description: None,
            action_by,
            created_by,
            reminder_minutes: None,
            reminder_count: None,
            recur_interval_minutes: None,
        }
    }
}

/// Snapshot of the quorum computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TodoCompletionStatus {
    pub confirmed: usize,
    pub eligible: usize,
}

impl TodoCompletionStatus {
    /// `100 * confirmed / eligible`; zero when nobody is eligible.
    pub fn percentage(&self) -> f64 {
        if self.eligible == 0 {
            0.0
        } else {
            100.0 * self.confirmed as f64 / self.eligible as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub(crate) uid: TodoId,
    pub(crate) created_by: UserId,
    pub(crate) created_at: DateTime<Utc>,
    pub todo_type: TodoType,
    pub(crate) message: String,
    pub description: String,
    pub action_by: DateTime<Utc>,
    pub reminder_minutes: i64,
    pub(crate) reminder_active: bool,
    pub(crate) reminders_left: u32,
    pub(crate) scheduled_reminder_at: Option<DateTime<Utc>>,
    pub(crate) cancelled: bool,
    pub(crate) completed_date: Option<DateTime<Utc>>,
    pub(crate) completion_percentage: f64,
    pub(crate) source_todo: Option<TodoId>,
    pub(crate) recur_interval_minutes: Option<i64>,
    pub(crate) parent: TodoParent,
    pub(crate) ancestor_group: GroupId,
    pub(crate) assigned_members: BTreeSet<UserId>,
    pub(crate) confirmations: BTreeMap<UserId, TodoCompletionConfirmation>,
    pub(crate) assignments: BTreeMap<UserId, TodoAssignment>,
    pub(crate) version: u32,
}

impl Todo {
    /// Builds a to-do under `parent` and registers it on the ancestor group.
    pub fn new(
        fields: TodoFields,
        parent: &dyn TaskContainer,
        groups: &mut dyn GroupDirectory,
        config: &TaskConfig,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let parent_ref = TodoParent::try_from(parent.entity_ref())?;
        let message = validate_message(&fields.message)?;
        if let Some(interval) = fields.recur_interval_minutes {
            if !(1..=MAX_OFFSET_MINUTES).contains(&interval) {
                return Err(DomainError::validation(
                    "recur_interval_minutes",
                    format!("must be in 1..={MAX_OFFSET_MINUTES}, got {interval}"),
                ));
            }
        }
        let reminder_minutes = validate_offset_minutes(
            "reminder_minutes",
            fields
                .reminder_minutes
                .unwrap_or(config.default_todo_reminder_minutes),
        )?;
        let reminders_left = fields
            .reminder_count
            .unwrap_or(config.default_todo_reminder_count);

        let todo = Self {
            uid: TodoId::new_v4(),
            created_by: fields.created_by,
            created_at: now,
            todo_type: fields.todo_type,
            message,
            description: fields.description.unwrap_or_default(),
            action_by: fields.action_by,
            reminder_minutes,
            reminder_active: reminders_left > 0,
            reminders_left,
            scheduled_reminder_at: None,
            cancelled: false,
            completed_date: None,
            completion_percentage: 0.0,
            source_todo: None,
            recur_interval_minutes: fields.recur_interval_minutes,
            parent: parent_ref,
            ancestor_group: parent.this_or_ancestor_group(),
            assigned_members: BTreeSet::new(),
            confirmations: BTreeMap::new(),
            assignments: BTreeMap::new(),
            version: 0,
        };

        let task = todo.task_ref();
        if let TodoParent::Group(group) = parent_ref {
            groups.register_child(group, task)?;
        }
        groups.register_descendant(todo.ancestor_group, task)?;
        Ok(todo)
    }

    pub fn uid(&self) -> TodoId {
        self.uid
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn set_message(&mut self, message: &str) -> DomainResult<()> {
        self.message = validate_message(message)?;
        Ok(())
    }

    pub fn parent(&self) -> TodoParent {
        self.parent
    }

    /// Re-points the immediate parent within the same ancestor group and
    /// moves the group child entry along.
    ///
    /// Nothing changes when the new parent is rejected.
    pub fn set_parent(
        &mut self,
        parent: &dyn TaskContainer,
        groups: &mut dyn GroupDirectory,
    ) -> DomainResult<()> {
        let (next, change) = self.plan_parent(parent)?;
        change.check(&*groups)?;
        self.parent = next;
        change.apply(groups)
    }

    /// Re-points the immediate parent and hands back the directory update,
    /// to be applied once the to-do is stored.
    pub fn reparent(&mut self, parent: &dyn TaskContainer) -> DomainResult<ParentChange> {
        let (next, change) = self.plan_parent(parent)?;
        self.parent = next;
        Ok(change)
    }

    fn plan_parent(&self, parent: &dyn TaskContainer) -> DomainResult<(TodoParent, ParentChange)> {
        let next = TodoParent::try_from(parent.entity_ref())?;
        let change =
            ParentChange::plan(self.task_ref(), self.ancestor_group(), self.parent.into(), parent)?;
        Ok((next, change))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.reminder_active = false;
    }

    pub fn is_reminder_active(&self) -> bool {
        self.reminder_active
    }

    pub fn reminders_left(&self) -> u32 {
        self.reminders_left
    }

    pub fn scheduled_reminder_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_reminder_at
    }

    pub fn completed_date(&self) -> Option<DateTime<Utc>> {
        self.completed_date
    }

    pub fn completion_percentage(&self) -> f64 {
        self.completion_percentage
    }

    pub fn source_todo(&self) -> Option<TodoId> {
        self.source_todo
    }

    pub fn recur_interval(&self) -> Option<Duration> {
        self.recur_interval_minutes.and_then(Duration::try_minutes)
    }

    pub fn is_recurring(&self) -> bool {
        self.recur_interval_minutes.is_some()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    /// Recomputes the next reminder time.
    ///
    /// The reminder is `reminder_minutes` before the deadline, clamped into
    /// the daytime window. When that is already past it moves to the same
    /// time tomorrow if that is still before the deadline, else to the
    /// deadline itself.
    pub fn calculate_scheduled_reminder_time(
        &mut self,
        group: &Group,
        clamp: &dyn DaytimeClamp,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_ancestor(group)?;
        if !self.reminder_active {
            self.scheduled_reminder_at = None;
            return Ok(());
        }

        let zone = group.time_zone();
        let deadline = self.action_by;
        let lead = minutes_before(deadline, self.reminder_minutes, "reminder_minutes")?;
        let mut reminder_at = clamp.clamp(lead, Some(deadline), zone);
        if reminder_at < now {
            let tomorrow = now + Duration::days(1);
            reminder_at = if tomorrow < deadline {
                clamp.clamp(tomorrow, Some(deadline), zone)
            } else {
                deadline
            };
        }
        self.scheduled_reminder_at = Some(reminder_at);
        Ok(())
    }

    /// Scheduler hook: one reminder went out. Deactivates at zero.
    pub fn record_reminder_sent(&mut self) {
        self.reminders_left = self.reminders_left.saturating_sub(1);
        if self.reminders_left == 0 {
            self.reminder_active = false;
        }
    }

    /// Explicit assignees still in the group, or every current member.
    pub fn eligible_members(&self, group: &Group) -> DomainResult<BTreeSet<UserId>> {
        self.ensure_ancestor(group)?;
        if self.assigned_members.is_empty() {
            return Ok(group.members());
        }
        Ok(self
            .assigned_members
            .iter()
            .copied()
            .filter(|uid| group.is_member(*uid))
            .collect())
    }

    pub fn calculate_completion_status(&self, group: &Group) -> DomainResult<TodoCompletionStatus> {
        let eligible = self.eligible_members(group)?;
        let confirmed = self
            .confirmations
            .values()
            .filter(|confirmation| {
                confirmation.confirm_type.is_completing() && eligible.contains(&confirmation.member)
            })
            .count();
        Ok(TodoCompletionStatus {
            confirmed,
            eligible: eligible.len(),
        })
    }

    /// Records `member`'s response and recomputes the completion percentage.
    ///
    /// Returns `true` only when this call moved the percentage from below
    /// `threshold` to at-or-above it.
    pub fn add_completion_confirmation(
        &mut self,
        member: UserId,
        confirm_type: TodoConfirmType,
        completion_time: Option<DateTime<Utc>>,
        group: &Group,
        threshold: f64,
        now: DateTime<Utc>,
    ) -> DomainResult<bool> {
        if completion_time.is_none() && self.completed_date.is_none() {
            return Err(DomainError::MissingCompletionTime(self.uid));
        }
        let eligible = self.eligible_members(group)?;
        if !eligible.contains(&member) {
            return Err(DomainError::MemberNotEligible {
                task: self.task_ref(),
                member,
            });
        }

        if completion_time.is_some() {
            self.completed_date = completion_time;
        }
        let uid = self.uid;
        self.confirmations
            .entry(member)
            .and_modify(|existing| {
                existing.confirm_type = confirm_type;
                if completion_time.is_some() {
                    existing.completion_time = completion_time;
                }
            })
            .or_insert_with(|| {
                TodoCompletionConfirmation::new(uid, member, confirm_type, completion_time, now)
            });

        let previous = self.completion_percentage;
        self.completion_percentage = self.calculate_completion_status(group)?.percentage();
        Ok(previous < threshold && self.completion_percentage >= threshold)
    }

    pub fn confirmations(&self) -> impl Iterator<Item = &TodoCompletionConfirmation> {
        self.confirmations.values()
    }

    pub fn confirmation_of(&self, member: UserId) -> Option<&TodoCompletionConfirmation> {
        self.confirmations.get(&member)
    }

    pub fn is_completed(&self, threshold: f64) -> bool {
        self.completion_percentage >= threshold
    }

    pub fn is_completed_by(&self, member: UserId) -> bool {
        self.confirmations
            .get(&member)
            .is_some_and(|confirmation| confirmation.confirm_type.is_completing())
    }

    /// Adds or replaces assignment records, re-keyed to this to-do.
    pub fn add_assignments<I>(&mut self, assignments: I)
    where
        I: IntoIterator<Item = TodoAssignment>,
    {
        for mut assignment in assignments {
            assignment.todo = self.uid;
            self.assignments.insert(assignment.user, assignment);
        }
    }

    pub fn assignments(&self) -> impl Iterator<Item = &TodoAssignment> {
        self.assignments.values()
    }

    pub fn assigned_users(&self) -> BTreeSet<UserId> {
        self.assignments
            .values()
            .filter(|assignment| assignment.assigned)
            .map(|assignment| assignment.user)
            .collect()
    }

    pub fn confirming_users(&self) -> BTreeSet<UserId> {
        self.assignments
            .values()
            .filter(|assignment| assignment.can_confirm)
            .map(|assignment| assignment.user)
            .collect()
    }

    pub fn can_user_respond(&self, member: UserId) -> bool {
        self.assignments
            .get(&member)
            .is_some_and(TodoAssignment::can_respond)
    }

    pub fn has_user_responded(&self, member: UserId) -> bool {
        self.assignments
            .get(&member)
            .is_some_and(TodoAssignment::has_responded)
    }

    /// Records a validator's response on their assignment record.
    pub fn record_assignment_response(
        &mut self,
        member: UserId,
        confirm_type: TodoConfirmType,
        response_text: Option<&str>,
        time: DateTime<Utc>,
    ) -> DomainResult<()> {
        let task = self.task_ref();
        let assignment = self
            .assignments
            .get_mut(&member)
            .filter(|assignment| assignment.can_respond())
            .ok_or(DomainError::MemberNotEligible { task, member })?;
        assignment.confirm_type = Some(confirm_type);
        assignment.response_text = response_text.map(str::to_string);
        assignment.confirmation_time = Some(time);
        Ok(())
    }

    /// Next instance of a recurring to-do, due one interval later and
    /// attached to the same parent. `None` for non-recurring to-dos.
    pub fn next_recurrence(
        &self,
        groups: &mut dyn GroupDirectory,
        config: &TaskConfig,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<Self>> {
        let Some(interval) = self.recur_interval_minutes else {
            return Ok(None);
        };
        let fields = TodoFields {
            todo_type: self.todo_type,
            message: self.message.clone(),
            description: Some(self.description.clone()),
            action_by: minutes_after(self.action_by, interval, "recur_interval_minutes")?,
            created_by: self.created_by,
            reminder_minutes: Some(self.reminder_minutes),
            reminder_count: Some(config.default_todo_reminder_count),
            recur_interval_minutes: self.recur_interval_minutes,
        };
        let container = ContainerRef {
            entity: self.parent.into(),
            ancestor_group: self.ancestor_group,
        };
        let mut next = Self::new(fields, &container, groups, config, now)?;
        next.source_todo = Some(self.uid);
        next.assigned_members = self.assigned_members.clone();
        Ok(Some(next))
    }
}

fn validate_message(message: &str) -> DomainResult<String> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("message", "must not be blank"));
    }
    if trimmed.chars().count() > MAX_TODO_MESSAGE_CHARS {
        return Err(DomainError::validation(
            "message",
            format!("must be at most {MAX_TODO_MESSAGE_CHARS} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

impl Task for Todo {
    fn task_ref(&self) -> TaskRef {
        TaskRef::Todo(self.uid)
    }

    fn created_by(&self) -> UserId {
        self.created_by
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn deadline_at(&self) -> DateTime<Utc> {
        self.action_by
    }

    fn ancestor_group(&self) -> GroupId {
        self.ancestor_group
    }

    fn assigned_member_set(&self) -> &BTreeSet<UserId> {
        &self.assigned_members
    }

    fn assigned_member_set_mut(&mut self) -> &mut BTreeSet<UserId> {
        &mut self.assigned_members
    }
}

impl TaskContainer for Todo {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::Todo(self.uid)
    }

    fn this_or_ancestor_group(&self) -> GroupId {
        self.ancestor_group
    }
}
