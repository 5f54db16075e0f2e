//! Event aggregate shared by meetings and votes.
//!
//! # Responsibility
//! - Hold fields common to every event and the reminder-time computation.
//! - Bind the ancestor group once, at construction.
//!
//! # Invariants
//! - `uid`, `created_at`, `created_by` and `ancestor_group` never change after
//!   construction.
//! - Events are soft-cancelled, never deleted.
//! - `scheduled_reminder_at` is only recomputed by
//!   `update_scheduled_reminder_time`; field setters do not trigger it.

use crate::model::daytime::{minutes_before, validate_offset_minutes, DaytimeClamp};
use crate::model::error::{DomainError, DomainResult};
use crate::model::group::{Group, GroupDirectory};
use crate::model::ids::{EntityRef, EventId, GroupId, TaskRef, UserId};
use crate::model::meeting::Meeting;
use crate::model::task::{ParentChange, Task, TaskContainer};
use crate::model::vote::Vote;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Longest accepted event name, in characters.
pub const MAX_EVENT_NAME_CHARS: usize = 40;
/// Longest accepted event description, in characters.
pub const MAX_EVENT_DESCRIPTION_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventReminderType {
    Disabled,
    Custom,
    GroupConfigured,
}

impl EventReminderType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Custom => "custom",
            Self::GroupConfigured => "group_configured",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "disabled" => Some(Self::Disabled),
            "custom" => Some(Self::Custom),
            "group_configured" => Some(Self::GroupConfigured),
            _ => None,
        }
    }
}

/// Caller-supplied inputs for a new event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFields {
    pub name: String,
    pub start_at: DateTime<Utc>,
    pub created_by: UserId,
    pub description: Option<String>,
    pub include_sub_groups: bool,
    pub rsvp_required: bool,
    pub relayable: bool,
    pub reminder_type: EventReminderType,
    pub custom_reminder_minutes: i64,
}

impl EventFields {
    /// Required fields only; reminders disabled, all flags off.
    pub fn new(name: impl Into<String>, start_at: DateTime<Utc>, created_by: UserId) -> Self {
        Self {
            name: name.into(),
            start_at,
            created_by,
            description: None,
            include_sub_groups: false,
            rsvp_required: false,
            relayable: false,
            reminder_type: EventReminderType::Disabled,
            custom_reminder_minutes: 0,
        }
    }

    pub fn with_custom_reminder(mut self, minutes: i64) -> Self {
        self.reminder_type = EventReminderType::Custom;
        self.custom_reminder_minutes = minutes;
        self
    }

    pub fn with_group_reminder(mut self) -> Self {
        self.reminder_type = EventReminderType::GroupConfigured;
        self
    }
}

/// State common to meetings and votes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCore {
    pub(crate) uid: EventId,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) created_by: UserId,
    pub(crate) ancestor_group: GroupId,
    pub name: String,
    pub description: String,
    /// Meeting start, or vote closing time.
    pub start_at: DateTime<Utc>,
    pub include_sub_groups: bool,
    pub rsvp_required: bool,
    pub relayable: bool,
    pub reminder_type: EventReminderType,
    pub custom_reminder_minutes: i64,
    pub(crate) canceled: bool,
    pub(crate) scheduled_reminder_at: Option<DateTime<Utc>>,
    pub(crate) scheduled_reminder_active: bool,
    pub(crate) reminders_sent: u32,
    pub(crate) version: u32,
    pub(crate) assigned_members: BTreeSet<UserId>,
}

impl EventCore {
    pub(crate) fn new(
        fields: EventFields,
        ancestor_group: GroupId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = validate_name(&fields.name)?;
        let custom_reminder_minutes =
            validate_offset_minutes("custom_reminder_minutes", fields.custom_reminder_minutes)?;
        let description = fields.description.unwrap_or_default();
        if description.chars().count() > MAX_EVENT_DESCRIPTION_CHARS {
            return Err(DomainError::validation(
                "description",
                format!("must be at most {MAX_EVENT_DESCRIPTION_CHARS} characters"),
            ));
        }

        Ok(Self {
            uid: EventId::new_v4(),
            created_at: now,
            created_by: fields.created_by,
            ancestor_group,
            name,
            description,
            start_at: fields.start_at,
            include_sub_groups: fields.include_sub_groups,
            rsvp_required: fields.rsvp_required,
            relayable: fields.relayable,
            reminder_type: fields.reminder_type,
            custom_reminder_minutes,
            canceled: false,
            scheduled_reminder_at: None,
            scheduled_reminder_active: fields.reminder_type != EventReminderType::Disabled,
            reminders_sent: 0,
            version: 0,
            assigned_members: BTreeSet::new(),
        })
    }

    pub fn uid(&self) -> EventId {
        self.uid
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn ancestor_group(&self) -> GroupId {
        self.ancestor_group
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    pub fn scheduled_reminder_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_reminder_at
    }

    pub fn is_scheduled_reminder_active(&self) -> bool {
        self.scheduled_reminder_active
    }

    pub fn set_scheduled_reminder_active(&mut self, active: bool) {
        self.scheduled_reminder_active = active;
    }

    pub fn reminders_sent(&self) -> u32 {
        self.reminders_sent
    }

    /// Optimistic-concurrency token as last read from or written to storage.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    /// Renames the event, applying the same rules as construction.
    pub fn rename(&mut self, name: &str) -> DomainResult<()> {
        self.name = validate_name(name)?;
        Ok(())
    }

    /// Switches the reminder mode. `custom_minutes` is only stored for
    /// [`EventReminderType::Custom`]. Call
    /// [`EventCore::update_scheduled_reminder_time`] afterwards.
    pub fn set_reminder(
        &mut self,
        reminder_type: EventReminderType,
        custom_minutes: i64,
    ) -> DomainResult<()> {
        if reminder_type == EventReminderType::Custom {
            self.custom_reminder_minutes =
                validate_offset_minutes("custom_reminder_minutes", custom_minutes)?;
        }
        self.reminder_type = reminder_type;
        self.scheduled_reminder_active = reminder_type != EventReminderType::Disabled;
        Ok(())
    }

    /// Recomputes `scheduled_reminder_at` from the reminder settings.
    ///
    /// Must be called again whenever `start_at`, `reminder_type` or
    /// `custom_reminder_minutes` change. A result older than `stale_after`
    /// relative to `now` deactivates the reminder but keeps the time.
    pub fn update_scheduled_reminder_time(
        &mut self,
        group: &Group,
        clamp: &dyn DaytimeClamp,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if group.uid != self.ancestor_group {
            return Err(DomainError::GroupMismatch {
                expected: self.ancestor_group,
                actual: group.uid,
            });
        }

        let lead_minutes = match self.reminder_type {
            EventReminderType::Custom => Some(self.custom_reminder_minutes),
            EventReminderType::GroupConfigured if group.reminder_minutes > 0 => {
                Some(group.reminder_minutes)
            }
            _ => None,
        };
        let raw = lead_minutes
            .map(|minutes| minutes_before(self.start_at, minutes, "reminder_minutes"))
            .transpose()?;

        self.scheduled_reminder_at =
            raw.map(|time| clamp.clamp(time, Some(self.start_at), group.time_zone()));

        if let (Some(reminder_at), Some(cutoff)) = (
            self.scheduled_reminder_at,
            now.checked_sub_signed(stale_after),
        ) {
            if reminder_at < cutoff {
                self.scheduled_reminder_active = false;
            }
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> DomainResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("name", "must not be blank"));
    }
    if trimmed.chars().count() > MAX_EVENT_NAME_CHARS {
        return Err(DomainError::validation(
            "name",
            format!("must be at most {MAX_EVENT_NAME_CHARS} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

/// Behaviour shared by every concrete event kind.
pub trait Event: Task + TaskContainer {
    fn core(&self) -> &EventCore;
    fn core_mut(&mut self) -> &mut EventCore;
    /// Free-form tag array as persisted.
    fn tags(&self) -> Vec<String>;

    fn uid(&self) -> EventId {
        self.core().uid
    }

    fn name(&self) -> &str {
        &self.core().name
    }

    fn is_canceled(&self) -> bool {
        self.core().canceled
    }

    fn cancel(&mut self) {
        self.core_mut().canceled = true;
    }

    fn update_scheduled_reminder_time(
        &mut self,
        group: &Group,
        clamp: &dyn DaytimeClamp,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.core_mut()
            .update_scheduled_reminder_time(group, clamp, stale_after, now)
    }

    /// Scheduler hook: one reminder round went out.
    fn record_reminder_sent(&mut self) {
        let core = self.core_mut();
        core.reminders_sent = core.reminders_sent.saturating_add(1);
        core.scheduled_reminder_active = false;
    }

    /// Reminder lead time inherited by to-dos created under this event.
    fn todo_reminder_minutes(&self, group: &Group) -> DomainResult<i64> {
        self.ensure_ancestor(group)?;
        let core = self.core();
        Ok(match core.reminder_type {
            EventReminderType::Custom => core.custom_reminder_minutes,
            _ => group.reminder_minutes,
        })
    }

    /// Everyone the event addresses, honoring `include_sub_groups`.
    fn all_members(&self, groups: &dyn GroupDirectory) -> DomainResult<BTreeSet<UserId>> {
        let ancestor = self.ancestor_group();
        if self.core().include_sub_groups {
            return groups.members_with_sub_groups(ancestor);
        }
        let group = groups.require_group(ancestor)?;
        self.members(&group)
    }
}

/// Either concrete event kind, as stored by the event repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventRecord {
    Meeting(Meeting),
    Vote(Vote),
}

impl EventRecord {
    pub fn as_meeting(&self) -> Option<&Meeting> {
        match self {
            Self::Meeting(meeting) => Some(meeting),
            Self::Vote(_) => None,
        }
    }

    pub fn as_vote(&self) -> Option<&Vote> {
        match self {
            Self::Vote(vote) => Some(vote),
            Self::Meeting(_) => None,
        }
    }

    pub fn as_vote_mut(&mut self) -> Option<&mut Vote> {
        match self {
            Self::Vote(vote) => Some(vote),
            Self::Meeting(_) => None,
        }
    }

    /// Dispatches to the concrete parent setter.
    pub fn set_parent(
        &mut self,
        parent: &dyn TaskContainer,
        groups: &mut dyn GroupDirectory,
    ) -> DomainResult<()> {
        match self {
            Self::Meeting(meeting) => meeting.set_parent(parent, groups),
            Self::Vote(vote) => vote.set_parent(parent, groups),
        }
    }

    pub fn reparent(&mut self, parent: &dyn TaskContainer) -> DomainResult<ParentChange> {
        match self {
            Self::Meeting(meeting) => meeting.reparent(parent),
            Self::Vote(vote) => vote.reparent(parent),
        }
    }

    pub fn parent_ref(&self) -> EntityRef {
        match self {
            Self::Meeting(meeting) => meeting.parent().into(),
            Self::Vote(vote) => vote.parent().into(),
        }
    }
}

impl From<Meeting> for EventRecord {
    fn from(value: Meeting) -> Self {
        Self::Meeting(value)
    }
}

impl From<Vote> for EventRecord {
    fn from(value: Vote) -> Self {
        Self::Vote(value)
    }
}

impl Task for EventRecord {
    fn task_ref(&self) -> TaskRef {
        match self {
            Self::Meeting(meeting) => meeting.task_ref(),
            Self::Vote(vote) => vote.task_ref(),
        }
    }

    fn created_by(&self) -> UserId {
        self.core().created_by
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.core().created_at
    }

    fn deadline_at(&self) -> DateTime<Utc> {
        self.core().start_at
    }

    fn ancestor_group(&self) -> GroupId {
        self.core().ancestor_group
    }

    fn assigned_member_set(&self) -> &BTreeSet<UserId> {
        &self.core().assigned_members
    }

    fn assigned_member_set_mut(&mut self) -> &mut BTreeSet<UserId> {
        &mut self.core_mut().assigned_members
    }
}

impl TaskContainer for EventRecord {
    fn entity_ref(&self) -> EntityRef {
        self.task_ref().into()
    }

    fn this_or_ancestor_group(&self) -> GroupId {
        self.core().ancestor_group
    }
}

impl Event for EventRecord {
    fn core(&self) -> &EventCore {
        match self {
            Self::Meeting(meeting) => meeting.core(),
            Self::Vote(vote) => vote.core(),
        }
    }

    fn core_mut(&mut self) -> &mut EventCore {
        match self {
            Self::Meeting(meeting) => meeting.core_mut(),
            Self::Vote(vote) => vote.core_mut(),
        }
    }

    fn tags(&self) -> Vec<String> {
        match self {
            Self::Meeting(meeting) => meeting.tags(),
            Self::Vote(vote) => vote.tags(),
        }
    }
}
