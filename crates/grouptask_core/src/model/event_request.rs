//! Mutable staging shapes for events that are not yet committed.
//!
//! # Responsibility
//! - Accumulate fields, a not-yet-validated parent and assignees across
//!   several interactions.
//! - Build the immutable [`Meeting`] / [`Vote`] once `is_filled()` holds.
//!
//! # Invariants
//! - `parent` is only validated by the concrete constructor at build time.

use crate::config::TaskConfig;
use crate::model::error::{DomainError, DomainResult};
use crate::model::event::{EventFields, EventReminderType};
use crate::model::group::GroupDirectory;
use crate::model::ids::{EntityRef, UserId};
use crate::model::meeting::Meeting;
use crate::model::task::{Task, TaskContainer};
use crate::model::vote::{Vote, VoteOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRequest {
    pub name: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub created_by: UserId,
    pub description: Option<String>,
    pub parent: Option<EntityRef>,
    pub include_sub_groups: bool,
    pub rsvp_required: bool,
    pub relayable: bool,
    pub reminder_type: EventReminderType,
    pub custom_reminder_minutes: i64,
    assigned_members: BTreeSet<UserId>,
}

impl EventRequest {
    pub fn new(created_by: UserId) -> Self {
        Self {
            name: None,
            start_at: None,
            created_by,
            description: None,
            parent: None,
            include_sub_groups: false,
            rsvp_required: false,
            relayable: false,
            reminder_type: EventReminderType::Disabled,
            custom_reminder_minutes: 0,
            assigned_members: BTreeSet::new(),
        }
    }

    pub fn set_parent(&mut self, parent: EntityRef) {
        self.parent = Some(parent);
    }

    /// Stages assignees. They are resolved against group membership at build.
    pub fn add_assigned_members(&mut self, uids: &[UserId]) {
        self.assigned_members.extend(uids.iter().copied());
    }

    pub fn remove_assigned_members(&mut self, uids: &[UserId]) {
        for uid in uids {
            self.assigned_members.remove(uid);
        }
    }

    pub fn assigned_members(&self) -> &BTreeSet<UserId> {
        &self.assigned_members
    }

    /// Whether every field required for construction is present.
    pub fn is_filled(&self) -> bool {
        self.first_missing().is_none()
    }

    fn first_missing(&self) -> Option<&'static str> {
        if self.name.as_deref().map_or(true, |name| name.trim().is_empty()) {
            return Some("name");
        }
        if self.start_at.is_none() {
            return Some("start_at");
        }
        if self.parent.is_none() {
            return Some("parent");
        }
        None
    }

    pub fn to_fields(&self) -> DomainResult<EventFields> {
        if let Some(missing) = self.first_missing() {
            return Err(DomainError::IncompleteRequest { missing });
        }
        let (Some(name), Some(start_at)) = (self.name.clone(), self.start_at) else {
            return Err(DomainError::IncompleteRequest { missing: "name" });
        };
        Ok(EventFields {
            name,
            start_at,
            created_by: self.created_by,
            description: self.description.clone(),
            include_sub_groups: self.include_sub_groups,
            rsvp_required: self.rsvp_required,
            relayable: self.relayable,
            reminder_type: self.reminder_type,
            custom_reminder_minutes: self.custom_reminder_minutes,
        })
    }

    /// Fails unless `container` is the staged parent.
    fn check_container(&self, container: &dyn TaskContainer) -> DomainResult<()> {
        let expected = self
            .parent
            .ok_or(DomainError::IncompleteRequest { missing: "parent" })?;
        if container.entity_ref() != expected {
            return Err(DomainError::validation(
                "parent",
                format!(
                    "container {} does not match requested parent {expected}",
                    container.entity_ref()
                ),
            ));
        }
        Ok(())
    }

    fn apply_assignees<T: Task>(&self, task: &mut T, groups: &dyn GroupDirectory) -> DomainResult<()> {
        if self.assigned_members.is_empty() {
            return Ok(());
        }
        let group = groups.require_group(task.ancestor_group())?;
        let uids: Vec<UserId> = self.assigned_members.iter().copied().collect();
        task.assign_members(&uids, &group)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingRequest {
    pub request: EventRequest,
    pub location: Option<String>,
}

impl MeetingRequest {
    pub fn new(created_by: UserId) -> Self {
        Self {
            request: EventRequest::new(created_by),
            location: None,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.request.is_filled() && self.has_location()
    }

    fn has_location(&self) -> bool {
        self.location
            .as_deref()
            .is_some_and(|location| !location.trim().is_empty())
    }

    /// Constructs the meeting under `container`, which must be the staged
    /// parent, then applies staged assignees.
    pub fn build(
        &self,
        container: &dyn TaskContainer,
        groups: &mut dyn GroupDirectory,
        config: &TaskConfig,
        now: DateTime<Utc>,
    ) -> DomainResult<Meeting> {
        let fields = self.request.to_fields()?;
        let location = match self.location.as_deref() {
            Some(location) if self.has_location() => location,
            _ => return Err(DomainError::IncompleteRequest { missing: "location" }),
        };
        self.request.check_container(container)?;
        let mut meeting = Meeting::new(fields, location, container, groups, config, now)?;
        self.request.apply_assignees(&mut meeting, groups)?;
        Ok(meeting)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub request: EventRequest,
    pub options: VoteOptions,
}

impl VoteRequest {
    /// Votes collect responses, so `rsvp_required` starts on.
    pub fn new(created_by: UserId) -> Self {
        let mut request = EventRequest::new(created_by);
        request.rsvp_required = true;
        Self {
            request,
            options: VoteOptions::default(),
        }
    }

    pub fn is_filled(&self) -> bool {
        self.request.is_filled()
    }

    pub fn build(
        &self,
        container: &dyn TaskContainer,
        groups: &mut dyn GroupDirectory,
        now: DateTime<Utc>,
    ) -> DomainResult<Vote> {
        let fields = self.request.to_fields()?;
        self.request.check_container(container)?;
        let mut vote = Vote::new(fields, self.options.clone(), container, groups, now)?;
        self.request.apply_assignees(&mut vote, groups)?;
        Ok(vote)
    }
}
