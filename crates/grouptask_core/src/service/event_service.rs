//! Meeting and vote use-case service.
//!
//! # Responsibility
//! - Turn staged event requests into persisted meetings and votes.
//! - Keep `scheduled_reminder_at` current whenever reminder inputs change.
//! - Expose the reminder scheduler hooks (`events_due_for_reminder`,
//!   `record_event_reminder_sent`).
//!
//! # Invariants
//! - Every persisted event has had its reminder time computed against its
//!   ancestor group.
//! - Member assignment only ever adds current members of the ancestor group.

use crate::config::TaskConfig;
use crate::model::error::DomainError;
use crate::model::event::{Event, EventRecord, EventReminderType};
use crate::model::event_request::{MeetingRequest, VoteRequest};
use crate::model::group::GroupDirectory;
use crate::model::ids::{EntityRef, EventId, GroupId, TaskKind, UserId};
use crate::model::task::{ContainerRef, Task};
use crate::model::vote::VoteOptions;
use crate::repo::event_repo::EventRepository;
use crate::repo::todo_repo::TodoRepository;
use crate::service::{
    ensure_not_within, require_event, resolve_container, Clock, ServiceError, ServiceResult,
};
use chrono::{DateTime, Utc};
use log::info;
use std::collections::BTreeSet;

/// Event service facade over repository and group directory implementations.
pub struct EventService<E, T, G>
where
    E: EventRepository,
    T: TodoRepository,
    G: GroupDirectory,
{
    events: E,
    todos: T,
    groups: G,
    config: TaskConfig,
    clock: Clock,
}

impl<E, T, G> EventService<E, T, G>
where
    E: EventRepository,
    T: TodoRepository,
    G: GroupDirectory,
{
    /// Creates a service; rejects an invalid `config`.
    pub fn new(events: E, todos: T, groups: G, config: TaskConfig) -> ServiceResult<Self> {
        config.validate()?;
        Ok(Self {
            events,
            todos,
            groups,
            config,
            clock: Utc::now,
        })
    }

    /// Replaces the wall clock.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn groups(&self) -> &G {
        &self.groups
    }

    pub fn groups_mut(&mut self) -> &mut G {
        &mut self.groups
    }

    /// Builds, schedules and persists a meeting from a staged request.
    pub fn create_meeting(&mut self, request: &MeetingRequest) -> ServiceResult<EventRecord> {
        request.request.to_fields()?;
        let container = self.resolve_parent(request.request.parent, TaskKind::Meeting)?;
        let now = (self.clock)();
        let meeting = request.build(&container, &mut self.groups, &self.config, now)?;
        self.persist_new(meeting.into(), now)
    }

    /// Builds, schedules and persists a vote from a staged request.
    pub fn create_vote(&mut self, request: &VoteRequest) -> ServiceResult<EventRecord> {
        request.request.to_fields()?;
        let container = self.resolve_parent(request.request.parent, TaskKind::Vote)?;
        let now = (self.clock)();
        let vote = request.build(&container, &mut self.groups, now)?;
        self.persist_new(vote.into(), now)
    }

    pub fn get_event(&self, uid: EventId) -> ServiceResult<EventRecord> {
        require_event(&self.events, uid)
    }

    /// Events of one group ordered by start time.
    pub fn list_group_events(
        &self,
        group: GroupId,
        include_canceled: bool,
    ) -> ServiceResult<Vec<EventRecord>> {
        Ok(self.events.list_events_for_group(group, include_canceled)?)
    }

    /// Marks the event canceled. Canceling twice is a no-op write.
    pub fn cancel_event(&mut self, uid: EventId) -> ServiceResult<EventRecord> {
        let mut event = require_event(&self.events, uid)?;
        event.cancel();
        event.core_mut().set_scheduled_reminder_active(false);
        self.events.update_event(&mut event)?;
        info!(
            "event=event_cancel module=service status=ok uid={} group={}",
            uid,
            event.ancestor_group()
        );
        Ok(event)
    }

    /// Moves the event and recomputes its reminder.
    pub fn reschedule_event(
        &mut self,
        uid: EventId,
        start_at: DateTime<Utc>,
    ) -> ServiceResult<EventRecord> {
        let mut event = require_event(&self.events, uid)?;
        event.core_mut().start_at = start_at;
        self.reschedule_reminder(&mut event)?;
        self.events.update_event(&mut event)?;
        info!(
            "event=event_reschedule module=service status=ok uid={} version={}",
            uid,
            event.core().version()
        );
        Ok(event)
    }

    /// Switches the reminder mode and recomputes the reminder time.
    ///
    /// `custom_minutes` is only read for [`EventReminderType::Custom`].
    pub fn change_event_reminder(
        &mut self,
        uid: EventId,
        reminder_type: EventReminderType,
        custom_minutes: i64,
    ) -> ServiceResult<EventRecord> {
        let mut event = require_event(&self.events, uid)?;
        event.core_mut().set_reminder(reminder_type, custom_minutes)?;
        self.reschedule_reminder(&mut event)?;
        self.events.update_event(&mut event)?;
        Ok(event)
    }

    /// Re-points the event at another container of its ancestor group.
    ///
    /// Group child entries move only after the event row is stored.
    pub fn move_event(&mut self, uid: EventId, parent: EntityRef) -> ServiceResult<EventRecord> {
        let mut event = require_event(&self.events, uid)?;
        let container = resolve_container(
            parent,
            event.task_kind(),
            &self.events,
            &self.todos,
            &self.groups,
        )?;
        ensure_not_within(event.task_ref(), parent, &self.events, &self.todos)?;
        let change = event.reparent(&container)?;
        change.check(&self.groups)?;
        self.events.update_event(&mut event)?;
        change.apply(&mut self.groups)?;
        info!(
            "event=event_move module=service status=ok uid={} parent={}",
            uid,
            parent.kind()
        );
        Ok(event)
    }

    /// Replaces the option list of a vote.
    pub fn update_vote_options(
        &mut self,
        uid: EventId,
        options: VoteOptions,
    ) -> ServiceResult<EventRecord> {
        let mut event = require_event(&self.events, uid)?;
        let vote = event
            .as_vote_mut()
            .ok_or(ServiceError::NotFound(EntityRef::Vote(uid)))?;
        vote.set_vote_options(options.values);
        vote.set_randomize(options.randomize);
        self.events.update_event(&mut event)?;
        Ok(event)
    }

    /// Assigns current members; returns the ones newly added.
    pub fn assign_event_members(
        &mut self,
        uid: EventId,
        members: &[UserId],
    ) -> ServiceResult<BTreeSet<UserId>> {
        let mut event = require_event(&self.events, uid)?;
        let group = self.groups.require_group(event.ancestor_group())?;
        let added = event.assign_members(members, &group)?;
        if !added.is_empty() {
            self.events.update_event(&mut event)?;
        }
        info!(
            "event=event_assign module=service status=ok uid={} added={}",
            uid,
            added.len()
        );
        Ok(added)
    }

    /// Unassigns members; returns the ones actually removed.
    pub fn remove_event_members(
        &mut self,
        uid: EventId,
        members: &[UserId],
    ) -> ServiceResult<BTreeSet<UserId>> {
        let mut event = require_event(&self.events, uid)?;
        let removed = event.remove_assigned_members(members);
        if !removed.is_empty() {
            self.events.update_event(&mut event)?;
        }
        Ok(removed)
    }

    /// Everyone the event addresses.
    pub fn event_members(&self, uid: EventId) -> ServiceResult<BTreeSet<UserId>> {
        let event = require_event(&self.events, uid)?;
        Ok(event.all_members(&self.groups)?)
    }

    /// Active, not canceled events whose reminder time has passed.
    pub fn events_due_for_reminder(&self) -> ServiceResult<Vec<EventRecord>> {
        let now = (self.clock)();
        Ok(self.events.list_events_due_for_reminder(now)?)
    }

    /// Scheduler hook called after a reminder round went out.
    pub fn record_event_reminder_sent(&mut self, uid: EventId) -> ServiceResult<EventRecord> {
        let mut event = require_event(&self.events, uid)?;
        event.record_reminder_sent();
        self.events.update_event(&mut event)?;
        info!(
            "event=event_reminder_sent module=service status=ok uid={} sent={}",
            uid,
            event.core().reminders_sent()
        );
        Ok(event)
    }

    fn resolve_parent(
        &self,
        parent: Option<EntityRef>,
        child: TaskKind,
    ) -> ServiceResult<ContainerRef> {
        let parent = parent.ok_or(DomainError::IncompleteRequest { missing: "parent" })?;
        resolve_container(parent, child, &self.events, &self.todos, &self.groups)
    }

    fn reschedule_reminder(&self, event: &mut EventRecord) -> ServiceResult<()> {
        let group = self.groups.require_group(event.ancestor_group())?;
        event.update_scheduled_reminder_time(
            &group,
            &self.config.daytime,
            self.config.stale_reminder_grace(),
            (self.clock)(),
        )?;
        Ok(())
    }

    fn persist_new(&self, mut event: EventRecord, now: DateTime<Utc>) -> ServiceResult<EventRecord> {
        let group = self.groups.require_group(event.ancestor_group())?;
        event.update_scheduled_reminder_time(
            &group,
            &self.config.daytime,
            self.config.stale_reminder_grace(),
            now,
        )?;
        let uid = self.events.create_event(&event)?;
        info!(
            "event=event_create module=service status=ok uid={} kind={} group={} reminder_active={}",
            uid,
            event.task_kind(),
            group.uid,
            event.core().is_scheduled_reminder_active()
        );
        Ok(event)
    }
}
