//! To-do use-case service.
//!
//! # Responsibility
//! - Create to-dos under groups, meetings and votes.
//! - Record completion confirmations and report the quorum crossing.
//! - Drive reminders and recurrence for stored to-dos.
//!
//! # Invariants
//! - A to-do created under an event without an explicit lead time inherits
//!   the event's reminder minutes.
//! - `confirm_completion` returns `true` at most once per crossing of the
//!   configured completion threshold.

use crate::config::TaskConfig;
use crate::model::event::Event;
use crate::model::group::{Group, GroupDirectory};
use crate::model::ids::{EntityRef, GroupId, TaskKind, TodoId, UserId};
use crate::model::task::Task;
use crate::model::todo::{Todo, TodoCompletionStatus, TodoFields};
use crate::model::todo_confirmation::{TodoAssignment, TodoConfirmType};
use crate::repo::event_repo::EventRepository;
use crate::repo::todo_repo::TodoRepository;
use crate::service::{
    ensure_not_within, require_event, resolve_container, Clock, ServiceError, ServiceResult,
};
use chrono::{DateTime, Utc};
use log::info;
use std::collections::BTreeSet;

/// To-do service facade over repository and group directory implementations.
pub struct TodoService<E, T, G>
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

impl<E, T, G> TodoService<E, T, G>
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

    /// Creates and persists a to-do under `parent`.
    pub fn create_todo(&mut self, mut fields: TodoFields, parent: EntityRef) -> ServiceResult<Todo> {
        let container =
            resolve_container(parent, TaskKind::Todo, &self.events, &self.todos, &self.groups)?;
        let group = self.groups.require_group(container.ancestor_group)?;

        if fields.reminder_minutes.is_none() {
            if let EntityRef::Meeting(uid) | EntityRef::Vote(uid) = parent {
                let event = require_event(&self.events, uid)?;
                fields.reminder_minutes = Some(event.todo_reminder_minutes(&group)?);
            }
        }

        let now = (self.clock)();
        let mut todo = Todo::new(fields, &container, &mut self.groups, &self.config, now)?;
        todo.calculate_scheduled_reminder_time(&group, &self.config.daytime, now)?;
        let uid = self.todos.create_todo(&todo)?;
        info!(
            "event=todo_create module=service status=ok uid={} parent={} group={}",
            uid,
            parent.kind(),
            group.uid
        );
        Ok(todo)
    }

    pub fn get_todo(&self, uid: TodoId) -> ServiceResult<Todo> {
        self.require_todo(uid)
    }

    /// To-dos of one group ordered by deadline.
    pub fn list_group_todos(&self, group: GroupId, include_cancelled: bool) -> ServiceResult<Vec<Todo>> {
        Ok(self.todos.list_todos_for_group(group, include_cancelled)?)
    }

    /// Records one member's completion response.
    ///
    /// Returns `true` when this response moved the to-do across the
    /// configured completion threshold.
    pub fn confirm_completion(
        &mut self,
        uid: TodoId,
        member: UserId,
        confirm_type: TodoConfirmType,
        completion_time: Option<DateTime<Utc>>,
    ) -> ServiceResult<bool> {
        let mut todo = self.require_todo(uid)?;
        let group = self.ancestor_of(&todo)?;
        let crossed = todo.add_completion_confirmation(
            member,
            confirm_type,
            completion_time,
            &group,
            self.config.completion_threshold_percent,
            (self.clock)(),
        )?;
        self.todos.update_todo(&mut todo)?;
        if crossed {
            info!(
                "event=todo_complete module=service status=ok uid={} percentage={:.1}",
                uid,
                todo.completion_percentage()
            );
        }
        Ok(crossed)
    }

    /// Live quorum snapshot against the current group membership.
    pub fn completion_status(&self, uid: TodoId) -> ServiceResult<TodoCompletionStatus> {
        let todo = self.require_todo(uid)?;
        let group = self.ancestor_of(&todo)?;
        Ok(todo.calculate_completion_status(&group)?)
    }

    /// Assigns current members; returns the ones newly added.
    pub fn assign_todo_members(
        &mut self,
        uid: TodoId,
        members: &[UserId],
    ) -> ServiceResult<BTreeSet<UserId>> {
        let mut todo = self.require_todo(uid)?;
        let group = self.ancestor_of(&todo)?;
        let added = todo.assign_members(members, &group)?;
        if !added.is_empty() {
            self.todos.update_todo(&mut todo)?;
        }
        Ok(added)
    }

    /// Unassigns members; returns the ones actually removed.
    pub fn remove_todo_members(
        &mut self,
        uid: TodoId,
        members: &[UserId],
    ) -> ServiceResult<BTreeSet<UserId>> {
        let mut todo = self.require_todo(uid)?;
        let removed = todo.remove_assigned_members(members);
        if !removed.is_empty() {
            self.todos.update_todo(&mut todo)?;
        }
        Ok(removed)
    }

    /// Adds or replaces per-user assignment records.
    pub fn add_todo_assignments(
        &mut self,
        uid: TodoId,
        assignments: Vec<TodoAssignment>,
    ) -> ServiceResult<Todo> {
        let mut todo = self.require_todo(uid)?;
        todo.add_assignments(assignments);
        self.todos.update_todo(&mut todo)?;
        Ok(todo)
    }

    /// Stores a validator's response on their assignment record.
    pub fn respond_to_assignment(
        &mut self,
        uid: TodoId,
        member: UserId,
        confirm_type: TodoConfirmType,
        response_text: Option<&str>,
    ) -> ServiceResult<Todo> {
        let mut todo = self.require_todo(uid)?;
        todo.record_assignment_response(member, confirm_type, response_text, (self.clock)())?;
        self.todos.update_todo(&mut todo)?;
        Ok(todo)
    }

    /// Re-points the to-do at another container of its ancestor group.
    pub fn move_todo(&mut self, uid: TodoId, parent: EntityRef) -> ServiceResult<Todo> {
        let mut todo = self.require_todo(uid)?;
        let container =
            resolve_container(parent, TaskKind::Todo, &self.events, &self.todos, &self.groups)?;
        ensure_not_within(todo.task_ref(), parent, &self.events, &self.todos)?;
        let change = todo.reparent(&container)?;
        change.check(&self.groups)?;
        self.todos.update_todo(&mut todo)?;
        change.apply(&mut self.groups)?;
        info!(
            "event=todo_move module=service status=ok uid={} parent={}",
            uid,
            parent.kind()
        );
        Ok(todo)
    }

    /// Cancels the to-do and silences its reminder.
    pub fn cancel_todo(&mut self, uid: TodoId) -> ServiceResult<Todo> {
        let mut todo = self.require_todo(uid)?;
        todo.cancel();
        self.todos.update_todo(&mut todo)?;
        info!("event=todo_cancel module=service status=ok uid={}", uid);
        Ok(todo)
    }

    /// Active, not cancelled to-dos whose reminder time has passed.
    pub fn todos_due_for_reminder(&self) -> ServiceResult<Vec<Todo>> {
        Ok(self.todos.list_todos_due_for_reminder((self.clock)())?)
    }

    /// Scheduler hook: one reminder went out. Schedules the next one while
    /// reminders remain.
    pub fn record_todo_reminder_sent(&mut self, uid: TodoId) -> ServiceResult<Todo> {
        let mut todo = self.require_todo(uid)?;
        let group = self.ancestor_of(&todo)?;
        todo.record_reminder_sent();
        todo.calculate_scheduled_reminder_time(&group, &self.config.daytime, (self.clock)())?;
        self.todos.update_todo(&mut todo)?;
        info!(
            "event=todo_reminder_sent module=service status=ok uid={} left={}",
            uid,
            todo.reminders_left()
        );
        Ok(todo)
    }

    /// Creates and persists the next instance of a recurring to-do.
    ///
    /// Returns `None` when the to-do does not recur.
    pub fn spawn_next_recurrence(&mut self, uid: TodoId) -> ServiceResult<Option<Todo>> {
        let source = self.require_todo(uid)?;
        let group = self.ancestor_of(&source)?;
        let now = (self.clock)();
        let Some(mut next) = source.next_recurrence(&mut self.groups, &self.config, now)? else {
            return Ok(None);
        };
        next.calculate_scheduled_reminder_time(&group, &self.config.daytime, now)?;
        self.todos.create_todo(&next)?;
        info!(
            "event=todo_recur module=service status=ok source={} uid={}",
            uid,
            next.uid()
        );
        Ok(Some(next))
    }

    fn require_todo(&self, uid: TodoId) -> ServiceResult<Todo> {
        self.todos
            .get_todo(uid)?
            .ok_or(ServiceError::NotFound(EntityRef::Todo(uid)))
    }

    fn ancestor_of(&self, todo: &Todo) -> ServiceResult<Group> {
        Ok(self.groups.require_group(todo.ancestor_group())?)
    }
}
