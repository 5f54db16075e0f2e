//! To-do repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist to-dos with their assignees, completion confirmations and
//!   assignment records.
//! - Answer group and reminder-due queries for the scheduler.
//!
//! # Invariants
//! - Child tables are rewritten in the same transaction as the `todos` row.
//! - Due reminders require `reminder_active=1`, `cancelled=0` and at least
//!   one reminder left.

use super::{
    bool_to_int, ensure_connection_ready, from_epoch_ms, from_optional_epoch_ms, int_to_bool,
    parse_optional_uuid, parse_uuid, parse_version, to_epoch_ms, version_conflict, RepoError,
    RepoResult,
};
use crate::model::error::DomainError;
use crate::model::ids::{EntityRef, GroupId, TaskRef, TodoId};
use crate::model::task::Task;
use crate::model::todo::{Todo, TodoParent, TodoType};
use crate::model::todo_confirmation::{TodoAssignment, TodoCompletionConfirmation, TodoConfirmType};
use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::collections::{BTreeMap, BTreeSet};

const TODO_SELECT_SQL: &str = "SELECT
    uid,
    todo_type,
    message,
    description,
    action_by,
    created_at,
    created_by,
    ancestor_group,
    parent_group,
    parent_meeting,
    parent_vote,
    reminder_minutes,
    reminder_active,
    reminders_left,
    scheduled_reminder_at,
    cancelled,
    completed_date,
    completion_percentage,
    source_todo,
    recur_interval_minutes,
    version
FROM todos";

const REQUIRED_TABLES: &[&str] = &[
    "todos",
    "todo_assigned_members",
    "todo_completion_confirmations",
    "todo_assignments",
];

/// Repository interface for to-do persistence.
pub trait TodoRepository {
    fn create_todo(&self, todo: &Todo) -> RepoResult<TodoId>;
    /// Writes `todo` if the stored version still matches, then bumps the
    /// in-memory version.
    fn update_todo(&self, todo: &mut Todo) -> RepoResult<()>;
    fn get_todo(&self, uid: TodoId) -> RepoResult<Option<Todo>>;
    /// To-dos whose ancestor group is `group`.
    fn list_todos_for_group(&self, group: GroupId, include_cancelled: bool)
        -> RepoResult<Vec<Todo>>;
    fn list_todos_due_for_reminder(&self, now: DateTime<Utc>) -> RepoResult<Vec<Todo>>;
}

/// SQLite-backed to-do repository.
pub struct SqliteTodoRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTodoRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED_TABLES)?;
        Ok(Self { conn })
    }

    fn query_todos(&self, filter: &str, values: &[&dyn ToSql]) -> RepoResult<Vec<Todo>> {
        let mut stmt = self.conn.prepare(&format!("{TODO_SELECT_SQL} {filter};"))?;
        let mut rows = stmt.query(values)?;
        let mut todos = Vec::new();
        while let Some(row) = rows.next()? {
            todos.push(parse_todo_row(row)?);
        }
        for todo in &mut todos {
            load_children(self.conn, todo)?;
        }
        Ok(todos)
    }
}

impl TodoRepository for SqliteTodoRepository<'_> {
    fn create_todo(&self, todo: &Todo) -> RepoResult<TodoId> {
        let parents = ParentColumns::from_parent(todo.parent());
        let uid = todo.uid.to_string();

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO todos (
                uid,
                todo_type,
                message,
                description,
                action_by,
                created_at,
                created_by,
                ancestor_group,
                parent_group,
                parent_meeting,
                parent_vote,
                reminder_minutes,
                reminder_active,
                reminders_left,
                scheduled_reminder_at,
                cancelled,
                completed_date,
                completion_percentage,
                source_todo,
                recur_interval_minutes,
                version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                      ?18, ?19, ?20, ?21);",
            params![
                uid.as_str(),
                todo.todo_type.as_str(),
                todo.message.as_str(),
                todo.description.as_str(),
                to_epoch_ms(todo.action_by),
                to_epoch_ms(todo.created_at),
                todo.created_by.to_string(),
                todo.ancestor_group.to_string(),
                parents.group.as_deref(),
                parents.meeting.as_deref(),
                parents.vote.as_deref(),
                todo.reminder_minutes,
                bool_to_int(todo.reminder_active),
                todo.reminders_left,
                todo.scheduled_reminder_at.map(to_epoch_ms),
                bool_to_int(todo.cancelled),
                todo.completed_date.map(to_epoch_ms),
                todo.completion_percentage,
                todo.source_todo.map(|uid| uid.to_string()),
                todo.recur_interval_minutes,
                todo.version,
            ],
        )?;
        write_children(&tx, todo)?;
        tx.commit()?;

        Ok(todo.uid)
    }

    fn update_todo(&self, todo: &mut Todo) -> RepoResult<()> {
        let parents = ParentColumns::from_parent(todo.parent());
        let uid = todo.uid.to_string();
        let expected_version = todo.version;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE todos
             SET
                todo_type = ?1,
                message = ?2,
                description = ?3,
                action_by = ?4,
                parent_group = ?5,
                parent_meeting = ?6,
                parent_vote = ?7,
                reminder_minutes = ?8,
                reminder_active = ?9,
                reminders_left = ?10,
                scheduled_reminder_at = ?11,
                cancelled = ?12,
                completed_date = ?13,
                completion_percentage = ?14,
                recur_interval_minutes = ?15,
                version = version + 1
             WHERE uid = ?16
               AND version = ?17;",
            params![
                todo.todo_type.as_str(),
                todo.message.as_str(),
                todo.description.as_str(),
                to_epoch_ms(todo.action_by),
                parents.group.as_deref(),
                parents.meeting.as_deref(),
                parents.vote.as_deref(),
                todo.reminder_minutes,
                bool_to_int(todo.reminder_active),
                todo.reminders_left,
                todo.scheduled_reminder_at.map(to_epoch_ms),
                bool_to_int(todo.cancelled),
                todo.completed_date.map(to_epoch_ms),
                todo.completion_percentage,
                todo.recur_interval_minutes,
                uid.as_str(),
                expected_version,
            ],
        )?;

        if changed == 0 {
            return Err(version_conflict(&tx, "todos", todo.task_ref(), expected_version));
        }

        for table in [
            "todo_assigned_members",
            "todo_completion_confirmations",
            "todo_assignments",
        ] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE todo_uid = ?1;"),
                [uid.as_str()],
            )?;
        }
        write_children(&tx, todo)?;
        tx.commit()?;

        todo.set_version(expected_version + 1);
        Ok(())
    }

    fn get_todo(&self, uid: TodoId) -> RepoResult<Option<Todo>> {
        let uid = uid.to_string();
        Ok(self
            .query_todos("WHERE uid = ?1", &[&uid])?
            .into_iter()
            .next())
    }

    fn list_todos_for_group(
        &self,
        group: GroupId,
        include_cancelled: bool,
    ) -> RepoResult<Vec<Todo>> {
        let group = group.to_string();
        self.query_todos(
            "WHERE ancestor_group = ?1
               AND (?2 = 1 OR cancelled = 0)
             ORDER BY action_by ASC, uid ASC",
            &[&group, &bool_to_int(include_cancelled)],
        )
    }

    fn list_todos_due_for_reminder(&self, now: DateTime<Utc>) -> RepoResult<Vec<Todo>> {
        self.query_todos(
            "WHERE reminder_active = 1
               AND cancelled = 0
               AND reminders_left > 0
               AND scheduled_reminder_at IS NOT NULL
               AND scheduled_reminder_at <= ?1
             ORDER BY scheduled_reminder_at ASC, uid ASC",
            &[&to_epoch_ms(now)],
        )
    }
}

struct ParentColumns {
    group: Option<String>,
    meeting: Option<String>,
    vote: Option<String>,
}

impl ParentColumns {
    fn from_parent(parent: TodoParent) -> Self {
        let mut columns = Self {
            group: None,
            meeting: None,
            vote: None,
        };
        match EntityRef::from(parent) {
            EntityRef::Group(uid) => columns.group = Some(uid.to_string()),
            EntityRef::Meeting(uid) => columns.meeting = Some(uid.to_string()),
            EntityRef::Vote(uid) => columns.vote = Some(uid.to_string()),
            EntityRef::Todo(_) | EntityRef::User(_) => {}
        }
        columns
    }
}

fn parse_todo_row(row: &Row<'_>) -> RepoResult<Todo> {
    let uid = parse_uuid(&row.get::<_, String>(0)?, "todos.uid")?;
    let todo_type_raw: String = row.get(1)?;
    let todo_type = TodoType::parse(&todo_type_raw)
        .ok_or_else(|| RepoError::InvalidData(format!("invalid todo_type `{todo_type_raw}`")))?;

    let parent_group = parse_optional_uuid(row.get(8)?, "todos.parent_group")?;
    let parent_meeting = parse_optional_uuid(row.get(9)?, "todos.parent_meeting")?;
    let parent_vote = parse_optional_uuid(row.get(10)?, "todos.parent_vote")?;
    let parent = match (parent_group, parent_meeting, parent_vote) {
        (Some(group), _, _) => TodoParent::Group(group),
        (None, Some(meeting), _) => TodoParent::Meeting(meeting),
        (None, None, Some(vote)) => TodoParent::Vote(vote),
        (None, None, None) => return Err(DomainError::NoParent(TaskRef::Todo(uid)).into()),
    };

    Ok(Todo {
        uid,
        created_by: parse_uuid(&row.get::<_, String>(6)?, "todos.created_by")?,
        created_at: from_epoch_ms(row.get(5)?, "todos.created_at")?,
        todo_type,
        message: row.get(2)?,
        description: row.get(3)?,
        action_by: from_epoch_ms(row.get(4)?, "todos.action_by")?,
        reminder_minutes: row.get(11)?,
        reminder_active: int_to_bool(row.get(12)?, "todos.reminder_active")?,
        reminders_left: row.get(13)?,
        scheduled_reminder_at: from_optional_epoch_ms(row.get(14)?, "todos.scheduled_reminder_at")?,
        cancelled: int_to_bool(row.get(15)?, "todos.cancelled")?,
        completed_date: from_optional_epoch_ms(row.get(16)?, "todos.completed_date")?,
        completion_percentage: row.get(17)?,
        source_todo: parse_optional_uuid(row.get(18)?, "todos.source_todo")?,
        recur_interval_minutes: row.get(19)?,
        parent,
        ancestor_group: parse_uuid(&row.get::<_, String>(7)?, "todos.ancestor_group")?,
        assigned_members: BTreeSet::new(),
        confirmations: BTreeMap::new(),
        assignments: BTreeMap::new(),
        version: parse_version(row.get(20)?)?,
    })
}

fn load_children(conn: &Connection, todo: &mut Todo) -> RepoResult<()> {
    let uid = todo.uid.to_string();

    let mut stmt = conn.prepare("SELECT user_uid FROM todo_assigned_members WHERE todo_uid = ?1;")?;
    let mut rows = stmt.query([uid.as_str()])?;
    while let Some(row) = rows.next()? {
        let member = parse_uuid(&row.get::<_, String>(0)?, "todo_assigned_members.user_uid")?;
        todo.assigned_members.insert(member);
    }

    let mut stmt = conn.prepare(
        "SELECT member_uid, confirm_type, completion_time, creation_time
         FROM todo_completion_confirmations
         WHERE todo_uid = ?1;",
    )?;
    let mut rows = stmt.query([uid.as_str()])?;
    while let Some(row) = rows.next()? {
        let member = parse_uuid(
            &row.get::<_, String>(0)?,
            "todo_completion_confirmations.member_uid",
        )?;
        let confirmation = TodoCompletionConfirmation::new(
            todo.uid,
            member,
            parse_confirm_type(&row.get::<_, String>(1)?)?,
            from_optional_epoch_ms(row.get(2)?, "todo_completion_confirmations.completion_time")?,
            from_epoch_ms(row.get(3)?, "todo_completion_confirmations.creation_time")?,
        );
        todo.confirmations.insert(member, confirmation);
    }

    let mut stmt = conn.prepare(
        "SELECT user_uid, assigned, can_confirm, confirm_type, response_text, confirmation_time
         FROM todo_assignments
         WHERE todo_uid = ?1;",
    )?;
    let mut rows = stmt.query([uid.as_str()])?;
    while let Some(row) = rows.next()? {
        let user = parse_uuid(&row.get::<_, String>(0)?, "todo_assignments.user_uid")?;
        let confirm_type: Option<String> = row.get(3)?;
        let assignment = TodoAssignment {
            todo: todo.uid,
            user,
            assigned: int_to_bool(row.get(1)?, "todo_assignments.assigned")?,
            can_confirm: int_to_bool(row.get(2)?, "todo_assignments.can_confirm")?,
            confirm_type: confirm_type.as_deref().map(parse_confirm_type).transpose()?,
            response_text: row.get(4)?,
            confirmation_time: from_optional_epoch_ms(
                row.get(5)?,
                "todo_assignments.confirmation_time",
            )?,
        };
        todo.assignments.insert(user, assignment);
    }

    Ok(())
}

fn write_children(tx: &Transaction<'_>, todo: &Todo) -> RepoResult<()> {
    let uid = todo.uid.to_string();
    for member in &todo.assigned_members {
        tx.execute(
            "INSERT INTO todo_assigned_members (todo_uid, user_uid) VALUES (?1, ?2);",
            params![uid.as_str(), member.to_string()],
        )?;
    }
    for confirmation in todo.confirmations.values() {
        tx.execute(
            "INSERT INTO todo_completion_confirmations (
                todo_uid,
                member_uid,
                confirm_type,
                completion_time,
                creation_time
            ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                uid.as_str(),
                confirmation.member.to_string(),
                confirmation.confirm_type.as_str(),
                confirmation.completion_time.map(to_epoch_ms),
                to_epoch_ms(confirmation.creation_time),
            ],
        )?;
    }
    for assignment in todo.assignments.values() {
        tx.execute(
            "INSERT INTO todo_assignments (
                todo_uid,
                user_uid,
                assigned,
                can_confirm,
                confirm_type,
                response_text,
                confirmation_time
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                uid.as_str(),
                assignment.user.to_string(),
                bool_to_int(assignment.assigned),
                bool_to_int(assignment.can_confirm),
                assignment.confirm_type.map(TodoConfirmType::as_str),
                assignment.response_text.as_deref(),
                assignment.confirmation_time.map(to_epoch_ms),
            ],
        )?;
    }
    Ok(())
}

fn parse_confirm_type(value: &str) -> RepoResult<TodoConfirmType> {
    TodoConfirmType::parse(value)
        .ok_or_else(|| RepoError::InvalidData(format!("invalid confirm_type `{value}`")))
}

