//! Event repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist meetings and votes in the `events` table with their assignees.
//! - Answer group and reminder-due queries for the scheduler.
//!
//! # Invariants
//! - Lists are ordered deterministically (`start_at ASC, uid ASC` for group
//!   lists, `scheduled_reminder_at ASC, uid ASC` for due reminders).
//! - Assigned members are rewritten in the same transaction as the row.

use super::{
    bool_to_int, ensure_connection_ready, from_epoch_ms, from_optional_epoch_ms, int_to_bool,
    parse_optional_uuid, parse_uuid, parse_version, to_epoch_ms, version_conflict, RepoError,
    RepoResult,
};
use crate::model::error::DomainError;
use crate::model::event::{Event, EventCore, EventRecord, EventReminderType};
use crate::model::ids::{EntityRef, EventId, GroupId, TaskRef, UserId};
use crate::model::meeting::{Meeting, MeetingParent};
use crate::model::task::Task;
use crate::model::vote::{Vote, VoteContent, VoteParent};
use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::collections::BTreeSet;

const EVENT_SELECT_SQL: &str = "SELECT
    uid,
    event_type,
    name,
    description,
    start_at,
    created_at,
    created_by,
    ancestor_group,
    parent_group,
    parent_todo,
    parent_meeting,
    include_sub_groups,
    rsvp_required,
    relayable,
    reminder_type,
    custom_reminder_minutes,
    canceled,
    scheduled_reminder_at,
    scheduled_reminder_active,
    reminders_sent,
    location,
    tags,
    version
FROM events";

const REQUIRED_TABLES: &[&str] = &["events", "event_assigned_members"];

/// Repository interface for event persistence.
pub trait EventRepository {
    fn create_event(&self, event: &EventRecord) -> RepoResult<EventId>;
    /// Writes `event` if the stored version still matches, then bumps the
    /// in-memory version.
    fn update_event(&self, event: &mut EventRecord) -> RepoResult<()>;
    fn get_event(&self, uid: EventId) -> RepoResult<Option<EventRecord>>;
    /// Events whose ancestor group is `group`.
    fn list_events_for_group(
        &self,
        group: GroupId,
        include_canceled: bool,
    ) -> RepoResult<Vec<EventRecord>>;
    /// Active, uncanceled events whose reminder time is at or before `now`.
    fn list_events_due_for_reminder(&self, now: DateTime<Utc>) -> RepoResult<Vec<EventRecord>>;
}

/// SQLite-backed event repository.
#[derive(Debug)]
pub struct SqliteEventRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEventRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED_TABLES)?;
        Ok(Self { conn })
    }

    fn query_events(&self, filter: &str, values: &[&dyn ToSql]) -> RepoResult<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(&format!("{EVENT_SELECT_SQL} {filter};"))?;
        let mut rows = stmt.query(values)?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(parse_event_row(row)?);
        }
        for event in &mut events {
            let members = load_assigned_members(self.conn, event.uid())?;
            *event.assigned_member_set_mut() = members;
        }
        Ok(events)
    }
}

impl EventRepository for SqliteEventRepository<'_> {
    fn create_event(&self, event: &EventRecord) -> RepoResult<EventId> {
        let columns = EventColumns::from_record(event)?;
        let core = event.core();
        let uid = core.uid().to_string();

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO events (
                uid,
                event_type,
                name,
                description,
                start_at,
                created_at,
                created_by,
                ancestor_group,
                parent_group,
                parent_todo,
                parent_meeting,
                include_sub_groups,
                rsvp_required,
                relayable,
                reminder_type,
                custom_reminder_minutes,
                canceled,
                scheduled_reminder_at,
                scheduled_reminder_active,
                reminders_sent,
                location,
                tags,
                version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                      ?18, ?19, ?20, ?21, ?22, ?23);",
            params![
                uid.as_str(),
                columns.event_type,
                core.name.as_str(),
                core.description.as_str(),
                to_epoch_ms(core.start_at),
                to_epoch_ms(core.created_at()),
                core.created_by().to_string(),
                core.ancestor_group().to_string(),
                columns.parent_group.as_deref(),
                columns.parent_todo.as_deref(),
                columns.parent_meeting.as_deref(),
                bool_to_int(core.include_sub_groups),
                bool_to_int(core.rsvp_required),
                bool_to_int(core.relayable),
                core.reminder_type.as_str(),
                core.custom_reminder_minutes,
                bool_to_int(core.is_canceled()),
                core.scheduled_reminder_at().map(to_epoch_ms),
                bool_to_int(core.is_scheduled_reminder_active()),
                core.reminders_sent(),
                columns.location.as_deref(),
                columns.tags.as_str(),
                core.version(),
            ],
        )?;
        write_assigned_members(&tx, uid.as_str(), event.assigned_member_set())?;
        tx.commit()?;

        Ok(core.uid())
    }

    fn update_event(&self, event: &mut EventRecord) -> RepoResult<()> {
        let columns = EventColumns::from_record(event)?;
        let task = event.task_ref();
        let core = event.core();
        let uid = core.uid().to_string();
        let expected_version = core.version();

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE events
             SET
                name = ?1,
                description = ?2,
                start_at = ?3,
                parent_group = ?4,
                parent_todo = ?5,
                parent_meeting = ?6,
                include_sub_groups = ?7,
                rsvp_required = ?8,
                relayable = ?9,
                reminder_type = ?10,
                custom_reminder_minutes = ?11,
                canceled = ?12,
                scheduled_reminder_at = ?13,
                scheduled_reminder_active = ?14,
                reminders_sent = ?15,
                location = ?16,
                tags = ?17,
                version = version + 1
             WHERE uid = ?18
               AND version = ?19;",
            params![
                core.name.as_str(),
                core.description.as_str(),
                to_epoch_ms(core.start_at),
                columns.parent_group.as_deref(),
                columns.parent_todo.as_deref(),
                columns.parent_meeting.as_deref(),
                bool_to_int(core.include_sub_groups),
                bool_to_int(core.rsvp_required),
                bool_to_int(core.relayable),
                core.reminder_type.as_str(),
                core.custom_reminder_minutes,
                bool_to_int(core.is_canceled()),
                core.scheduled_reminder_at().map(to_epoch_ms),
                bool_to_int(core.is_scheduled_reminder_active()),
                core.reminders_sent(),
                columns.location.as_deref(),
                columns.tags.as_str(),
                uid.as_str(),
                expected_version,
            ],
        )?;

        if changed == 0 {
            return Err(version_conflict(&tx, "events", task, expected_version));
        }

        tx.execute(
            "DELETE FROM event_assigned_members WHERE event_uid = ?1;",
            [uid.as_str()],
        )?;
        write_assigned_members(&tx, uid.as_str(), event.assigned_member_set())?;
        tx.commit()?;

        event.core_mut().set_version(expected_version + 1);
        Ok(())
    }

    fn get_event(&self, uid: EventId) -> RepoResult<Option<EventRecord>> {
        let uid = uid.to_string();
        Ok(self
            .query_events("WHERE uid = ?1", &[&uid])?
            .into_iter()
            .next())
    }

    fn list_events_for_group(
        &self,
        group: GroupId,
        include_canceled: bool,
    ) -> RepoResult<Vec<EventRecord>> {
        let group = group.to_string();
        self.query_events(
            "WHERE ancestor_group = ?1
               AND (?2 = 1 OR canceled = 0)
             ORDER BY start_at ASC, uid ASC",
            &[&group, &bool_to_int(include_canceled)],
        )
    }

    fn list_events_due_for_reminder(&self, now: DateTime<Utc>) -> RepoResult<Vec<EventRecord>> {
        self.query_events(
            "WHERE scheduled_reminder_active = 1
               AND canceled = 0
               AND scheduled_reminder_at IS NOT NULL
               AND scheduled_reminder_at <= ?1
             ORDER BY scheduled_reminder_at ASC, uid ASC",
            &[&to_epoch_ms(now)],
        )
    }
}

/// Variant-specific column values of one event row.
struct EventColumns {
    event_type: &'static str,
    parent_group: Option<String>,
    parent_todo: Option<String>,
    parent_meeting: Option<String>,
    location: Option<String>,
    tags: String,
}

impl EventColumns {
    fn from_record(event: &EventRecord) -> RepoResult<Self> {
        let (event_type, location) = match event {
            EventRecord::Meeting(meeting) => ("meeting", Some(meeting.location().to_string())),
            EventRecord::Vote(_) => ("vote", None),
        };
        let mut columns = Self {
            event_type,
            parent_group: None,
            parent_todo: None,
            parent_meeting: None,
            location,
            tags: serde_json::to_string(&event.tags())?,
        };
        match event.parent_ref() {
            EntityRef::Group(uid) => columns.parent_group = Some(uid.to_string()),
            EntityRef::Todo(uid) => columns.parent_todo = Some(uid.to_string()),
            EntityRef::Meeting(uid) => columns.parent_meeting = Some(uid.to_string()),
            other => {
                return Err(RepoError::InvalidData(format!(
                    "event cannot be stored under {other}"
                )))
            }
        }
        Ok(columns)
    }
}

fn parse_event_row(row: &Row<'_>) -> RepoResult<EventRecord> {
    let uid = parse_uuid(&row.get::<_, String>(0)?, "events.uid")?;
    let event_type: String = row.get(1)?;
    let reminder_type_raw: String = row.get(14)?;
    let reminder_type = EventReminderType::parse(&reminder_type_raw).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid reminder_type `{reminder_type_raw}`"))
    })?;

    let core = EventCore {
        uid,
        created_at: from_epoch_ms(row.get(5)?, "events.created_at")?,
        created_by: parse_uuid(&row.get::<_, String>(6)?, "events.created_by")?,
        ancestor_group: parse_uuid(&row.get::<_, String>(7)?, "events.ancestor_group")?,
        name: row.get(2)?,
        description: row.get(3)?,
        start_at: from_epoch_ms(row.get(4)?, "events.start_at")?,
        include_sub_groups: int_to_bool(row.get(11)?, "events.include_sub_groups")?,
        rsvp_required: int_to_bool(row.get(12)?, "events.rsvp_required")?,
        relayable: int_to_bool(row.get(13)?, "events.relayable")?,
        reminder_type,
        custom_reminder_minutes: row.get(15)?,
        canceled: int_to_bool(row.get(16)?, "events.canceled")?,
        scheduled_reminder_at: from_optional_epoch_ms(row.get(17)?, "events.scheduled_reminder_at")?,
        scheduled_reminder_active: int_to_bool(row.get(18)?, "events.scheduled_reminder_active")?,
        reminders_sent: row.get(19)?,
        version: parse_version(row.get(22)?)?,
        assigned_members: BTreeSet::new(),
    };

    let parent_group = parse_optional_uuid(row.get(8)?, "events.parent_group")?;
    let parent_todo = parse_optional_uuid(row.get(9)?, "events.parent_todo")?;
    let parent_meeting = parse_optional_uuid(row.get(10)?, "events.parent_meeting")?;
    let location: Option<String> = row.get(20)?;
    let tags: Vec<String> = serde_json::from_str(&row.get::<_, String>(21)?)?;

    match event_type.as_str() {
        "meeting" => {
            let parent = match (parent_group, parent_todo) {
                (Some(group), _) => MeetingParent::Group(group),
                (None, Some(todo)) => MeetingParent::Todo(todo),
                (None, None) => return Err(DomainError::NoParent(TaskRef::Meeting(uid)).into()),
            };
            let location = location.ok_or_else(|| {
                RepoError::InvalidData(format!("meeting {uid} has no location"))
            })?;
            Ok(Meeting::from_parts(core, location, parent, tags).into())
        }
        "vote" => {
            let parent = match (parent_group, parent_todo, parent_meeting) {
                (Some(group), _, _) => VoteParent::Group(group),
                (None, Some(todo), _) => VoteParent::Todo(todo),
                (None, None, Some(meeting)) => VoteParent::Meeting(meeting),
                (None, None, None) => return Err(DomainError::NoParent(TaskRef::Vote(uid)).into()),
            };
            Ok(Vote::from_parts(core, parent, VoteContent::from_tags(&tags)).into())
        }
        other => Err(RepoError::InvalidData(format!("invalid event_type `{other}`"))),
    }
}

fn load_assigned_members(conn: &Connection, uid: EventId) -> RepoResult<BTreeSet<UserId>> {
    let mut stmt = conn.prepare(
        "SELECT user_uid
         FROM event_assigned_members
         WHERE event_uid = ?1;",
    )?;
    let mut rows = stmt.query([uid.to_string()])?;
    let mut members = BTreeSet::new();
    while let Some(row) = rows.next()? {
        members.insert(parse_uuid(&row.get::<_, String>(0)?, "event_assigned_members.user_uid")?);
    }
    Ok(members)
}

fn write_assigned_members(
    tx: &Transaction<'_>,
    event_uid: &str,
    members: &BTreeSet<UserId>,
) -> RepoResult<()> {
    for member in members {
        tx.execute(
            "INSERT INTO event_assigned_members (event_uid, user_uid) VALUES (?1, ?2);",
            params![event_uid, member.to_string()],
        )?;
    }
    Ok(())
}
