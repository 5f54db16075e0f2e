use chrono::{DateTime, Duration, TimeZone, Utc};
use grouptask_core::db::open_db_in_memory;
use grouptask_core::{
    DomainError, EntityRef, ErrorKind, Event, EventId, EventRecord, EventReminderType,
    EventRepository, EventService, Group, GroupDirectory, GroupId, InMemoryGroupDirectory,
    MeetingRequest, RepoError, RepoResult, Role, ServiceError, SqliteEventRepository,
    SqliteTodoRepository, Task, TaskConfig, TaskRef, Todo, TodoConfirmType, TodoFields, TodoParent,
    TodoService, TodoType, UserId, VoteOptions, VoteRequest,
};
use rusqlite::Connection;
use uuid::Uuid;

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 14, 10, 0, 0).unwrap()
}

struct World {
    conn: Connection,
    directory: InMemoryGroupDirectory,
    group: GroupId,
    members: Vec<UserId>,
}

fn world() -> World {
    let mut directory = InMemoryGroupDirectory::new();
    let mut group = Group::new("neighbourhood watch");
    let members: Vec<UserId> = (0..2).map(|_| Uuid::new_v4()).collect();
    group.add_member(members[0], Role::Organizer);
    group.add_member(members[1], Role::Ordinary);
    let group = directory.insert(group);
    World {
        conn: open_db_in_memory().unwrap(),
        directory,
        group,
        members,
    }
}

type Events<'a> = EventService<
    SqliteEventRepository<'a>,
    SqliteTodoRepository<'a>,
    &'a mut InMemoryGroupDirectory,
>;
type Todos<'a> = TodoService<
    SqliteEventRepository<'a>,
    SqliteTodoRepository<'a>,
    &'a mut InMemoryGroupDirectory,
>;

fn event_service<'a>(
    conn: &'a Connection,
    directory: &'a mut InMemoryGroupDirectory,
) -> Events<'a> {
    EventService::new(
        SqliteEventRepository::try_new(conn).unwrap(),
        SqliteTodoRepository::try_new(conn).unwrap(),
        directory,
        TaskConfig::default(),
    )
    .unwrap()
    .with_clock(fixed_now)
}

fn todo_service<'a>(conn: &'a Connection, directory: &'a mut InMemoryGroupDirectory) -> Todos<'a> {
    TodoService::new(
        SqliteEventRepository::try_new(conn).unwrap(),
        SqliteTodoRepository::try_new(conn).unwrap(),
        directory,
        TaskConfig::default(),
    )
    .unwrap()
    .with_clock(fixed_now)
}

fn meeting_request(world: &World, start: DateTime<Utc>) -> MeetingRequest {
    let mut request = MeetingRequest::new(world.members[0]);
    request.request.name = Some("Street patrol briefing".to_string());
    request.request.start_at = Some(start);
    request.request.set_parent(EntityRef::Group(world.group));
    request.request.reminder_type = EventReminderType::Custom;
    request.request.custom_reminder_minutes = 30;
    request.location = Some("Corner cafe".to_string());
    request
}

#[test]
fn create_meeting_schedules_reminder_and_persists() {
    let mut world = world();
    let start = fixed_now() + Duration::days(1);
    let request = meeting_request(&world, start);
    let mut service = event_service(&world.conn, &mut world.directory);

    let created = service.create_meeting(&request).unwrap();
    assert_eq!(
        created.core().scheduled_reminder_at(),
        Some(start - Duration::minutes(30))
    );
    assert!(created.core().is_scheduled_reminder_active());

    let loaded = service.get_event(created.uid()).unwrap();
    assert_eq!(loaded, created);
    assert!(service
        .groups()
        .get(world.group)
        .unwrap()
        .child_tasks()
        .contains(&created.task_ref()));
}

#[test]
fn incomplete_request_names_missing_field() {
    let mut world = world();
    let mut request = meeting_request(&world, fixed_now());
    request.request.name = None;
    let mut service = event_service(&world.conn, &mut world.directory);

    let err = service.create_meeting(&request).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Domain(DomainError::IncompleteRequest { missing: "name" })
    ));
}

#[test]
fn unknown_group_parent_is_not_found() {
    let mut world = world();
    let mut request = meeting_request(&world, fixed_now() + Duration::days(1));
    let missing = Uuid::new_v4();
    request.request.set_parent(EntityRef::Group(missing));
    let mut service = event_service(&world.conn, &mut world.directory);

    let err = service.create_meeting(&request).unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(EntityRef::Group(uid)) if uid == missing));
}

#[test]
fn user_parent_is_unsupported() {
    let mut world = world();
    let mut request = VoteRequest::new(world.members[0]);
    request.request.name = Some("Patrol night".to_string());
    request.request.start_at = Some(fixed_now() + Duration::days(2));
    request.request.set_parent(EntityRef::User(world.members[1]));
    request.options = VoteOptions::new(["Friday", "Saturday"]);
    let mut service = event_service(&world.conn, &mut world.directory);

    let err = service.create_vote(&request).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::UnsupportedParent));
}

#[test]
fn reschedule_recomputes_reminder_and_bumps_version() {
    let mut world = world();
    let request = meeting_request(&world, fixed_now() + Duration::days(1));
    let mut service = event_service(&world.conn, &mut world.directory);
    let created = service.create_meeting(&request).unwrap();

    let new_start = fixed_now() + Duration::days(3);
    let moved = service.reschedule_event(created.uid(), new_start).unwrap();
    assert_eq!(
        moved.core().scheduled_reminder_at(),
        Some(new_start - Duration::minutes(30))
    );
    assert_eq!(moved.core().version(), 1);

    let canceled = service.cancel_event(created.uid()).unwrap();
    assert!(canceled.is_canceled());
    assert!(service
        .list_group_events(world.group, false)
        .unwrap()
        .is_empty());
}

#[test]
fn event_assignment_and_reminder_hooks() {
    let mut world = world();
    let members = world.members.clone();
    let request = meeting_request(&world, fixed_now() + Duration::minutes(20));
    let mut service = event_service(&world.conn, &mut world.directory);
    let created = service.create_meeting(&request).unwrap();

    let added = service
        .assign_event_members(created.uid(), &[members[1], Uuid::new_v4()])
        .unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(service.event_members(created.uid()).unwrap().len(), 1);

    let due = service.events_due_for_reminder().unwrap();
    assert_eq!(due.len(), 1);
    let sent = service.record_event_reminder_sent(created.uid()).unwrap();
    assert_eq!(sent.core().reminders_sent(), 1);
    assert!(service.events_due_for_reminder().unwrap().is_empty());

    let removed = service
        .remove_event_members(created.uid(), &[members[1]])
        .unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(service.event_members(created.uid()).unwrap().len(), 2);
}

#[test]
fn todo_under_meeting_inherits_reminder_minutes() {
    let mut world = world();
    let request = meeting_request(&world, fixed_now() + Duration::days(2));
    let meeting: EventRecord = {
        let mut events = event_service(&world.conn, &mut world.directory);
        events.create_meeting(&request).unwrap()
    };

    let mut todos = todo_service(&world.conn, &mut world.directory);
    let fields = TodoFields::new(
        TodoType::ActionRequired,
        "Print flyers",
        fixed_now() + Duration::days(1),
        world.members[0],
    );
    let todo = todos
        .create_todo(fields, EntityRef::Meeting(meeting.uid()))
        .unwrap();

    assert_eq!(todo.reminder_minutes, 30);
    assert_eq!(todo.ancestor_group(), world.group);
    assert_eq!(
        todo.scheduled_reminder_at(),
        Some(fixed_now() + Duration::days(1) - Duration::minutes(30))
    );
}

#[test]
fn vote_reference_to_meeting_uid_is_not_found() {
    let mut world = world();
    let request = meeting_request(&world, fixed_now() + Duration::days(2));
    let meeting = {
        let mut events = event_service(&world.conn, &mut world.directory);
        events.create_meeting(&request).unwrap()
    };

    let mut todos = todo_service(&world.conn, &mut world.directory);
    let fields = TodoFields::new(
        TodoType::ActionRequired,
        "Wrong kind",
        fixed_now() + Duration::days(1),
        world.members[0],
    );
    let err = todos
        .create_todo(fields, EntityRef::Vote(meeting.uid()))
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(EntityRef::Vote(_))));
}

#[test]
fn confirm_completion_reports_crossing_once_and_persists() {
    let mut world = world();
    let members = world.members.clone();
    let group = world.group;
    let mut todos = todo_service(&world.conn, &mut world.directory);
    let todo = todos
        .create_todo(
            TodoFields::new(
                TodoType::ActionRequired,
                "Check the lights",
                fixed_now() + Duration::days(1),
                members[0],
            ),
            EntityRef::Group(group),
        )
        .unwrap();

    let first = todos
        .confirm_completion(todo.uid(), members[0], TodoConfirmType::Completed, Some(fixed_now()))
        .unwrap();
    let second = todos
        .confirm_completion(todo.uid(), members[1], TodoConfirmType::Completed, None)
        .unwrap();
    assert!(first);
    assert!(!second);

    let stored = todos.get_todo(todo.uid()).unwrap();
    assert_eq!(stored.completion_percentage(), 100.0);
    assert_eq!(stored.version(), 2);

    let stranger = Uuid::new_v4();
    let err = todos
        .confirm_completion(todo.uid(), stranger, TodoConfirmType::Completed, None)
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::MemberNotEligible));
}

#[test]
fn reminder_sent_reschedules_until_exhausted() {
    let mut world = world();
    let group = world.group;
    let author = world.members[0];
    let mut todos = todo_service(&world.conn, &mut world.directory);
    let todo = todos
        .create_todo(
            TodoFields::new(
                TodoType::InformationRequired,
                "Send patrol rota",
                fixed_now() + Duration::days(3),
                author,
            ),
            EntityRef::Group(group),
        )
        .unwrap();
    assert_eq!(todo.reminders_left(), 2);

    let once = todos.record_todo_reminder_sent(todo.uid()).unwrap();
    assert_eq!(once.reminders_left(), 1);
    assert!(once.is_reminder_active());

    let twice = todos.record_todo_reminder_sent(todo.uid()).unwrap();
    assert_eq!(twice.reminders_left(), 0);
    assert!(!twice.is_reminder_active());
    assert_eq!(twice.scheduled_reminder_at(), None);
}

#[test]
fn recurrence_is_persisted_with_source_link() {
    let mut world = world();
    let group = world.group;
    let author = world.members[0];
    let mut todos = todo_service(&world.conn, &mut world.directory);
    let mut fields = TodoFields::new(
        TodoType::VolunteersNeeded,
        "Monthly litter pick",
        fixed_now() + Duration::days(1),
        author,
    );
    fields.recur_interval_minutes = Some(30 * 24 * 60);
    let todo = todos.create_todo(fields, EntityRef::Group(group)).unwrap();

    let next = todos.spawn_next_recurrence(todo.uid()).unwrap().unwrap();
    let stored = todos.get_todo(next.uid()).unwrap();
    assert_eq!(stored.source_todo(), Some(todo.uid()));
    assert_eq!(stored.action_by, todo.action_by + Duration::days(30));
    assert_eq!(todos.list_group_todos(group, false).unwrap().len(), 2);

    let cancelled = todos.cancel_todo(todo.uid()).unwrap();
    assert!(cancelled.is_cancelled());
    assert_eq!(todos.list_group_todos(group, false).unwrap().len(), 1);
}

#[test]
fn invalid_config_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let config = TaskConfig {
        completion_threshold_percent: 0.0,
        ..TaskConfig::default()
    };
    let result = TodoService::new(
        SqliteEventRepository::try_new(&conn).unwrap(),
        SqliteTodoRepository::try_new(&conn).unwrap(),
        InMemoryGroupDirectory::new(),
        config,
    );
    assert!(matches!(result, Err(ServiceError::Config(_))));
}

#[test]
fn directory_stays_reachable_through_service() {
    let mut world = world();
    let group = world.group;
    let todos = todo_service(&world.conn, &mut world.directory);
    assert!(todos.groups().find_group(group).is_some());
}

/// Event store that loses every optimistic write to another writer.
struct ConflictingEvents<'a>(SqliteEventRepository<'a>);

impl EventRepository for ConflictingEvents<'_> {
    fn create_event(&self, event: &EventRecord) -> RepoResult<EventId> {
        self.0.create_event(event)
    }

    fn update_event(&self, event: &mut EventRecord) -> RepoResult<()> {
        let version = event.core().version();
        Err(RepoError::Domain(DomainError::ConcurrentModification {
            task: event.task_ref(),
            expected_version: version,
            actual_version: version + 1,
        }))
    }

    fn get_event(&self, uid: EventId) -> RepoResult<Option<EventRecord>> {
        self.0.get_event(uid)
    }

    fn list_events_for_group(
        &self,
        group: GroupId,
        include_canceled: bool,
    ) -> RepoResult<Vec<EventRecord>> {
        self.0.list_events_for_group(group, include_canceled)
    }

    fn list_events_due_for_reminder(&self, now: DateTime<Utc>) -> RepoResult<Vec<EventRecord>> {
        self.0.list_events_due_for_reminder(now)
    }
}

fn todo_fields(world: &World, message: &str) -> TodoFields {
    TodoFields::new(
        TodoType::ActionRequired,
        message,
        fixed_now() + Duration::days(1),
        world.members[0],
    )
}

/// Meeting under the group plus a sibling to-do under the same group.
fn meeting_and_todo(world: &mut World) -> (EventRecord, Todo) {
    let request = meeting_request(world, fixed_now() + Duration::days(2));
    let fields = todo_fields(world, "Collect keys");
    let meeting = event_service(&world.conn, &mut world.directory)
        .create_meeting(&request)
        .unwrap();
    let todo = todo_service(&world.conn, &mut world.directory)
        .create_todo(fields, EntityRef::Group(world.group))
        .unwrap();
    (meeting, todo)
}

fn is_group_child(world: &World, task: TaskRef) -> bool {
    world
        .directory
        .get(world.group)
        .unwrap()
        .child_tasks()
        .contains(&task)
}

#[test]
fn move_event_under_todo_updates_row_and_directory() {
    let mut world = world();
    let (meeting, todo) = meeting_and_todo(&mut world);
    assert!(is_group_child(&world, meeting.task_ref()));

    let moved = event_service(&world.conn, &mut world.directory)
        .move_event(meeting.uid(), EntityRef::Todo(todo.uid()))
        .unwrap();
    assert_eq!(moved.parent_ref(), EntityRef::Todo(todo.uid()));
    assert_eq!(moved.core().version(), meeting.core().version() + 1);
    assert!(!is_group_child(&world, meeting.task_ref()));
    assert!(world
        .directory
        .get(world.group)
        .unwrap()
        .descendant_tasks()
        .contains(&meeting.task_ref()));

    let service = event_service(&world.conn, &mut world.directory);
    let loaded = service.get_event(meeting.uid()).unwrap();
    assert_eq!(loaded.parent_ref(), EntityRef::Todo(todo.uid()));
    assert_eq!(loaded.ancestor_group(), world.group);
}

#[test]
fn move_event_to_unknown_todo_is_not_found() {
    let mut world = world();
    let (meeting, _) = meeting_and_todo(&mut world);
    let missing = Uuid::new_v4();

    let err = event_service(&world.conn, &mut world.directory)
        .move_event(meeting.uid(), EntityRef::Todo(missing))
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(EntityRef::Todo(uid)) if uid == missing));
    assert!(is_group_child(&world, meeting.task_ref()));
}

#[test]
fn move_event_into_another_group_is_rejected() {
    let mut world = world();
    let (meeting, _) = meeting_and_todo(&mut world);
    let other = world.directory.insert(Group::new("allotment society"));

    let err = event_service(&world.conn, &mut world.directory)
        .move_event(meeting.uid(), EntityRef::Group(other))
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::GroupMismatch));
    assert!(is_group_child(&world, meeting.task_ref()));
    assert!(world.directory.get(other).unwrap().child_tasks().is_empty());

    let service = event_service(&world.conn, &mut world.directory);
    let loaded = service.get_event(meeting.uid()).unwrap();
    assert_eq!(loaded.parent_ref(), EntityRef::Group(world.group));
}

#[test]
fn move_event_under_its_own_todo_is_rejected() {
    let mut world = world();
    let (meeting, _) = meeting_and_todo(&mut world);
    let fields = todo_fields(&world, "Bring chairs");
    let child = todo_service(&world.conn, &mut world.directory)
        .create_todo(fields, EntityRef::Meeting(meeting.uid()))
        .unwrap();

    let err = event_service(&world.conn, &mut world.directory)
        .move_event(meeting.uid(), EntityRef::Todo(child.uid()))
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Validation));
    assert!(is_group_child(&world, meeting.task_ref()));
}

#[test]
fn failed_move_write_leaves_directory_untouched() {
    let mut world = world();
    let (meeting, todo) = meeting_and_todo(&mut world);

    let mut service = EventService::new(
        ConflictingEvents(SqliteEventRepository::try_new(&world.conn).unwrap()),
        SqliteTodoRepository::try_new(&world.conn).unwrap(),
        &mut world.directory,
        TaskConfig::default(),
    )
    .unwrap()
    .with_clock(fixed_now);
    let err = service
        .move_event(meeting.uid(), EntityRef::Todo(todo.uid()))
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::ConcurrentModification));
    let stored = service.get_event(meeting.uid()).unwrap();
    assert_eq!(stored.parent_ref(), EntityRef::Group(world.group));
    drop(service);

    assert!(is_group_child(&world, meeting.task_ref()));
}

#[test]
fn move_todo_under_meeting_and_back() {
    let mut world = world();
    let (meeting, todo) = meeting_and_todo(&mut world);
    let group = world.group;

    let mut todos = todo_service(&world.conn, &mut world.directory);
    let moved = todos
        .move_todo(todo.uid(), EntityRef::Meeting(meeting.uid()))
        .unwrap();
    assert_eq!(moved.parent(), TodoParent::Meeting(meeting.uid()));
    assert!(!todos
        .groups()
        .get(group)
        .unwrap()
        .child_tasks()
        .contains(&todo.task_ref()));

    let back = todos.move_todo(todo.uid(), EntityRef::Group(group)).unwrap();
    assert_eq!(back.parent(), TodoParent::Group(group));
    assert_eq!(todos.get_todo(todo.uid()).unwrap().parent(), TodoParent::Group(group));
    drop(todos);
    assert!(is_group_child(&world, todo.task_ref()));
}

#[test]
fn oversized_reminder_minutes_are_validation_errors() {
    let mut world = world();
    let mut request = meeting_request(&world, fixed_now() + Duration::days(1));
    request.request.custom_reminder_minutes = i64::MAX;
    let err = event_service(&world.conn, &mut world.directory)
        .create_meeting(&request)
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Validation));

    let mut late_reminder = todo_fields(&world, "Renew insurance");
    late_reminder.reminder_minutes = Some(i64::MAX);
    let mut endless = todo_fields(&world, "Renew insurance");
    endless.recur_interval_minutes = Some(i64::MAX);
    let mut todos = todo_service(&world.conn, &mut world.directory);
    let err = todos
        .create_todo(late_reminder, EntityRef::Group(world.group))
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Validation));

    let err = todos
        .create_todo(endless, EntityRef::Group(world.group))
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Validation));
}

#[test]
fn oversized_reminder_change_keeps_stored_event() {
    let mut world = world();
    let request = meeting_request(&world, fixed_now() + Duration::days(1));
    let mut service = event_service(&world.conn, &mut world.directory);
    let created = service.create_meeting(&request).unwrap();

    let err = service
        .change_event_reminder(created.uid(), EventReminderType::Custom, i64::MAX / 2)
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Validation));
    assert_eq!(service.get_event(created.uid()).unwrap(), created);
}
