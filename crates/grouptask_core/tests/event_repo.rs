use chrono::{DateTime, Duration, TimeZone, Utc};
use grouptask_core::db::open_db_in_memory;
use grouptask_core::{
    DomainError, EntityRef, ErrorKind, Event, EventFields, EventRecord, EventRepository, Group,
    GroupDirectory, GroupId, InMemoryGroupDirectory, Locale, Meeting, RepoError, Role,
    SqliteEventRepository, Task, TaskConfig, TaskRef, Vote, VoteOptions,
};
use rusqlite::Connection;
use uuid::Uuid;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
}

fn directory() -> (InMemoryGroupDirectory, GroupId) {
    let mut directory = InMemoryGroupDirectory::new();
    let mut group = Group::new("tenants");
    group.add_member(Uuid::new_v4(), Role::Organizer);
    group.add_member(Uuid::new_v4(), Role::Ordinary);
    let uid = directory.insert(group);
    (directory, uid)
}

fn meeting(directory: &mut InMemoryGroupDirectory, group: GroupId, start: DateTime<Utc>) -> Meeting {
    let snapshot = directory.find_group(group).unwrap();
    let fields = EventFields::new("Tenant meeting", start, Uuid::new_v4()).with_custom_reminder(60);
    Meeting::new(
        fields,
        "Community room",
        &snapshot,
        directory,
        &TaskConfig::default(),
        now(),
    )
    .unwrap()
}

fn scheduled(mut event: EventRecord, directory: &InMemoryGroupDirectory) -> EventRecord {
    let group = directory.find_group(event.ancestor_group()).unwrap();
    let config = TaskConfig::default();
    event
        .update_scheduled_reminder_time(&group, &config.daytime, config.stale_reminder_grace(), now())
        .unwrap();
    event
}

#[test]
fn meeting_round_trips_with_assignees() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    let (mut directory, group) = directory();

    let mut record = EventRecord::from(meeting(&mut directory, group, now() + Duration::days(1)));
    let snapshot = directory.find_group(group).unwrap();
    let first = *snapshot.membership().keys().next().unwrap();
    record.assign_members(&[first], &snapshot).unwrap();
    let record = scheduled(record, &directory);

    let uid = repo.create_event(&record).unwrap();
    let loaded = repo.get_event(uid).unwrap().unwrap();

    assert_eq!(loaded, record);
    assert_eq!(loaded.as_meeting().unwrap().location(), "Community room");
    assert!(loaded.assigned_members().contains(&first));
}

#[test]
fn vote_content_survives_storage() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    let (mut directory, group) = directory();
    let parent = meeting(&mut directory, group, now() + Duration::days(2));
    repo.create_event(&parent.clone().into()).unwrap();

    let mut vote = Vote::new(
        EventFields::new("Choose a date", now() + Duration::days(1), Uuid::new_v4()),
        VoteOptions::new(["Saturday", "Sunday"]).randomized(),
        &parent,
        &mut directory,
        now(),
    )
    .unwrap();
    vote.add_language_prompt(Locale::parse("en").unwrap(), "Pick a day :: any");
    vote.flags_mut().stop_notifications = true;

    let uid = repo.create_event(&vote.clone().into()).unwrap();
    let loaded = repo.get_event(uid).unwrap().unwrap();
    let loaded_vote = loaded.as_vote().unwrap();

    assert_eq!(loaded_vote, &vote);
    assert_eq!(loaded.parent_ref(), EntityRef::Meeting(parent.uid()));
    assert_eq!(loaded.ancestor_group(), group);
}

#[test]
fn update_bumps_version_and_stale_copy_conflicts() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    let (mut directory, group) = directory();
    let record = EventRecord::from(meeting(&mut directory, group, now() + Duration::days(1)));
    let uid = repo.create_event(&record).unwrap();

    let mut fresh = repo.get_event(uid).unwrap().unwrap();
    let mut stale = fresh.clone();

    fresh.core_mut().rename("Renamed meeting").unwrap();
    repo.update_event(&mut fresh).unwrap();
    assert_eq!(fresh.core().version(), 1);

    stale.cancel();
    let err = repo.update_event(&mut stale).unwrap_err();
    assert!(err.is_concurrent_modification());
    match err {
        RepoError::Domain(DomainError::ConcurrentModification {
            task,
            expected_version,
            actual_version,
        }) => {
            assert_eq!(task, TaskRef::Meeting(uid));
            assert_eq!(expected_version, 0);
            assert_eq!(actual_version, 1);
        }
        other => panic!("unexpected error: {other}"),
    }

    let stored = repo.get_event(uid).unwrap().unwrap();
    assert_eq!(stored.name(), "Renamed meeting");
    assert!(!stored.is_canceled());
}

#[test]
fn update_of_missing_event_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    let (mut directory, group) = directory();
    let mut record = EventRecord::from(meeting(&mut directory, group, now()));

    let err = repo.update_event(&mut record).unwrap_err();
    assert!(matches!(err, RepoError::NotFound(TaskRef::Meeting(_))));
}

#[test]
fn due_list_skips_future_inactive_and_canceled_events() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    let (mut directory, group) = directory();

    let due = scheduled(
        meeting(&mut directory, group, now() + Duration::hours(3)).into(),
        &directory,
    );
    let later = scheduled(
        meeting(&mut directory, group, now() + Duration::days(5)).into(),
        &directory,
    );
    let mut canceled = scheduled(
        meeting(&mut directory, group, now() + Duration::hours(4)).into(),
        &directory,
    );
    canceled.cancel();
    for record in [&due, &later, &canceled] {
        repo.create_event(record).unwrap();
    }

    let check_at = now() + Duration::hours(3);
    let listed = repo.list_events_due_for_reminder(check_at).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].uid(), due.uid());

    let all = repo.list_events_for_group(group, true).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].uid(), due.uid());
    assert_eq!(repo.list_events_for_group(group, false).unwrap().len(), 2);
}

#[test]
fn row_without_parent_reports_no_parent() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    let (mut directory, group) = directory();
    let record = EventRecord::from(meeting(&mut directory, group, now()));
    let uid = repo.create_event(&record).unwrap();

    let orphan = "UPDATE events SET parent_group = NULL WHERE uid = ?1;";
    assert!(conn.execute(orphan, [uid.to_string()]).is_err());
    conn.execute_batch("PRAGMA ignore_check_constraints = ON;")
        .unwrap();
    conn.execute(orphan, [uid.to_string()]).unwrap();

    let err = repo.get_event(uid).unwrap_err();
    assert_eq!(err.domain_kind(), Some(ErrorKind::NoParent));
}

#[test]
fn unmigrated_connection_is_rejected() {
    let conn = Connection::open_in_memory().unwrap();
    let err = SqliteEventRepository::try_new(&conn).unwrap_err();
    assert!(matches!(err, RepoError::UninitializedConnection { .. }));
}
