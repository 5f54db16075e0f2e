use chrono::{DateTime, Duration, TimeZone, Utc};
use grouptask_core::{
    DomainError, Group, GroupDirectory, GroupId, InMemoryGroupDirectory, Role, Task, TaskConfig,
    Todo, TodoAssignment, TodoConfirmType, TodoFields, TodoParent, TodoType, UserId,
};
use uuid::Uuid;

const THRESHOLD: f64 = 50.0;

struct Fixture {
    directory: InMemoryGroupDirectory,
    group: GroupId,
    members: Vec<UserId>,
    config: TaskConfig,
}

fn fixture(member_count: usize) -> Fixture {
    let mut directory = InMemoryGroupDirectory::new();
    let mut group = Group::new("garden club");
    let members: Vec<UserId> = (0..member_count).map(|_| Uuid::new_v4()).collect();
    for member in &members {
        group.add_member(*member, Role::Ordinary);
    }
    let group = directory.insert(group);
    Fixture {
        directory,
        group,
        members,
        config: TaskConfig::default(),
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap()
}

fn new_todo(fx: &mut Fixture, fields: TodoFields) -> Todo {
    let group = fx.directory.find_group(fx.group).unwrap();
    Todo::new(fields, &group, &mut fx.directory, &fx.config, now()).unwrap()
}

fn plain_todo(fx: &mut Fixture) -> Todo {
    let fields = TodoFields::new(
        TodoType::ActionRequired,
        "Water the beds",
        now() + Duration::days(2),
        fx.members[0],
    );
    new_todo(fx, fields)
}

fn group_of(fx: &Fixture) -> Group {
    fx.directory.find_group(fx.group).unwrap()
}

#[test]
fn threshold_crossing_is_reported_once() {
    let mut fx = fixture(2);
    let mut todo = plain_todo(&mut fx);
    let group = group_of(&fx);

    let first = todo
        .add_completion_confirmation(
            fx.members[0],
            TodoConfirmType::Completed,
            Some(now()),
            &group,
            THRESHOLD,
            now(),
        )
        .unwrap();
    assert!(first);
    assert_eq!(todo.completion_percentage(), 50.0);

    let second = todo
        .add_completion_confirmation(
            fx.members[1],
            TodoConfirmType::Completed,
            None,
            &group,
            THRESHOLD,
            now(),
        )
        .unwrap();
    assert!(!second);
    assert_eq!(todo.completion_percentage(), 100.0);
    assert!(todo.is_completed(THRESHOLD));
}

#[test]
fn first_confirmation_requires_completion_time() {
    let mut fx = fixture(2);
    let mut todo = plain_todo(&mut fx);
    let group = group_of(&fx);

    let err = todo
        .add_completion_confirmation(
            fx.members[0],
            TodoConfirmType::Completed,
            None,
            &group,
            THRESHOLD,
            now(),
        )
        .unwrap_err();
    assert_eq!(err, DomainError::MissingCompletionTime(todo.uid()));
    assert!(todo.confirmation_of(fx.members[0]).is_none());
}

#[test]
fn member_leaving_changes_percentage_on_next_confirmation() {
    let mut fx = fixture(3);
    let mut todo = plain_todo(&mut fx);
    let mut group = group_of(&fx);

    let crossed = todo
        .add_completion_confirmation(
            fx.members[0],
            TodoConfirmType::Completed,
            Some(now()),
            &group,
            THRESHOLD,
            now(),
        )
        .unwrap();
    assert!(!crossed);

    group.remove_member(fx.members[2]);
    let crossed = todo
        .add_completion_confirmation(
            fx.members[1],
            TodoConfirmType::Completed,
            None,
            &group,
            THRESHOLD,
            now(),
        )
        .unwrap();
    assert!(crossed);
    assert_eq!(todo.completion_percentage(), 100.0);

    group.remove_member(fx.members[1]);
    let status = todo.calculate_completion_status(&group).unwrap();
    assert_eq!(status.confirmed, 1);
    assert_eq!(status.eligible, 1);
}

#[test]
fn repeat_confirmation_overwrites_and_can_cross_again() {
    let mut fx = fixture(2);
    let mut todo = plain_todo(&mut fx);
    let group = group_of(&fx);
    let member = fx.members[0];

    let confirm = |todo: &mut Todo, confirm_type| {
        todo.add_completion_confirmation(member, confirm_type, Some(now()), &group, THRESHOLD, now())
            .unwrap()
    };

    assert!(confirm(&mut todo, TodoConfirmType::Completed));
    assert!(!confirm(&mut todo, TodoConfirmType::NotCompleted));
    assert_eq!(todo.completion_percentage(), 0.0);
    assert_eq!(todo.confirmations().count(), 1);
    assert!(!todo.is_completed_by(member));
    assert!(confirm(&mut todo, TodoConfirmType::Completed));
    assert!(todo.is_completed_by(member));
}

#[test]
fn only_assignees_are_eligible() {
    let mut fx = fixture(3);
    let mut todo = plain_todo(&mut fx);
    let group = group_of(&fx);
    todo.assign_members(&[fx.members[0]], &group).unwrap();

    let err = todo
        .add_completion_confirmation(
            fx.members[1],
            TodoConfirmType::Completed,
            Some(now()),
            &group,
            THRESHOLD,
            now(),
        )
        .unwrap_err();
    assert!(matches!(err, DomainError::MemberNotEligible { member, .. } if member == fx.members[1]));

    let crossed = todo
        .add_completion_confirmation(
            fx.members[0],
            TodoConfirmType::Completed,
            Some(now()),
            &group,
            THRESHOLD,
            now(),
        )
        .unwrap();
    assert!(crossed);
    assert_eq!(todo.completion_percentage(), 100.0);
}

#[test]
fn assigning_twice_adds_nothing_new() {
    let mut fx = fixture(3);
    let mut todo = plain_todo(&mut fx);
    let group = group_of(&fx);
    let wanted = [fx.members[0], fx.members[1]];

    assert_eq!(todo.assign_members(&wanted, &group).unwrap().len(), 2);
    assert!(todo.assign_members(&wanted, &group).unwrap().is_empty());
    assert_eq!(todo.assigned_members().len(), 2);
}

#[test]
fn validator_response_is_recorded_on_assignment() {
    let mut fx = fixture(2);
    let mut todo = plain_todo(&mut fx);
    let outside_validator = Uuid::new_v4();
    let doer = fx.members[1];
    todo.add_assignments([
        TodoAssignment::new(Uuid::nil(), outside_validator, false, true),
        TodoAssignment::new(Uuid::nil(), doer, true, false),
    ]);

    assert!(todo.assignments().all(|assignment| assignment.todo == todo.uid()));
    assert!(todo.confirming_users().contains(&outside_validator));
    assert!(todo.assigned_users().contains(&doer));
    assert!(todo.can_user_respond(outside_validator));
    assert!(!todo.has_user_responded(outside_validator));

    todo.record_assignment_response(
        outside_validator,
        TodoConfirmType::Completed,
        Some("checked the beds"),
        now(),
    )
    .unwrap();
    assert!(todo.has_user_responded(outside_validator));

    assert!(!todo.can_user_respond(doer));
    let err = todo
        .record_assignment_response(doer, TodoConfirmType::Completed, None, now())
        .unwrap_err();
    assert!(matches!(err, DomainError::MemberNotEligible { .. }));
}

#[test]
fn next_recurrence_shifts_deadline_and_links_source() {
    let mut fx = fixture(2);
    let mut fields = TodoFields::new(
        TodoType::VolunteersNeeded,
        "Weekly compost turn",
        now() + Duration::days(1),
        fx.members[0],
    );
    fields.recur_interval_minutes = Some(7 * 24 * 60);
    let todo = new_todo(&mut fx, fields);
    assert!(todo.is_recurring());

    let next = todo
        .next_recurrence(&mut fx.directory, &fx.config, now())
        .unwrap()
        .expect("recurring to-do yields a successor");
    assert_eq!(next.action_by, todo.action_by + Duration::days(7));
    assert_eq!(next.source_todo(), Some(todo.uid()));
    assert_eq!(next.parent(), TodoParent::Group(fx.group));
    assert_ne!(next.uid(), todo.uid());

    let once = plain_todo(&mut fx);
    assert!(once
        .next_recurrence(&mut fx.directory, &fx.config, now())
        .unwrap()
        .is_none());
}

#[test]
fn zero_recurrence_interval_is_rejected() {
    let mut fx = fixture(1);
    let mut fields = TodoFields::new(TodoType::ActionRequired, "Never", now(), fx.members[0]);
    fields.recur_interval_minutes = Some(0);
    let group = group_of(&fx);
    let err = Todo::new(fields, &group, &mut fx.directory, &fx.config, now()).unwrap_err();
    assert!(matches!(
        err,
        DomainError::Validation {
            field: "recur_interval_minutes",
            ..
        }
    ));
}
