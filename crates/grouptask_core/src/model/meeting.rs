//! Meeting: a scheduled gathering under a group or a to-do.

use crate::config::TaskConfig;
use crate::model::error::{DomainError, DomainResult};
use crate::model::event::{Event, EventCore, EventFields};
use crate::model::group::GroupDirectory;
use crate::model::ids::{EntityRef, GroupId, TaskKind, TaskRef, TodoId, UserId};
use crate::model::task::{ParentChange, Task, TaskContainer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Containers a meeting may be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "uid", rename_all = "snake_case")]
pub enum MeetingParent {
    Group(GroupId),
    Todo(TodoId),
}

impl TryFrom<EntityRef> for MeetingParent {
    type Error = DomainError;

    fn try_from(value: EntityRef) -> Result<Self, Self::Error> {
        match value {
            EntityRef::Group(uid) => Ok(Self::Group(uid)),
            EntityRef::Todo(uid) => Ok(Self::Todo(uid)),
            other => Err(DomainError::UnsupportedParent {
                child: TaskKind::Meeting,
                parent: other.kind(),
            }),
        }
    }
}

impl From<MeetingParent> for EntityRef {
    fn from(value: MeetingParent) -> Self {
        match value {
            MeetingParent::Group(uid) => Self::Group(uid),
            MeetingParent::Todo(uid) => Self::Todo(uid),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    core: EventCore,
    location: String,
    parent: MeetingParent,
    tags: Vec<String>,
}

impl Meeting {
    /// Builds a meeting under `parent` and registers it on the ancestor group.
    ///
    /// The location is required and is truncated to
    /// `config.meeting_location_max_chars`.
    pub fn new(
        fields: EventFields,
        location: &str,
        parent: &dyn TaskContainer,
        groups: &mut dyn GroupDirectory,
        config: &TaskConfig,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let parent_ref = MeetingParent::try_from(parent.entity_ref())?;
        let location = normalize_location(location, config.meeting_location_max_chars)?;
        let core = EventCore::new(fields, parent.this_or_ancestor_group(), now)?;

        let meeting = Self {
            core,
            location,
            parent: parent_ref,
            tags: Vec::new(),
        };

        let task = meeting.task_ref();
        if let MeetingParent::Group(group) = parent_ref {
            groups.register_child(group, task)?;
        }
        groups.register_descendant(meeting.core.ancestor_group, task)?;
        Ok(meeting)
    }

    /// Rebuilds a meeting from stored columns. No registration happens.
    pub(crate) fn from_parts(
        core: EventCore,
        location: String,
        parent: MeetingParent,
        tags: Vec<String>,
    ) -> Self {
        Self {
            core,
            location,
            parent,
            tags,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn set_location(&mut self, location: &str, config: &TaskConfig) -> DomainResult<()> {
        self.location = normalize_location(location, config.meeting_location_max_chars)?;
        Ok(())
    }

    pub fn parent(&self) -> MeetingParent {
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
    /// to be applied once the meeting is stored.
    pub fn reparent(&mut self, parent: &dyn TaskContainer) -> DomainResult<ParentChange> {
        let (next, change) = self.plan_parent(parent)?;
        self.parent = next;
        Ok(change)
    }

    fn plan_parent(&self, parent: &dyn TaskContainer) -> DomainResult<(MeetingParent, ParentChange)> {
        let next = MeetingParent::try_from(parent.entity_ref())?;
        let change =
            ParentChange::plan(self.task_ref(), self.ancestor_group(), self.parent.into(), parent)?;
        Ok((next, change))
    }

    pub fn add_tag(&mut self, tag: &str) {
        let tag = tag.trim();
        if !tag.is_empty() && !self.tags.iter().any(|existing| existing == tag) {
            self.tags.push(tag.to_string());
        }
    }
}

fn normalize_location(location: &str, max_chars: usize) -> DomainResult<String> {
    let trimmed = location.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("location", "must not be blank"));
    }
    Ok(trimmed.chars().take(max_chars).collect())
}

impl Task for Meeting {
    fn task_ref(&self) -> TaskRef {
        TaskRef::Meeting(self.core.uid)
    }

    fn created_by(&self) -> UserId {
        self.core.created_by
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.core.created_at
    }

    fn deadline_at(&self) -> DateTime<Utc> {
        self.core.start_at
    }

    fn ancestor_group(&self) -> GroupId {
        self.core.ancestor_group
    }

    fn assigned_member_set(&self) -> &BTreeSet<UserId> {
        &self.core.assigned_members
    }

    fn assigned_member_set_mut(&mut self) -> &mut BTreeSet<UserId> {
        &mut self.core.assigned_members
    }
}

impl TaskContainer for Meeting {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::Meeting(self.core.uid)
    }

    fn this_or_ancestor_group(&self) -> GroupId {
        self.core.ancestor_group
    }
}

impl Event for Meeting {
    fn core(&self) -> &EventCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EventCore {
        &mut self.core
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{Meeting, MeetingParent};
    use crate::config::TaskConfig;
    use crate::model::error::DomainError;
    use crate::model::event::EventFields;
    use crate::model::group::{Group, InMemoryGroupDirectory};
    use crate::model::ids::{EntityKind, EntityRef, TaskKind, TaskRef};
    use crate::model::task::{ContainerRef, Task};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn meeting_under_group() -> (Meeting, InMemoryGroupDirectory, Uuid) {
        let mut groups = InMemoryGroupDirectory::new();
        let group = Group::new("committee");
        let group_id = groups.insert(group.clone());
        let now = Utc::now();
        let fields = EventFields::new("AGM", now + Duration::days(3), Uuid::new_v4());
        let meeting = Meeting::new(
            fields,
            "Community hall",
            &group,
            &mut groups,
            &TaskConfig::default(),
            now,
        )
        .unwrap();
        (meeting, groups, group_id)
    }

    #[test]
    fn construction_registers_child_and_descendant() {
        let (meeting, groups, group_id) = meeting_under_group();
        let group = groups.get(group_id).unwrap();
        let task = TaskRef::Meeting(meeting.core.uid);
        assert!(group.child_tasks().contains(&task));
        assert!(group.descendant_tasks().contains(&task));
        assert_eq!(meeting.parent(), MeetingParent::Group(group_id));
    }

    #[test]
    fn location_is_truncated() {
        let mut groups = InMemoryGroupDirectory::new();
        let group = Group::new("g");
        groups.insert(group.clone());
        let config = TaskConfig {
            meeting_location_max_chars: 5,
            ..TaskConfig::default()
        };
        let now = Utc::now();
        let meeting = Meeting::new(
            EventFields::new("m", now, Uuid::new_v4()),
            "  Town square  ",
            &group,
            &mut groups,
            &config,
            now,
        )
        .unwrap();
        assert_eq!(meeting.location(), "Town ");
    }

    #[test]
    fn vote_parent_is_rejected() {
        let (mut meeting, mut groups, _) = meeting_under_group();
        let vote = ContainerRef {
            entity: EntityRef::Vote(Uuid::new_v4()),
            ancestor_group: meeting.ancestor_group(),
        };
        let err = meeting.set_parent(&vote, &mut groups).unwrap_err();
        assert_eq!(
            err,
            DomainError::UnsupportedParent {
                child: TaskKind::Meeting,
                parent: EntityKind::Vote,
            }
        );
    }

    #[test]
    fn moving_under_a_todo_drops_the_group_child_entry() {
        let (mut meeting, mut groups, group_id) = meeting_under_group();
        let todo = ContainerRef {
            entity: EntityRef::Todo(Uuid::new_v4()),
            ancestor_group: group_id,
        };
        meeting.set_parent(&todo, &mut groups).unwrap();

        let group = groups.get(group_id).unwrap();
        assert!(!group.child_tasks().contains(&meeting.task_ref()));
        assert!(group.descendant_tasks().contains(&meeting.task_ref()));
        assert_eq!(meeting.parent(), MeetingParent::Todo(todo.entity.uid()));

        let home = groups.get(group_id).unwrap().clone();
        meeting.set_parent(&home, &mut groups).unwrap();
        assert!(groups
            .get(group_id)
            .unwrap()
            .child_tasks()
            .contains(&meeting.task_ref()));
    }

    #[test]
    fn container_in_another_group_is_rejected() {
        let (mut meeting, mut groups, group_id) = meeting_under_group();
        let stranger = groups.insert(Group::new("elsewhere"));
        let stranger = groups.get(stranger).unwrap().clone();

        let err = meeting.set_parent(&stranger, &mut groups).unwrap_err();
        assert_eq!(
            err,
            DomainError::GroupMismatch {
                expected: group_id,
                actual: stranger.uid,
            }
        );
        assert_eq!(meeting.parent(), MeetingParent::Group(group_id));
        assert!(stranger.child_tasks().is_empty());
    }

    #[test]
    fn missing_group_leaves_parent_untouched() {
        let (mut meeting, mut groups, group_id) = meeting_under_group();
        let todo = ContainerRef {
            entity: EntityRef::Todo(Uuid::new_v4()),
            ancestor_group: group_id,
        };
        meeting.set_parent(&todo, &mut groups).unwrap();

        let mut empty = InMemoryGroupDirectory::new();
        let home = groups.get(group_id).unwrap().clone();
        let err = meeting.set_parent(&home, &mut empty).unwrap_err();
        assert_eq!(err, DomainError::GroupNotFound(group_id));
        assert_eq!(meeting.parent(), MeetingParent::Todo(todo.entity.uid()));
    }
}
