//! Group boundary model and membership provider.
//!
//! # Responsibility
//! - Describe the slice of a group the task core consumes: membership,
//!   reminder configuration, time zone, nesting.
//! - Hold the reverse "child tasks" / "descendant tasks" collections.
//!
//! # Invariants
//! - Reverse collections are only mutated through `GroupDirectory::register_*`
//!   and `unregister_child`, which task parent setters and constructors call.
//!   No other component writes them.
//! - Membership is read live; tasks never snapshot it.

use crate::model::error::{DomainError, DomainResult};
use crate::model::ids::{EntityRef, GroupId, TaskRef, UserId};
use crate::model::task::TaskContainer;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Group-level reminder default: one day before the event.
pub const DEFAULT_GROUP_REMINDER_MINUTES: i64 = 24 * 60;

/// Member role inside one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Organizer,
    Committee,
    Ordinary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub uid: GroupId,
    pub name: String,
    /// Enclosing group, `None` for a top-level group.
    pub parent_group: Option<GroupId>,
    /// Reminder lead time used by `GROUP_CONFIGURED` events. `<= 0` disables.
    pub reminder_minutes: i64,
    /// Fixed UTC offset used for daytime clamping.
    pub utc_offset_minutes: i32,
    members: BTreeMap<UserId, Role>,
    child_tasks: BTreeSet<TaskRef>,
    descendant_tasks: BTreeSet<TaskRef>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(GroupId::new_v4(), name)
    }

    pub fn with_id(uid: GroupId, name: impl Into<String>) -> Self {
        Self {
            uid,
            name: name.into(),
            parent_group: None,
            reminder_minutes: DEFAULT_GROUP_REMINDER_MINUTES,
            utc_offset_minutes: 0,
            members: BTreeMap::new(),
            child_tasks: BTreeSet::new(),
            descendant_tasks: BTreeSet::new(),
        }
    }

    /// Adds or re-roles a member. Returns `true` when the member is new.
    pub fn add_member(&mut self, user: UserId, role: Role) -> bool {
        self.members.insert(user, role).is_none()
    }

    pub fn remove_member(&mut self, user: UserId) -> bool {
        self.members.remove(&user).is_some()
    }

    pub fn is_member(&self, user: UserId) -> bool {
        self.members.contains_key(&user)
    }

    pub fn role_of(&self, user: UserId) -> Option<Role> {
        self.members.get(&user).copied()
    }

    pub fn membership(&self) -> &BTreeMap<UserId, Role> {
        &self.members
    }

    pub fn members(&self) -> BTreeSet<UserId> {
        self.members.keys().copied().collect()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Time zone for clamping; out-of-range offsets fall back to UTC.
    pub fn time_zone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }

    /// Tasks whose immediate parent is this group.
    pub fn child_tasks(&self) -> &BTreeSet<TaskRef> {
        &self.child_tasks
    }

    /// Tasks whose ancestor group is this group.
    pub fn descendant_tasks(&self) -> &BTreeSet<TaskRef> {
        &self.descendant_tasks
    }

    fn register_child(&mut self, task: TaskRef) {
        self.child_tasks.insert(task);
    }

    fn unregister_child(&mut self, task: TaskRef) {
        self.child_tasks.remove(&task);
    }

    fn register_descendant(&mut self, task: TaskRef) {
        self.descendant_tasks.insert(task);
    }
}

impl TaskContainer for Group {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::Group(self.uid)
    }

    fn this_or_ancestor_group(&self) -> GroupId {
        self.uid
    }
}

/// Synchronous group/membership provider consumed by the task core.
pub trait GroupDirectory {
    /// Current snapshot of one group.
    fn find_group(&self, uid: GroupId) -> Option<Group>;
    /// Direct sub-groups of one group.
    fn sub_groups(&self, uid: GroupId) -> Vec<GroupId>;
    /// Records `task` as a direct child of `group`.
    fn register_child(&mut self, group: GroupId, task: TaskRef) -> DomainResult<()>;
    /// Drops `task` from the direct children of `group`.
    fn unregister_child(&mut self, group: GroupId, task: TaskRef) -> DomainResult<()>;
    /// Records `task` as a descendant of its ancestor `group`.
    fn register_descendant(&mut self, group: GroupId, task: TaskRef) -> DomainResult<()>;

    fn require_group(&self, uid: GroupId) -> DomainResult<Group> {
        self.find_group(uid).ok_or(DomainError::GroupNotFound(uid))
    }

    /// Members of `uid` and every group nested below it.
    fn members_with_sub_groups(&self, uid: GroupId) -> DomainResult<BTreeSet<UserId>> {
        let mut members = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([uid]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let group = self.require_group(current)?;
            members.extend(group.membership().keys().copied());
            queue.extend(self.sub_groups(current));
        }
        Ok(members)
    }
}

impl<T: GroupDirectory + ?Sized> GroupDirectory for &mut T {
    fn find_group(&self, uid: GroupId) -> Option<Group> {
        (**self).find_group(uid)
    }

    fn sub_groups(&self, uid: GroupId) -> Vec<GroupId> {
        (**self).sub_groups(uid)
    }

    fn register_child(&mut self, group: GroupId, task: TaskRef) -> DomainResult<()> {
        (**self).register_child(group, task)
    }

    fn unregister_child(&mut self, group: GroupId, task: TaskRef) -> DomainResult<()> {
        (**self).unregister_child(group, task)
    }

    fn register_descendant(&mut self, group: GroupId, task: TaskRef) -> DomainResult<()> {
        (**self).register_descendant(group, task)
    }
}

/// Map-backed directory for tests and embedded callers.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGroupDirectory {
    groups: BTreeMap<GroupId, Group>,
}

impl InMemoryGroupDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a group, returning its id.
    pub fn insert(&mut self, group: Group) -> GroupId {
        let uid = group.uid;
        self.groups.insert(uid, group);
        uid
    }

    pub fn get(&self, uid: GroupId) -> Option<&Group> {
        self.groups.get(&uid)
    }

    pub fn get_mut(&mut self, uid: GroupId) -> Option<&mut Group> {
        self.groups.get_mut(&uid)
    }
}

impl GroupDirectory for InMemoryGroupDirectory {
    fn find_group(&self, uid: GroupId) -> Option<Group> {
        self.groups.get(&uid).cloned()
    }

    fn sub_groups(&self, uid: GroupId) -> Vec<GroupId> {
        self.groups
            .values()
            .filter(|group| group.parent_group == Some(uid))
            .map(|group| group.uid)
            .collect()
    }

    fn register_child(&mut self, group: GroupId, task: TaskRef) -> DomainResult<()> {
        self.groups
            .get_mut(&group)
            .ok_or(DomainError::GroupNotFound(group))?
            .register_child(task);
        Ok(())
    }

    fn unregister_child(&mut self, group: GroupId, task: TaskRef) -> DomainResult<()> {
        self.groups
            .get_mut(&group)
            .ok_or(DomainError::GroupNotFound(group))?
            .unregister_child(task);
        Ok(())
    }

    fn register_descendant(&mut self, group: GroupId, task: TaskRef) -> DomainResult<()> {
        self.groups
            .get_mut(&group)
            .ok_or(DomainError::GroupNotFound(group))?
            .register_descendant(task);
        Ok(())
    }
}
