//! Task capability shared by meetings, votes and to-dos.
//!
//! # Responsibility
//! - Expose deadline, creator, ancestor group and the assigned-member set.
//! - Provide member assignment helpers on top of live group membership.
//!
//! # Invariants
//! - An empty assigned set means "every current member of the ancestor
//!   group". Removing the last explicit assignee reverts to that meaning.
//! - Assignment resolves against current membership; unknown uids are
//!   dropped, not rejected.

use crate::model::error::{DomainError, DomainResult};
use crate::model::group::{Group, GroupDirectory};
use crate::model::ids::{EntityRef, GroupId, TaskKind, TaskRef, UserId};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Anything a task can be attached to.
pub trait TaskContainer {
    fn entity_ref(&self) -> EntityRef;
    /// The container itself when it is a group, else its cached ancestor.
    fn this_or_ancestor_group(&self) -> GroupId;
}

/// Container known only by reference plus its already-resolved ancestor.
///
/// Used when the container row is not loaded, e.g. when a recurring to-do
/// re-attaches to its source's parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerRef {
    pub entity: EntityRef,
    pub ancestor_group: GroupId,
}

impl TaskContainer for ContainerRef {
    fn entity_ref(&self) -> EntityRef {
        self.entity
    }

    fn this_or_ancestor_group(&self) -> GroupId {
        self.ancestor_group
    }
}

/// Directory update owed after a task changed its immediate parent.
///
/// Parents may only change within the task's ancestor group, so the cached
/// ancestor never goes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the group child collections are stale until the change is applied"]
pub struct ParentChange {
    pub task: TaskRef,
    pub from: EntityRef,
    pub to: EntityRef,
}

impl ParentChange {
    pub(crate) fn plan(
        task: TaskRef,
        ancestor_group: GroupId,
        from: EntityRef,
        to: &dyn TaskContainer,
    ) -> DomainResult<Self> {
        let actual = to.this_or_ancestor_group();
        if actual != ancestor_group {
            return Err(DomainError::GroupMismatch {
                expected: ancestor_group,
                actual,
            });
        }
        Ok(Self {
            task,
            from,
            to: to.entity_ref(),
        })
    }

    /// Fails unless every group this change touches exists.
    pub fn check(&self, groups: &dyn GroupDirectory) -> DomainResult<()> {
        for entity in [self.from, self.to] {
            if let EntityRef::Group(uid) = entity {
                groups.require_group(uid)?;
            }
        }
        Ok(())
    }

    /// Moves the group child entry from the old parent to the new one.
    pub fn apply(self, groups: &mut dyn GroupDirectory) -> DomainResult<()> {
        if self.from == self.to {
            return Ok(());
        }
        self.check(&*groups)?;
        if let EntityRef::Group(uid) = self.from {
            groups.unregister_child(uid, self.task)?;
        }
        if let EntityRef::Group(uid) = self.to {
            groups.register_child(uid, self.task)?;
        }
        Ok(())
    }
}

pub trait Task {
    fn task_ref(&self) -> TaskRef;
    fn created_by(&self) -> UserId;
    fn created_at(&self) -> DateTime<Utc>;
    fn deadline_at(&self) -> DateTime<Utc>;
    fn ancestor_group(&self) -> GroupId;
    /// Direct handle on the stored assignee set. Client code should prefer
    /// [`Task::assigned_members`], which returns a copy.
    fn assigned_member_set(&self) -> &BTreeSet<UserId>;
    fn assigned_member_set_mut(&mut self) -> &mut BTreeSet<UserId>;

    fn task_kind(&self) -> TaskKind {
        self.task_ref().kind()
    }

    fn assigned_members(&self) -> BTreeSet<UserId> {
        self.assigned_member_set().clone()
    }

    fn is_all_group_members_assigned(&self) -> bool {
        self.assigned_member_set().is_empty()
    }

    /// Fails unless `group` is this task's ancestor group.
    fn ensure_ancestor(&self, group: &Group) -> DomainResult<()> {
        if group.uid == self.ancestor_group() {
            Ok(())
        } else {
            Err(DomainError::GroupMismatch {
                expected: self.ancestor_group(),
                actual: group.uid,
            })
        }
    }

    /// Resolved member set: explicit assignees, or the whole group.
    fn members(&self, group: &Group) -> DomainResult<BTreeSet<UserId>> {
        self.ensure_ancestor(group)?;
        if self.is_all_group_members_assigned() {
            Ok(group.members())
        } else {
            Ok(self.assigned_members())
        }
    }

    /// Assigns current group members; returns only the newly added ones.
    fn assign_members(&mut self, uids: &[UserId], group: &Group) -> DomainResult<BTreeSet<UserId>> {
        self.ensure_ancestor(group)?;
        let assigned = self.assigned_member_set_mut();
        let mut added = BTreeSet::new();
        for uid in uids {
            if group.is_member(*uid) && assigned.insert(*uid) {
                added.insert(*uid);
            }
        }
        Ok(added)
    }

    /// Removes assignees; returns the ones actually removed.
    fn remove_assigned_members(&mut self, uids: &[UserId]) -> BTreeSet<UserId> {
        let assigned = self.assigned_member_set_mut();
        uids.iter()
            .copied()
            .filter(|uid| assigned.remove(uid))
            .collect()
    }

    fn count_assigned_members(&self, group: &Group) -> DomainResult<usize> {
        self.ensure_ancestor(group)?;
        if self.is_all_group_members_assigned() {
            Ok(group.member_count())
        } else {
            Ok(self.assigned_member_set().len())
        }
    }
}
