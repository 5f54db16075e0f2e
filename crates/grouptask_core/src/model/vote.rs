//! Vote: a poll under a group, a to-do or a meeting.
//!
//! # Responsibility
//! - Hold options, per-locale prompts and vote flags as structured data.
//! - Encode them to and from the flat tag array used for storage.
//!
//! # Invariants
//! - At most one prompt per locale; adding a prompt replaces the previous one.
//! - Option order is stored as entered. `vote_options()` shuffles on each
//!   read when `randomize` is set.

use crate::model::error::{DomainError, DomainResult};
use crate::model::event::{Event, EventCore, EventFields};
use crate::model::group::GroupDirectory;
use crate::model::ids::{EntityRef, EventId, GroupId, TaskKind, TaskRef, TodoId, UserId};
use crate::model::task::{ParentChange, Task, TaskContainer};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

const OPTION_PREFIX: &str = "OPTION::";
const LANGUAGE_PREFIX: &str = "LANGUAGE::";
const POST_VOTE_PREFIX: &str = "POSTVOTE::";
const RANDOMIZE_TAG: &str = "RANDOMIZE";
const EXCLUDE_ABSTENTION_TAG: &str = "EXCLUDE_ABSTENTION_OPTION";
const STOP_NOTIFICATIONS_TAG: &str = "SEND_NO_NOTIFICATIONS";
const PRE_CLOSED_TAG: &str = "VOTE_PRE_CLOSED";
const LOCALE_SEPARATOR: &str = "::";

static LOCALE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{2,3}(_[A-Z]{2})?$").expect("valid locale regex"));

/// Language tag such as `en`, `zul` or `en_ZA`. Hyphens are accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locale(String);

impl Locale {
    pub fn parse(value: &str) -> DomainResult<Self> {
        let normalized = value.trim().replace('-', "_");
        if LOCALE_RE.is_match(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(DomainError::validation(
                "locale",
                format!("`{value}` is not a language tag"),
            ))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Locale {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Locale {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Locale> for String {
    fn from(value: Locale) -> Self {
        value.0
    }
}

pub type LocalePrompts = BTreeMap<Locale, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOptions {
    pub values: Vec<String>,
    pub randomize: bool,
}

impl VoteOptions {
    /// Trims each option and drops blanks.
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            values: clean_options(values),
            randomize: false,
        }
    }

    pub fn randomized(mut self) -> Self {
        self.randomize = true;
        self
    }
}

fn clean_options<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|value| value.as_ref().trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteFlags {
    /// Do not offer an abstain choice.
    pub exclude_abstention: bool,
    /// Suppress outbound notifications for this vote.
    pub stop_notifications: bool,
    /// Closed before its deadline.
    pub pre_closed: bool,
}

/// Structured vote payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteContent {
    pub options: VoteOptions,
    pub prompts: LocalePrompts,
    pub post_vote_prompts: LocalePrompts,
    pub flags: VoteFlags,
    /// Tags this codec does not understand, kept verbatim.
    pub extra_tags: Vec<String>,
}

impl VoteContent {
    pub fn new(options: VoteOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Flat tag form, as persisted.
    pub fn to_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .options
            .values
            .iter()
            .map(|option| format!("{OPTION_PREFIX}{option}"))
            .collect();
        tags.extend(self.prompts.iter().map(|(locale, prompt)| {
            format!("{LANGUAGE_PREFIX}{locale}{LOCALE_SEPARATOR}{prompt}")
        }));
        tags.extend(self.post_vote_prompts.iter().map(|(locale, prompt)| {
            format!("{POST_VOTE_PREFIX}{locale}{LOCALE_SEPARATOR}{prompt}")
        }));
        let markers = [
            (self.options.randomize, RANDOMIZE_TAG),
            (self.flags.exclude_abstention, EXCLUDE_ABSTENTION_TAG),
            (self.flags.stop_notifications, STOP_NOTIFICATIONS_TAG),
            (self.flags.pre_closed, PRE_CLOSED_TAG),
        ];
        tags.extend(
            markers
                .into_iter()
                .filter(|(set, _)| *set)
                .map(|(_, tag)| tag.to_string()),
        );
        tags.extend(self.extra_tags.iter().cloned());
        tags
    }

    /// Parses a flat tag array. Later prompts for the same locale win.
    pub fn from_tags<S: AsRef<str>>(tags: &[S]) -> Self {
        let mut content = Self::default();
        for tag in tags {
            let tag = tag.as_ref();
            if let Some(option) = tag.strip_prefix(OPTION_PREFIX) {
                content.options.values.push(option.to_string());
            } else if let Some(rest) = tag.strip_prefix(LANGUAGE_PREFIX) {
                match split_prompt(rest) {
                    Some((locale, prompt)) => {
                        content.prompts.insert(locale, prompt);
                    }
                    None => content.extra_tags.push(tag.to_string()),
                }
            } else if let Some(rest) = tag.strip_prefix(POST_VOTE_PREFIX) {
                match split_prompt(rest) {
                    Some((locale, prompt)) => {
                        content.post_vote_prompts.insert(locale, prompt);
                    }
                    None => content.extra_tags.push(tag.to_string()),
                }
            } else {
                match tag {
                    RANDOMIZE_TAG => content.options.randomize = true,
                    EXCLUDE_ABSTENTION_TAG => content.flags.exclude_abstention = true,
                    STOP_NOTIFICATIONS_TAG => content.flags.stop_notifications = true,
                    PRE_CLOSED_TAG => content.flags.pre_closed = true,
                    _ => content.extra_tags.push(tag.to_string()),
                }
            }
        }
        content
    }
}

fn split_prompt(rest: &str) -> Option<(Locale, String)> {
    let (locale, prompt) = rest.split_once(LOCALE_SEPARATOR)?;
    let locale = Locale::parse(locale).ok()?;
    Some((locale, prompt.to_string()))
}

/// Containers a vote may be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "uid", rename_all = "snake_case")]
pub enum VoteParent {
    Group(GroupId),
    Todo(TodoId),
    Meeting(EventId),
}

impl TryFrom<EntityRef> for VoteParent {
    type Error = DomainError;

    fn try_from(value: EntityRef) -> Result<Self, Self::Error> {
        match value {
            EntityRef::Group(uid) => Ok(Self::Group(uid)),
            EntityRef::Todo(uid) => Ok(Self::Todo(uid)),
            EntityRef::Meeting(uid) => Ok(Self::Meeting(uid)),
            other => Err(DomainError::UnsupportedParent {
                child: TaskKind::Vote,
                parent: other.kind(),
            }),
        }
    }
}

impl From<VoteParent> for EntityRef {
    fn from(value: VoteParent) -> Self {
        match value {
            VoteParent::Group(uid) => Self::Group(uid),
            VoteParent::Todo(uid) => Self::Todo(uid),
            VoteParent::Meeting(uid) => Self::Meeting(uid),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    core: EventCore,
    parent: VoteParent,
    content: VoteContent,
}

impl Vote {
    /// Builds a vote closing at `fields.start_at` and registers it on the
    /// ancestor group.
    pub fn new(
        fields: EventFields,
        options: VoteOptions,
        parent: &dyn TaskContainer,
        groups: &mut dyn GroupDirectory,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let parent_ref = VoteParent::try_from(parent.entity_ref())?;
        let core = EventCore::new(fields, parent.this_or_ancestor_group(), now)?;
        let vote = Self {
            core,
            parent: parent_ref,
            content: VoteContent::new(VoteOptions {
                values: clean_options(options.values),
                randomize: options.randomize,
            }),
        };

        let task = vote.task_ref();
        if let VoteParent::Group(group) = parent_ref {
            groups.register_child(group, task)?;
        }
        groups.register_descendant(vote.core.ancestor_group, task)?;
        Ok(vote)
    }

    /// Rebuilds a vote from stored columns. No registration happens.
    pub(crate) fn from_parts(core: EventCore, parent: VoteParent, content: VoteContent) -> Self {
        Self {
            core,
            parent,
            content,
        }
    }

    pub fn parent(&self) -> VoteParent {
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
    /// to be applied once the vote is stored.
    pub fn reparent(&mut self, parent: &dyn TaskContainer) -> DomainResult<ParentChange> {
        let (next, change) = self.plan_parent(parent)?;
        self.parent = next;
        Ok(change)
    }

    fn plan_parent(&self, parent: &dyn TaskContainer) -> DomainResult<(VoteParent, ParentChange)> {
        let next = VoteParent::try_from(parent.entity_ref())?;
        let change =
            ParentChange::plan(self.task_ref(), self.ancestor_group(), self.parent.into(), parent)?;
        Ok((next, change))
    }

    pub fn content(&self) -> &VoteContent {
        &self.content
    }

    /// Options in display order; shuffled on every call when randomized.
    pub fn vote_options(&self) -> Vec<String> {
        self.vote_options_with(&mut rand::thread_rng())
    }

    pub fn vote_options_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<String> {
        let mut options = self.content.options.values.clone();
        if self.content.options.randomize {
            options.shuffle(rng);
        }
        options
    }

    /// Options in stored order.
    pub fn unshuffled_options(&self) -> &[String] {
        &self.content.options.values
    }

    /// Replaces every option.
    pub fn set_vote_options<I, S>(&mut self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.content.options.values = clean_options(values);
    }

    /// Case-insensitive match against the stored options.
    pub fn has_option(&self, option: &str) -> bool {
        let wanted = option.trim().to_lowercase();
        self.content
            .options
            .values
            .iter()
            .any(|value| value.to_lowercase() == wanted)
    }

    pub fn is_randomized(&self) -> bool {
        self.content.options.randomize
    }

    pub fn set_randomize(&mut self, randomize: bool) {
        self.content.options.randomize = randomize;
    }

    pub fn add_language_prompt(&mut self, locale: Locale, prompt: &str) {
        self.content.prompts.insert(locale, prompt.to_string());
    }

    pub fn language_prompt(&self, locale: &Locale) -> Option<&str> {
        self.content.prompts.get(locale).map(String::as_str)
    }

    pub fn language_prompts(&self) -> &LocalePrompts {
        &self.content.prompts
    }

    pub fn remove_language_prompt(&mut self, locale: &Locale) -> Option<String> {
        self.content.prompts.remove(locale)
    }

    /// Message sent to a member after they vote.
    pub fn add_post_vote_prompt(&mut self, locale: Locale, prompt: &str) {
        self.content.post_vote_prompts.insert(locale, prompt.to_string());
    }

    pub fn post_vote_prompt(&self, locale: &Locale) -> Option<&str> {
        self.content.post_vote_prompts.get(locale).map(String::as_str)
    }

    pub fn flags(&self) -> VoteFlags {
        self.content.flags
    }

    pub fn flags_mut(&mut self) -> &mut VoteFlags {
        &mut self.content.flags
    }

    /// Vote closing time.
    pub fn closes_at(&self) -> DateTime<Utc> {
        self.core.start_at
    }
}

impl Task for Vote {
    fn task_ref(&self) -> TaskRef {
        TaskRef::Vote(self.core.uid)
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

impl TaskContainer for Vote {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::Vote(self.core.uid)
    }

    fn this_or_ancestor_group(&self) -> GroupId {
        self.core.ancestor_group
    }
}

impl Event for Vote {
    fn core(&self) -> &EventCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EventCore {
        &mut self.core
    }

    fn tags(&self) -> Vec<String> {
        self.content.to_tags()
    }
}
