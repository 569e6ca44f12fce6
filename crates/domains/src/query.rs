//! # Query Objects
//!
//! Backend-neutral descriptions of a read. Visibility hooks narrow them in
//! place; storage adapters either render them to SQL or evaluate them against
//! in-memory rows with [`Condition::matches`].
//!
//! Conditions use two-valued logic: a comparison against a NULL column is
//! false, and `Not` of it is true. Adapters must preserve that.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::models::{Discussion, PostRow};

/// A bound value in a condition.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum Value {
    Int(i64),
    Text(String),
    Bool(bool),
    Time(DateTime<Utc>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Time(v)
    }
}

/// Columns of the `posts` table that queries may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PostColumn {
    Id,
    DiscussionId,
    Number,
    Time,
    UserId,
    Type,
    EditTime,
    EditUserId,
    HideTime,
    HideUserId,
    IsPrivate,
}

impl PostColumn {
    pub fn name(self) -> &'static str {
        match self {
            PostColumn::Id => "id",
            PostColumn::DiscussionId => "discussion_id",
            PostColumn::Number => "number",
            PostColumn::Time => "time",
            PostColumn::UserId => "user_id",
            PostColumn::Type => "type",
            PostColumn::EditTime => "edit_time",
            PostColumn::EditUserId => "edit_user_id",
            PostColumn::HideTime => "hide_time",
            PostColumn::HideUserId => "hide_user_id",
            PostColumn::IsPrivate => "is_private",
        }
    }
}

/// Columns of the `discussions` table that queries may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiscussionColumn {
    Id,
    StartUserId,
    NumberIndex,
    IsPrivate,
    HideTime,
}

impl DiscussionColumn {
    pub fn name(self) -> &'static str {
        match self {
            DiscussionColumn::Id => "id",
            DiscussionColumn::StartUserId => "start_user_id",
            DiscussionColumn::NumberIndex => "number_index",
            DiscussionColumn::IsPrivate => "is_private",
            DiscussionColumn::HideTime => "hide_time",
        }
    }
}

/// Read access to a record's columns for in-memory evaluation.
pub trait Columns<C> {
    fn column(&self, column: C) -> Option<Value>;
}

impl Columns<PostColumn> for PostRow {
    fn column(&self, column: PostColumn) -> Option<Value> {
        match column {
            PostColumn::Id => Some(Value::Int(self.id)),
            PostColumn::DiscussionId => Some(Value::Int(self.discussion_id)),
            PostColumn::Number => Some(Value::Int(self.number)),
            PostColumn::Time => Some(Value::Time(self.time)),
            PostColumn::UserId => self.user_id.map(Value::Int),
            PostColumn::Type => self.post_type.clone().map(Value::Text),
            PostColumn::EditTime => self.edit_time.map(Value::Time),
            PostColumn::EditUserId => self.edit_user_id.map(Value::Int),
            PostColumn::HideTime => self.hide_time.map(Value::Time),
            PostColumn::HideUserId => self.hide_user_id.map(Value::Int),
            PostColumn::IsPrivate => Some(Value::Bool(self.is_private)),
        }
    }
}

impl Columns<DiscussionColumn> for Discussion {
    fn column(&self, column: DiscussionColumn) -> Option<Value> {
        match column {
            DiscussionColumn::Id => self.id.map(Value::Int),
            DiscussionColumn::StartUserId => self.start_user_id.map(Value::Int),
            DiscussionColumn::NumberIndex => Some(Value::Int(self.number_index)),
            DiscussionColumn::IsPrivate => Some(Value::Bool(self.is_private)),
            DiscussionColumn::HideTime => self.hide_time.map(Value::Time),
        }
    }
}

/// A predicate over one table's columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition<C> {
    Eq(C, Value),
    In(C, Vec<Value>),
    IsNull(C),
    NotNull(C),
    All(Vec<Condition<C>>),
    Any(Vec<Condition<C>>),
    Not(Box<Condition<C>>),
}

impl<C: Copy> Condition<C> {
    pub fn equals(column: C, value: impl Into<Value>) -> Self {
        Condition::Eq(column, value.into())
    }

    pub fn negate(self) -> Self {
        Condition::Not(Box::new(self))
    }

    pub fn matches<R: Columns<C>>(&self, record: &R) -> bool {
        match self {
            Condition::Eq(column, value) => record.column(*column).as_ref() == Some(value),
            Condition::In(column, values) => record
                .column(*column)
                .is_some_and(|v| values.contains(&v)),
            Condition::IsNull(column) => record.column(*column).is_none(),
            Condition::NotNull(column) => record.column(*column).is_some(),
            Condition::All(conditions) => conditions.iter().all(|c| c.matches(record)),
            Condition::Any(conditions) => conditions.iter().any(|c| c.matches(record)),
            Condition::Not(condition) => !condition.matches(record),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// A read against `discussions`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscussionQuery {
    pub conditions: Vec<Condition<DiscussionColumn>>,
}

impl DiscussionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, condition: Condition<DiscussionColumn>) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn matches(&self, discussion: &Discussion) -> bool {
        self.conditions.iter().all(|c| c.matches(discussion))
    }
}

/// A read against `posts`.
///
/// Global scopes are named conditions the store attaches to every query;
/// removing one by name survives a later attempt to re-add it.
#[derive(Debug, Clone, PartialEq)]
pub struct PostQuery {
    conditions: Vec<Condition<PostColumn>>,
    discussion_exists: Vec<DiscussionQuery>,
    global_scopes: BTreeMap<String, Condition<PostColumn>>,
    removed_scopes: BTreeSet<String>,
    order: Vec<(PostColumn, Direction)>,
    limit: Option<i64>,
}

impl Default for PostQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl PostQuery {
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
            discussion_exists: Vec::new(),
            global_scopes: BTreeMap::new(),
            removed_scopes: BTreeSet::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, condition: Condition<PostColumn>) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn where_eq(self, column: PostColumn, value: impl Into<Value>) -> Self {
        self.filter(Condition::equals(column, value))
    }

    /// Requires the owning discussion to satisfy `query`
    /// (a correlated `EXISTS` on `discussions.id = posts.discussion_id`).
    pub fn where_discussion_exists(mut self, query: DiscussionQuery) -> Self {
        self.discussion_exists.push(query);
        self
    }

    pub fn with_global_scope(mut self, name: impl Into<String>, condition: Condition<PostColumn>) -> Self {
        let name = name.into();
        if !self.removed_scopes.contains(&name) {
            self.global_scopes.insert(name, condition);
        }
        self
    }

    pub fn without_global_scope(mut self, name: &str) -> Self {
        self.global_scopes.remove(name);
        self.removed_scopes.insert(name.to_string());
        self
    }

    pub fn has_global_scope(&self, name: &str) -> bool {
        self.global_scopes.contains_key(name)
    }

    pub fn order_by(mut self, column: PostColumn, direction: Direction) -> Self {
        self.order.push((column, direction));
        self
    }

    /// Negative limits are clamped to zero rows.
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit.max(0));
        self
    }

    /// Explicit conditions followed by active global scopes.
    pub fn conditions(&self) -> impl Iterator<Item = &Condition<PostColumn>> {
        self.conditions.iter().chain(self.global_scopes.values())
    }

    pub fn discussion_constraints(&self) -> &[DiscussionQuery] {
        &self.discussion_exists
    }

    pub fn ordering(&self) -> &[(PostColumn, Direction)] {
        &self.order
    }

    pub fn max_rows(&self) -> Option<i64> {
        self.limit
    }

    /// Evaluates the post-level conditions only; the caller resolves
    /// discussion constraints against the owning discussion.
    pub fn matches_row(&self, row: &PostRow) -> bool {
        self.conditions().all(|c| c.matches(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, post_type: Option<&str>, user_id: Option<i64>) -> PostRow {
        PostRow {
            id,
            discussion_id: 1,
            number: id,
            time: Utc::now(),
            user_id,
            post_type: post_type.map(str::to_string),
            content: None,
            edit_time: None,
            edit_user_id: None,
            hide_time: None,
            hide_user_id: None,
            ip_address: None,
            is_private: false,
        }
    }

    #[test]
    fn comparisons_against_null_are_false_and_negate_to_true() {
        let legacy = row(1, None, None);
        let typed = Condition::In(PostColumn::Type, vec!["comment".into()]);
        assert!(!typed.matches(&legacy));
        assert!(typed.clone().negate().matches(&legacy));

        let by_author = Condition::equals(PostColumn::UserId, 3_i64);
        assert!(!by_author.matches(&legacy));
        assert!(by_author.negate().matches(&legacy));
    }

    #[test]
    fn removed_global_scope_cannot_be_reattached() {
        let scope = Condition::In(PostColumn::Type, vec!["comment".into()]);
        let query = PostQuery::new()
            .with_global_scope("types", scope.clone())
            .without_global_scope("types")
            .with_global_scope("types", scope);

        assert!(!query.has_global_scope("types"));
        assert!(query.matches_row(&row(1, Some("legacy"), Some(1))));
    }

    #[test]
    fn global_scopes_combine_with_explicit_conditions() {
        let query = PostQuery::new()
            .where_eq(PostColumn::UserId, 3_i64)
            .with_global_scope("types", Condition::In(PostColumn::Type, vec!["comment".into()]));

        assert!(query.matches_row(&row(1, Some("comment"), Some(3))));
        assert!(!query.matches_row(&row(2, Some("comment"), Some(4))));
        assert!(!query.matches_row(&row(3, Some("other"), Some(3))));
    }

    #[test]
    fn negative_limit_means_no_rows() {
        assert_eq!(PostQuery::new().limit(-1).max_rows(), Some(0));
        assert_eq!(PostQuery::new().limit(3).max_rows(), Some(3));
    }

    #[test]
    fn any_of_nothing_matches_nothing() {
        let r = row(1, Some("comment"), Some(3));
        assert!(!Condition::<PostColumn>::Any(vec![]).matches(&r));
        assert!(Condition::<PostColumn>::All(vec![]).matches(&r));
    }
}
