//! # Domain Models
//!
//! These structs represent the entities the post store works with.
//! Ids are backend-assigned integers; `None` means "not persisted yet".

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::variants::PostKind;

/// Raw shape of a row in the `posts` table, exactly as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRow {
    pub id: i64,
    pub discussion_id: i64,
    pub number: i64,
    pub time: DateTime<Utc>,
    pub user_id: Option<i64>,
    /// Discriminator naming the variant that produced the row
    #[serde(rename = "type")]
    pub post_type: Option<String>,
    pub content: Option<String>,
    pub edit_time: Option<DateTime<Utc>>,
    pub edit_user_id: Option<i64>,
    pub hide_time: Option<DateTime<Utc>>,
    pub hide_user_id: Option<i64>,
    pub ip_address: Option<String>,
    pub is_private: bool,
}

/// A hydrated post: the stored columns plus the concrete variant behind them.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: Option<i64>,
    pub discussion_id: i64,
    /// Position within the discussion, assigned once on creation
    pub number: Option<i64>,
    pub time: DateTime<Utc>,
    /// Author; `None` for system posts or deleted users
    pub user_id: Option<i64>,
    pub post_type: Option<String>,
    pub content: Option<String>,
    pub edit_time: Option<DateTime<Utc>>,
    pub edit_user_id: Option<i64>,
    pub hide_time: Option<DateTime<Utc>>,
    pub hide_user_id: Option<i64>,
    pub ip_address: Option<String>,
    /// Derived on every save; whatever a caller puts here is overwritten
    pub is_private: bool,
    kind: Arc<dyn PostKind>,
    exists: bool,
}

impl Post {
    /// Builds a new, unsaved post of the given variant.
    /// `post_type` and `number` stay empty until the store creates it.
    pub fn new(
        kind: Arc<dyn PostKind>,
        discussion_id: i64,
        user_id: Option<i64>,
        content: Option<String>,
    ) -> Self {
        Self {
            id: None,
            discussion_id,
            number: None,
            time: Utc::now(),
            user_id,
            post_type: None,
            content,
            edit_time: None,
            edit_user_id: None,
            hide_time: None,
            hide_user_id: None,
            ip_address: None,
            is_private: false,
            kind,
            exists: false,
        }
    }

    /// Copies every stored column onto a post of the given variant and marks
    /// it as existing, so a later save updates rather than inserts.
    pub fn from_row(row: PostRow, kind: Arc<dyn PostKind>) -> Self {
        Self {
            id: Some(row.id),
            discussion_id: row.discussion_id,
            number: Some(row.number),
            time: row.time,
            user_id: row.user_id,
            post_type: row.post_type,
            content: row.content,
            edit_time: row.edit_time,
            edit_user_id: row.edit_user_id,
            hide_time: row.hide_time,
            hide_user_id: row.hide_user_id,
            ip_address: row.ip_address,
            is_private: row.is_private,
            kind,
            exists: true,
        }
    }

    pub fn kind(&self) -> &dyn PostKind {
        self.kind.as_ref()
    }

    /// Downcasts the variant, e.g. `post.kind_as::<CommentPost>()`.
    pub fn kind_as<T: PostKind>(&self) -> Option<&T> {
        self.kind.as_any().downcast_ref::<T>()
    }

    pub fn is_kind<T: PostKind>(&self) -> bool {
        self.kind_as::<T>().is_some()
    }

    /// Whether the record has been written to storage.
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Called by the store once the backend has assigned an id.
    pub fn mark_persisted(&mut self, id: i64) {
        self.id = Some(id);
        self.exists = true;
    }

    /// The author's address, exposed only by variants that record one.
    pub fn ip_address(&self) -> Option<&str> {
        if self.kind.records_ip_address() {
            self.ip_address.as_deref()
        } else {
            None
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.hide_time.is_some()
    }

    pub(crate) fn replace_kind(&mut self, kind: Arc<dyn PostKind>) {
        self.kind = kind;
    }
}

/// The owning discussion. Only the columns posts depend on are modelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discussion {
    pub id: Option<i64>,
    pub title: String,
    pub start_user_id: Option<i64>,
    pub start_time: DateTime<Utc>,
    /// Number handed to the most recently created post
    pub number_index: i64,
    pub is_private: bool,
    pub hide_time: Option<DateTime<Utc>>,
}

impl Discussion {
    pub fn new(title: impl Into<String>, start_user_id: Option<i64>) -> Self {
        Self {
            id: None,
            title: title.into(),
            start_user_id,
            start_time: Utc::now(),
            number_index: 0,
            is_private: false,
            hide_time: None,
        }
    }
}

/// The user on whose behalf a read or write happens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    /// `None` for guests
    pub id: Option<i64>,
    permissions: BTreeSet<String>,
}

impl Actor {
    pub fn guest() -> Self {
        Self::default()
    }

    pub fn user(id: i64) -> Self {
        Self {
            id: Some(id),
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn is_guest(&self) -> bool {
        self.id.is_none()
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}
