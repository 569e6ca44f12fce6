//! # Post Variants
//!
//! A post's `type` column selects one of these at hydration time.
//! Variants are registered by name with the service layer's type registry;
//! the ones here ship with the store.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;

use crate::error::{Result, StoreError};
use crate::models::Post;

pub const COMMENT: &str = "comment";
pub const DISCUSSION_RENAMED: &str = "discussionRenamed";

/// Behaviour shared by every concrete post variant.
pub trait PostKind: Any + fmt::Debug + Send + Sync {
    /// Discriminator stored in the `type` column.
    fn type_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    /// Whether posts of this variant keep the author's IP address.
    fn records_ip_address(&self) -> bool {
        false
    }
}

/// A regular reply written by a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommentPost;

impl PostKind for CommentPost {
    fn type_name(&self) -> &str {
        COMMENT
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn records_ip_address(&self) -> bool {
        true
    }
}

impl CommentPost {
    pub fn reply(
        discussion_id: i64,
        content: impl Into<String>,
        user_id: i64,
        ip_address: Option<String>,
    ) -> Post {
        let mut post = Post::new(
            Arc::new(CommentPost),
            discussion_id,
            Some(user_id),
            Some(content.into()),
        );
        post.ip_address = ip_address;
        post
    }

    /// Replaces the body and stamps the edit audit pair.
    /// Returns `false` when the content is unchanged.
    pub fn revise(post: &mut Post, content: impl Into<String>, actor_id: Option<i64>) -> Result<bool> {
        Self::ensure(post)?;
        let content = content.into();
        if post.content.as_deref() == Some(content.as_str()) {
            return Ok(false);
        }
        post.content = Some(content);
        post.edit_time = Some(Utc::now());
        post.edit_user_id = actor_id;
        Ok(true)
    }

    /// Returns `false` when the post was already hidden.
    pub fn hide(post: &mut Post, actor_id: Option<i64>) -> Result<bool> {
        Self::ensure(post)?;
        if post.is_hidden() {
            return Ok(false);
        }
        post.hide_time = Some(Utc::now());
        post.hide_user_id = actor_id;
        Ok(true)
    }

    /// Returns `false` when the post was not hidden.
    pub fn restore(post: &mut Post) -> Result<bool> {
        Self::ensure(post)?;
        if !post.is_hidden() {
            return Ok(false);
        }
        post.hide_time = None;
        post.hide_user_id = None;
        Ok(true)
    }

    fn ensure(post: &Post) -> Result<()> {
        if post.is_kind::<CommentPost>() {
            Ok(())
        } else {
            Err(StoreError::Validation(format!(
                "post of type {:?} is not a comment",
                post.kind().type_name()
            )))
        }
    }
}

/// Event post recording a discussion title change.
/// Stored content is the JSON array `[old_title, new_title]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscussionRenamedPost {
    pub old_title: String,
    pub new_title: String,
}

/// What happened when a rename was folded into the previous post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameMerge {
    /// Previous post is unrelated; the rename gets its own post.
    Standalone,
    /// Previous rename now spans both changes and must be saved.
    Merged,
    /// The rename undoes the previous one; the previous post must be deleted.
    Reverted,
}

impl PostKind for DiscussionRenamedPost {
    fn type_name(&self) -> &str {
        DISCUSSION_RENAMED
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl DiscussionRenamedPost {
    pub fn reply(
        discussion_id: i64,
        user_id: i64,
        old_title: impl Into<String>,
        new_title: impl Into<String>,
    ) -> Post {
        let kind = Self {
            old_title: old_title.into(),
            new_title: new_title.into(),
        };
        let content = kind.encode();
        Post::new(Arc::new(kind), discussion_id, Some(user_id), Some(content))
    }

    /// Decodes stored content; `None` when it is not a two-string array.
    pub fn from_content(content: &str) -> Option<Self> {
        let [old_title, new_title]: [String; 2] = serde_json::from_str(content).ok()?;
        Some(Self { old_title, new_title })
    }

    pub fn encode(&self) -> String {
        serde_json::json!([self.old_title, self.new_title]).to_string()
    }

    /// Folds `next` into `previous` when both are renames by the same user.
    pub fn merge(previous: &mut Post, next: &Post) -> RenameMerge {
        let (Some(prev), Some(incoming)) = (
            previous.kind_as::<DiscussionRenamedPost>(),
            next.kind_as::<DiscussionRenamedPost>(),
        ) else {
            return RenameMerge::Standalone;
        };
        if previous.user_id != next.user_id {
            return RenameMerge::Standalone;
        }
        if prev.old_title == incoming.new_title {
            return RenameMerge::Reverted;
        }

        let combined = Self {
            old_title: prev.old_title.clone(),
            new_title: incoming.new_title.clone(),
        };
        previous.content = Some(combined.encode());
        previous.time = next.time;
        previous.replace_kind(Arc::new(combined));
        RenameMerge::Merged
    }
}

/// Fallback for rows whose discriminator is unknown, missing, or unloadable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UntypedPost {
    /// The discriminator as it was stored, if any
    pub stored_type: Option<String>,
}

impl PostKind for UntypedPost {
    fn type_name(&self) -> &str {
        self.stored_type.as_deref().unwrap_or_default()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
