//! # Ports
//!
//! Any storage adapter must implement the repository traits to back the
//! post store. The hook traits are implemented by policies and extensions
//! and registered with the service layer's event bus.

use async_trait::async_trait;

use crate::error::Result;
use crate::events::PostEvent;
use crate::models::{Actor, Discussion, Post, PostRow};
use crate::query::{DiscussionQuery, PostQuery};

/// Ability name passed to scopers for plain reads.
pub const VIEW: &str = "view";

/// Persistence contract for posts.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Opens a unit of work that serialises writers per discussion.
    async fn begin(&self) -> Result<Box<dyn PostTransaction>>;

    async fn fetch_posts(&self, query: &PostQuery) -> Result<Vec<PostRow>>;

    /// Writes the mutable columns of an existing post, `time` included, and
    /// the raw `ip_address` whatever the variant. `discussion_id`, `number`
    /// and `type` are never rewritten.
    async fn update_post(&self, post: &Post) -> Result<()>;

    /// Returns `false` when no row had that id.
    async fn delete_post(&self, id: i64) -> Result<bool>;
}

/// A storage transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait PostTransaction: Send {
    /// Bumps `discussions.number_index` and returns the new value.
    /// Fails with `NotFound` when the discussion does not exist.
    async fn increment_number_index(&mut self, discussion_id: i64) -> Result<i64>;

    /// Inserts a numbered post and returns its id.
    /// A duplicate `(discussion_id, number)` fails with `Conflict`.
    async fn insert_post(&mut self, post: &Post) -> Result<i64>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Persistence contract for the owning discussions.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DiscussionRepository: Send + Sync {
    async fn find_discussion(&self, id: i64) -> Result<Option<Discussion>>;
    async fn insert_discussion(&self, discussion: &Discussion) -> Result<i64>;
    /// Leaves `number_index` untouched; only [`PostTransaction`] advances it.
    async fn update_discussion(&self, discussion: &Discussion) -> Result<()>;
    async fn fetch_discussions(&self, query: &DiscussionQuery) -> Result<Vec<Discussion>>;
}

/// Votes on whether a post is private. `None` abstains.
pub trait PrivacyClassifier: Send + Sync {
    fn is_private(&self, post: &Post, actor: &Actor) -> Option<bool>;
}

impl<F> PrivacyClassifier for F
where
    F: Fn(&Post, &Actor) -> Option<bool> + Send + Sync,
{
    fn is_private(&self, post: &Post, actor: &Actor) -> Option<bool> {
        self(post, actor)
    }
}

/// Narrows reads to what an actor may see. Both methods default to
/// leaving the query untouched, so a scoper only overrides the model it cares about.
pub trait VisibilityScoper: Send + Sync {
    fn scope_posts(&self, query: PostQuery, _actor: &Actor, _ability: &str) -> PostQuery {
        query
    }

    fn scope_discussions(
        &self,
        query: DiscussionQuery,
        _actor: &Actor,
        _ability: &str,
    ) -> DiscussionQuery {
        query
    }
}

/// Receives lifecycle events; no response is expected.
#[async_trait]
pub trait PostListener: Send + Sync {
    async fn handle(&self, event: &PostEvent);
}
