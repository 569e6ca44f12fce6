//! # Visibility Filter
//!
//! Privacy classification at save time and read scoping at query time,
//! both driven by the hooks registered on the [`EventBus`].

use std::sync::Arc;

use domains::{
    Actor, DiscussionQuery, Post, PostColumn, PostQuery, PostRepository, Result, VIEW,
};

use crate::bus::EventBus;

#[derive(Debug, Clone)]
pub struct VisibilityFilter {
    bus: Arc<EventBus>,
    private_by_default: bool,
}

impl VisibilityFilter {
    /// Posts nobody votes on are public.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            private_by_default: false,
        }
    }

    /// Answer used when no classifier decides.
    pub fn private_by_default(mut self, private: bool) -> Self {
        self.private_by_default = private;
        self
    }

    /// Never fails: an undecided vote yields the configured default.
    pub fn classify_private(&self, post: &Post, actor: &Actor) -> bool {
        match self.bus.until_decided(post, actor) {
            Some(decision) => decision,
            None => self.private_by_default,
        }
    }

    /// Narrows `query` to posts `actor` may see whose discussion they may
    /// also see.
    pub fn scope_visible(&self, query: PostQuery, actor: &Actor) -> PostQuery {
        let query = self.bus.scope_posts(query, actor, VIEW);
        let discussions = self.scope_discussions(DiscussionQuery::new(), actor);
        query.where_discussion_exists(discussions)
    }

    pub fn scope_discussions(&self, query: DiscussionQuery, actor: &Actor) -> DiscussionQuery {
        self.bus.scope_discussions(query, actor, VIEW)
    }

    /// Re-runs the scoped read for this one post instead of trusting any
    /// cached flag; unsaved posts are never visible.
    pub async fn is_visible_to(
        &self,
        posts: &dyn PostRepository,
        base: PostQuery,
        post: &Post,
        actor: &Actor,
    ) -> Result<bool> {
        let Some(id) = post.id else {
            return Ok(false);
        };
        let query = self.scope_visible(base, actor).where_eq(PostColumn::Id, id).limit(1);
        let rows = posts.fetch_posts(&query).await?;
        Ok(rows.iter().any(|row| row.id == id))
    }
}
