//! Built-in visibility policies for hidden and private content.

use domains::{
    Actor, Condition, DiscussionColumn, DiscussionQuery, PostColumn, PostQuery, VisibilityScoper,
};

use crate::bus::EventBus;

/// May see hidden posts in any discussion.
pub const HIDE_POSTS: &str = "discussion.hidePosts";
/// May see hidden discussions.
pub const HIDE_DISCUSSIONS: &str = "discussion.hide";
/// May see posts and discussions classified as private.
pub const VIEW_PRIVATE: &str = "viewPrivate";

/// Installs both policies, hidden content first.
pub fn register_defaults(bus: &mut EventBus) {
    bus.on_visibility(HiddenContentPolicy)
        .on_visibility(PrivateContentPolicy);
}

/// Hidden content stays visible to whoever wrote it and to moderators.
#[derive(Debug, Clone, Copy, Default)]
pub struct HiddenContentPolicy;

impl VisibilityScoper for HiddenContentPolicy {
    fn scope_posts(&self, query: PostQuery, actor: &Actor, _ability: &str) -> PostQuery {
        if actor.has_permission(HIDE_POSTS) {
            return query;
        }
        query.filter(own_or(
            Condition::IsNull(PostColumn::HideTime),
            PostColumn::UserId,
            actor,
        ))
    }

    fn scope_discussions(
        &self,
        query: DiscussionQuery,
        actor: &Actor,
        _ability: &str,
    ) -> DiscussionQuery {
        if actor.has_permission(HIDE_DISCUSSIONS) {
            return query;
        }
        query.filter(own_or(
            Condition::IsNull(DiscussionColumn::HideTime),
            DiscussionColumn::StartUserId,
            actor,
        ))
    }
}

/// Private content stays visible to its author and to `viewPrivate` holders.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrivateContentPolicy;

impl VisibilityScoper for PrivateContentPolicy {
    fn scope_posts(&self, query: PostQuery, actor: &Actor, _ability: &str) -> PostQuery {
        if actor.has_permission(VIEW_PRIVATE) {
            return query;
        }
        query.filter(own_or(
            Condition::equals(PostColumn::IsPrivate, false),
            PostColumn::UserId,
            actor,
        ))
    }

    fn scope_discussions(
        &self,
        query: DiscussionQuery,
        actor: &Actor,
        _ability: &str,
    ) -> DiscussionQuery {
        if actor.has_permission(VIEW_PRIVATE) {
            return query;
        }
        query.filter(own_or(
            Condition::equals(DiscussionColumn::IsPrivate, false),
            DiscussionColumn::StartUserId,
            actor,
        ))
    }
}

/// `visible OR owner = actor`; guests only get `visible`.
fn own_or<C: Copy>(visible: Condition<C>, owner: C, actor: &Actor) -> Condition<C> {
    match actor.id {
        Some(id) => Condition::Any(vec![visible, Condition::equals(owner, id)]),
        None => visible,
    }
}
