//! # Event Bus
//!
//! Ordered hook lists consulted by the post store. Registration takes
//! `&mut self`, so hooks are installed during startup before the bus is
//! shared; call order is registration order.

use std::fmt;
use std::sync::Arc;

use domains::{
    Actor, DiscussionQuery, Post, PostEvent, PostListener, PostQuery, PrivacyClassifier,
    VisibilityScoper,
};

#[derive(Default)]
pub struct EventBus {
    classifiers: Vec<Arc<dyn PrivacyClassifier>>,
    scopers: Vec<Arc<dyn VisibilityScoper>>,
    listeners: Vec<Arc<dyn PostListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_privacy(&mut self, classifier: impl PrivacyClassifier + 'static) -> &mut Self {
        self.classifiers.push(Arc::new(classifier));
        self
    }

    pub fn on_visibility(&mut self, scoper: impl VisibilityScoper + 'static) -> &mut Self {
        self.scopers.push(Arc::new(scoper));
        self
    }

    pub fn listen(&mut self, listener: Arc<dyn PostListener>) -> &mut Self {
        self.listeners.push(listener);
        self
    }

    /// Asks classifiers in order and stops at the first definite answer.
    pub fn until_decided(&self, post: &Post, actor: &Actor) -> Option<bool> {
        self.classifiers
            .iter()
            .find_map(|classifier| classifier.is_private(post, actor))
    }

    /// Threads the query through every scoper.
    pub fn scope_posts(&self, query: PostQuery, actor: &Actor, ability: &str) -> PostQuery {
        self.scopers
            .iter()
            .fold(query, |query, scoper| scoper.scope_posts(query, actor, ability))
    }

    pub fn scope_discussions(
        &self,
        query: DiscussionQuery,
        actor: &Actor,
        ability: &str,
    ) -> DiscussionQuery {
        self.scopers
            .iter()
            .fold(query, |query, scoper| scoper.scope_discussions(query, actor, ability))
    }

    /// Fan-out to every listener; listeners cannot fail the write.
    pub async fn dispatch(&self, event: &PostEvent) {
        tracing::debug!(
            event = event.name(),
            post_id = ?event.post().id,
            listeners = self.listeners.len(),
            "dispatching post event"
        );
        for listener in &self.listeners {
            listener.handle(event).await;
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("classifiers", &self.classifiers.len())
            .field("scopers", &self.scopers.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{CommentPost, Condition, PostColumn};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn first_definite_vote_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let after = calls.clone();

        let mut bus = EventBus::new();
        bus.on_privacy(|_: &Post, _: &Actor| -> Option<bool> { None })
            .on_privacy(|_: &Post, _: &Actor| -> Option<bool> { Some(true) })
            .on_privacy(move |_: &Post, _: &Actor| -> Option<bool> {
                after.fetch_add(1, Ordering::SeqCst);
                Some(false)
            });

        let post = CommentPost::reply(1, "hi", 1, None);
        assert_eq!(bus.until_decided(&post, &Actor::guest()), Some(true));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn no_classifiers_means_no_decision() {
        let post = CommentPost::reply(1, "hi", 1, None);
        assert_eq!(EventBus::new().until_decided(&post, &Actor::guest()), None);
    }

    struct OnlyAuthor(i64);

    impl VisibilityScoper for OnlyAuthor {
        fn scope_posts(&self, query: PostQuery, _actor: &Actor, _ability: &str) -> PostQuery {
            query.where_eq(PostColumn::UserId, self.0)
        }
    }

    #[test]
    fn scopers_compose_in_registration_order() {
        let mut bus = EventBus::new();
        bus.on_visibility(OnlyAuthor(1)).on_visibility(OnlyAuthor(2));

        let scoped = bus.scope_posts(PostQuery::new(), &Actor::guest(), "view");
        let conditions: Vec<_> = scoped.conditions().cloned().collect();
        assert_eq!(
            conditions,
            vec![
                Condition::equals(PostColumn::UserId, 1_i64),
                Condition::equals(PostColumn::UserId, 2_i64),
            ]
        );

        // Post-only scopers leave discussion queries alone.
        let discussions = bus.scope_discussions(DiscussionQuery::new(), &Actor::guest(), "view");
        assert!(discussions.conditions.is_empty());
    }
}
