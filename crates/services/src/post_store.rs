//! # Post Store
//!
//! Owns the post lifecycle: hydration of mixed-variant result sets, numbered
//! creation, privacy derivation on every save, scoped reads and the
//! lifecycle events. Lifecycle steps are explicit calls here; nothing fires
//! implicitly from the storage layer.

use std::sync::Arc;

use domains::{
    Actor, CommentPost, Condition, DiscussionRenamedPost, DiscussionRepository, Direction, Post,
    PostColumn, PostEvent, PostQuery, PostRepository, PostRow, RenameMerge, Result, StoreError,
    UntypedPost, Value,
};

use crate::bus::EventBus;
use crate::numbering::NumberingService;
use crate::registry::TypeRegistry;
use crate::visibility::VisibilityFilter;

/// Name of the global scope limiting reads to registered variants.
pub const REGISTERED_TYPES_SCOPE: &str = "registered_types";

pub struct PostStore {
    posts: Arc<dyn PostRepository>,
    discussions: Arc<dyn DiscussionRepository>,
    registry: Arc<TypeRegistry>,
    bus: Arc<EventBus>,
    numbering: NumberingService,
    visibility: VisibilityFilter,
}

impl PostStore {
    pub fn new(
        posts: Arc<dyn PostRepository>,
        discussions: Arc<dyn DiscussionRepository>,
        registry: Arc<TypeRegistry>,
        bus: Arc<EventBus>,
    ) -> Self {
        let visibility = VisibilityFilter::new(bus.clone());
        Self {
            posts,
            discussions,
            registry,
            bus,
            numbering: NumberingService,
            visibility,
        }
    }

    /// See [`VisibilityFilter::private_by_default`].
    pub fn private_by_default(mut self, private: bool) -> Self {
        self.visibility = self.visibility.private_by_default(private);
        self
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn visibility(&self) -> &VisibilityFilter {
        &self.visibility
    }

    /// A fresh query limited to rows whose `type` is registered.
    pub fn query(&self) -> PostQuery {
        let types = self
            .registry
            .registered_types()
            .into_iter()
            .map(Value::Text)
            .collect();
        PostQuery::new().with_global_scope(REGISTERED_TYPES_SCOPE, Condition::In(PostColumn::Type, types))
    }

    /// Lifts the registered-types scope so legacy and unknown rows come back
    /// as untyped posts.
    pub fn all_types(&self, query: PostQuery) -> PostQuery {
        query.without_global_scope(REGISTERED_TYPES_SCOPE)
    }

    pub fn visible_to(&self, query: PostQuery, actor: &Actor) -> PostQuery {
        self.visibility.scope_visible(query, actor)
    }

    /// Materializes a stored row as the variant its discriminator names,
    /// falling back to [`UntypedPost`] when the type is missing, unregistered
    /// or not loadable.
    pub fn hydrate(&self, row: PostRow) -> Post {
        let descriptor = row
            .post_type
            .as_deref()
            .and_then(|type_name| self.registry.resolve(type_name));

        let kind = match descriptor {
            Some(descriptor) => descriptor.hydrate(&row),
            None => {
                tracing::debug!(post_id = row.id, post_type = ?row.post_type, "unregistered post type");
                None
            }
        };

        match kind {
            Some(kind) => Post::from_row(row, kind),
            None => {
                if descriptor.is_some() {
                    tracing::warn!(post_id = row.id, post_type = ?row.post_type, "post could not be loaded as its type");
                }
                let untyped = UntypedPost {
                    stored_type: row.post_type.clone(),
                };
                Post::from_row(row, Arc::new(untyped))
            }
        }
    }

    pub async fn get(&self, query: &PostQuery) -> Result<Vec<Post>> {
        let rows = self.posts.fetch_posts(query).await?;
        Ok(rows.into_iter().map(|row| self.hydrate(row)).collect())
    }

    /// A single post `actor` may see.
    pub async fn find(&self, id: i64, actor: &Actor) -> Result<Post> {
        let query = self.visible_to(self.query().where_eq(PostColumn::Id, id), actor);
        self.get(&query)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::not_found("post", id))
    }

    pub async fn create(&self, mut post: Post, actor: &Actor) -> Result<Post> {
        self.save(&mut post, actor).await?;
        Ok(post)
    }

    /// Inserts new posts and updates existing ones. `is_private` is always
    /// recomputed; for new posts `type` and `number` are assigned here.
    pub async fn save(&self, post: &mut Post, actor: &Actor) -> Result<()> {
        if post.exists() {
            post.is_private = self.visibility.classify_private(post, actor);
            self.posts.update_post(post).await?;
            tracing::debug!(post_id = ?post.id, is_private = post.is_private, "post updated");
            return Ok(());
        }

        if let Err(err) = self.insert(post, actor).await {
            post.number = None;
            return Err(err);
        }
        self.bus.dispatch(&PostEvent::Posted(post.clone())).await;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(discussion_id = post.discussion_id, post_type = post.kind().type_name()))]
    async fn insert(&self, post: &mut Post, actor: &Actor) -> Result<()> {
        let type_name = post.kind().type_name().to_string();
        self.registry.require(&type_name)?;
        post.post_type = Some(type_name);

        let mut tx = self.posts.begin().await?;
        self.numbering.assign(tx.as_mut(), post).await?;
        post.is_private = self.visibility.classify_private(post, actor);
        let id = tx.insert_post(post).await?;
        tx.commit().await?;

        post.mark_persisted(id);
        tracing::info!(post_id = id, number = ?post.number, "post created");
        Ok(())
    }

    /// Permanently removes the post, then announces it exactly once.
    pub async fn delete(&self, post: Post) -> Result<()> {
        let id = post
            .id
            .ok_or_else(|| StoreError::Validation("cannot delete an unsaved post".into()))?;
        if !self.posts.delete_post(id).await? {
            return Err(StoreError::not_found("post", id));
        }
        tracing::info!(post_id = id, "post deleted");
        self.bus.dispatch(&PostEvent::Deleted(post)).await;
        Ok(())
    }

    pub async fn is_visible_to(&self, post: &Post, actor: &Actor) -> Result<bool> {
        self.visibility
            .is_visible_to(self.posts.as_ref(), self.query(), post, actor)
            .await
    }

    /// Edits a comment's body. Returns `false` when nothing changed.
    pub async fn revise(&self, post: &mut Post, content: &str, actor: &Actor) -> Result<bool> {
        if !CommentPost::revise(post, content, actor.id)? {
            return Ok(false);
        }
        self.save(post, actor).await?;
        self.bus.dispatch(&PostEvent::Revised(post.clone())).await;
        Ok(true)
    }

    pub async fn hide(&self, post: &mut Post, actor: &Actor) -> Result<bool> {
        if !CommentPost::hide(post, actor.id)? {
            return Ok(false);
        }
        self.save(post, actor).await?;
        self.bus.dispatch(&PostEvent::Hidden(post.clone())).await;
        Ok(true)
    }

    pub async fn restore(&self, post: &mut Post, actor: &Actor) -> Result<bool> {
        if !CommentPost::restore(post)? {
            return Ok(false);
        }
        self.save(post, actor).await?;
        self.bus.dispatch(&PostEvent::Restored(post.clone())).await;
        Ok(true)
    }

    /// Retitles a discussion and records it, folding into the discussion's
    /// last post when that is a rename by the same user. Returns the post
    /// that now carries the rename, or `None` when there is none (same
    /// title, or the rename undid the previous one).
    ///
    /// The title update and the rename post are separate writes: a failure
    /// in between leaves the new title without a rename post.
    pub async fn rename_discussion(
        &self,
        discussion_id: i64,
        title: &str,
        actor: &Actor,
    ) -> Result<Option<Post>> {
        let user_id = actor
            .id
            .ok_or_else(|| StoreError::Validation("guests cannot rename discussions".into()))?;
        let mut discussion = self
            .discussions
            .find_discussion(discussion_id)
            .await?
            .ok_or(StoreError::not_found("discussion", discussion_id))?;
        if discussion.title == title {
            return Ok(None);
        }

        let old_title = std::mem::replace(&mut discussion.title, title.to_string());
        self.discussions.update_discussion(&discussion).await?;
        let renamed = DiscussionRenamedPost::reply(discussion_id, user_id, old_title, title);

        let last = self
            .query()
            .where_eq(PostColumn::DiscussionId, discussion_id)
            .order_by(PostColumn::Number, Direction::Desc)
            .limit(1);
        if let Some(mut previous) = self.get(&last).await?.into_iter().next() {
            match DiscussionRenamedPost::merge(&mut previous, &renamed) {
                RenameMerge::Reverted => {
                    self.delete(previous).await?;
                    return Ok(None);
                }
                RenameMerge::Merged => {
                    self.save(&mut previous, actor).await?;
                    return Ok(Some(previous));
                }
                RenameMerge::Standalone => {}
            }
        }

        self.create(renamed, actor).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domains::{
        MockDiscussionRepository, MockPostRepository, PostListener, PostTransaction,
        COMMENT,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Transaction whose insert always hits a uniqueness violation.
    struct ConflictingTx {
        inserts: Arc<AtomicUsize>,
        commits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PostTransaction for ConflictingTx {
        async fn increment_number_index(&mut self, _discussion_id: i64) -> Result<i64> {
            Ok(1)
        }

        async fn insert_post(&mut self, _post: &Post) -> Result<i64> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Conflict("posts.discussion_id, posts.number".into()))
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl PostListener for Recorder {
        async fn handle(&self, event: &PostEvent) {
            self.0.lock().unwrap().push(event.name());
        }
    }

    fn store(posts: MockPostRepository, bus: EventBus) -> PostStore {
        PostStore::new(
            Arc::new(posts),
            Arc::new(MockDiscussionRepository::new()),
            Arc::new(TypeRegistry::with_defaults()),
            Arc::new(bus),
        )
    }

    fn existing_comment() -> Post {
        let row = PostRow {
            id: 10,
            discussion_id: 1,
            number: 3,
            time: chrono::Utc::now(),
            user_id: Some(2),
            post_type: Some(COMMENT.into()),
            content: Some("hello".into()),
            edit_time: None,
            edit_user_id: None,
            hide_time: None,
            hide_user_id: None,
            ip_address: None,
            is_private: false,
        };
        Post::from_row(row, Arc::new(CommentPost))
    }

    #[tokio::test]
    async fn duplicate_number_fails_creation_without_retry() {
        let inserts = Arc::new(AtomicUsize::new(0));
        let commits = Arc::new(AtomicUsize::new(0));
        let (i, c) = (inserts.clone(), commits.clone());

        let mut posts = MockPostRepository::new();
        posts.expect_begin().times(1).returning(move || {
            Ok(Box::new(ConflictingTx {
                inserts: i.clone(),
                commits: c.clone(),
            }) as Box<dyn PostTransaction>)
        });

        let recorder = Arc::new(Recorder::default());
        let mut bus = EventBus::new();
        bus.listen(recorder.clone());

        let mut post = CommentPost::reply(1, "hi", 2, None);
        let err = store(posts, bus).save(&mut post, &Actor::user(2)).await.unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(inserts.load(Ordering::SeqCst), 1);
        assert_eq!(commits.load(Ordering::SeqCst), 0);
        assert!(!post.exists());
        assert!(post.number.is_none());
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unregistered_variant_cannot_be_created() {
        let mut posts = MockPostRepository::new();
        posts.expect_begin().never();

        let post = Post::new(
            Arc::new(UntypedPost {
                stored_type: Some("poll".into()),
            }),
            1,
            Some(2),
            None,
        );
        let err = store(posts, EventBus::new())
            .create(post, &Actor::user(2))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::UnknownVariant("poll".into()));
    }

    #[tokio::test]
    async fn update_overwrites_caller_supplied_privacy() {
        let mut posts = MockPostRepository::new();
        posts
            .expect_update_post()
            .withf(|post| !post.is_private)
            .times(1)
            .returning(|_| Ok(()));

        let mut post = existing_comment();
        post.is_private = true;
        store(posts, EventBus::new())
            .save(&mut post, &Actor::user(2))
            .await
            .unwrap();
        assert!(!post.is_private);
    }

    #[tokio::test]
    async fn deleting_a_missing_row_fires_nothing() {
        let mut posts = MockPostRepository::new();
        posts.expect_delete_post().times(1).returning(|_| Ok(false));

        let recorder = Arc::new(Recorder::default());
        let mut bus = EventBus::new();
        bus.listen(recorder.clone());

        let err = store(posts, bus).delete(existing_comment()).await.unwrap_err();
        assert_eq!(err, StoreError::not_found("post", 10));
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_failures_propagate_from_reads() {
        let mut posts = MockPostRepository::new();
        posts
            .expect_fetch_posts()
            .returning(|_| Err(StoreError::Storage("pool timed out".into())));

        let err = store(posts, EventBus::new())
            .find(10, &Actor::guest())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Storage("pool timed out".into()));
    }

    #[tokio::test]
    async fn hiding_emits_hidden_after_saving() {
        let mut posts = MockPostRepository::new();
        posts
            .expect_update_post()
            .withf(|post| post.hide_user_id == Some(7))
            .times(1)
            .returning(|_| Ok(()));

        let recorder = Arc::new(Recorder::default());
        let mut bus = EventBus::new();
        bus.listen(recorder.clone());
        let store = store(posts, bus);

        let mut post = existing_comment();
        assert!(store.hide(&mut post, &Actor::user(7)).await.unwrap());
        assert!(!store.hide(&mut post, &Actor::user(7)).await.unwrap());
        assert_eq!(*recorder.0.lock().unwrap(), vec!["hidden"]);
    }

    #[test]
    fn default_query_carries_registered_types_scope() {
        let store = store(MockPostRepository::new(), EventBus::new());
        let query = store.query();
        assert!(query.has_global_scope(REGISTERED_TYPES_SCOPE));
        assert!(!store.all_types(query).has_global_scope(REGISTERED_TYPES_SCOPE));
    }
}
