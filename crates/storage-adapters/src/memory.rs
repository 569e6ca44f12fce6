//! In-process implementation of the repository ports.
//!
//! All state sits behind one async mutex. A transaction holds the lock for
//! its whole lifetime and works on a staged copy, which replaces the live
//! state only on commit, so writers are serialised and rollback is a drop.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use domains::{
    Columns, Direction, Discussion, DiscussionQuery, DiscussionRepository, Post, PostQuery,
    PostRepository, PostRow, PostTransaction, Result, StoreError,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    posts: BTreeMap<i64, PostRow>,
    discussions: BTreeMap<i64, Discussion>,
    last_post_id: i64,
    last_discussion_id: i64,
}

impl MemoryState {
    fn insert_row(&mut self, row: PostRow) -> Result<i64> {
        if !self.discussions.contains_key(&row.discussion_id) {
            return Err(StoreError::not_found("discussion", row.discussion_id));
        }
        let taken = self
            .posts
            .values()
            .any(|existing| existing.discussion_id == row.discussion_id && existing.number == row.number);
        if taken || self.posts.contains_key(&row.id) {
            return Err(StoreError::Conflict(format!(
                "post number {} already used in discussion {}",
                row.number, row.discussion_id
            )));
        }
        let id = row.id;
        self.last_post_id = self.last_post_id.max(id);
        self.posts.insert(id, row);
        Ok(id)
    }

    fn visible(&self, query: &PostQuery, row: &PostRow) -> bool {
        query.matches_row(row)
            && query.discussion_constraints().iter().all(|constraint| {
                self.discussions
                    .get(&row.discussion_id)
                    .is_some_and(|discussion| constraint.matches(discussion))
            })
    }
}

/// Converts a numbered post into its stored shape.
fn to_row(post: &Post, id: i64) -> Result<PostRow> {
    let number = post
        .number
        .ok_or_else(|| StoreError::Validation("post has no number".into()))?;
    Ok(PostRow {
        id,
        discussion_id: post.discussion_id,
        number,
        time: post.time,
        user_id: post.user_id,
        post_type: post.post_type.clone(),
        content: post.content.clone(),
        edit_time: post.edit_time,
        edit_user_id: post.edit_user_id,
        hide_time: post.hide_time,
        hide_user_id: post.hide_user_id,
        ip_address: post.ip_address().map(str::to_string),
        is_private: post.is_private,
    })
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a row verbatim, skipping numbering and type checks.
    /// Used to seed legacy or foreign rows.
    pub async fn insert_raw(&self, row: PostRow) -> Result<i64> {
        self.state.lock().await.insert_row(row)
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl PostTransaction for MemoryTransaction {
    async fn increment_number_index(&mut self, discussion_id: i64) -> Result<i64> {
        let discussion = self
            .staged
            .discussions
            .get_mut(&discussion_id)
            .ok_or(StoreError::not_found("discussion", discussion_id))?;
        discussion.number_index += 1;
        Ok(discussion.number_index)
    }

    async fn insert_post(&mut self, post: &Post) -> Result<i64> {
        let id = self.staged.last_post_id + 1;
        let row = to_row(post, id)?;
        self.staged.insert_row(row)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

#[async_trait]
impl PostRepository for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn PostTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, staged }))
    }

    async fn fetch_posts(&self, query: &PostQuery) -> Result<Vec<PostRow>> {
        let state = self.state.lock().await;
        let mut rows: Vec<PostRow> = state
            .posts
            .values()
            .filter(|row| state.visible(query, row))
            .cloned()
            .collect();

        for &(column, direction) in query.ordering().iter().rev() {
            rows.sort_by(|a, b| {
                let ord = a
                    .column(column)
                    .partial_cmp(&b.column(column))
                    .unwrap_or(Ordering::Equal);
                match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }
        if let Some(limit) = query.max_rows() {
            rows.truncate(usize::try_from(limit).unwrap_or(0));
        }
        Ok(rows)
    }

    async fn update_post(&self, post: &Post) -> Result<()> {
        let id = post
            .id
            .ok_or_else(|| StoreError::Validation("post has no id".into()))?;
        let mut state = self.state.lock().await;
        let row = state
            .posts
            .get_mut(&id)
            .ok_or(StoreError::not_found("post", id))?;
        row.time = post.time;
        row.user_id = post.user_id;
        row.content = post.content.clone();
        row.edit_time = post.edit_time;
        row.edit_user_id = post.edit_user_id;
        row.hide_time = post.hide_time;
        row.hide_user_id = post.hide_user_id;
        row.ip_address = post.ip_address.clone();
        row.is_private = post.is_private;
        Ok(())
    }

    async fn delete_post(&self, id: i64) -> Result<bool> {
        Ok(self.state.lock().await.posts.remove(&id).is_some())
    }
}

#[async_trait]
impl DiscussionRepository for MemoryStore {
    async fn find_discussion(&self, id: i64) -> Result<Option<Discussion>> {
        Ok(self.state.lock().await.discussions.get(&id).cloned())
    }

    async fn insert_discussion(&self, discussion: &Discussion) -> Result<i64> {
        let mut state = self.state.lock().await;
        state.last_discussion_id += 1;
        let id = state.last_discussion_id;
        let mut stored = discussion.clone();
        stored.id = Some(id);
        state.discussions.insert(id, stored);
        Ok(id)
    }

    async fn update_discussion(&self, discussion: &Discussion) -> Result<()> {
        let id = discussion
            .id
            .ok_or_else(|| StoreError::Validation("discussion has no id".into()))?;
        let mut state = self.state.lock().await;
        let stored = state
            .discussions
            .get_mut(&id)
            .ok_or(StoreError::not_found("discussion", id))?;
        // number_index belongs to the numbering transaction
        stored.title = discussion.title.clone();
        stored.start_user_id = discussion.start_user_id;
        stored.is_private = discussion.is_private;
        stored.hide_time = discussion.hide_time;
        Ok(())
    }

    async fn fetch_discussions(&self, query: &DiscussionQuery) -> Result<Vec<Discussion>> {
        let state = self.state.lock().await;
        Ok(state
            .discussions
            .values()
            .filter(|discussion| query.matches(discussion))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{CommentPost, PostColumn};

    async fn store_with_discussion() -> (MemoryStore, i64) {
        let store = MemoryStore::new();
        let id = store
            .insert_discussion(&Discussion::new("General", Some(1)))
            .await
            .unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back_counter() {
        let (store, discussion_id) = store_with_discussion().await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.increment_number_index(discussion_id).await.unwrap(), 1);
        drop(tx);

        let discussion = store.find_discussion(discussion_id).await.unwrap().unwrap();
        assert_eq!(discussion.number_index, 0);
    }

    #[tokio::test]
    async fn committed_transaction_persists_counter_and_post() {
        let (store, discussion_id) = store_with_discussion().await;

        let mut post = CommentPost::reply(discussion_id, "hi", 1, None);
        let mut tx = store.begin().await.unwrap();
        post.number = Some(tx.increment_number_index(discussion_id).await.unwrap());
        let id = tx.insert_post(&post).await.unwrap();
        tx.commit().await.unwrap();

        let discussion = store.find_discussion(discussion_id).await.unwrap().unwrap();
        assert_eq!(discussion.number_index, 1);
        let rows = store
            .fetch_posts(&PostQuery::new().where_eq(PostColumn::Id, id))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].number, 1);
    }

    #[tokio::test]
    async fn duplicate_number_is_a_conflict() {
        let (store, discussion_id) = store_with_discussion().await;
        let mut post = CommentPost::reply(discussion_id, "hi", 1, None);
        post.number = Some(1);

        let mut tx = store.begin().await.unwrap();
        tx.insert_post(&post).await.unwrap();
        let err = tx.insert_post(&post).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn updating_a_discussion_leaves_the_counter_alone() {
        let (store, discussion_id) = store_with_discussion().await;
        let stale = store.find_discussion(discussion_id).await.unwrap().unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.increment_number_index(discussion_id).await.unwrap();
        tx.commit().await.unwrap();

        let mut renamed = stale;
        renamed.title = "Renamed".into();
        store.update_discussion(&renamed).await.unwrap();

        let stored = store.find_discussion(discussion_id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Renamed");
        assert_eq!(stored.number_index, 1);
    }

    #[tokio::test]
    async fn ordering_and_limit_apply_after_filtering() {
        let (store, discussion_id) = store_with_discussion().await;
        for number in 1..=3 {
            let mut post = CommentPost::reply(discussion_id, format!("#{number}"), 1, None);
            post.post_type = Some("comment".into());
            post.number = Some(number);
            let mut tx = store.begin().await.unwrap();
            tx.insert_post(&post).await.unwrap();
            tx.commit().await.unwrap();
        }

        let rows = store
            .fetch_posts(
                &PostQuery::new()
                    .order_by(PostColumn::Number, Direction::Desc)
                    .limit(2),
            )
            .await
            .unwrap();
        let numbers: Vec<i64> = rows.iter().map(|row| row.number).collect();
        assert_eq!(numbers, vec![3, 2]);
    }
}
