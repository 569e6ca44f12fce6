//! Per-discussion post numbering.

use domains::{Post, PostTransaction, Result, StoreError};

/// Hands out the next number of a discussion inside the caller's transaction,
/// so the counter bump and the post insert commit or roll back together.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberingService;

impl NumberingService {
    /// Overwrites any number the caller may have set.
    #[tracing::instrument(skip_all, fields(discussion_id = post.discussion_id))]
    pub async fn assign(&self, tx: &mut dyn PostTransaction, post: &mut Post) -> Result<i64> {
        let number = tx.increment_number_index(post.discussion_id).await?;
        if number <= 0 {
            return Err(StoreError::Conflict(format!(
                "discussion {} produced non-positive post number {number}",
                post.discussion_id
            )));
        }
        post.number = Some(number);
        tracing::debug!(number, "assigned post number");
        Ok(number)
    }
}
