//! Domain events published by the post store after a write commits.

use crate::models::Post;

/// Lifecycle notifications, each carrying the post's state after the write.
#[derive(Debug, Clone)]
pub enum PostEvent {
    Posted(Post),
    Revised(Post),
    Hidden(Post),
    Restored(Post),
    /// Fired once after permanent removal
    Deleted(Post),
}

impl PostEvent {
    pub fn post(&self) -> &Post {
        match self {
            PostEvent::Posted(post)
            | PostEvent::Revised(post)
            | PostEvent::Hidden(post)
            | PostEvent::Restored(post)
            | PostEvent::Deleted(post) => post,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PostEvent::Posted(_) => "posted",
            PostEvent::Revised(_) => "revised",
            PostEvent::Hidden(_) => "hidden",
            PostEvent::Restored(_) => "restored",
            PostEvent::Deleted(_) => "deleted",
        }
    }
}
