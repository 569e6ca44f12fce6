//! Domain models and port definitions for the forum post store.

pub mod error;
pub mod events;
pub mod models;
pub mod ports;
pub mod query;
pub mod variants;

// Re-exporting for easier access in other crates
pub use error::*;
pub use events::*;
pub use models::*;
pub use ports::*;
pub use query::*;
pub use variants::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hydrated_post_is_marked_existing() {
        let row = PostRow {
            id: 4,
            discussion_id: 2,
            number: 3,
            time: chrono::Utc::now(),
            user_id: Some(1),
            post_type: Some(COMMENT.to_string()),
            content: Some("Hello".to_string()),
            edit_time: None,
            edit_user_id: None,
            hide_time: None,
            hide_user_id: None,
            ip_address: Some("127.0.0.1".to_string()),
            is_private: false,
        };
        let post = Post::from_row(row, std::sync::Arc::new(CommentPost));
        assert!(post.exists());
        assert_eq!(post.id, Some(4));
        assert_eq!(post.number, Some(3));
        assert!(post.is_kind::<CommentPost>());
    }

    #[test]
    fn new_post_is_unsaved_and_unnumbered() {
        let post = CommentPost::reply(2, "Hello Rust!", 1, None);
        assert!(!post.exists());
        assert!(post.id.is_none());
        assert!(post.number.is_none());
        assert!(post.post_type.is_none());
    }
}
