//! # StoreError
//!
//! Centralized error handling for the post store.
//! Maps storage and lookup failures to actionable error types.

use thiserror::Error;

/// The primary error type for all post store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Record missing at the expected key (e.g., Post, Discussion)
    #[error("{entity} not found with ID {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// No variant is registered for this discriminator.
    /// Reads fall back to the untyped variant; only creation surfaces this.
    #[error("unknown post type: {0}")]
    UnknownVariant(String),

    /// Constraint violation reported by the backend (e.g., duplicate number
    /// within a discussion). Never retried.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Connectivity or timeout failure from the backend
    #[error("storage error: {0}")]
    Storage(String),

    /// The record cannot take the requested transition
    #[error("validation error: {0}")]
    Validation(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

/// A specialized Result type for post store logic.
pub type Result<T> = std::result::Result<T, StoreError>;
