//! # Type Registry
//!
//! Maps stored discriminators to the constructors that hydrate them.
//! Built once at startup, then shared read-only behind an `Arc`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use domains::{
    CommentPost, DiscussionRenamedPost, PostKind, PostRow, Result, StoreError, COMMENT,
    DISCUSSION_RENAMED,
};

type Hydrate = dyn Fn(&PostRow) -> Option<Arc<dyn PostKind>> + Send + Sync;

/// How to materialize one variant from a stored row.
#[derive(Clone)]
pub struct VariantDescriptor {
    hydrate: Arc<Hydrate>,
}

impl VariantDescriptor {
    /// `hydrate` returns `None` when the row cannot be loaded as this variant.
    pub fn new<F>(hydrate: F) -> Self
    where
        F: Fn(&PostRow) -> Option<Arc<dyn PostKind>> + Send + Sync + 'static,
    {
        Self {
            hydrate: Arc::new(hydrate),
        }
    }

    /// Descriptor for stateless variants that ignore the row.
    pub fn unit<K>(kind: K) -> Self
    where
        K: PostKind + Clone,
    {
        Self::new(move |_| Some(Arc::new(kind.clone()) as Arc<dyn PostKind>))
    }

    pub fn hydrate(&self, row: &PostRow) -> Option<Arc<dyn PostKind>> {
        (self.hydrate)(row)
    }
}

impl fmt::Debug for VariantDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariantDescriptor").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    variants: BTreeMap<String, VariantDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the variants that ship with the store.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(COMMENT, VariantDescriptor::unit(CommentPost))
            .register(
                DISCUSSION_RENAMED,
                VariantDescriptor::new(|row| {
                    let kind = DiscussionRenamedPost::from_content(row.content.as_deref()?)?;
                    Some(Arc::new(kind) as Arc<dyn PostKind>)
                }),
            );
        registry
    }

    /// Last writer wins.
    pub fn register(&mut self, type_name: impl Into<String>, descriptor: VariantDescriptor) -> &mut Self {
        let type_name = type_name.into();
        if self.variants.insert(type_name.clone(), descriptor).is_some() {
            tracing::debug!(post_type = %type_name, "replaced post variant");
        }
        self
    }

    pub fn resolve(&self, type_name: &str) -> Option<&VariantDescriptor> {
        self.variants.get(type_name)
    }

    /// Like `resolve`, for writers that must not create unreadable rows.
    pub fn require(&self, type_name: &str) -> Result<&VariantDescriptor> {
        self.resolve(type_name)
            .ok_or_else(|| StoreError::UnknownVariant(type_name.to_string()))
    }

    pub fn all(&self) -> &BTreeMap<String, VariantDescriptor> {
        &self.variants
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.variants.keys().cloned().collect()
    }
}
