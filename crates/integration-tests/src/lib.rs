//! Shared fixtures for the end-to-end tests in `tests/`.

use std::any::Any;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use domains::{
    Discussion, DiscussionRepository, PostEvent, PostKind, PostListener, PostRow, Result,
};
use services::{policy, EventBus, PostStore, TypeRegistry, VariantDescriptor};
use storage_adapters::MemoryStore;

pub const EVENT: &str = "event";

/// A system notice, registered by tests next to the built-in variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPost;

impl PostKind for EventPost {
    fn type_name(&self) -> &str {
        EVENT
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Default variants plus `event`.
pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::with_defaults();
    registry.register(EVENT, VariantDescriptor::unit(EventPost));
    registry
}

/// Records every lifecycle event it receives.
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<PostEvent>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<PostEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(PostEvent::name).collect()
    }
}

#[async_trait]
impl PostListener for Recorder {
    async fn handle(&self, event: &PostEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

pub struct Harness {
    pub backend: Arc<MemoryStore>,
    pub store: PostStore,
    pub recorder: Arc<Recorder>,
}

impl Harness {
    /// Memory-backed store with the default policies and a recorder.
    pub fn new() -> Self {
        Self::with_bus(EventBus::new(), registry())
    }

    /// Adds the default policies and a recorder to `bus`.
    pub fn with_bus(mut bus: EventBus, registry: TypeRegistry) -> Self {
        let recorder = Arc::new(Recorder::default());
        policy::register_defaults(&mut bus);
        bus.listen(recorder.clone());

        let backend = Arc::new(MemoryStore::new());
        let store = PostStore::new(
            backend.clone(),
            backend.clone(),
            Arc::new(registry),
            Arc::new(bus),
        );
        Self {
            backend,
            store,
            recorder,
        }
    }

    pub async fn discussion(&self, title: &str, start_user_id: Option<i64>) -> Result<i64> {
        self.backend
            .insert_discussion(&Discussion::new(title, start_user_id))
            .await
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// A stored row as a foreign writer or an older release might leave it.
pub fn raw_row(id: i64, discussion_id: i64, number: i64, post_type: Option<&str>) -> PostRow {
    PostRow {
        id,
        discussion_id,
        number,
        time: Utc::now(),
        user_id: Some(1),
        post_type: post_type.map(str::to_string),
        content: Some(format!("row {id}")),
        edit_time: None,
        edit_user_id: None,
        hide_time: None,
        hide_user_id: None,
        ip_address: Some("10.0.0.1".into()),
        is_private: false,
    }
}
