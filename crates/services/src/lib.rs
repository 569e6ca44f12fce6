//! # services
//!
//! Orchestration for the post store: variant registration, hook dispatch,
//! numbering, visibility and the store itself. Storage is reached only
//! through the `domains` ports.

pub mod bus;
pub mod numbering;
pub mod policy;
pub mod post_store;
pub mod registry;
pub mod visibility;

pub use bus::EventBus;
pub use numbering::NumberingService;
pub use post_store::{PostStore, REGISTERED_TYPES_SCOPE};
pub use registry::{TypeRegistry, VariantDescriptor};
pub use visibility::VisibilityFilter;
