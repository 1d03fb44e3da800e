// ABOUTME: Core types, traits, and utilities shared by every Stratus package
// ABOUTME: Error taxonomy, provider errors, platform events, keyed locks and id generation

pub mod error;
pub mod events;
pub mod lock;
pub mod utils;

// Re-export main types
pub use error::{Coded, ErrorCode, ProviderError, ProviderErrorKind};
pub use events::{EventBus, PlatformEvent, DEFAULT_EVENT_CHANNEL_SIZE};
pub use lock::KeyedLock;

// Re-export utilities
pub use utils::{generate_id, ID_PREFIX_DEPLOYMENT, ID_PREFIX_RESOURCE, ID_PREFIX_TASK};
