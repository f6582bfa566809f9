// Core library for the Keelson resilience toolkit
// This crate contains the resilience primitives, health checks and the
// shutdown coordinator, plus the error, event and logging types they share.

pub mod error;
pub mod events;
pub mod health;
pub mod logging;
pub mod resilience;
pub mod shutdown;

// Re-export commonly used types
pub use error::*;
pub use events::{Event, EventBus, EventKind};
pub use health::*;
pub use resilience::*;
pub use shutdown::*;
