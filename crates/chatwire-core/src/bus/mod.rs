//! Session event bus: how the engine reports progress to its front end.

pub mod queue;
pub mod types;

pub use queue::EventBus;
pub use types::SessionEvent;
