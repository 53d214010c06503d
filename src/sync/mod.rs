//! Provider sync: scheduling, work item mapping and the cycle orchestration.

pub mod cancel;
pub mod guard;
pub mod manager;
pub mod mapping;
pub mod scheduler;

pub use cancel::{CancelHandle, CancelSignal};
pub use manager::IntegrationManager;
