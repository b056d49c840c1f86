//! Tool execution lifecycle for weft.
//!
//! The [`ToolExecutionManager`] is the in-memory registry of tool
//! executions and their permission handshakes; it emits a lifecycle event
//! for every mutation. The [`PreviewRegistry`] holds preview records that
//! attach to executions asynchronously, racing completion in either order.

pub mod events;
pub mod manager;
pub mod preview;

pub use events::ExecutionEvent;
pub use manager::ToolExecutionManager;
pub use preview::PreviewRegistry;
