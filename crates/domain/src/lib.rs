//! Shared domain model for weft.
//!
//! Defines the records that flow through the timeline subsystem (tool
//! executions, permission requests, previews, stored messages, and the
//! timeline items that wrap them) along with the shared error type,
//! configuration, and structured trace events.

pub mod config;
pub mod error;
pub mod execution;
pub mod message;
pub mod permission;
pub mod preview;
pub mod time;
pub mod timeline;
pub mod trace;

pub use error::{Error, Result};
pub use execution::{ExecutionError, ExecutionStatus, ToolExecution};
pub use message::{MessageRole, StoredMessage, ToolCallRef};
pub use permission::PermissionRequest;
pub use preview::{Preview, PreviewContentType};
pub use timeline::{ItemKey, ItemKind, TimelineItem};
