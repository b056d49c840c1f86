//! Timeline persistence and fan-out for weft.
//!
//! The [`TimelineService`] is the event transformer at the center of the
//! system: it ingests execution lifecycle events and agent messages,
//! debounces repeated updates, links items to their parent messages,
//! persists them through the append-only [`TimelineStore`], and
//! rebroadcasts canonical wire events to session rooms. Reads come back
//! out through [`TimelineService::get_timeline_items`] in canonical order.

pub mod bridge;
pub mod debounce;
pub mod ordering;
pub mod service;
pub mod session_guard;
pub mod store;
pub mod wire;

pub use bridge::{AgentBridge, AgentEvent, AgentSession};
pub use debounce::DebounceCoordinator;
pub use ordering::sort_timeline_items;
pub use service::{TimelineEvent, TimelinePage, TimelineQuery, TimelineService};
pub use store::TimelineStore;
pub use wire::{Broadcaster, ClientEvent};
