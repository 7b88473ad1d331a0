//! Write path and broadcast path of the fan-out core.

pub mod coordinator;
pub mod locks;
pub mod metrics;
pub mod reorder;

pub use coordinator::{
    CreateConversation, FanoutComponents, FanoutCoordinator, FanoutSettings, RoomJoin,
    SendMessage, WriteStage, JOIN_HISTORY_LIMIT,
};
pub use locks::ConversationLocks;
pub use metrics::{FanoutMetrics, MetricsSnapshot};
pub use reorder::{ReorderBuffer, Release};
