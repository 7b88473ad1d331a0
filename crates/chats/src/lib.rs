//! # Parley Chats Crate
//!
//! The cross-instance message fan-out and ordering core:
//!
//! - **Sequencer**: strictly increasing per-conversation positions
//! - **Store**: the Durable Store seam, backed by `parley-database`
//! - **Cache**: bounded recent-window per conversation
//! - **Bus**: broadcast events relayed to every instance
//! - **Registry**: this instance's users, connections and rooms
//! - **Fanout**: the coordinator tying the write and broadcast paths together
//!
//! ## Usage
//!
//! ```rust,ignore
//! let coordinator = FanoutCoordinator::new(components, ConnectionRegistry::new(), settings);
//! let broadcast = coordinator.spawn_broadcast_loop();
//! let message = coordinator.send_message(request).await?;
//! ```

pub mod bus;
pub mod cache;
pub mod fanout;
pub mod identity;
pub mod registry;
pub mod sequencer;
pub mod store;
pub mod types;

pub use bus::{EventBus, MemoryEventBus, RedisEventBus};
pub use cache::{MemoryWindowCache, RecentWindowCache, RedisWindowCache};
pub use fanout::{
    CreateConversation, FanoutComponents, FanoutCoordinator, FanoutSettings, MetricsSnapshot,
    RoomJoin, SendMessage, WriteStage, JOIN_HISTORY_LIMIT,
};
pub use identity::{HttpIdentityLookup, IdentityLookup, OpenDirectory, StaticDirectory, UserProfile};
pub use registry::{ConnectionId, ConnectionRegistry, DeliveryReport};
pub use sequencer::{RedisSequencer, Sequencer, StoreSequencer};
pub use store::{ConversationStore, SqliteConversationStore};
pub use types::{BroadcastEvent, ChatError, ChatResult, MessageView, ServerEvent};
