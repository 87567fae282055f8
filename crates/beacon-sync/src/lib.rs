//! Client-side realtime cache synchronization.
//!
//! Socket events pushed by the gateway are reconciled against locally held
//! paginated list queries, detail queries and chat conversations, so every
//! connected admin sees other users' changes without refetching.

pub mod bridge;
pub mod bus;
pub mod cache;
pub mod chat;
pub mod client;
pub mod error;
pub mod optimistic;
pub mod reconcile;
pub mod resource;
pub mod transport;

pub use bridge::{ChatBridge, CommentBridge, ContactRequestBridge, ResourceBridge};
pub use bus::{EventSource, LocalEventBus, Subscription};
pub use cache::{MemoryQueryCache, QueryCache, QueryKey};
pub use chat::{ChatStore, InsertOutcome, ReadSnapshot};
pub use client::{AdminClient, ResourceClient};
pub use error::{ActionError, SyncError};
pub use optimistic::{ActionOutcome, ActionTracker, ResourceActions};
pub use reconcile::{PageChange, SyncRow};
pub use resource::{ResourceSync, RowSnapshot, SyncReport};
