//! Vlant Realtime Crate
//!
//! The real-time presence, anonymous-pairing, and message-relay core:
//!
//! - [`PresenceRegistry`]: user to connection mapping
//! - [`PairingQueue`]: FIFO anonymous matching
//! - [`RelayRouter`]: per-user, per-room, and broadcast event delivery
//! - [`ConnectionSession`]: per-connection lifecycle state machine
//! - [`spawn_stats_broadcaster`]: periodic `statsUpdate` fan-out
//!
//! All state is in-memory and process-wide; it rebuilds empty on restart,
//! which is why delivery is best-effort and at most once per connection.

pub mod error;
pub mod events;
pub mod presence;
pub mod queue;
pub mod router;
pub mod session;
pub mod stats;

pub use error::{RealtimeError, RealtimeResult};
pub use events::{ClientEvent, ConnectionId, QueueJoinStatus, RoomId, ServerEvent, UserId};
pub use presence::PresenceRegistry;
pub use queue::PairingQueue;
pub use router::RelayRouter;
pub use session::ConnectionSession;
pub use stats::spawn_stats_broadcaster;
