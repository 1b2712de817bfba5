//! Room routing: logical membership groups and fan-out.

#[cfg(feature = "redis-backend")]
pub mod backplane;
pub mod broadcaster;
pub mod router;

#[cfg(feature = "redis-backend")]
pub use backplane::RedisBackplane;
pub use broadcaster::{GroupBroadcaster, GroupKey, LocalBroadcaster};
pub use router::RoomRouter;
