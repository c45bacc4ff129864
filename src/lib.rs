// redq - an at-least-once job queue on Redis
//
// The Redis layer is always available; the queue and the token bucket are
// enabled by the `queue` and `ratelimit` features.

// Re-export the Redis layer
pub use redq_redis::*;

// Re-export optional crates
#[cfg(feature = "queue")]
pub use redq_queue;

#[cfg(feature = "ratelimit")]
pub use redq_ratelimit;

// Prelude for common imports
pub mod prelude {
    pub use redq_redis::prelude::*;

    #[cfg(feature = "queue")]
    pub use redq_queue::prelude::*;

    #[cfg(feature = "ratelimit")]
    pub use redq_ratelimit::prelude::*;
}
