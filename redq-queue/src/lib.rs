//! Job queue and background processing for redq.
//!
//! Provides an at-least-once job queue on a single Redis instance:
//! - 📦 FIFO waiting list per queue (`waiting:{queue}`)
//! - ⏰ Delayed jobs in one shared `delayed` sorted set, scored by due time
//! - 🎯 `target@method` job descriptors dispatched through a registry
//! - 🔄 Retries with linear backoff from the worker loop
//!
//! ## Quick Start - Envelopes
//!
//! ```
//! use redq_queue::Envelope;
//! use serde_json::json;
//!
//! let envelope = Envelope::at(1_700_000_000, "emails", json!({"to": "user@example.com"}), 60);
//!
//! assert_eq!(envelope.queue, "emails");
//! assert_eq!(envelope.attempts, 0);
//! assert_eq!(envelope.due_at(), 1_700_000_060);
//! ```
//!
//! ## Job Descriptors
//!
//! ```
//! use redq_queue::{Arguments, JobDescriptor, DEFAULT_METHOD};
//! use serde_json::json;
//!
//! let job = JobDescriptor::for_target("Cleanup").with_args(json!([1, 2, 3]));
//! assert_eq!(job.target_and_method().1, DEFAULT_METHOD);
//! assert_eq!(job.arguments().len(), 3);
//!
//! // Scalars are passed as a single argument
//! assert_eq!(Arguments::from_value(json!(5)), Arguments::Single(json!(5)));
//! ```
//!
//! ## Complete Example
//!
//! ```no_run
//! use redq_queue::*;
//! use redq_redis::{ConnectionConfig, ConnectionRegistry, RegistryConfig};
//! use std::sync::Arc;
//!
//! struct Mailer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), QueueError> {
//!     let registry = ConnectionRegistry::new(
//!         RegistryConfig::new().with_connection("default", ConnectionConfig::from_env().build()),
//!     );
//!
//!     let mut jobs = JobRegistry::new();
//!     jobs.register(
//!         Target::<Mailer>::new("Mailer")
//!             .shared(|| Ok(Mailer))
//!             .method("send", |_mailer, args: Arguments| async move {
//!                 let (to,): (String,) = args.decode()?;
//!                 println!("sending to {}", to);
//!                 Ok::<(), QueueError>(())
//!             }),
//!     );
//!     let jobs = Arc::new(jobs);
//!
//!     let binding = QueueBinding::default();
//!     let queue = Queue::from_registry(&registry, &binding).await?;
//!
//!     // Producer side
//!     let dispatcher = JobDispatcher::new(jobs.clone(), queue.clone(), binding.clone());
//!     dispatcher
//!         .emit("Mailer", "send", serde_json::json!(["user@example.com"]), 0, vec![])
//!         .await?;
//!
//!     // Consumer side
//!     let mut worker = Worker::new(queue, binding, Arc::new(JobsConsumer::new(jobs)));
//!     worker.start().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod job;
pub mod queue;
pub mod worker;

pub use dispatch::{JobDispatcher, JobFuture, JobRegistry, JobsConsumer, Target};
pub use envelope::{Envelope, JobData};
pub use error::{QueueError, QueueResult};
pub use job::{Arguments, DEFAULT_METHOD, JobDescriptor, SEPARATOR, parse_job};
pub use queue::{
    DEFAULT_CONNECTION, DEFAULT_JOBS_QUEUE, DELAYED_KEY, Queue, QueueBinding, waiting_key,
};
pub use worker::{Consumer, Outcome, Worker, WorkerConfig};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::dispatch::{JobDispatcher, JobRegistry, JobsConsumer, Target};
    pub use crate::envelope::{Envelope, JobData};
    pub use crate::error::{QueueError, QueueResult};
    pub use crate::job::{Arguments, JobDescriptor};
    pub use crate::queue::{Queue, QueueBinding};
    pub use crate::worker::{Consumer, Worker, WorkerConfig};
}
