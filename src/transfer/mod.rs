//! Shared transfer primitives: chunk planning, concurrency limiting and
//! progress metering. Used by both the server session machinery and the
//! client-side engines.

pub mod chunk;
pub mod limiter;
pub mod progress;

pub use chunk::{chunk_count, plan, ChunkSpec, DEFAULT_CHUNK_SIZE};
pub use limiter::{CancelHandle, ConcurrencyLimiter, TaskCancelled, TaskHandle};
pub use progress::{time_remaining, EventBus, SpeedMeter, TransferEvent};
