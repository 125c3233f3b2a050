pub mod broker;
pub mod error;
pub mod listener;
pub mod memory;
pub mod redis_broker;
pub mod relay;

pub use broker::{ControlPublisher, ResponseLog, RunStatusRecord, RunStatusSource, Subscriber, Subscription};
pub use error::RelayError;
pub use listener::RelayItem;
pub use memory::{MemoryBroker, MemoryRunStatus};
pub use redis_broker::RedisBroker;
pub use relay::{Cursor, Frame, RelayExit, RelayOptions, RelayPhase, RelaySummary, StreamRelay};
