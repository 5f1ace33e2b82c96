//! Services making up a running server.
//!
//! ```text
//! UDP socket -> ListenerService -> AggregatorService -> SinkDispatcherService -> sinks
//! ```

mod dispatcher;
mod listener;

pub use self::dispatcher::*;
pub use self::listener::*;
