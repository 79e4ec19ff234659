//! Per-connection state and the outbound write path.
//!
//! # Components
//!
//! - [`Connection`]: one accepted exchange with its `Open -> Aborted | Done` state machine
//! - [`ConnectionRegistry`]: the set of live connections, notifies when it becomes empty
//! - [`ResponseWriter`]: writes a response through the engine with backpressure

mod registry;
mod state;
mod writer;

pub use registry::ConnectionRegistry;
pub use registry::EmptySignal;
pub use state::Connection;
pub use state::ConnectionId;
pub use state::ConnectionState;
pub use writer::ResponseWriter;
