//! Graceful shutdown of in-flight connections.

mod drain;

pub use drain::DrainOutcome;
pub use drain::drain;
