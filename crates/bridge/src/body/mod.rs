//! Request and response bodies.
//!
//! The inbound side ([`RequestBody`]) turns the engine's pushed chunks into a pull based stream
//! with pause/resume flow control. The outbound side ([`ResponseBody`]) is every shape a handler
//! may answer with, [`resolve`] classifies it into a [`Payload`] the write loop understands.

mod request_body;
mod resolve;
mod response_body;

pub use request_body::DEFAULT_HIGH_WATER_MARK;
pub use request_body::RequestBody;
pub use resolve::Payload;
pub use resolve::ResolveOptions;
pub use resolve::resolve;
pub use response_body::BlobReader;
pub use response_body::BoxByteStream;
pub use response_body::ByteStream;
pub use response_body::DeferredBody;
pub use response_body::ResponseBody;
