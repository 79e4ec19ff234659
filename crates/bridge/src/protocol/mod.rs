//! Request and response values plus the error types shared by the whole crate.
//!
//! - [`Request`]: built from the engine's [`RequestMeta`](crate::engine::RequestMeta), lazy body
//! - [`Response`]: status, headers and a [`ResponseBody`](crate::body::ResponseBody)
//! - [`RequestError`], [`ResponseError`], [`EngineError`]

mod error;
pub use error::BoxError;
pub use error::EngineError;
pub use error::RequestError;
pub use error::ResponseError;

mod request;
pub use request::Request;
pub use request::RequestOptions;

mod response;
pub use response::Parts;
pub use response::Response;
