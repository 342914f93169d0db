//! Request handlers clients talk to, and the errors they surface.
pub mod errors;
pub mod service;

pub use errors::{Result, RuntimeError};
pub use service::GameService;
