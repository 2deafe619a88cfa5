//! Sockets held by this instance

mod registry;
mod types;

pub use registry::{ConnectionManager, ConnectionStats};
pub use types::ConnectionHandle;
