//! Workspace facade: re-exports the console crates for integration tests
//! and downstream embedding.

pub use common;
pub use stream_session;
pub use telemetry;
