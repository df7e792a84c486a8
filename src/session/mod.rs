// ABOUTME: Remote session management: lifecycle of one project's instance plus its tunnel and sync

pub mod context;
pub mod error;
pub mod manager;

pub use context::{DockerContext, DEFAULT_CONTEXT};
pub use error::SessionError;
pub use manager::{RemoteSessionManager, SessionSettings};
