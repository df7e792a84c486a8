// ABOUTME: Library crate for perry exposing the session manager and its building blocks for the CLI and tests

pub mod config;
pub mod models;
pub mod probe;
pub mod process;
pub mod provider;
pub mod session;
pub mod sync;
pub mod tunnel;
