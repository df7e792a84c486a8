// ABOUTME: Core data models for remote instances and port forwarding

pub mod forwards;
pub mod instance;

pub use forwards::{Port, PortForwardMap, PortForwardSpec, REMOTE_DOCKER_SOCKET};
pub use instance::{InstanceHandle, InstanceState, KeyPairInfo, StateChange};
