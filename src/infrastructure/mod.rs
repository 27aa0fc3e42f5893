//! Infrastructure Layer
//!
//! Transport to the remote device.

pub mod ssh;

pub use ssh::{ChannelOutput, Connector, RemoteTransport, SshConnector, SshConnectorConfig};
