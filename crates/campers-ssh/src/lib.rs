mod connection;
pub mod error;
mod forward;

pub use connection::{SshConnection, SshTarget, DEFAULT_EXEC_TIMEOUT};
pub use error::SshError;
pub use forward::ForwardManager;
