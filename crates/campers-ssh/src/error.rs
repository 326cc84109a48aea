use thiserror::Error;

#[derive(Debug, Error)]
pub enum SshError {
    #[error("host {host} unreachable after {attempts} connection attempts")]
    Unreachable { host: String, attempts: u32 },

    #[error("ssh authentication failed: {0}")]
    Auth(String),

    #[error("ssh connection is not open")]
    NotConnected,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remote command failed: {0}")]
    Exec(String),

    #[error("command exceeded {seconds}s wall-clock budget")]
    Timeout { seconds: u64 },

    #[error("local port {port} is already in use")]
    PortInUse { port: u16 },

    #[error("tunnel setup failed: {0}")]
    Forward(String),
}
