use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::client::SessionState;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to sbt server at {addr}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to sbt server lost")]
    ConnectionLost,

    #[error("cannot execute while session is {state:?}")]
    ProtocolState { state: SessionState },

    #[error("no line received from sbt server within {after:?}")]
    ReadTimeout { after: Duration },

    #[error("io error on sbt connection: {0}")]
    Io(#[source] std::io::Error),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {message}")]
    Invalid { message: String },
}

/// Failure to produce the next line from the server.
#[derive(Debug, Error)]
pub enum LineError {
    #[error("stream closed before a full line was received")]
    EndOfStream,

    #[error("timed out after {0:?} waiting for a line")]
    Timeout(Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<LineError> for SessionError {
    fn from(err: LineError) -> Self {
        match err {
            LineError::EndOfStream => SessionError::ConnectionLost,
            LineError::Timeout(after) => SessionError::ReadTimeout { after },
            LineError::Io(e) => lost_or_io(e),
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        lost_or_io(err)
    }
}

/// Treats a peer that went away, cleanly or not, as a lost connection.
fn lost_or_io(err: std::io::Error) -> SessionError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => SessionError::ConnectionLost,
        _ => SessionError::Io(err),
    }
}
