use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Failures while establishing the serial link. These are shown to the user.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("could not open serial port {port}: {reason}")]
    OpenFailure { port: String, reason: String },
    #[error("no ready signal from {port} within {timeout:?}")]
    HandshakeTimeout { port: String, timeout: Duration },
    #[error("serial link is not open")]
    NotOpen,
    #[error("serial write failed: {0}")]
    Write(#[source] io::Error),
}

/// Failures while decoding a frame off the wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },
    #[error("frame header {rows}x{cols} exceeds the {max}x{max} limit")]
    OversizedFrame { rows: u16, cols: u16, max: u16 },
    #[error("frame header declares an empty {rows}x{cols} grid")]
    EmptyFrame { rows: u16, cols: u16 },
    #[error("serial read failed: {0}")]
    Io(#[from] io::Error),
}

/// Anything that can go wrong during one request/response exchange.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("value range {min}..{max} is empty")]
    DegenerateRange { min: f32, max: f32 },
    #[error("settings file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("settings file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("recording file {} already exists", path.display())]
    Exists { path: PathBuf },
    #[error("recording file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("recording write failed: {0}")]
    Csv(#[from] csv::Error),
}
