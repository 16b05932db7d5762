use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::media::VideoKey;

/// Result type used by the seek-grid crate.
pub type Result<T> = std::result::Result<T, GridError>;

/// Errors produced while building, extracting or driving a thumbnail grid.
#[derive(Debug)]
pub enum GridError {
    InvalidConfig {
        field: &'static str,
        value: String,
        clamped_to: String,
    },
    MissingDuration,
    MissingSource,
    DecoderOpen {
        video: VideoKey,
        reason: String,
    },
    DecoderNotReady {
        video: VideoKey,
        waited: Duration,
    },
    SeekTimeout {
        at_seconds: f64,
        waited: Duration,
    },
    Capture {
        at_seconds: f64,
        reason: String,
    },
    Decode {
        reason: String,
    },
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },
    ConfigParse(serde_json::Error),
}

impl Display for GridError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig {
                field,
                value,
                clamped_to,
            } => write!(f, "invalid {field} {value}, clamped to {clamped_to}"),
            Self::MissingDuration => write!(f, "media duration is not available yet"),
            Self::MissingSource => write!(f, "media source is not set"),
            Self::DecoderOpen { video, reason } => {
                write!(f, "failed to open decoder for {video}: {reason}")
            }
            Self::DecoderNotReady { video, waited } => write!(
                f,
                "decoder for {video} not ready after {}ms",
                waited.as_millis()
            ),
            Self::SeekTimeout { at_seconds, waited } => write!(
                f,
                "seek to {at_seconds:.2}s did not complete within {}ms",
                waited.as_millis()
            ),
            Self::Capture { at_seconds, reason } => {
                write!(f, "frame capture at {at_seconds:.2}s failed: {reason}")
            }
            Self::Decode { reason } => write!(f, "decode failed: {reason}"),
            Self::ConfigIo { path, source } => {
                write!(f, "failed to read config {} ({source})", path.display())
            }
            Self::ConfigParse(err) => write!(f, "config parse error: {err}"),
        }
    }
}

impl std::error::Error for GridError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigIo { source, .. } => Some(source),
            Self::ConfigParse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for GridError {
    fn from(value: serde_json::Error) -> Self {
        Self::ConfigParse(value)
    }
}

/// Error classification reported through the `on_error` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GridErrorKind {
    Extraction,
    Timeout,
    InvalidConfig,
    MissingInput,
}

impl GridErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Timeout => "timeout",
            Self::InvalidConfig => "invalid-config",
            Self::MissingInput => "missing-input",
        }
    }
}

impl From<&GridError> for GridErrorKind {
    fn from(value: &GridError) -> Self {
        match value {
            GridError::DecoderNotReady { .. } | GridError::SeekTimeout { .. } => Self::Timeout,
            GridError::InvalidConfig { .. }
            | GridError::ConfigIo { .. }
            | GridError::ConfigParse(_) => Self::InvalidConfig,
            GridError::MissingDuration | GridError::MissingSource => Self::MissingInput,
            GridError::DecoderOpen { .. } | GridError::Capture { .. } | GridError::Decode { .. } => {
                Self::Extraction
            }
        }
    }
}

/// Payload handed to the host error sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridErrorEvent {
    pub kind: GridErrorKind,
    pub message: String,
    pub error: String,
}

impl GridErrorEvent {
    pub fn from_error(error: &GridError) -> Self {
        let kind = GridErrorKind::from(error);
        let message = match kind {
            GridErrorKind::Extraction => "Frame extraction failed",
            GridErrorKind::Timeout => "Extraction wait timed out",
            GridErrorKind::InvalidConfig => "Invalid grid configuration",
            GridErrorKind::MissingInput => "Grid input unavailable",
        };
        Self {
            kind,
            message: message.to_string(),
            error: error.to_string(),
        }
    }
}
