//! # Error Handling
//!
//! Error types for the filter pipeline, one variant per failure kind:
//! I/O, demux, decode, encode, shader, graphics, and pipeline misuse.
//!
//! Setup-time failures propagate as `Result<_, FilterError>` out of
//! `open`/`start`-style calls and decide the process exit code. Per-frame
//! codec errors never surface here: they are logged with the frame's PTS and
//! the frame is dropped so the pipeline keeps running. GPU failure during
//! filtering is fatal: the render target is the only source of pixels for the
//! encoder.

use std::{error::Error as StdError, fmt};

/// Error type covering every stage of the filter pipeline.
#[derive(Debug)]
pub enum FilterError {
    /// Input/output failures outside the codec layer (missing files, shader
    /// source read failures).
    Io {
        operation: String,
        path: Option<String>,
        source: std::io::Error,
    },
    /// Container-level failures: open, stream info, no video stream.
    Demux { operation: String, reason: String },
    /// Decoder setup failures: no decoder for the codec, codec open errors.
    Decode { operation: String, reason: String },
    /// Encoder and output-container setup failures.
    Encode { operation: String, reason: String },
    /// Shader compilation or validation failures.
    Shader { reason: String },
    /// Graphics backend failures: adapter/device requests, stream textures,
    /// render passes, pipelines.
    Graphics { operation: String, reason: String },
    /// Ring misuse or broken stage wiring. Should be unrepresentable; kept so
    /// the driver can report it instead of panicking across threads.
    Pipeline { reason: String },
}

impl FilterError {
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: None,
            source,
        }
    }

    pub fn io_path(
        operation: impl Into<String>,
        path: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            operation: operation.into(),
            path: Some(path.into()),
            source,
        }
    }

    pub fn demux(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Demux {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Decode {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn encode(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Encode {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn shader(reason: impl Into<String>) -> Self {
        Self::Shader {
            reason: reason.into(),
        }
    }

    pub fn graphics(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Graphics {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn pipeline(reason: impl Into<String>) -> Self {
        Self::Pipeline {
            reason: reason.into(),
        }
    }

    /// Short category name for log lines.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::Demux { .. } => "demux",
            Self::Decode { .. } => "decode",
            Self::Encode { .. } => "encode",
            Self::Shader { .. } => "shader",
            Self::Graphics { .. } => "graphics",
            Self::Pipeline { .. } => "pipeline",
        }
    }

    /// Process exit code for this failure.
    ///
    /// 1 missing file / I/O, 2 shader compile, 3 demux or stream info,
    /// 4 output context or encoder setup, 5 graphics (stream texture,
    /// pipeline), 6 decoder.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io { .. } => 1,
            Self::Shader { .. } => 2,
            Self::Demux { .. } => 3,
            Self::Encode { .. } => 4,
            Self::Graphics { .. } => 5,
            Self::Decode { .. } => 6,
            Self::Pipeline { .. } => 1,
        }
    }
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io {
                operation,
                path,
                source,
            } => match path {
                Some(path) => write!(f, "I/O error during {operation} on '{path}': {source}"),
                None => write!(f, "I/O error during {operation}: {source}"),
            },
            Self::Demux { operation, reason } => {
                write!(f, "demux failed during {operation}: {reason}")
            }
            Self::Decode { operation, reason } => {
                write!(f, "decoder failed during {operation}: {reason}")
            }
            Self::Encode { operation, reason } => {
                write!(f, "encoder failed during {operation}: {reason}")
            }
            Self::Shader { reason } => write!(f, "shader compilation failed: {reason}"),
            Self::Graphics { operation, reason } => {
                write!(f, "graphics backend failed during {operation}: {reason}")
            }
            Self::Pipeline { reason } => write!(f, "pipeline error: {reason}"),
        }
    }
}

impl StdError for FilterError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FilterError {
    fn from(error: std::io::Error) -> Self {
        Self::io("unknown", error)
    }
}

/// Result type alias used throughout the pipeline.
pub type FilterResult<T> = Result<T, FilterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_match_cli_contract() {
        let missing = FilterError::io_path(
            "open input",
            "in.mp4",
            std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        );
        assert_eq!(missing.exit_code(), 1);
        assert_eq!(FilterError::shader("parse error").exit_code(), 2);
        assert_eq!(FilterError::demux("find stream info", "bad data").exit_code(), 3);
        assert_eq!(FilterError::encode("output context", "bad ext").exit_code(), 4);
        assert_eq!(FilterError::graphics("stream texture", "no device").exit_code(), 5);
        assert_eq!(FilterError::decode("codec open", "unsupported").exit_code(), 6);
    }

    #[test]
    fn test_display_includes_operation() {
        let error = FilterError::demux("open input", "invalid data found");
        assert_eq!(error.category(), "demux");
        assert!(error.to_string().contains("open input"));
        assert!(error.to_string().contains("invalid data found"));
    }
}
