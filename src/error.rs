use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// Which public operation produced an error. Only used to word messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Conversion,
    Download,
}

impl JobKind {
    fn succeeded_but_missing(self) -> &'static str {
        match self {
            Self::Conversion => "Conversion succeeded, but the MP3 file could not be found.",
            Self::Download => "Download succeeded, but the video file could not be found.",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversion => f.write_str("conversion"),
            Self::Download => f.write_str("download"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    /// Caller input rejected before anything touches the disk.
    #[error("{message}")]
    Validation { message: String },

    /// yt-dlp ran and exited non-zero.
    #[error("Error in yt-dlp: {stderr}")]
    ToolFailed { job: JobKind, stderr: String },

    /// yt-dlp claimed success but no file with the expected extension exists.
    #[error("{} (expected a .{extension} file)", job.succeeded_but_missing())]
    ArtifactMissing { job: JobKind, extension: String },

    #[error("could not launch {}: {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl MediaError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True for errors caused by the request itself rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}
