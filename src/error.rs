use std::path::PathBuf;
use thiserror::Error;

/// Main error type for a conversion
#[derive(Error, Debug)]
pub enum ConvertError {
    /// An error originating from the underlying FFmpeg library
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    /// A standard I/O error (directory creation, file metadata)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The input container has no audio stream
    #[error("No audio stream found in {0:?}")]
    NoAudioStream(PathBuf),

    /// A format policy could not produce a usable encoder configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A sample buffer could not be allocated or filled
    #[error("Resource error: {0}")]
    Resource(String),
}

/// FFmpeg-specific errors, one per native failure point
#[derive(Error, Debug)]
pub enum FfmpegError {
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    #[error("Failed to open input file: {0}")]
    OpenInput(String),

    #[error("Failed to find decoder: {0}")]
    DecoderNotFound(String),

    #[error("Failed to open decoder: {0}")]
    DecoderOpen(String),

    #[error("Failed to find encoder: {0}")]
    EncoderNotFound(String),

    #[error("Failed to configure encoder: {0}")]
    EncoderConfigure(String),

    #[error("Failed to open encoder: {0}")]
    EncoderOpen(String),

    #[error("Failed to create resampler: {0}")]
    ResamplerCreate(String),

    #[error("Resampling failed: {0}")]
    Resample(String),

    #[error("Could not find suitable output format: {0}")]
    FormatGuess(String),

    #[error("Failed to open output file: {0}")]
    OpenOutput(String),

    #[error("Stream configuration failed: {0}")]
    StreamConfig(String),

    #[error("Failed to write header: {0}")]
    WriteHeader(String),

    #[error("Failed to write packet: {0}")]
    WritePacket(String),

    #[error("Failed to write trailer: {0}")]
    WriteTrailer(String),

    #[error("Failed to decode packet: {0}")]
    DecodePacket(String),

    #[error("Failed to encode frame: {0}")]
    EncodeFrame(String),
}

/// Coarse error classes reported to the user interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Format,
    Codec,
    Resampler,
    Resource,
    Config,
}

impl ConvertError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::Io(_) => ErrorKind::Io,
            ConvertError::NoAudioStream(_) => ErrorKind::Format,
            ConvertError::Config(_) => ErrorKind::Config,
            ConvertError::Resource(_) => ErrorKind::Resource,
            ConvertError::Ffmpeg(e) => e.kind(),
        }
    }
}

impl FfmpegError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FfmpegError::OpenInput(_) | FfmpegError::OpenOutput(_) => ErrorKind::Io,
            FfmpegError::FormatGuess(_)
            | FfmpegError::StreamConfig(_)
            | FfmpegError::WriteHeader(_)
            | FfmpegError::WritePacket(_)
            | FfmpegError::WriteTrailer(_) => ErrorKind::Format,
            FfmpegError::DecoderNotFound(_)
            | FfmpegError::DecoderOpen(_)
            | FfmpegError::EncoderNotFound(_)
            | FfmpegError::EncoderOpen(_)
            | FfmpegError::DecodePacket(_)
            | FfmpegError::EncodeFrame(_) => ErrorKind::Codec,
            FfmpegError::EncoderConfigure(_) => ErrorKind::Config,
            FfmpegError::ResamplerCreate(_) | FfmpegError::Resample(_) => ErrorKind::Resampler,
            FfmpegError::InitFailed(_) => ErrorKind::Resource,
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ConvertError>;
