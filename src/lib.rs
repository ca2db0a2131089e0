//! Batch audio transcoder
//!
//! Converts audio files (MP3 by default) to Opus, FLAC or AAC with FFmpeg,
//! one file at a time or by walking a directory tree.
//!
//! ```no_run
//! use audio_transcoder::{policy, Converter, OutputCodec};
//! use std::path::Path;
//!
//! audio_transcoder::ffmpeg::init()?;
//! let mut converter = Converter::new(policy::policy_for(OutputCodec::Opus, None, None));
//! converter.set_progress_callback(|f| println!("{:.0}%", f * 100.0));
//! converter.convert_file(Path::new("in.mp3"), Path::new("out.opus"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod converter;
pub mod error;
pub mod ffmpeg;
pub mod policy;
pub mod transcode;
pub mod worker;

#[cfg(test)]
mod tests;

pub use config::{ConverterConfig, OutputCodec};
pub use converter::{ConversionSummary, Converter, DirectoryReport};
pub use error::{ConvertError, ErrorKind, FfmpegError, Result};
pub use policy::FormatPolicy;
