//! Container writer
//!
//! Owns the output `AVFormatContext`: one audio stream described from the
//! opened encoder, header, interleaved packets, trailer.

use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;

use crate::error::{FfmpegError, Result};
use crate::ffmpeg::helpers;

use super::encoder::AudioEncoder;

/// An output file with a single audio stream
pub struct OutputContainer {
    output: ffmpeg::format::context::Output,
    path: PathBuf,
    format_name: String,
    stream_index: usize,
    stream_time_base: ffmpeg::Rational,
    packets_written: u64,
}

impl OutputContainer {
    /// Create the output file and its audio stream.
    ///
    /// `preferred_format` is a muxer short name (`ogg`, `ipod`, ...).  When the
    /// build knows no such muxer the format is guessed from `path`'s
    /// extension.
    pub fn create(
        path: &Path,
        preferred_format: Option<&str>,
        encoder: &AudioEncoder,
        metadata: Option<ffmpeg::Dictionary<'_>>,
    ) -> Result<Self> {
        let format_name = preferred_format
            .and_then(|name| helpers::guess_output_format(Some(name), path))
            .or_else(|| helpers::guess_output_format(None, path))
            .ok_or_else(|| {
                FfmpegError::FormatGuess(format!(
                    "no muxer for {:?} (preferred {:?})",
                    path, preferred_format
                ))
            })?;

        let mut output = ffmpeg::format::output_as(&path, &format_name).map_err(|e| {
            FfmpegError::OpenOutput(format!("could not create {:?}: {}", path, e))
        })?;

        let params = encoder.codec_parameters().ok_or_else(|| {
            FfmpegError::StreamConfig("Failed to copy codec parameters".into())
        })?;

        let stream_index = {
            let mut out_stream = output
                .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
                .map_err(|e| {
                    FfmpegError::StreamConfig(format!("Failed to add audio stream: {}", e))
                })?;
            out_stream.set_parameters(params);
            // Let the muxer pick the tag for its container
            helpers::stream_reset_codec_tag(&mut out_stream);
            out_stream.set_time_base(encoder.time_base());
            out_stream.index()
        };

        if let Some(metadata) = metadata {
            output.set_metadata(metadata);
        }

        tracing::debug!(?path, format = %format_name, stream_index, "output created");

        Ok(Self {
            output,
            path: path.to_path_buf(),
            format_name,
            stream_index,
            stream_time_base: encoder.time_base(),
            packets_written: 0,
        })
    }

    /// Write the container header.
    ///
    /// The muxer may change the stream time base here (Ogg keeps 1/48000,
    /// MP4 picks the sample rate, ...), so it is re-read afterwards.
    pub fn write_header(&mut self) -> Result<()> {
        self.output
            .write_header()
            .map_err(|e| FfmpegError::WriteHeader(format!("{:?}: {}", self.path, e)))?;

        if let Some(stream) = self.output.stream(self.stream_index) {
            self.stream_time_base = stream.time_base();
        }
        Ok(())
    }

    /// Rescale `packet` from `encoder_time_base` to the stream's time base and
    /// write it interleaved.
    pub fn write_packet(
        &mut self,
        packet: &mut ffmpeg::Packet,
        encoder_time_base: ffmpeg::Rational,
    ) -> Result<()> {
        packet.rescale_ts(encoder_time_base, self.stream_time_base);
        packet.set_stream(self.stream_index);
        packet.set_position(-1);
        packet
            .write_interleaved(&mut self.output)
            .map_err(|e| FfmpegError::WritePacket(format!("{:?}: {}", self.path, e)))?;
        self.packets_written += 1;
        Ok(())
    }

    /// Finalise the file.
    pub fn write_trailer(&mut self) -> Result<()> {
        self.output
            .write_trailer()
            .map_err(|e| FfmpegError::WriteTrailer(format!("{:?}: {}", self.path, e)))?;
        Ok(())
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    /// Short name of the muxer in use.
    pub fn format_name(&self) -> &str {
        &self.format_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
