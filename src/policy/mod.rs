//! Output format policies
//!
//! A policy decides everything codec-specific about a conversion: which
//! encoder, at what rate/format/layout, in which container and which input
//! files it applies to.  The converter itself is codec-agnostic.

pub mod aac;
pub mod flac;
pub mod opus;

use std::path::Path;

use ffmpeg_next as ffmpeg;

use crate::config::OutputCodec;
use crate::error::{ConvertError, Result};
use crate::transcode::{EncoderConfig, StreamDescriptor};

pub use aac::AacPolicy;
pub use flac::FlacPolicy;
pub use opus::OpusPolicy;

/// Frame size used when the encoder accepts frames of any length.
pub const DEFAULT_FRAME_SIZE: usize = 960;

/// Source extension converted when none is configured.
pub const DEFAULT_SOURCE_EXTENSION: &str = "mp3";

/// Codec-specific decisions for one output format
pub trait FormatPolicy: Send + Sync {
    /// Short identifier used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Codec of the produced stream.
    fn output_codec_id(&self) -> ffmpeg::codec::Id;

    /// Encoder settings for an input stream.
    fn configure_output(&self, input: &StreamDescriptor) -> Result<EncoderConfig>;

    /// Muxer short name to try first for `output`.  When FFmpeg knows no
    /// muxer by that name, the format is guessed from the file extension.
    fn preferred_container(&self, output: &Path) -> String;

    /// File extension for outputs produced by a directory walk.
    fn output_extension(&self) -> &str;

    /// Samples per frame fed to the encoder.
    fn target_frame_size(&self, encoder_frame_size: u32) -> usize {
        match encoder_frame_size {
            0 => DEFAULT_FRAME_SIZE,
            n => n as usize,
        }
    }

    /// Extension (without the dot) of files this policy converts.
    fn source_extension(&self) -> &str {
        DEFAULT_SOURCE_EXTENSION
    }

    /// Whether a file with this extension should be converted.
    fn should_convert_file(&self, extension: &str) -> bool {
        extension.eq_ignore_ascii_case(self.source_extension())
    }
}

/// Find an encoder, trying `names` in order before falling back to the
/// default encoder registered for `id`.
pub fn find_encoder(names: &[&str], id: ffmpeg::codec::Id) -> Result<ffmpeg::Codec> {
    names
        .iter()
        .find_map(|name| ffmpeg::encoder::find_by_name(name))
        .or_else(|| ffmpeg::encoder::find(id))
        .ok_or_else(|| ConvertError::Config(format!("{:?} encoder not found", id)))
}

/// Reject inputs whose channel layout cannot be carried to the output.
pub(crate) fn check_channels(input: &StreamDescriptor, max: u16) -> Result<()> {
    if input.channels == 0 {
        return Err(ConvertError::Config(
            "input stream reports no audio channels".into(),
        ));
    }
    if input.channels > max {
        return Err(ConvertError::Config(format!(
            "{} channels cannot be carried over (maximum {})",
            input.channels, max
        )));
    }
    Ok(())
}

/// Build the policy selected by configuration.
pub fn policy_for(
    codec: OutputCodec,
    bitrate: Option<u64>,
    source_extension: Option<&str>,
) -> Box<dyn FormatPolicy> {
    let ext = source_extension.unwrap_or(DEFAULT_SOURCE_EXTENSION);
    match codec {
        OutputCodec::Opus => Box::new(
            OpusPolicy::new()
                .with_bitrate(bitrate)
                .with_source_extension(ext),
        ),
        OutputCodec::Flac => Box::new(FlacPolicy::new().with_source_extension(ext)),
        OutputCodec::Aac => Box::new(
            AacPolicy::new()
                .with_bitrate(bitrate)
                .with_source_extension(ext),
        ),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use ffmpeg_next::util::channel_layout::ChannelLayout;
    use ffmpeg_next::util::format::sample::{Sample, Type};

    pub fn descriptor(sample_rate: u32, channels: u16) -> StreamDescriptor {
        StreamDescriptor {
            index: 0,
            codec_id: ffmpeg::codec::Id::MP3,
            sample_rate,
            channels,
            channel_layout: crate::ffmpeg::helpers::layout_or_default(
                ChannelLayout::default(0),
                channels,
            ),
            sample_format: Sample::F32(Type::Planar),
            time_base: ffmpeg::Rational::new(1, sample_rate.max(1) as i32),
        }
    }
}
