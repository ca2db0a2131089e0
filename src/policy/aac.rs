//! AAC-LC output in an MP4 (.m4a) container

use std::path::Path;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::format::sample::{Sample, Type};

use crate::error::Result;
use crate::ffmpeg::helpers;
use crate::transcode::encoder::recommended_aac_bitrate;
use crate::transcode::{EncoderConfig, StreamDescriptor};

use super::{check_channels, find_encoder, FormatPolicy, DEFAULT_SOURCE_EXTENSION};

pub const AAC_SAMPLE_RATE: u32 = 48_000;
/// AAC encoder frame size (number of samples per channel per frame)
pub const AAC_FRAME_SIZE: usize = 1024;
const AAC_MAX_CHANNELS: u16 = 8;

#[derive(Debug, Clone)]
pub struct AacPolicy {
    bitrate: Option<u64>,
    source_extension: String,
}

impl AacPolicy {
    pub fn new() -> Self {
        Self {
            bitrate: None,
            source_extension: DEFAULT_SOURCE_EXTENSION.to_string(),
        }
    }

    pub fn with_bitrate(mut self, bitrate: Option<u64>) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_source_extension(mut self, ext: &str) -> Self {
        self.source_extension = ext.trim_start_matches('.').to_string();
        self
    }
}

impl Default for AacPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatPolicy for AacPolicy {
    fn name(&self) -> &'static str {
        "aac"
    }

    fn output_codec_id(&self) -> ffmpeg::codec::Id {
        ffmpeg::codec::Id::AAC
    }

    fn configure_output(&self, input: &StreamDescriptor) -> Result<EncoderConfig> {
        check_channels(input, AAC_MAX_CHANNELS)?;
        let codec = find_encoder(&[], self.output_codec_id())?;
        let bit_rate = self
            .bitrate
            .map(|b| b as usize)
            .unwrap_or_else(|| recommended_aac_bitrate(input.channels));
        let sample_format = helpers::choose_float_format(
            &helpers::supported_sample_formats(&codec),
            Sample::F32(Type::Planar),
        );

        Ok(EncoderConfig {
            codec_id: self.output_codec_id(),
            encoder_name: Some(codec.name().to_string()),
            bit_rate: Some(bit_rate),
            sample_rate: AAC_SAMPLE_RATE,
            sample_format,
            channel_layout: input.channel_layout,
            channels: input.channels,
            compression_level: None,
            options: Vec::new(),
        })
    }

    /// "m4a" is not a muxer name; the writer falls back to the extension,
    /// which resolves to the `ipod` muxer.
    fn preferred_container(&self, _output: &Path) -> String {
        "m4a".to_string()
    }

    fn output_extension(&self) -> &str {
        "m4a"
    }

    fn target_frame_size(&self, encoder_frame_size: u32) -> usize {
        match encoder_frame_size {
            0 => AAC_FRAME_SIZE,
            n => n as usize,
        }
    }

    fn source_extension(&self) -> &str {
        &self.source_extension
    }
}
