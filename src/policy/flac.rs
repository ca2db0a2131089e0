//! Lossless FLAC output

use std::path::Path;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::format::sample::{Sample, Type};

use crate::error::Result;
use crate::transcode::{EncoderConfig, StreamDescriptor};

use super::{check_channels, find_encoder, FormatPolicy, DEFAULT_SOURCE_EXTENSION};

pub const FLAC_COMPRESSION_LEVEL: usize = 5;
const FLAC_MAX_CHANNELS: u16 = 8;

#[derive(Debug, Clone)]
pub struct FlacPolicy {
    source_extension: String,
}

impl FlacPolicy {
    pub fn new() -> Self {
        Self {
            source_extension: DEFAULT_SOURCE_EXTENSION.to_string(),
        }
    }

    pub fn with_source_extension(mut self, ext: &str) -> Self {
        self.source_extension = ext.trim_start_matches('.').to_string();
        self
    }
}

impl Default for FlacPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatPolicy for FlacPolicy {
    fn name(&self) -> &'static str {
        "flac"
    }

    fn output_codec_id(&self) -> ffmpeg::codec::Id {
        ffmpeg::codec::Id::FLAC
    }

    /// Keeps the input rate and layout; samples are stored as 16-bit.
    fn configure_output(&self, input: &StreamDescriptor) -> Result<EncoderConfig> {
        check_channels(input, FLAC_MAX_CHANNELS)?;
        let codec = find_encoder(&[], self.output_codec_id())?;

        Ok(EncoderConfig {
            codec_id: self.output_codec_id(),
            encoder_name: Some(codec.name().to_string()),
            bit_rate: None,
            sample_rate: input.sample_rate,
            sample_format: Sample::I16(Type::Packed),
            channel_layout: input.channel_layout,
            channels: input.channels,
            compression_level: Some(FLAC_COMPRESSION_LEVEL),
            options: Vec::new(),
        })
    }

    fn preferred_container(&self, _output: &Path) -> String {
        "flac".to_string()
    }

    fn output_extension(&self) -> &str {
        "flac"
    }

    fn source_extension(&self) -> &str {
        &self.source_extension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::test_support::descriptor;

    #[test]
    fn test_flac_preserves_rate_and_layout() {
        crate::ffmpeg::init().unwrap();
        let config = FlacPolicy::new()
            .configure_output(&descriptor(22_050, 1))
            .unwrap();
        assert_eq!(config.sample_rate, 22_050);
        assert_eq!(config.sample_format, Sample::I16(Type::Packed));
        assert_eq!(config.channels, 1);
        assert_eq!(config.bit_rate, None);
        assert_eq!(config.compression_level, Some(FLAC_COMPRESSION_LEVEL));
    }

    #[test]
    fn test_flac_source_extension() {
        let p = FlacPolicy::new().with_source_extension("wav");
        assert!(p.should_convert_file("wav"));
        assert!(!p.should_convert_file("mp3"));
        assert_eq!(p.output_extension(), "flac");
        assert_eq!(p.target_frame_size(4608), 4608);
    }
}
