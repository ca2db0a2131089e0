//! Opus output in an Ogg container

use std::path::Path;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::format::sample::{Sample, Type};

use crate::error::Result;
use crate::ffmpeg::helpers;
use crate::transcode::{EncoderConfig, StreamDescriptor};

use super::{check_channels, find_encoder, FormatPolicy, DEFAULT_SOURCE_EXTENSION};

/// Opus only runs at 48 kHz internally.
pub const OPUS_SAMPLE_RATE: u32 = 48_000;
/// 20 ms at 48 kHz.
pub const OPUS_FRAME_SIZE: usize = 960;
pub const OPUS_DEFAULT_BITRATE: u64 = 128_000;
const OPUS_MAX_CHANNELS: u16 = 8;

#[derive(Debug, Clone)]
pub struct OpusPolicy {
    bitrate: u64,
    source_extension: String,
}

impl OpusPolicy {
    pub fn new() -> Self {
        Self {
            bitrate: OPUS_DEFAULT_BITRATE,
            source_extension: DEFAULT_SOURCE_EXTENSION.to_string(),
        }
    }

    pub fn with_bitrate(mut self, bitrate: Option<u64>) -> Self {
        if let Some(b) = bitrate {
            self.bitrate = b;
        }
        self
    }

    pub fn with_source_extension(mut self, ext: &str) -> Self {
        self.source_extension = ext.trim_start_matches('.').to_string();
        self
    }
}

impl Default for OpusPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatPolicy for OpusPolicy {
    fn name(&self) -> &'static str {
        "opus"
    }

    fn output_codec_id(&self) -> ffmpeg::codec::Id {
        ffmpeg::codec::Id::OPUS
    }

    fn configure_output(&self, input: &StreamDescriptor) -> Result<EncoderConfig> {
        check_channels(input, OPUS_MAX_CHANNELS)?;
        let codec = find_encoder(&["libopus"], self.output_codec_id())?;
        let sample_format = helpers::choose_float_format(
            &helpers::supported_sample_formats(&codec),
            Sample::F32(Type::Packed),
        );

        let mut options = vec![
            ("vbr".to_string(), "on".to_string()),
            ("frame_duration".to_string(), "20".to_string()),
        ];
        if codec.name() != "libopus" {
            // The native encoder is still flagged experimental
            options.push(("strict".to_string(), "experimental".to_string()));
        }

        Ok(EncoderConfig {
            codec_id: self.output_codec_id(),
            encoder_name: Some(codec.name().to_string()),
            bit_rate: Some(self.bitrate as usize),
            sample_rate: OPUS_SAMPLE_RATE,
            sample_format,
            channel_layout: input.channel_layout,
            channels: input.channels,
            compression_level: Some(10),
            options,
        })
    }

    fn preferred_container(&self, _output: &Path) -> String {
        "opus".to_string()
    }

    fn output_extension(&self) -> &str {
        "opus"
    }

    fn target_frame_size(&self, encoder_frame_size: u32) -> usize {
        match encoder_frame_size {
            0 => OPUS_FRAME_SIZE,
            n => n as usize,
        }
    }

    fn source_extension(&self) -> &str {
        &self.source_extension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::test_support::descriptor;

    fn opus_available() -> bool {
        crate::ffmpeg::init().unwrap();
        ffmpeg::encoder::find(ffmpeg::codec::Id::OPUS).is_some()
    }

    #[test]
    fn test_opus_config() {
        if !opus_available() {
            return;
        }
        let config = OpusPolicy::new()
            .configure_output(&descriptor(44_100, 2))
            .unwrap();
        assert_eq!(config.sample_rate, OPUS_SAMPLE_RATE);
        assert!(matches!(config.sample_format, Sample::F32(_)));
        assert_eq!(config.channels, 2);
        assert_eq!(config.bit_rate, Some(128_000));
        assert_eq!(config.compression_level, Some(10));
        assert!(config
            .options
            .contains(&("vbr".to_string(), "on".to_string())));
    }

    #[test]
    fn test_opus_bitrate_override() {
        if !opus_available() {
            return;
        }
        let config = OpusPolicy::new()
            .with_bitrate(Some(64_000))
            .configure_output(&descriptor(48_000, 1))
            .unwrap();
        assert_eq!(config.bit_rate, Some(64_000));
    }

    #[test]
    fn test_opus_rejects_silent_layout() {
        crate::ffmpeg::init().unwrap();
        let err = OpusPolicy::new()
            .configure_output(&descriptor(44_100, 0))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn test_opus_container_and_frames() {
        let p = OpusPolicy::new().with_source_extension(".MP3");
        assert_eq!(p.preferred_container(Path::new("a.opus")), "opus");
        assert_eq!(p.target_frame_size(0), OPUS_FRAME_SIZE);
        assert_eq!(p.target_frame_size(960), 960);
        assert!(p.should_convert_file("mp3"));
    }
}
