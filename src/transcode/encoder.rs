//! Audio encoder for the transcoding pipeline
//!
//! Wraps an FFmpeg `AVCodecContext` to encode fixed-size PCM frames into
//! compressed packets.  What codec, rate and format to use comes from an
//! [`EncoderConfig`] produced by the active format policy.

use crate::error::{FfmpegError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

use super::resampler::ResampleTarget;

/// Everything needed to open an encoder.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Codec to encode with.
    pub codec_id: codec::Id,
    /// Specific implementation to prefer (`libopus` over the native `opus`).
    pub encoder_name: Option<String>,
    /// Target bit rate in bits per second; `None` for lossless codecs.
    pub bit_rate: Option<usize>,
    pub sample_rate: u32,
    pub sample_format: Sample,
    pub channel_layout: ChannelLayout,
    pub channels: u16,
    /// Codec-specific compression level (`-compression_level`).
    pub compression_level: Option<usize>,
    /// Private codec options passed when opening (`vbr=on`, ...).
    pub options: Vec<(String, String)>,
}

impl EncoderConfig {
    /// The PCM shape the resampler must deliver to this encoder.
    pub fn resample_target(&self) -> ResampleTarget {
        ResampleTarget {
            sample_rate: self.sample_rate,
            sample_format: self.sample_format,
            channel_layout: self.channel_layout,
        }
    }
}

/// Audio encoder backed by a real FFmpeg codec context
pub struct AudioEncoder {
    encoder: ffmpeg::encoder::Audio,
    codec_name: String,
    time_base: ffmpeg::Rational,
    sample_rate: u32,
    sample_format: Sample,
    channel_layout: ChannelLayout,
    channels: u16,
}

impl AudioEncoder {
    /// Look up and open an encoder for `config`.
    pub fn open(config: &EncoderConfig) -> Result<Self> {
        let codec = config
            .encoder_name
            .as_deref()
            .and_then(codec::encoder::find_by_name)
            .or_else(|| codec::encoder::find(config.codec_id))
            .ok_or_else(|| {
                FfmpegError::EncoderNotFound(format!(
                    "{:?} encoder not found in this FFmpeg build",
                    config.codec_id
                ))
            })?;

        let time_base = ffmpeg::Rational::new(1, config.sample_rate as i32);

        let context = codec::Context::new_with_codec(codec);
        let mut audio_enc = context.encoder().audio().map_err(|e| {
            FfmpegError::EncoderConfigure(format!("Cannot get audio encoder handle: {}", e))
        })?;

        audio_enc.set_time_base(time_base);
        audio_enc.set_rate(config.sample_rate as i32);
        audio_enc.set_format(config.sample_format);
        audio_enc.set_channel_layout(config.channel_layout);
        if let Some(bit_rate) = config.bit_rate {
            audio_enc.set_bit_rate(bit_rate);
        }
        if config.compression_level.is_some() {
            audio_enc.set_compression(config.compression_level);
        }

        let mut opts = ffmpeg::Dictionary::new();
        for (key, value) in &config.options {
            opts.set(key, value);
        }

        let encoder = audio_enc.open_as_with(codec, opts).map_err(|e| {
            FfmpegError::EncoderOpen(format!("Failed to open {} encoder: {}", codec.name(), e))
        })?;

        tracing::debug!(
            encoder = codec.name(),
            sample_rate = config.sample_rate,
            channels = config.channels,
            format = ?config.sample_format,
            bit_rate = ?config.bit_rate,
            frame_size = encoder.frame_size(),
            "encoder opened"
        );

        Ok(Self {
            encoder,
            codec_name: codec.name().to_string(),
            time_base,
            sample_rate: config.sample_rate,
            sample_format: config.sample_format,
            channel_layout: config.channel_layout,
            channels: config.channels,
        })
    }

    /// Send one PCM frame to the encoder.
    pub fn send_frame(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<()> {
        self.encoder.send_frame(frame).map_err(|e| {
            FfmpegError::EncodeFrame(format!("{} send_frame error: {}", self.codec_name, e))
                .into()
        })
    }

    /// Send EOF to flush the encoder's buffered output.
    pub fn send_eof(&mut self) -> Result<()> {
        match self.encoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(FfmpegError::EncodeFrame(format!(
                "{} send_eof error: {}",
                self.codec_name, e
            ))
            .into()),
        }
    }

    /// Receive one encoded packet, or `None` if the encoder needs more input
    /// or has been fully drained.
    pub fn receive_packet(&mut self) -> Result<Option<ffmpeg::codec::packet::Packet>> {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        match self.encoder.receive_packet(&mut packet) {
            Ok(()) => Ok(Some(packet)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(None),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(FfmpegError::EncodeFrame(format!(
                "{} receive_packet error: {}",
                self.codec_name, e
            ))
            .into()),
        }
    }

    /// Samples per channel the encoder wants per frame; 0 when it accepts
    /// any size.
    pub fn reported_frame_size(&self) -> u32 {
        self.encoder.frame_size()
    }

    /// Codec parameters for the encoded stream (for muxer stream setup).
    pub fn codec_parameters(&self) -> Option<ffmpeg::codec::Parameters> {
        crate::ffmpeg::helpers::encoder_codec_parameters(&self.encoder)
    }

    /// Name of the implementation actually opened (`libopus`, `flac`, ...).
    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    /// Timebase of packets produced by this encoder (1 / sample_rate).
    pub fn time_base(&self) -> ffmpeg::Rational {
        self.time_base
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_format(&self) -> Sample {
        self.sample_format
    }

    pub fn channel_layout(&self) -> ChannelLayout {
        self.channel_layout
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

/// Get recommended AAC bitrate for a given channel count.
pub fn recommended_aac_bitrate(channels: u16) -> usize {
    match channels {
        1 => 64_000,
        2 => 128_000,
        6 => 384_000,
        8 => 512_000,
        _ => 128_000,
    }
}
