//! Decoding stage
//!
//! Turns the packets of the selected audio stream into PCM frames.  Every
//! call drains the codec completely before returning, handing each frame to
//! a caller-supplied sink, so nothing decoded is ever left inside FFmpeg
//! between packets.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

use crate::error::{FfmpegError, Result};
use crate::ffmpeg::helpers;

/// The audio stream chosen for conversion, as the decoder sees it.
#[derive(Debug, Clone, Copy)]
pub struct StreamDescriptor {
    pub index: usize,
    pub codec_id: ffmpeg::codec::Id,
    pub sample_rate: u32,
    pub channels: u16,
    /// Never unspecified: headerless sources get the default layout for
    /// their channel count.
    pub channel_layout: ChannelLayout,
    pub sample_format: Sample,
    pub time_base: ffmpeg::Rational,
}

/// Decoder for one input stream
pub struct AudioDecoder {
    decoder: ffmpeg::decoder::Audio,
    descriptor: StreamDescriptor,
    frame: ffmpeg::util::frame::Audio,
    frames_decoded: u64,
    packets_skipped: u64,
}

/// EAGAIN and EOF both mean "nothing more for now".
fn is_drained(e: &ffmpeg::Error) -> bool {
    match e {
        ffmpeg::Error::Eof => true,
        ffmpeg::Error::Other { errno } => *errno == ffmpeg::error::EAGAIN,
        _ => false,
    }
}

impl AudioDecoder {
    /// Open a decoder from the stream's codec parameters and describe the
    /// PCM it will produce.
    pub fn open(stream: &ffmpeg::format::stream::Stream) -> Result<Self> {
        let index = stream.index();
        let codec_id = stream.parameters().id();

        if ffmpeg::codec::decoder::find(codec_id).is_none() {
            return Err(FfmpegError::DecoderNotFound(format!(
                "{:?} (input stream {})",
                codec_id, index
            ))
            .into());
        }

        let decoder = ffmpeg::codec::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().audio())
            .map_err(|e| FfmpegError::DecoderOpen(format!("{:?}: {}", codec_id, e)))?;

        let channels = decoder.channels();
        let descriptor = StreamDescriptor {
            index,
            codec_id,
            sample_rate: decoder.rate(),
            channels,
            channel_layout: helpers::layout_or_default(decoder.channel_layout(), channels),
            sample_format: decoder.format(),
            time_base: stream.time_base(),
        };

        tracing::debug!(
            codec = ?descriptor.codec_id,
            sample_rate = descriptor.sample_rate,
            channels = descriptor.channels,
            format = ?descriptor.sample_format,
            "decoder opened"
        );

        Ok(Self {
            decoder,
            descriptor,
            frame: ffmpeg::util::frame::Audio::empty(),
            frames_decoded: 0,
            packets_skipped: 0,
        })
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    /// Decode one packet and pass every frame it yields to `sink`.
    ///
    /// A packet the codec rejects as invalid data is counted and skipped; MP3
    /// files routinely open with a damaged frame or end in junk.
    pub fn decode<F>(&mut self, packet: &ffmpeg::Packet, sink: F) -> Result<()>
    where
        F: FnMut(&mut ffmpeg::util::frame::Audio) -> Result<()>,
    {
        match self.decoder.send_packet(packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::InvalidData) => {
                self.packets_skipped += 1;
                tracing::debug!(pts = ?packet.pts(), "skipping undecodable packet");
                return Ok(());
            }
            Err(e) => return Err(FfmpegError::DecodePacket(e.to_string()).into()),
        }
        self.drain(sink)
    }

    /// Signal end of input and pass the frames still buffered to `sink`.
    pub fn finish<F>(&mut self, sink: F) -> Result<()>
    where
        F: FnMut(&mut ffmpeg::util::frame::Audio) -> Result<()>,
    {
        match self.decoder.send_eof() {
            Err(e) if !is_drained(&e) => {
                return Err(FfmpegError::DecodePacket(format!("at end of stream: {}", e)).into())
            }
            _ => {}
        }
        self.drain(sink)?;
        tracing::debug!(
            frames = self.frames_decoded,
            skipped_packets = self.packets_skipped,
            "decoder drained"
        );
        Ok(())
    }

    fn drain<F>(&mut self, mut sink: F) -> Result<()>
    where
        F: FnMut(&mut ffmpeg::util::frame::Audio) -> Result<()>,
    {
        loop {
            match self.decoder.receive_frame(&mut self.frame) {
                Ok(()) => {
                    self.frames_decoded += 1;
                    sink(&mut self.frame)?;
                }
                Err(e) if is_drained(&e) => return Ok(()),
                Err(e) => return Err(FfmpegError::DecodePacket(e.to_string()).into()),
            }
        }
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Packets dropped because the codec could not decode them.
    pub fn packets_skipped(&self) -> u64 {
        self.packets_skipped
    }
}
