//! Audio resampler for the transcoding pipeline
//!
//! Converts decoded PCM frames to the sample rate, sample format and channel
//! layout the encoder was opened with.  Resampling is not memoryless: the
//! underlying `SwrContext` carries history across frames, so output buffers
//! are sized from its pending delay plus the incoming frame.

use crate::error::{FfmpegError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::resampling;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

use crate::ffmpeg::helpers;

use super::decoder::StreamDescriptor;

/// Extra output room reserved when draining the resampler at end of stream.
const FLUSH_HEADROOM: usize = 32;

/// Output capacity needed to resample `input_samples` more samples while
/// `delay` input-rate samples are still pending inside the resampler:
/// `ceil((delay + input_samples) * out_rate / in_rate)`.
pub fn output_capacity(delay: i64, input_samples: usize, in_rate: u32, out_rate: u32) -> usize {
    if in_rate == 0 {
        return input_samples;
    }
    let pending = delay.max(0) as u128 + input_samples as u128;
    let num = pending * out_rate as u128;
    let den = in_rate as u128;
    num.div_ceil(den) as usize
}

/// Target of a resampler: what the encoder consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResampleTarget {
    pub sample_rate: u32,
    pub sample_format: Sample,
    pub channel_layout: ChannelLayout,
}

/// Audio resampler wrapping FFmpeg's `SwrContext`
pub struct AudioResampler {
    context: resampling::Context,
    input_rate: u32,
    input_layout: ChannelLayout,
    target: ResampleTarget,
}

impl AudioResampler {
    /// Create a resampler from the decoder's stream description to `target`.
    pub fn new(input: &StreamDescriptor, target: ResampleTarget) -> Result<Self> {
        let context = resampling::Context::get(
            input.sample_format,
            input.channel_layout,
            input.sample_rate,
            target.sample_format,
            target.channel_layout,
            target.sample_rate,
        )
        .map_err(|e| {
            FfmpegError::ResamplerCreate(format!(
                "{} Hz {:?} -> {} Hz {:?}: {}",
                input.sample_rate, input.sample_format, target.sample_rate, target.sample_format, e
            ))
        })?;

        Ok(Self {
            context,
            input_rate: input.sample_rate,
            input_layout: input.channel_layout,
            target,
        })
    }

    /// Samples still held inside the resampler, in input-rate units.
    pub fn pending_delay(&self) -> i64 {
        helpers::resampler_delay(&self.context, self.input_rate)
    }

    /// Convert one decoded frame.
    ///
    /// The returned frame may hold more or fewer samples than `frame` did;
    /// its `samples()` is the authoritative count.
    pub fn convert(
        &mut self,
        frame: &mut ffmpeg::util::frame::Audio,
    ) -> Result<ffmpeg::util::frame::Audio> {
        // Decoders for headerless inputs leave the layout unset; the context
        // was built with the default layout for the channel count.
        if frame.channel_layout().bits() == 0 {
            frame.set_channel_layout(self.input_layout);
        }

        let capacity = output_capacity(
            self.pending_delay(),
            frame.samples(),
            self.input_rate,
            self.target.sample_rate,
        );
        let mut out = self.alloc_output(capacity.max(1));

        self.context
            .run(frame, &mut out)
            .map_err(|e| FfmpegError::Resample(format!("resampling error: {}", e)))?;

        Ok(out)
    }

    /// Drain the samples still buffered inside the resampler at end of
    /// stream, in output order.
    ///
    /// A flush failure is not fatal: a passthrough context has nothing
    /// buffered and may refuse the call.
    pub fn flush(&mut self) -> Result<Vec<ffmpeg::util::frame::Audio>> {
        let mut tail = Vec::new();
        loop {
            let capacity = output_capacity(
                self.pending_delay(),
                0,
                self.input_rate,
                self.target.sample_rate,
            ) + FLUSH_HEADROOM;
            let mut out = self.alloc_output(capacity);
            if let Err(e) = self.context.flush(&mut out) {
                tracing::debug!("Resampler flush returned non-fatal error: {}", e);
                break;
            }
            if out.samples() == 0 {
                break;
            }
            tail.push(out);
        }
        Ok(tail)
    }

    fn alloc_output(&self, samples: usize) -> ffmpeg::util::frame::Audio {
        let mut out = ffmpeg::util::frame::Audio::new(
            self.target.sample_format,
            samples,
            self.target.channel_layout,
        );
        out.set_rate(self.target.sample_rate);
        out
    }

    pub fn target(&self) -> ResampleTarget {
        self.target
    }
}
