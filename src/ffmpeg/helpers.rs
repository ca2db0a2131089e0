//! Safe wrappers around FFmpeg FFI calls.
//!
//! Every function in this module is `pub` and **safe** to call.  All `unsafe`
//! blocks are contained here with explicit safety arguments.  Callers outside
//! this module should never need to write `unsafe` for routine FFmpeg access.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;
use std::ffi::{CStr, CString};
use std::path::Path;

// ── Encoder / stream parameters ─────────────────────────────────────────────

/// Allocate a fresh `AVCodecParameters`, copy the opened encoder context into
/// it, and return it as a safe `ffmpeg::codec::Parameters`.
///
/// Used to describe the encoded stream to the muxer.
pub fn encoder_codec_parameters(
    encoder: &ffmpeg::codec::encoder::Audio,
) -> Option<ffmpeg::codec::Parameters> {
    use std::ops::Deref;
    use std::rc::Rc;
    let ctx: &ffmpeg::codec::Context = encoder.deref();
    // SAFETY: `avcodec_parameters_alloc` returns a valid pointer or null; null
    // is checked before use.  `ctx.as_ptr()` is non-null for a live encoder.
    unsafe {
        let params = ffmpeg::ffi::avcodec_parameters_alloc();
        if params.is_null() {
            return None;
        }
        if ffmpeg::ffi::avcodec_parameters_from_context(params, ctx.as_ptr()) < 0 {
            let mut params = params;
            ffmpeg::ffi::avcodec_parameters_free(&mut params);
            return None;
        }
        Some(ffmpeg::codec::Parameters::wrap(
            params,
            None::<Rc<dyn std::any::Any>>,
        ))
    }
}

/// Zero out `codec_tag` on the `AVCodecParameters` attached to an output
/// stream, so the muxer picks the correct tag for the target container.
///
/// Must be called after `out_stream.set_parameters(...)` and before
/// `write_header`.
pub fn stream_reset_codec_tag(out_stream: &mut ffmpeg::format::stream::StreamMut) {
    // SAFETY: `out_stream.as_mut_ptr()` is valid for the lifetime of the
    // stream.  `codecpar` is set by `set_parameters` and is non-null.
    unsafe {
        (*(*out_stream.as_mut_ptr()).codecpar).codec_tag = 0;
    }
}

// ── Muxer lookup ─────────────────────────────────────────────────────────────

/// Resolve an output muxer name.
///
/// With `short_name` set, returns the muxer registered under that name.
/// Without it, guesses from the file extension of `path`.  Returns `None` when
/// FFmpeg knows no matching muxer.
pub fn guess_output_format(short_name: Option<&str>, path: &Path) -> Option<String> {
    let name_c = match short_name {
        Some(n) => Some(CString::new(n).ok()?),
        None => None,
    };
    let path_c = CString::new(path.to_string_lossy().as_bytes()).ok()?;

    // SAFETY: all pointers passed are either null or valid NUL-terminated
    // strings that outlive the call.  The returned `AVOutputFormat` is a
    // static registry entry, never freed.
    unsafe {
        let fmt = ffmpeg::ffi::av_guess_format(
            name_c.as_ref().map_or(std::ptr::null(), |c| c.as_ptr()),
            if short_name.is_some() {
                std::ptr::null()
            } else {
                path_c.as_ptr()
            },
            std::ptr::null(),
        );
        if fmt.is_null() || (*fmt).name.is_null() {
            return None;
        }
        Some(CStr::from_ptr((*fmt).name).to_string_lossy().into_owned())
    }
}

// ── Resampler state ─────────────────────────────────────────────────────────

/// Samples buffered inside a resampler, expressed at `rate` samples per
/// second (pass the input rate to get input samples).
///
/// `resampling::Context::delay()` asks for the delay in whole seconds, which
/// rounds a filter's few dozen samples down to zero.
pub fn resampler_delay(context: &ffmpeg::software::resampling::Context, rate: u32) -> i64 {
    // SAFETY: `context.as_ptr()` is a valid, initialised `SwrContext` for the
    // lifetime of `context`.  `swr_get_delay` only reads its state.
    let delay =
        unsafe { ffmpeg::ffi::swr_get_delay(context.as_ptr() as *mut _, i64::from(rate)) };
    delay.max(0)
}

// ── Codec capabilities ───────────────────────────────────────────────────────

/// Sample formats an encoder declares support for, in its preference order.
///
/// Empty when the encoder does not publish a list (it then accepts anything
/// the caller configures).
pub fn supported_sample_formats(codec: &ffmpeg::Codec) -> Vec<Sample> {
    match codec.audio() {
        Ok(audio) => audio.formats().map(|it| it.collect()).unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

/// Pick the sample format to encode with: the first floating-point format the
/// encoder supports, otherwise the encoder's first listed format, otherwise
/// `fallback`.
pub fn choose_float_format(supported: &[Sample], fallback: Sample) -> Sample {
    supported
        .iter()
        .copied()
        .find(|f| matches!(f, Sample::F32(_)))
        .or_else(|| supported.first().copied())
        .unwrap_or(fallback)
}

// ── Channel layouts ─────────────────────────────────────────────────────────

/// Return `layout` if it names its channels, otherwise the default layout for
/// `channels` channels.
///
/// Headerless sources (plain PCM WAV, some MP3s) report only a channel count.
pub fn layout_or_default(layout: ChannelLayout, channels: u16) -> ChannelLayout {
    if layout.bits() != 0 {
        return layout;
    }
    match channels {
        1 => ChannelLayout::MONO,
        2 => ChannelLayout::STEREO,
        n => ChannelLayout::default(n as i32),
    }
}

// ── Audio plane access ───────────────────────────────────────────────────────

/// Number of data planes and bytes per sample within one plane.
///
/// Planar formats carry one plane per channel; packed formats interleave all
/// channels in a single plane.
pub fn plane_geometry(format: Sample, channels: usize) -> (usize, usize) {
    if format.is_planar() {
        (channels, format.bytes())
    } else {
        (1, format.bytes() * channels)
    }
}

/// Extract an audio plane slice from an `AVFrame`.
///
/// Works around a bug in `ffmpeg-next`'s `Audio::data(index)` method where it
/// stops counting planes if `linesize[1] == 0`. In FFmpeg, planar audio frames
/// often only populate `linesize[0]` to represent the size of *every* plane.
pub fn audio_plane_data(frame: &ffmpeg::util::frame::Audio, index: usize) -> &[u8] {
    // SAFETY: `frame.as_ptr()` is valid for the lifetime of `frame`; every
    // plane pointer is null-checked and `linesize[0]` bounds each plane.
    unsafe {
        let f = frame.as_ptr();
        let channels = (*f).ch_layout.nb_channels as usize;

        if frame.format().is_planar() {
            if index >= channels {
                return &[];
            }
        } else if index > 0 {
            return &[];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &[];
        }

        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &[];
        }

        let size = (*f).linesize[0] as usize;
        std::slice::from_raw_parts(plane_ptr, size)
    }
}

/// Mutable version of `audio_plane_data`.
pub fn audio_plane_data_mut(frame: &mut ffmpeg::util::frame::Audio, index: usize) -> &mut [u8] {
    // SAFETY: as for `audio_plane_data`; the frame is exclusively borrowed.
    unsafe {
        let f = frame.as_mut_ptr();
        let channels = (*f).ch_layout.nb_channels as usize;

        if frame.format().is_planar() {
            if index >= channels {
                return &mut [];
            }
        } else if index > 0 {
            return &mut [];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &mut [];
        }

        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &mut [];
        }

        let size = (*f).linesize[0] as usize;
        std::slice::from_raw_parts_mut(plane_ptr, size)
    }
}
