//! End-to-end conversion scenarios

use std::path::Path;
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::converter::{ConversionSummary, Converter};
use crate::error::ErrorKind;
use crate::policy::{AacPolicy, FlacPolicy, FormatPolicy, OpusPolicy};
use crate::tests::fixtures::{
    ceil_div, decoded_samples, has_encoder, packet_timing, write_streaming_wav, write_wav,
};

fn converter(policy: impl FormatPolicy + 'static) -> Converter {
    crate::ffmpeg::init().unwrap();
    Converter::new(Box::new(policy))
}

/// Frame accounting every conversion must satisfy: all frames full except
/// possibly the last, and nothing lost between resampler and encoder.
fn assert_frame_accounting(summary: &ConversionSummary) {
    let fs = summary.frame_size as u64;
    assert!(summary.frames_encoded > 0);
    assert_eq!(summary.samples_encoded, summary.samples_resampled);
    assert_eq!(
        summary.frames_encoded,
        ceil_div(summary.samples_resampled, fs)
    );
    assert_eq!(
        summary.samples_encoded,
        (summary.frames_encoded - 1) * fs + summary.last_frame_samples as u64
    );
    assert!(summary.last_frame_samples > 0);
    assert!(summary.last_frame_samples <= summary.frame_size);
    assert!(summary.packets_written > 0);
}

#[test]
fn test_flac_round_trip_keeps_every_sample() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("tone.wav");
    let output = dir.path().join("tone.flac");
    write_wav(&input, 44_100, 1, 10_000);

    let summary = converter(FlacPolicy::new())
        .convert_file(&input, &output)
        .unwrap();

    assert_eq!(summary.output_sample_rate, 44_100);
    assert_eq!(summary.samples_resampled, 10_000);
    assert_frame_accounting(&summary);

    let fs = summary.frame_size;
    assert_eq!(summary.frames_encoded, ceil_div(10_000, fs as u64));
    let remainder = 10_000 % fs;
    assert_eq!(
        summary.last_frame_samples,
        if remainder == 0 { fs } else { remainder }
    );

    assert_eq!(decoded_samples(&output), 10_000);
}

#[test]
fn test_aac_short_final_frame() {
    if !has_encoder(ffmpeg::codec::Id::AAC) {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("stereo.wav");
    let output = dir.path().join("nested").join("stereo.m4a");
    write_wav(&input, 48_000, 2, 5_000);

    let summary = converter(AacPolicy::new())
        .convert_file(&input, &output)
        .unwrap();

    assert_eq!(summary.frame_size, 1024);
    assert_eq!(summary.samples_resampled, 5_000);
    assert_eq!(summary.frames_encoded, 5);
    assert_eq!(summary.last_frame_samples, 904);
    assert_frame_accounting(&summary);
    assert!(output.exists());
}

#[test]
fn test_resampled_round_trip_frame_count() {
    if !has_encoder(ffmpeg::codec::Id::AAC) {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("cd.wav");
    let output = dir.path().join("cd.m4a");
    write_wav(&input, 44_100, 2, 10_000);

    let summary = converter(AacPolicy::new())
        .convert_file(&input, &output)
        .unwrap();

    assert_eq!(summary.output_sample_rate, 48_000);
    // 10000 * 48000 / 44100 = 10884.35..., including the resampler's tail
    let expected = ceil_div(10_000 * 48_000, 44_100) as i64;
    let produced = summary.samples_resampled as i64;
    assert!(
        (produced - expected).abs() <= 2,
        "resampled {} samples, expected {}",
        produced,
        expected
    );

    let fs = summary.frame_size as u64;
    assert_eq!(summary.frames_encoded, ceil_div(summary.samples_resampled, fs));
    let remainder = (summary.samples_resampled % fs) as usize;
    assert_eq!(
        summary.last_frame_samples,
        if remainder == 0 { summary.frame_size } else { remainder }
    );
    assert_frame_accounting(&summary);
}

#[test]
fn test_muxed_timestamps_are_contiguous() {
    if !has_encoder(ffmpeg::codec::Id::AAC) {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("tone.wav");
    let output = dir.path().join("tone.m4a");
    write_wav(&input, 48_000, 2, 12_345);

    let summary = converter(AacPolicy::new())
        .convert_file(&input, &output)
        .unwrap();

    let timing = packet_timing(&output);
    assert_eq!(timing.len() as u64, summary.packets_written);
    assert!(timing.iter().all(|&(_, duration)| duration > 0));
    for pair in timing.windows(2) {
        let ((pts, duration), (next, _)) = (pair[0], pair[1]);
        assert_eq!(next, pts + duration, "gap or overlap after pts {}", pts);
    }
}

#[test]
fn test_opus_conversion() {
    if !has_encoder(ffmpeg::codec::Id::OPUS) {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("voice.wav");
    let output = dir.path().join("voice.opus");
    write_wav(&input, 44_100, 1, 22_050);

    let summary = converter(OpusPolicy::new())
        .convert_file(&input, &output)
        .unwrap();

    assert_eq!(summary.output_sample_rate, 48_000);
    assert_eq!(summary.frame_size, 960);
    assert_frame_accounting(&summary);
    assert!(output.exists());
}

#[test]
fn test_progress_is_monotonic_and_ends_at_one() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("long.wav");
    let output = dir.path().join("long.flac");
    write_wav(&input, 44_100, 2, 44_100 * 2);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut conv = converter(FlacPolicy::new());
    conv.set_progress_callback(move |f| sink.lock().push(f));
    conv.convert_file(&input, &output).unwrap();

    let seen = seen.lock();
    assert!(seen.len() > 1);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert!(seen.iter().all(|f| (0.0..=1.0).contains(f)));
    assert_eq!(seen.last().copied(), Some(1.0));
}

#[test]
fn test_input_without_declared_length_still_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("stream.wav");
    let output = dir.path().join("stream.flac");
    write_streaming_wav(&input, 44_100, 1, 30_000);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut conv = converter(FlacPolicy::new());
    conv.set_progress_callback(move |f| sink.lock().push(f));
    let summary = conv.convert_file(&input, &output).unwrap();

    assert_eq!(summary.samples_resampled, 30_000);
    assert_frame_accounting(&summary);

    let seen = seen.lock();
    assert!(seen.iter().all(|f| f.is_finite() && (0.0..=1.0).contains(f)));
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last().copied(), Some(1.0));
}

#[test]
fn test_missing_input_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = converter(FlacPolicy::new())
        .convert_file(&dir.path().join("absent.wav"), &dir.path().join("absent.flac"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_directory_mirrors_tree() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    write_wav(&input.join("a.wav"), 22_050, 1, 3_000);
    write_wav(&input.join("b.wav"), 22_050, 1, 3_000);
    write_wav(&input.join("sub").join("c.wav"), 22_050, 1, 3_000);
    std::fs::write(input.join("sub").join("d.txt"), b"not audio").unwrap();

    let mut conv = converter(FlacPolicy::new().with_source_extension("wav"));
    let report = conv.convert_directory(&input, &output);

    assert_eq!(report.converted.len(), 3);
    assert!(report.failed.is_empty());
    assert!(!report.cancelled);
    assert!(output.join("a.flac").exists());
    assert!(output.join("b.flac").exists());
    assert!(output.join("sub").join("c.flac").exists());
    assert!(!output.join("sub").join("d.flac").exists());
    assert!(!output.join("sub").join("d.txt").exists());
}

#[test]
fn test_directory_continues_past_unreadable_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    write_wav(&input.join("a.wav"), 22_050, 1, 3_000);
    std::fs::write(input.join("bad.wav"), b"").unwrap();
    write_wav(&input.join("c.wav"), 22_050, 1, 3_000);

    let mut conv = converter(FlacPolicy::new().with_source_extension("wav"));
    let report = conv.convert_directory(&input, &output);

    assert_eq!(report.converted.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, input.join("bad.wav"));
    assert!(output.join("c.flac").exists());
}

#[test]
fn test_cancellation_between_files() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    write_wav(&input.join("a.wav"), 22_050, 1, 3_000);
    write_wav(&input.join("b.wav"), 22_050, 1, 3_000);

    let token = CancellationToken::new();
    let trigger = token.clone();
    let mut conv = converter(FlacPolicy::new().with_source_extension("wav"));
    // Cancel as soon as the first file reports completion
    conv.set_progress_callback(move |f| {
        if f >= 1.0 {
            trigger.cancel();
        }
    });
    let report = conv.convert_directory_with_cancel(&input, &output, &token);

    assert!(report.cancelled);
    assert_eq!(report.converted.len(), 1);
    assert!(output.join("a.flac").exists());
    assert!(!Path::new(&output.join("b.flac")).exists());
}
