//! Conversion orchestrator
//!
//! Drives one file through reader → decoder → resampler → accumulator →
//! encoder → writer, and walks directory trees converting every eligible
//! file.  All native resources of a conversion live in a [`Session`] and are
//! released when it goes out of scope, on success and on every error path.

use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;
use tokio_util::sync::CancellationToken;

use crate::error::{ConvertError, Result};
use crate::ffmpeg::helpers;
use crate::policy::FormatPolicy;
use crate::transcode::{
    AudioDecoder, AudioEncoder, AudioResampler, FrameAccumulator, InputContainer,
    OutputContainer, PendingFrame, ProgressCallback, ProgressTracker,
};

/// What one successful conversion produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSummary {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Name of the encoder implementation used.
    pub encoder: String,
    /// Frames handed to the encoder.
    pub frames_encoded: u64,
    /// Samples per channel handed to the encoder.
    pub samples_encoded: u64,
    /// Samples per channel produced by the resampler.
    pub samples_resampled: u64,
    pub packets_written: u64,
    /// Samples in the final frame; equals `frame_size` when the input divided
    /// evenly.
    pub last_frame_samples: usize,
    pub frame_size: usize,
    pub output_sample_rate: u32,
}

/// Result of one file inside a directory walk.
#[derive(Debug)]
pub enum FileOutcome {
    Converted(ConversionSummary),
    /// Output already existed and overwriting is disabled.
    Skipped,
    Failed(ConvertError),
}

/// Result of a directory walk.  Never an error: per-file failures are
/// collected here.
#[derive(Debug, Default)]
pub struct DirectoryReport {
    pub converted: Vec<ConversionSummary>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    /// The walk stopped early because cancellation was requested.
    pub cancelled: bool,
}

impl DirectoryReport {
    pub fn total(&self) -> usize {
        self.converted.len() + self.skipped.len() + self.failed.len()
    }
}

/// One input file of a directory walk and where its output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Receives per-file notifications during a directory walk.
pub trait WalkObserver {
    fn file_started(&mut self, _file: &PlannedFile) {}
    fn file_finished(&mut self, _file: &PlannedFile, _outcome: &FileOutcome) {}
}

impl WalkObserver for () {}

/// Pipeline orchestrator.
///
/// One instance runs one conversion at a time; it is `Send` so a worker
/// thread can own it, but it is never shared.
pub struct Converter {
    policy: Box<dyn FormatPolicy>,
    progress: Option<ProgressCallback>,
    overwrite: bool,
}

impl Converter {
    pub fn new(policy: Box<dyn FormatPolicy>) -> Self {
        Self {
            policy,
            progress: None,
            overwrite: true,
        }
    }

    /// With `false`, files whose output already exists are skipped instead
    /// of converted again.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn policy(&self) -> &dyn FormatPolicy {
        self.policy.as_ref()
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    /// Install the progress callback, replacing any previous one.
    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: FnMut(f64) + Send + 'static,
    {
        self.progress = Some(Box::new(callback));
    }

    pub fn clear_progress_callback(&mut self) {
        self.progress = None;
    }

    /// Convert a single file.
    ///
    /// The output's parent directory is created if needed.  On error the
    /// output file, if any, is indeterminate.
    pub fn convert_file(&mut self, input: &Path, output: &Path) -> Result<ConversionSummary> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(input = %input.display(), output = %output.display(), codec = self.policy.name(), "converting");

        let mut session = Session::open(self.policy.as_ref(), input, output)?;

        let progress = &mut self.progress;
        let mut notify = |fraction: f64| {
            if let Some(cb) = progress.as_mut() {
                cb(fraction);
            }
        };

        let summary = session.run(&mut notify)?;
        drop(session);

        tracing::info!(
            output = %output.display(),
            frames = summary.frames_encoded,
            samples = summary.samples_encoded,
            packets = summary.packets_written,
            "conversion finished"
        );
        Ok(ConversionSummary {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            ..summary
        })
    }

    /// Convert every eligible file under `input_dir` into a mirrored tree
    /// under `output_dir`.
    pub fn convert_directory(&mut self, input_dir: &Path, output_dir: &Path) -> DirectoryReport {
        self.convert_directory_with(input_dir, output_dir, &CancellationToken::new(), &mut ())
    }

    /// Like [`Converter::convert_directory`], stopping between files once
    /// `cancel` fires.
    pub fn convert_directory_with_cancel(
        &mut self,
        input_dir: &Path,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> DirectoryReport {
        self.convert_directory_with(input_dir, output_dir, cancel, &mut ())
    }

    /// Directory walk reporting each file to `observer` as it starts and
    /// completes.
    pub fn convert_directory_with(
        &mut self,
        input_dir: &Path,
        output_dir: &Path,
        cancel: &CancellationToken,
        observer: &mut dyn WalkObserver,
    ) -> DirectoryReport {
        let mut report = DirectoryReport::default();

        let plan = match plan_directory(self.policy.as_ref(), input_dir, output_dir) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(dir = %input_dir.display(), "cannot read input directory: {}", e);
                report.failed.push((input_dir.to_path_buf(), e.to_string()));
                return report;
            }
        };
        report.failed.extend(plan.unreadable);

        tracing::info!(dir = %input_dir.display(), files = plan.files.len(), "directory conversion");

        for file in &plan.files {
            if cancel.is_cancelled() {
                tracing::info!("directory conversion cancelled");
                report.cancelled = true;
                break;
            }

            let outcome = if !self.overwrite && file.output.exists() {
                tracing::info!(output = %file.output.display(), "output exists, skipping");
                FileOutcome::Skipped
            } else {
                observer.file_started(file);
                match self.convert_file(&file.input, &file.output) {
                    Ok(summary) => FileOutcome::Converted(summary),
                    Err(e) => {
                        tracing::warn!(input = %file.input.display(), "conversion failed: {}", e);
                        FileOutcome::Failed(e)
                    }
                }
            };

            observer.file_finished(file, &outcome);

            match outcome {
                FileOutcome::Converted(summary) => report.converted.push(summary),
                FileOutcome::Skipped => report.skipped.push(file.input.clone()),
                FileOutcome::Failed(e) => report.failed.push((file.input.clone(), e.to_string())),
            }
        }

        report
    }
}

/// Files a directory walk will convert, plus the entries it could not
/// inspect.
#[derive(Debug, Default)]
pub struct DirectoryPlan {
    /// Sorted by input path for a stable conversion order.
    pub files: Vec<PlannedFile>,
    /// Subdirectories or entries that could not be read, with the reason.
    pub unreadable: Vec<(PathBuf, String)>,
}

/// List every file under `input_dir` the policy converts, paired with its
/// mirrored output path.
///
/// Only an unreadable `input_dir` is an error.  Anything below it that
/// cannot be read is logged, recorded in [`DirectoryPlan::unreadable`] and
/// passed over.  Symlinks to files are converted; symlinked directories are
/// not descended into.
pub fn plan_directory(
    policy: &dyn FormatPolicy,
    input_dir: &Path,
    output_dir: &Path,
) -> std::io::Result<DirectoryPlan> {
    let entries = std::fs::read_dir(input_dir)?;
    let mut plan = DirectoryPlan::default();
    let mut inputs = Vec::new();
    collect_files(policy, input_dir, entries, &mut inputs, &mut plan.unreadable);
    inputs.sort();

    plan.files = inputs
        .into_iter()
        .filter_map(|input| {
            let rel = input.strip_prefix(input_dir).ok()?.to_path_buf();
            let output = output_dir
                .join(rel)
                .with_extension(policy.output_extension());
            Some(PlannedFile { input, output })
        })
        .collect();
    Ok(plan)
}

fn is_eligible(policy: &dyn FormatPolicy, path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| policy.should_convert_file(e))
        .unwrap_or(false)
}

fn collect_files(
    policy: &dyn FormatPolicy,
    dir: &Path,
    entries: std::fs::ReadDir,
    out: &mut Vec<PathBuf>,
    unreadable: &mut Vec<(PathBuf, String)>,
) {
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), "skipping unreadable entry: {}", e);
                unreadable.push((dir.to_path_buf(), e.to_string()));
                continue;
            }
        };
        let path = entry.path();

        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            match std::fs::read_dir(&path) {
                Ok(sub) => collect_files(policy, &path, sub, out, unreadable),
                Err(e) => {
                    tracing::warn!(dir = %path.display(), "skipping unreadable directory: {}", e);
                    unreadable.push((path, e.to_string()));
                }
            }
            continue;
        }

        if !is_eligible(policy, &path) {
            continue;
        }
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => out.push(path),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(input = %path.display(), "skipping unreadable file: {}", e);
                unreadable.push((path, e.to_string()));
            }
        }
    }
}

// ── Per-file session ────────────────────────────────────────────────────────

/// Every stage after the decoder.
///
/// Field order is teardown order: resampler first, then the writer (closing
/// the output file) and the encoder.
struct Stages {
    resampler: AudioResampler,
    accumulator: FrameAccumulator,
    writer: OutputContainer,
    encoder: AudioEncoder,
    tracker: ProgressTracker,
    frames_encoded: u64,
    samples_encoded: u64,
    last_frame_samples: usize,
}

/// All native resources of one conversion.  The decoder goes after the
/// encoding stages, the reader last.
struct Session {
    stages: Stages,
    decoder: AudioDecoder,
    reader: InputContainer,
}

impl Session {
    /// Setup: input, decoder, encoder, output (header written), resampler.
    /// Anything opened before a failing step is released on return.
    fn open(policy: &dyn FormatPolicy, input: &Path, output: &Path) -> Result<Self> {
        let reader = InputContainer::open(input)?;
        let decoder = reader.open_decoder()?;
        let descriptor = *decoder.descriptor();

        let config = policy.configure_output(&descriptor)?;
        let encoder = AudioEncoder::open(&config)?;

        let container = policy.preferred_container(output);
        let mut writer =
            OutputContainer::create(output, Some(&container), &encoder, Some(reader.metadata()))?;
        writer.write_header()?;

        let resampler = AudioResampler::new(&descriptor, config.resample_target())?;

        let frame_size = policy.target_frame_size(encoder.reported_frame_size());
        let (planes, stride) =
            helpers::plane_geometry(encoder.sample_format(), encoder.channels() as usize);
        let accumulator = FrameAccumulator::new(planes, stride, frame_size);
        let tracker = ProgressTracker::new(reader.duration_secs(), encoder.sample_rate());

        tracing::debug!(
            in_rate = descriptor.sample_rate,
            out_rate = encoder.sample_rate(),
            frame_size,
            encoder = encoder.codec_name(),
            muxer = writer.format_name(),
            "pipeline ready"
        );

        Ok(Self {
            stages: Stages {
                resampler,
                accumulator,
                writer,
                encoder,
                tracker,
                frames_encoded: 0,
                samples_encoded: 0,
                last_frame_samples: 0,
            },
            decoder,
            reader,
        })
    }

    fn run(&mut self, notify: &mut dyn FnMut(f64)) -> Result<ConversionSummary> {
        let audio_index = self.decoder.descriptor().index;
        let stages = &mut self.stages;
        let decoder = &mut self.decoder;

        for (stream, packet) in self.reader.packets() {
            if stream.index() != audio_index {
                continue;
            }
            decoder.decode(&packet, |frame| stages.accept(frame, &mut *notify))?;
        }
        decoder.finish(|frame| stages.accept(frame, &mut *notify))?;

        stages.finish(notify)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        tracing::debug!(
            input = %self.reader.source_path().display(),
            "releasing conversion resources"
        );
    }
}

impl Stages {
    /// Resample one decoded frame into the accumulator and encode every
    /// whole frame that became available.
    fn accept(
        &mut self,
        frame: &mut ffmpeg::util::frame::Audio,
        notify: &mut dyn FnMut(f64),
    ) -> Result<()> {
        let resampled = self.resampler.convert(frame)?;
        self.buffer(&resampled)?;
        self.encode_full_frames(notify)
    }

    fn buffer(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<()> {
        let samples = frame.samples();
        if samples == 0 {
            return Ok(());
        }
        let planes: Vec<&[u8]> = (0..self.accumulator_planes())
            .map(|i| helpers::audio_plane_data(frame, i))
            .collect();
        self.accumulator.push(&planes, samples)
    }

    fn accumulator_planes(&self) -> usize {
        helpers::plane_geometry(self.encoder.sample_format(), self.encoder.channels() as usize).0
    }

    fn encode_full_frames(&mut self, notify: &mut dyn FnMut(f64)) -> Result<()> {
        while let Some(pending) = self.accumulator.pop_full() {
            self.encode(pending, notify)?;
        }
        Ok(())
    }

    fn encode(&mut self, pending: PendingFrame, notify: &mut dyn FnMut(f64)) -> Result<()> {
        let frame = self.build_frame(&pending)?;
        self.encoder.send_frame(&frame)?;
        self.frames_encoded += 1;
        self.samples_encoded += pending.samples as u64;
        self.last_frame_samples = pending.samples;
        self.write_packets()?;

        if let Some(fraction) = self.tracker.advance(pending.samples) {
            notify(fraction);
        }
        Ok(())
    }

    fn build_frame(&self, pending: &PendingFrame) -> Result<ffmpeg::util::frame::Audio> {
        let mut frame = ffmpeg::util::frame::Audio::new(
            self.encoder.sample_format(),
            pending.samples,
            self.encoder.channel_layout(),
        );
        frame.set_rate(self.encoder.sample_rate());
        frame.set_pts(Some(pending.pts));

        for (index, plane) in pending.planes.iter().enumerate() {
            let dst = helpers::audio_plane_data_mut(&mut frame, index);
            if dst.len() < plane.len() {
                return Err(ConvertError::Resource(format!(
                    "encoder frame plane {} holds {} bytes, need {}",
                    index,
                    dst.len(),
                    plane.len()
                )));
            }
            dst[..plane.len()].copy_from_slice(plane);
        }
        Ok(frame)
    }

    fn write_packets(&mut self) -> Result<()> {
        let time_base = self.encoder.time_base();
        while let Some(mut packet) = self.encoder.receive_packet()? {
            self.writer.write_packet(&mut packet, time_base)?;
        }
        Ok(())
    }

    /// End of input, once the decoder is drained: flush the resampler,
    /// encode what is left in the accumulator (the last frame may be short),
    /// flush the encoder and close the container.
    fn finish(&mut self, notify: &mut dyn FnMut(f64)) -> Result<ConversionSummary> {
        let tail = self.resampler.flush()?;
        tracing::debug!(
            samples = tail.iter().map(|f| f.samples()).sum::<usize>(),
            "resampler flushed"
        );
        for frame in &tail {
            self.buffer(frame)?;
        }

        while let Some(pending) = self.accumulator.pop_remaining() {
            self.encode(pending, notify)?;
        }

        self.encoder.send_eof()?;
        self.write_packets()?;
        self.writer.write_trailer()?;

        notify(self.tracker.finish());

        Ok(ConversionSummary {
            input: PathBuf::new(),
            output: self.writer.path().to_path_buf(),
            encoder: self.encoder.codec_name().to_string(),
            frames_encoded: self.frames_encoded,
            samples_encoded: self.samples_encoded,
            samples_resampled: self.accumulator.samples_in(),
            packets_written: self.writer.packets_written(),
            last_frame_samples: self.last_frame_samples,
            frame_size: self.accumulator.frame_size(),
            output_sample_rate: self.encoder.sample_rate(),
        })
    }
}
