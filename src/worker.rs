//! Background conversion worker
//!
//! Jobs wait in a shared [`JobQueue`] (removable until picked up).  A single
//! blocking worker pops them one at a time and runs them through its own
//! [`Converter`]; nothing else touches that converter.  Status flows back as
//! [`WorkerEvent`]s over an unbounded channel, so the converting thread never
//! waits on whoever renders progress.  Cancellation is checked between jobs
//! and between files of a directory job, never inside a file.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::converter::{ConversionSummary, Converter, FileOutcome, PlannedFile, WalkObserver};

/// Progress events closer together than this are not forwarded.
const PROGRESS_STEP: f64 = 0.01;

/// Status lines kept on the progress board.
const BOARD_HISTORY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    File,
    Directory,
}

/// One queued conversion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub input: PathBuf,
    pub output: PathBuf,
    pub kind: JobKind,
    pub queued_at: DateTime<Utc>,
}

impl Job {
    /// A job converting `input`; directories become directory jobs.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        let input = input.into();
        let kind = if input.is_dir() {
            JobKind::Directory
        } else {
            JobKind::File
        };
        Self {
            id: Uuid::new_v4(),
            input,
            output: output.into(),
            kind,
            queued_at: Utc::now(),
        }
    }
}

/// Build one job per command-line input.
///
/// Directories mirror into `output`.  A single file input converts to
/// `output` itself unless `output` is an existing directory or has no
/// extension; otherwise, and for several inputs, files land in `output` named
/// after their stem with `extension`.
pub fn jobs_for_inputs(inputs: &[PathBuf], output: &Path, extension: &str) -> Vec<Job> {
    let output_is_dir =
        inputs.len() > 1 || output.is_dir() || output.extension().is_none();
    inputs
        .iter()
        .map(|input| {
            if input.is_dir() || !output_is_dir {
                return Job::new(input.clone(), output);
            }
            let stem = input.file_stem().unwrap_or(input.as_os_str());
            Job::new(
                input.clone(),
                output.join(stem).with_extension(extension),
            )
        })
        .collect()
}

/// FIFO of pending jobs
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
}

/// Queue shared between whoever submits jobs and the worker.
pub type SharedQueue = Arc<Mutex<JobQueue>>;

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedQueue {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Append a job and return its id.
    pub fn push(&mut self, job: Job) -> Uuid {
        let id = job.id;
        self.jobs.push_back(job);
        id
    }

    pub fn pop(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    /// Remove a job that has not started yet.
    pub fn remove(&mut self, id: Uuid) -> Option<Job> {
        let pos = self.jobs.iter().position(|j| j.id == id)?;
        self.jobs.remove(pos)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }
}

/// Final state of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Converted,
    Skipped,
    Failed,
}

/// Status reported by the worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    JobStarted { id: Uuid, input: PathBuf },
    FileStarted { input: PathBuf, output: PathBuf },
    Progress { fraction: f64 },
    FileFinished(FileRecord),
    JobFinished { id: Uuid },
    Cancelled,
}

/// Per-file entry of the run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub input: PathBuf,
    pub output: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub frames_encoded: u64,
    pub samples_encoded: u64,
}

impl FileRecord {
    fn converted(summary: &ConversionSummary) -> Self {
        Self {
            input: summary.input.clone(),
            output: summary.output.clone(),
            status: FileStatus::Converted,
            error: None,
            frames_encoded: summary.frames_encoded,
            samples_encoded: summary.samples_encoded,
        }
    }

    fn skipped(input: &Path, output: &Path) -> Self {
        Self {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            status: FileStatus::Skipped,
            error: None,
            frames_encoded: 0,
            samples_encoded: 0,
        }
    }

    fn failed(input: &Path, output: &Path, error: String) -> Self {
        Self {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            status: FileStatus::Failed,
            error: Some(error),
            frames_encoded: 0,
            samples_encoded: 0,
        }
    }

    fn from_outcome(input: &Path, output: &Path, outcome: &FileOutcome) -> Self {
        match outcome {
            FileOutcome::Converted(summary) => Self::converted(summary),
            FileOutcome::Skipped => Self::skipped(input, output),
            FileOutcome::Failed(e) => Self::failed(input, output, e.to_string()),
        }
    }

    /// Status line for humans.
    pub fn describe(&self) -> String {
        match self.status {
            FileStatus::Converted => format!("converted {}", self.output.display()),
            FileStatus::Skipped => format!("skipped {} (output exists)", self.input.display()),
            FileStatus::Failed => format!(
                "failed {}: {}",
                self.input.display(),
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

/// Summary of a whole worker run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub codec: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    pub files: Vec<FileRecord>,
}

impl RunReport {
    pub fn new(codec: &str) -> Self {
        Self {
            codec: codec.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            cancelled: false,
            files: Vec::new(),
        }
    }

    pub fn count(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }
}

// ── Progress board ──────────────────────────────────────────────────────────

/// Snapshot of what the worker is doing, for rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardState {
    pub current_file: Option<PathBuf>,
    pub fraction: f64,
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub messages: VecDeque<String>,
    pub finished: bool,
}

/// Latest worker state, written from the event stream and read by the
/// render path.
#[derive(Debug, Clone, Default)]
pub struct ProgressBoard {
    state: Arc<Mutex<BoardState>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, event: &WorkerEvent) {
        let mut state = self.state.lock();
        match event {
            WorkerEvent::JobStarted { input, .. } => {
                push_message(&mut state, format!("started {}", input.display()));
            }
            WorkerEvent::FileStarted { input, .. } => {
                state.current_file = Some(input.clone());
                state.fraction = 0.0;
            }
            WorkerEvent::Progress { fraction } => {
                state.fraction = fraction.clamp(0.0, 1.0);
            }
            WorkerEvent::FileFinished(record) => {
                match record.status {
                    FileStatus::Converted => state.converted += 1,
                    FileStatus::Skipped => state.skipped += 1,
                    FileStatus::Failed => state.failed += 1,
                }
                state.current_file = None;
                push_message(&mut state, record.describe());
            }
            WorkerEvent::JobFinished { .. } => {}
            WorkerEvent::Cancelled => {
                push_message(&mut state, "cancelled".to_string());
            }
        }
    }

    pub fn mark_finished(&self) {
        self.state.lock().finished = true;
    }

    pub fn snapshot(&self) -> BoardState {
        self.state.lock().clone()
    }
}

fn push_message(state: &mut BoardState, message: String) {
    if state.messages.len() == BOARD_HISTORY {
        state.messages.pop_front();
    }
    state.messages.push_back(message);
}

// ── Worker ──────────────────────────────────────────────────────────────────

/// Run jobs from `queue` until it is empty or `cancel` fires.
///
/// Blocking; call from a dedicated thread.
pub fn run_jobs(
    converter: &mut Converter,
    queue: &SharedQueue,
    events: &UnboundedSender<WorkerEvent>,
    cancel: &CancellationToken,
) -> RunReport {
    let mut report = RunReport::new(converter.policy().name());

    install_progress_forwarder(converter, events.clone());

    loop {
        if cancel.is_cancelled() {
            report.cancelled = true;
            let _ = events.send(WorkerEvent::Cancelled);
            break;
        }
        // Lock only for the pop so jobs can be removed while one runs
        let Some(job) = queue.lock().pop() else {
            break;
        };

        tracing::info!(id = %job.id, input = %job.input.display(), kind = ?job.kind, "job started");
        let _ = events.send(WorkerEvent::JobStarted {
            id: job.id,
            input: job.input.clone(),
        });

        match job.kind {
            JobKind::File => {
                let record = run_file_job(converter, &job, events);
                report.files.push(record);
            }
            JobKind::Directory => {
                let mut observer = EventObserver {
                    events,
                    records: Vec::new(),
                };
                let dir_report =
                    converter.convert_directory_with(&job.input, &job.output, cancel, &mut observer);
                let mut records = observer.records;
                // Unlistable directories and unreadable entries never reach
                // the observer; they only appear in the walk's failures.
                for (path, error) in &dir_report.failed {
                    if records.iter().any(|r| &r.input == path) {
                        continue;
                    }
                    let record = FileRecord::failed(path, &job.output, error.clone());
                    let _ = events.send(WorkerEvent::FileFinished(record.clone()));
                    records.push(record);
                }
                report.files.extend(records);
                if dir_report.cancelled {
                    report.cancelled = true;
                }
            }
        }

        let _ = events.send(WorkerEvent::JobFinished { id: job.id });
    }

    converter.clear_progress_callback();
    report.finished_at = Some(Utc::now());
    tracing::info!(
        converted = report.count(FileStatus::Converted),
        skipped = report.count(FileStatus::Skipped),
        failed = report.count(FileStatus::Failed),
        cancelled = report.cancelled,
        "worker finished"
    );
    report
}

fn run_file_job(
    converter: &mut Converter,
    job: &Job,
    events: &UnboundedSender<WorkerEvent>,
) -> FileRecord {
    let record = if !converter.overwrite() && job.output.exists() {
        FileRecord::skipped(&job.input, &job.output)
    } else {
        let _ = events.send(WorkerEvent::FileStarted {
            input: job.input.clone(),
            output: job.output.clone(),
        });
        match converter.convert_file(&job.input, &job.output) {
            Ok(summary) => FileRecord::converted(&summary),
            Err(e) => {
                tracing::warn!(input = %job.input.display(), "conversion failed: {}", e);
                FileRecord::failed(&job.input, &job.output, e.to_string())
            }
        }
    };
    let _ = events.send(WorkerEvent::FileFinished(record.clone()));
    record
}

/// Turns directory-walk notifications into worker events.
struct EventObserver<'a> {
    events: &'a UnboundedSender<WorkerEvent>,
    records: Vec<FileRecord>,
}

impl WalkObserver for EventObserver<'_> {
    fn file_started(&mut self, file: &PlannedFile) {
        let _ = self.events.send(WorkerEvent::FileStarted {
            input: file.input.clone(),
            output: file.output.clone(),
        });
    }

    fn file_finished(&mut self, file: &PlannedFile, outcome: &FileOutcome) {
        let record = FileRecord::from_outcome(&file.input, &file.output, outcome);
        let _ = self.events.send(WorkerEvent::FileFinished(record.clone()));
        self.records.push(record);
    }
}

/// Forward converter progress as events, dropping updates smaller than
/// [`PROGRESS_STEP`].  Never blocks.
fn install_progress_forwarder(converter: &mut Converter, events: UnboundedSender<WorkerEvent>) {
    let mut last = -1.0_f64;
    converter.set_progress_callback(move |fraction| {
        let is_new_file = fraction < last;
        if is_new_file || fraction >= 1.0 || fraction - last >= PROGRESS_STEP {
            last = fraction;
            let _ = events.send(WorkerEvent::Progress { fraction });
        }
    });
}

/// Run the worker on tokio's blocking pool.
pub fn spawn(
    mut converter: Converter,
    queue: SharedQueue,
    events: UnboundedSender<WorkerEvent>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<RunReport> {
    tokio::task::spawn_blocking(move || run_jobs(&mut converter, &queue, &events, &cancel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::FlacPolicy;
    use tokio::sync::mpsc;

    fn job(name: &str) -> Job {
        Job::new(format!("/nonexistent/{}.mp3", name), "/tmp/out")
    }

    #[test]
    fn test_queue_fifo_and_remove() {
        let mut queue = JobQueue::new();
        let a = queue.push(job("a"));
        let b = queue.push(job("b"));
        let c = queue.push(job("c"));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.remove(b).map(|j| j.id), Some(b));
        assert!(queue.remove(b).is_none());

        assert_eq!(queue.pop().map(|j| j.id), Some(a));
        assert_eq!(queue.pop().map(|j| j.id), Some(c));
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_job_kind() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Job::new(dir.path(), "/tmp/out").kind, JobKind::Directory);
        assert_eq!(job("x").kind, JobKind::File);
    }

    #[test]
    fn test_jobs_for_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let single = jobs_for_inputs(
            &[PathBuf::from("/music/a.mp3")],
            Path::new("/tmp/a.opus"),
            "opus",
        );
        assert_eq!(single[0].output, PathBuf::from("/tmp/a.opus"));

        let many = jobs_for_inputs(
            &[PathBuf::from("/music/a.mp3"), dir.path().to_path_buf()],
            Path::new("/tmp/out"),
            "opus",
        );
        assert_eq!(many[0].output, PathBuf::from("/tmp/out/a.opus"));
        assert_eq!(many[1].kind, JobKind::Directory);
        assert_eq!(many[1].output, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_board_applies_events() {
        let board = ProgressBoard::new();
        board.apply(&WorkerEvent::FileStarted {
            input: "a.mp3".into(),
            output: "a.flac".into(),
        });
        board.apply(&WorkerEvent::Progress { fraction: 0.5 });
        let snap = board.snapshot();
        assert_eq!(snap.current_file, Some(PathBuf::from("a.mp3")));
        assert_eq!(snap.fraction, 0.5);

        board.apply(&WorkerEvent::FileFinished(FileRecord::failed(
            Path::new("a.mp3"),
            Path::new("a.flac"),
            "boom".into(),
        )));
        let snap = board.snapshot();
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.current_file, None);
        assert_eq!(snap.messages.back().map(String::as_str), Some("failed a.mp3: boom"));
    }

    #[test]
    fn test_board_history_is_bounded() {
        let board = ProgressBoard::new();
        for _ in 0..(BOARD_HISTORY + 10) {
            board.apply(&WorkerEvent::Cancelled);
        }
        assert_eq!(board.snapshot().messages.len(), BOARD_HISTORY);
    }

    #[test]
    fn test_failed_file_is_reported_and_worker_continues() {
        crate::ffmpeg::init().unwrap();
        let queue = JobQueue::shared();
        queue.lock().push(job("missing-1"));
        queue.lock().push(job("missing-2"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut converter = Converter::new(Box::new(FlacPolicy::new())).with_overwrite(true);
        let report = run_jobs(&mut converter, &queue, &tx, &CancellationToken::new());

        assert_eq!(report.count(FileStatus::Failed), 2);
        assert!(!report.cancelled);
        assert!(report.finished_at.is_some());

        let mut finished_jobs = 0;
        while let Ok(event) = rx.try_recv() {
            if let WorkerEvent::JobFinished { .. } = event {
                finished_jobs += 1;
            }
        }
        assert_eq!(finished_jobs, 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_job_reports_unreadable_entries_once() {
        crate::ffmpeg::init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        std::fs::create_dir_all(&input).unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone.mp3"), input.join("a.mp3")).unwrap();
        std::fs::write(input.join("b.mp3"), b"").unwrap();

        let queue = JobQueue::shared();
        queue.lock().push(Job::new(&input, dir.path().join("out")));
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut converter = Converter::new(Box::new(FlacPolicy::new()));
        let report = run_jobs(&mut converter, &queue, &tx, &CancellationToken::new());

        let failed: Vec<_> = report.files.iter().map(|f| f.input.clone()).collect();
        assert_eq!(failed, vec![input.join("b.mp3"), input.join("a.mp3")]);
        assert_eq!(report.count(FileStatus::Failed), 2);
    }

    #[test]
    fn test_cancel_before_start_leaves_queue() {
        let queue = JobQueue::shared();
        queue.lock().push(job("a"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        token.cancel();

        let mut converter = Converter::new(Box::new(FlacPolicy::new()));
        let report = run_jobs(&mut converter, &queue, &tx, &token);
        assert!(report.cancelled);
        assert!(report.files.is_empty());
        assert_eq!(queue.lock().len(), 1);
        assert_eq!(rx.try_recv().ok(), Some(WorkerEvent::Cancelled));
    }

    #[test]
    fn test_report_json() {
        let mut report = RunReport::new("flac");
        report.files.push(FileRecord::skipped(Path::new("a.mp3"), Path::new("a.flac")));
        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["codec"], "flac");
        assert_eq!(value["files"][0]["status"], "skipped");
        assert!(value["files"][0].get("error").is_none());
    }
}
