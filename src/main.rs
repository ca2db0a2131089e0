//! Batch audio transcoder
//!
//! Queues every input given on the command line, converts them on a
//! background worker and renders progress until the queue is empty or Ctrl-C
//! is pressed.

use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_transcoder::config::{Cli, ConverterConfig, LogFormat, LoggingConfig};
use audio_transcoder::worker::{self, FileStatus, JobQueue, ProgressBoard, WorkerEvent};
use audio_transcoder::{ffmpeg, policy, Converter};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "audio-transcoder";

/// How often the progress line is redrawn
const RENDER_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging depends on the config file, so a load failure can only be
    // reported once the subscriber is up.
    let (file_config, load_error) = if cli.config.exists() {
        match ConverterConfig::from_file(&cli.config) {
            Ok(config) => (config, None),
            Err(e) => (ConverterConfig::default(), Some(e.to_string())),
        }
    } else {
        (ConverterConfig::default(), None)
    };
    let config = file_config.merge_cli(&cli);

    init_logging(&config.logging);

    if let Some(e) = load_error {
        tracing::warn!(
            "Failed to load config file {}: {}. Using defaults.",
            cli.config.display(),
            e
        );
    }
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return ExitCode::from(2);
    }

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: ConverterConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    tracing::info!("FFmpeg version: {}", ffmpeg::version_info());

    ffmpeg::init()?;
    ffmpeg::install_log_filter();
    tracing::debug!("Configuration loaded: {:?}", config);

    let policy = policy::policy_for(
        config.codec,
        config.bitrate,
        config.source_extension.as_deref(),
    );
    let jobs = worker::jobs_for_inputs(&cli.inputs, &cli.output, policy.output_extension());
    let converter = Converter::new(policy).with_overwrite(config.overwrite);

    let queue = JobQueue::shared();
    {
        let mut queue = queue.lock();
        for job in jobs {
            queue.push(job);
        }
        tracing::info!(jobs = queue.len(), codec = ?config.codec, "queued");
    }

    let cancel = CancellationToken::new();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let board = ProgressBoard::new();

    // Ctrl-C stops the worker between files
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing the current file");
            ctrl_c_token.cancel();
        }
    });

    let event_board = board.clone();
    let events_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            if let WorkerEvent::FileFinished(record) = &event {
                match record.status {
                    FileStatus::Failed => tracing::warn!("{}", record.describe()),
                    _ => tracing::info!("{}", record.describe()),
                }
            }
            event_board.apply(&event);
        }
        event_board.mark_finished();
    });

    let render_board = board.clone();
    let render_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(RENDER_INTERVAL);
        loop {
            interval.tick().await;
            let state = render_board.snapshot();
            if state.finished {
                break;
            }
            if let Some(file) = &state.current_file {
                let mut stderr = std::io::stderr().lock();
                let _ = write!(stderr, "\r{:>5.1}%  {}", state.fraction * 100.0, file.display());
                let _ = stderr.flush();
            }
        }
        eprintln!();
    });

    let handle = worker::spawn(converter, queue, events_tx, cancel);
    let report = handle.await?;

    // The worker dropped its sender, so the event stream ends by itself
    let _ = events_task.await;
    let _ = render_task.await;

    let converted = report.count(FileStatus::Converted);
    let skipped = report.count(FileStatus::Skipped);
    let failed = report.count(FileStatus::Failed);
    tracing::info!(converted, skipped, failed, cancelled = report.cancelled, "done");

    if let Some(path) = &config.report {
        report.write_json(path)?;
        tracing::info!("Run report written to {}", path.display());
    }

    Ok(if failed > 0 || report.cancelled {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Initialize logging with tracing
fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("audio_transcoder={},ffmpeg=warn", logging.level).into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_cli_requires_output_and_input() {
        assert!(Cli::try_parse_from([APP_NAME, "a.mp3"]).is_err());
        assert!(Cli::try_parse_from([APP_NAME, "--output", "out"]).is_err());
        assert!(Cli::try_parse_from([APP_NAME, "--output", "out", "a.mp3"]).is_ok());
    }
}
