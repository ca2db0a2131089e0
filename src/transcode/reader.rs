//! Container reader
//!
//! Opens an input file, picks the best audio stream and hands out its
//! packets.

use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;

use crate::error::{ConvertError, FfmpegError, Result};

use super::decoder::AudioDecoder;

/// Wrapper for an FFmpeg input context positioned on one audio stream
pub struct InputContainer {
    inner: ffmpeg::format::context::Input,
    source_path: PathBuf,
    audio_index: usize,
}

impl InputContainer {
    /// Open a media file, probe its streams and select the best audio stream.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let inner = ffmpeg::format::input(&path).map_err(|e| {
            FfmpegError::OpenInput(format!("could not open {:?}: {}", path, e))
        })?;

        let audio_index = inner
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .map(|s| s.index())
            .ok_or_else(|| ConvertError::NoAudioStream(path.to_path_buf()))?;

        tracing::debug!(?path, audio_index, "opened input");

        Ok(Self {
            inner,
            source_path: path.to_path_buf(),
            audio_index,
        })
    }

    /// Open a decoder for the selected stream.
    pub fn open_decoder(&self) -> Result<AudioDecoder> {
        let stream = self.inner.stream(self.audio_index).ok_or_else(|| {
            ConvertError::NoAudioStream(self.source_path.clone())
        })?;
        AudioDecoder::open(&stream)
    }

    /// Index of the selected audio stream.
    pub fn audio_stream_index(&self) -> usize {
        self.audio_index
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Container duration in seconds, or `None` when the demuxer could not
    /// estimate it.
    pub fn duration_secs(&self) -> Option<f64> {
        let duration = self.inner.duration();
        if duration <= 0 {
            return None;
        }
        Some(duration as f64 / ffmpeg::ffi::AV_TIME_BASE as f64)
    }

    /// Container-level tags (title, artist, ...).
    pub fn metadata(&self) -> ffmpeg::Dictionary<'static> {
        self.inner.metadata().to_owned()
    }

    /// Iterate over all packets of all streams, in file order.
    pub fn packets(
        &mut self,
    ) -> impl Iterator<Item = (ffmpeg::Stream<'_>, ffmpeg::Packet)> + '_ {
        self.inner.packets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file_is_io_error() {
        crate::ffmpeg::init().unwrap();
        let err = match InputContainer::open("/definitely/not/here.mp3") {
            Ok(_) => panic!("opening a missing file should fail"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }

    #[test]
    fn test_open_empty_file_is_error() {
        crate::ffmpeg::init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mp3");
        std::fs::write(&path, b"").unwrap();
        assert!(InputContainer::open(&path).is_err());
    }
}
