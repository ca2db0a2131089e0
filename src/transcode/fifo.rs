//! Frame accumulator
//!
//! The resampler emits frames of whatever size it likes; encoders such as
//! Opus and AAC accept exactly one frame size.  `SampleFifo` buffers raw
//! sample planes in arrival order and `FrameAccumulator` re-slices them into
//! encoder-sized frames, stamping each with a contiguous presentation
//! timestamp (one tick per output sample).

use std::collections::VecDeque;

use crate::error::{ConvertError, Result};

/// Order-preserving queue of audio samples split into planes.
///
/// Works on raw bytes so any sample format fits: planar formats use one plane
/// per channel, packed formats a single plane whose stride covers every
/// channel.
#[derive(Debug)]
pub struct SampleFifo {
    planes: Vec<VecDeque<u8>>,
    stride: usize,
}

impl SampleFifo {
    /// Create an empty queue with `planes` planes of `stride` bytes per sample.
    pub fn new(planes: usize, stride: usize) -> Self {
        Self {
            planes: (0..planes.max(1)).map(|_| VecDeque::new()).collect(),
            stride: stride.max(1),
        }
    }

    /// Number of buffered samples (per channel).
    pub fn len(&self) -> usize {
        self.planes[0].len() / self.stride
    }

    pub fn is_empty(&self) -> bool {
        self.planes[0].is_empty()
    }

    pub fn planes(&self) -> usize {
        self.planes.len()
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Append `samples` samples taken from the front of each plane in `data`.
    pub fn write(&mut self, data: &[&[u8]], samples: usize) -> Result<()> {
        if data.len() != self.planes.len() {
            return Err(ConvertError::Resource(format!(
                "FIFO write: expected {} planes, got {}",
                self.planes.len(),
                data.len()
            )));
        }
        let bytes = samples * self.stride;
        if let Some(short) = data.iter().find(|p| p.len() < bytes) {
            return Err(ConvertError::Resource(format!(
                "FIFO write: plane holds {} bytes, need {}",
                short.len(),
                bytes
            )));
        }
        for (queue, plane) in self.planes.iter_mut().zip(data) {
            queue.extend(&plane[..bytes]);
        }
        Ok(())
    }

    /// Remove up to `samples` samples from the front of the queue.
    ///
    /// Returns one byte vector per plane; all have the same length, which is a
    /// multiple of the stride.
    pub fn read(&mut self, samples: usize) -> Vec<Vec<u8>> {
        let bytes = samples.min(self.len()) * self.stride;
        self.planes
            .iter_mut()
            .map(|queue| queue.drain(..bytes).collect())
            .collect()
    }
}

/// One encoder-ready slice popped from the accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFrame {
    /// Presentation timestamp in output samples.
    pub pts: i64,
    /// Samples per channel in this frame.
    pub samples: usize,
    /// Raw bytes per plane.
    pub planes: Vec<Vec<u8>>,
}

/// Re-slices buffered samples into fixed-size encoder frames.
#[derive(Debug)]
pub struct FrameAccumulator {
    fifo: SampleFifo,
    frame_size: usize,
    next_pts: i64,
    samples_in: u64,
    samples_out: u64,
}

impl FrameAccumulator {
    pub fn new(planes: usize, stride: usize, frame_size: usize) -> Self {
        Self {
            fifo: SampleFifo::new(planes, stride),
            frame_size: frame_size.max(1),
            next_pts: 0,
            samples_in: 0,
            samples_out: 0,
        }
    }

    /// Append resampled samples.
    pub fn push(&mut self, data: &[&[u8]], samples: usize) -> Result<()> {
        self.fifo.write(data, samples)?;
        self.samples_in += samples as u64;
        Ok(())
    }

    /// Pop exactly one full frame, or `None` if fewer than `frame_size`
    /// samples are buffered.
    pub fn pop_full(&mut self) -> Option<PendingFrame> {
        if self.fifo.len() < self.frame_size {
            return None;
        }
        Some(self.pop(self.frame_size))
    }

    /// Pop up to one frame of whatever is left, for end-of-stream flushing.
    /// Only the very last frame returned can be short.
    pub fn pop_remaining(&mut self) -> Option<PendingFrame> {
        if self.fifo.is_empty() {
            return None;
        }
        Some(self.pop(self.frame_size))
    }

    fn pop(&mut self, max: usize) -> PendingFrame {
        let samples = max.min(self.fifo.len());
        let planes = self.fifo.read(samples);
        let frame = PendingFrame {
            pts: self.next_pts,
            samples,
            planes,
        };
        self.next_pts += samples as i64;
        self.samples_out += samples as u64;
        frame
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Buffered samples; always equals `samples_in() - samples_out()`.
    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    /// Total samples ever pushed.
    pub fn samples_in(&self) -> u64 {
        self.samples_in
    }

    /// Total samples ever popped.
    pub fn samples_out(&self) -> u64 {
        self.samples_out
    }

    /// Timestamp the next popped frame will carry.
    pub fn next_pts(&self) -> i64 {
        self.next_pts
    }
}
