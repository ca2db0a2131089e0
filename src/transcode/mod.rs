//! Audio transcoding stages
//!
//! Each stage wraps one native resource:
//! - Container reader (demuxer) and audio stream selection
//! - Audio decoder
//! - Resampler to the encoder's rate, format and layout
//! - Frame accumulator re-slicing decoder output into encoder frames
//! - Audio encoder
//! - Container writer (muxer)
//!
//! The orchestration lives in [`crate::converter`].

pub mod decoder;
pub mod encoder;
pub mod fifo;
pub mod progress;
pub mod reader;
pub mod resampler;
pub mod writer;

pub use decoder::{AudioDecoder, StreamDescriptor};
pub use encoder::{AudioEncoder, EncoderConfig};
pub use fifo::{FrameAccumulator, PendingFrame, SampleFifo};
pub use progress::{ProgressCallback, ProgressTracker};
pub use reader::InputContainer;
pub use resampler::{AudioResampler, ResampleTarget};
pub use writer::OutputContainer;
