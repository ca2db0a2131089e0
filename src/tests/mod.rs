//! FFmpeg-backed scenario tests
//!
//! End-to-end conversions of synthetic inputs:
//! - Frame counts and the short final frame after flushing
//! - Resampling between rates
//! - Progress reporting
//! - Directory walks, including unreadable files

mod scenarios;
