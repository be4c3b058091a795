//! Media encoding capability.

use std::sync::Arc;

use async_trait::async_trait;

use crate::common::error::TranscodeError;
use crate::modules::transcode::model::MediaFormat;

pub mod ffmpeg;

pub use ffmpeg::FfmpegTranscoder;

/// Advisory progress callback, in percent. Never used for control decisions.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

#[async_trait]
pub trait MediaTranscoder: Send + Sync {
    /// Encodes `input_path` into `output_path`, creating the output directory
    /// when absent. Re-running after a failure must start from scratch.
    async fn transcode(
        &self,
        input_path: &str,
        output_path: &str,
        format: MediaFormat,
        progress: ProgressFn,
    ) -> Result<(), TranscodeError>;
}
