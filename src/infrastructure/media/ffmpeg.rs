//! HLS encoding through the ffmpeg CLI.
//!
//! Audio becomes a single AAC rendition. Video becomes an H.264 ladder, one
//! sub-directory per rendition, tied together by `master.m3u8`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::future::try_join_all;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::{MediaTranscoder, ProgressFn};
use crate::common::error::TranscodeError;
use crate::modules::transcode::model::MediaFormat;

const SEGMENT_SECONDS: &str = "6";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamVariant {
    pub resolution: &'static str,
    pub size: &'static str,
    pub bitrate: &'static str,
    pub bandwidth: u64,
}

pub static VIDEO_LADDER: [StreamVariant; 4] = [
    StreamVariant {
        resolution: "360p",
        size: "640x360",
        bitrate: "800k",
        bandwidth: 800_000,
    },
    StreamVariant {
        resolution: "480p",
        size: "842x480",
        bitrate: "1400k",
        bandwidth: 1_400_000,
    },
    StreamVariant {
        resolution: "720p",
        size: "1280x720",
        bitrate: "2800k",
        bandwidth: 2_800_000,
    },
    StreamVariant {
        resolution: "1080p",
        size: "1920x1080",
        bitrate: "5000k",
        bandwidth: 5_000_000,
    },
];

pub struct FfmpegTranscoder {
    ffmpeg: String,
    ffprobe: String,
    media_root: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(
        ffmpeg: impl Into<String>,
        ffprobe: impl Into<String>,
        media_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            media_root: media_root.into(),
        }
    }

    /// Relative job paths are rooted at the media root.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.media_root.join(path)
        }
    }

    fn base_args(input: &Path) -> Vec<String> {
        vec![
            "-y".into(),
            "-v".into(),
            "error".into(),
            "-nostats".into(),
            "-progress".into(),
            "pipe:1".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
        ]
    }

    pub fn audio_args(input: &Path, output_dir: &Path) -> Vec<String> {
        let mut args = Self::base_args(input);
        args.extend(
            [
                "-vn",
                "-c:a",
                "aac",
                "-hls_time",
                SEGMENT_SECONDS,
                "-hls_list_size",
                "0",
                "-hls_segment_filename",
            ]
            .map(String::from),
        );
        args.push(output_dir.join("segment_%03d.ts").to_string_lossy().into_owned());
        args.extend(["-f", "hls"].map(String::from));
        args.push(output_dir.join("index.m3u8").to_string_lossy().into_owned());
        args
    }

    pub fn video_args(input: &Path, rendition_dir: &Path, variant: &StreamVariant) -> Vec<String> {
        let mut args = Self::base_args(input);
        args.extend(
            [
                "-c:v",
                "libx264",
                "-c:a",
                "aac",
                "-profile:v",
                "baseline",
                "-level",
                "3.0",
                "-start_number",
                "0",
                "-hls_time",
                SEGMENT_SECONDS,
                "-hls_list_size",
                "0",
                "-s",
                variant.size,
                "-b:v",
                variant.bitrate,
                "-maxrate",
                variant.bitrate,
                "-bufsize",
                "2M",
                "-hls_segment_filename",
            ]
            .map(String::from),
        );
        args.push(rendition_dir.join("segment_%03d.ts").to_string_lossy().into_owned());
        args.extend(["-f", "hls"].map(String::from));
        args.push(rendition_dir.join("index.m3u8").to_string_lossy().into_owned());
        args
    }

    pub fn master_playlist(ladder: &[StreamVariant]) -> String {
        let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
        for variant in ladder {
            playlist.push_str(&format!(
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}\n{}/index.m3u8\n",
                variant.bandwidth, variant.size, variant.resolution
            ));
        }
        playlist
    }

    async fn probe_duration_ms(&self, input: &Path) -> Option<u64> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-show_entries", "format=duration", "-of", "csv=p=0"])
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let seconds: f64 = String::from_utf8_lossy(&output.stdout).trim().parse().ok()?;
        Some((seconds * 1000.0) as u64)
    }

    async fn run(
        &self,
        label: &str,
        args: Vec<String>,
        duration_ms: Option<u64>,
        progress: impl Fn(f64),
    ) -> Result<(), TranscodeError> {
        debug!("ffmpeg {}: {}", label, args.join(" "));
        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text).await;
                text
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let (Some(total), Some(done)) = (duration_ms, parse_out_time_ms(&line)) {
                    if total > 0 {
                        progress((done as f64 / total as f64 * 100.0).min(100.0));
                    }
                }
            }
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(TranscodeError::ToolFailed {
                tool: format!("ffmpeg ({label})"),
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn transcode_audio(
        &self,
        input: &Path,
        output_dir: &Path,
        duration_ms: Option<u64>,
        progress: ProgressFn,
    ) -> Result<(), TranscodeError> {
        info!("🚀 Starting audio transcoding for {}", input.display());
        self.run(
            "audio",
            Self::audio_args(input, output_dir),
            duration_ms,
            move |pct| progress(pct),
        )
        .await?;
        info!("✅ Audio HLS conversion completed for {}", input.display());
        Ok(())
    }

    async fn transcode_video(
        &self,
        input: &Path,
        output_dir: &Path,
        duration_ms: Option<u64>,
        progress: ProgressFn,
    ) -> Result<(), TranscodeError> {
        let shares = Arc::new(Mutex::new(vec![0.0_f64; VIDEO_LADDER.len()]));

        let renditions = VIDEO_LADDER.iter().enumerate().map(|(index, variant)| {
            let rendition_dir = output_dir.join(variant.resolution);
            let shares = Arc::clone(&shares);
            let progress = Arc::clone(&progress);
            async move {
                tokio::fs::create_dir_all(&rendition_dir).await?;
                info!("🚀 Starting {} conversion for {}", variant.resolution, input.display());
                self.run(
                    variant.resolution,
                    Self::video_args(input, &rendition_dir, variant),
                    duration_ms,
                    move |pct| {
                        if let Ok(mut shares) = shares.lock() {
                            shares[index] = pct;
                            let mean = shares.iter().sum::<f64>() / shares.len() as f64;
                            progress(mean);
                        }
                    },
                )
                .await?;
                info!("✅ {} conversion finished for {}", variant.resolution, input.display());
                Ok::<(), TranscodeError>(())
            }
        });
        try_join_all(renditions).await?;

        let master = output_dir.join("master.m3u8");
        let staging = output_dir.join("master.m3u8.tmp");
        tokio::fs::write(&staging, Self::master_playlist(&VIDEO_LADDER)).await?;
        tokio::fs::rename(&staging, &master).await?;
        info!("✅ Master playlist created at {}", master.display());
        Ok(())
    }
}

#[async_trait]
impl MediaTranscoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input_path: &str,
        output_path: &str,
        format: MediaFormat,
        progress: ProgressFn,
    ) -> Result<(), TranscodeError> {
        let input = self.resolve(input_path);
        let output_dir = self.resolve(output_path);
        info!(
            "Transcoding media from {} to {}...",
            input.display(),
            output_dir.display()
        );

        if !tokio::fs::try_exists(&input).await.unwrap_or(false) {
            return Err(TranscodeError::InputNotFound(input.display().to_string()));
        }
        tokio::fs::create_dir_all(&output_dir).await?;

        let duration_ms = self.probe_duration_ms(&input).await;
        match format {
            MediaFormat::Audio => {
                self.transcode_audio(&input, &output_dir, duration_ms, progress)
                    .await
            }
            MediaFormat::Video => {
                self.transcode_video(&input, &output_dir, duration_ms, progress)
                    .await
            }
        }
    }
}

/// Extracts the encoded position from one `-progress` line, in milliseconds.
///
/// ffmpeg reports `out_time_us` and `out_time_ms`; both are microseconds.
fn parse_out_time_ms(line: &str) -> Option<u64> {
    let (key, value) = line.split_once('=')?;
    match key.trim() {
        "out_time_us" | "out_time_ms" => value.trim().parse::<u64>().ok().map(|us| us / 1000),
        _ => None,
    }
}
