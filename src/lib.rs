//! # frameseq - Video to Image Sequence Extractor
//!
//! `frameseq` drives an external `ffmpeg` binary to extract the frames of a
//! video as a numbered image sequence, and reports progress while it runs.
//!
//! ## Features
//!
//! - Numbered output filenames with a configurable prefix, start index and padding
//! - PNG and JPEG output
//! - Frame rate and frame count probing through `ffprobe`
//! - Progress reporting over a channel, suitable for UI front ends
//! - Cancellation of a running conversion
//!
//! ## Example
//!
//! ```no_run
//! use frameseq::{FfmpegConfig, ParameterState, RunEvent, Session};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut params = ParameterState::default();
//! params.set_source("input.mp4");
//! params.set_output_dir("frames");
//! params.set_prefix("frame_");
//!
//! let mut session = Session::new(FfmpegConfig::default());
//! let run = session.start(&params)?;
//! while let Some(event) = run.next_event() {
//!     match event {
//!         RunEvent::Started => println!("ffmpeg started"),
//!         RunEvent::Progress(update) => println!("{}", update.message()),
//!         RunEvent::Finished(outcome) => println!("{}", outcome.message),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub mod command;
pub mod error;
pub mod pattern;
pub mod probe;
pub mod runner;
pub mod validation;

pub use command::{build_conversion_args, build_conversion_command, open_output_folder};
pub use error::{StartError, ValidationError};
pub use pattern::{build_output_pattern, output_pattern_path, preview_filename};
pub use probe::{parse_frame_count, parse_frame_rate, probe_frame_rate, probe_media, probe_total_frames, ProbeResult};
pub use runner::{parse_frame_counter, CancelHandle, ConversionRun, OutputLines, RunEvent, RunOutcome, RunState, Session};
pub use validation::{validate, ParameterState, DIGIT_WIDTHS};

/// Output image format of the extracted frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpg,
    Jpeg,
}

impl ImageFormat {
    /// Every format offered to the user, in display order
    pub const ALL: [ImageFormat; 3] = [ImageFormat::Png, ImageFormat::Jpg, ImageFormat::Jpeg];

    /// File extension without the leading dot
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpg => "jpg",
            ImageFormat::Jpeg => "jpeg",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ImageFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        ImageFormat::ALL
            .into_iter()
            .find(|f| f.extension().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow!("Unknown image format '{}'. Available formats: png, jpg, jpeg", s))
    }
}

/// Locations of the external ffmpeg tools and how long a probe may take
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegConfig {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    probe_timeout: Duration,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }
}

impl FfmpegConfig {
    /// Use a specific ffmpeg binary
    pub fn with_ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    /// Use a specific ffprobe binary
    pub fn with_ffprobe_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffprobe_path = path.into();
        self
    }

    /// Upper bound for a single probe invocation
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn ffmpeg_cmd(&self) -> &Path {
        &self.ffmpeg_path
    }

    pub fn ffprobe_cmd(&self) -> &Path {
        &self.ffprobe_path
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Runs `ffmpeg -version` and reports whether it exited cleanly within five seconds
    pub fn is_available(&self) -> bool {
        let mut cmd = command::new_command(&self.ffmpeg_path);
        cmd.arg("-version");
        match probe::run_bounded(cmd, Duration::from_secs(5)) {
            Some(output) => output.status.success(),
            None => false,
        }
    }
}

/// Default upper bound for an ffprobe call, in seconds
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

/// Application configuration: defaults for every conversion parameter
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub fps: f64,
    pub format: ImageFormat,
    pub prefix: String,
    pub start_index: u64,
    pub digit_width: usize,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub probe_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            format: ImageFormat::Png,
            prefix: String::new(),
            start_index: 1,
            digit_width: 3,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
        }
    }
}

impl AppConfig {
    /// Load configuration from a `.toml` or `.json` file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let config: AppConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text).context("parsing config toml")?,
            _ => serde_json::from_str(&text).context("parsing config json")?,
        };
        config.check().with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if !DIGIT_WIDTHS.contains(&self.digit_width) {
            return Err(anyhow!("digit_width must be one of 2, 3, 4, 5 (got {})", self.digit_width));
        }
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(anyhow!("fps must be greater than 0 (got {})", self.fps));
        }
        Ok(())
    }

    /// Tool locations derived from this configuration
    pub fn ffmpeg_config(&self) -> FfmpegConfig {
        FfmpegConfig::default()
            .with_ffmpeg_path(&self.ffmpeg_path)
            .with_ffprobe_path(&self.ffprobe_path)
            .with_probe_timeout(Duration::from_secs(self.probe_timeout_secs))
    }

    /// Fresh parameter state seeded with these defaults
    pub fn parameter_state(&self) -> ParameterState {
        let mut params = ParameterState::default();
        params.set_frame_rate(self.fps.to_string());
        params.set_format(self.format);
        params.set_prefix(self.prefix.clone());
        params.set_start_index(self.start_index.to_string());
        params.set_digit_width(self.digit_width);
        params
    }
}

/// A validated, ready-to-run set of conversion parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionConfig {
    pub source_path: PathBuf,
    pub frame_rate: f64,
    pub prefix: String,
    pub start_index: u64,
    pub digit_width: usize,
    pub format: ImageFormat,
    pub output_dir: PathBuf,
}

impl ConversionConfig {
    /// Full output path template handed to ffmpeg
    pub fn output_pattern(&self) -> PathBuf {
        output_pattern_path(&self.output_dir, &self.prefix, self.start_index, self.digit_width, self.format.extension())
    }
}

/// Progress information for a running conversion
///
/// Delivered to the foreground each time ffmpeg reports a new frame counter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Frames ffmpeg reports as written so far
    pub frames_processed: u64,
    /// Total frames in the source, if the probe could tell
    pub total_frames: Option<u64>,
    /// Percentage complete (0.0 to 100.0), 0.0 when the total is unknown
    pub percentage: f64,
}

impl ProgressUpdate {
    pub fn new(frames_processed: u64, total_frames: Option<u64>) -> Self {
        Self {
            frames_processed,
            total_frames,
            percentage: progress_percentage(frames_processed, total_frames),
        }
    }

    /// Human-readable status line
    pub fn message(&self) -> String {
        format!("Converting... {:.1}% ({} frames processed)", self.percentage, self.frames_processed)
    }
}

/// Percentage of `total` covered by `frames`, clamped to 100.
///
/// An unknown or zero total yields 0.
pub fn progress_percentage(frames: u64, total: Option<u64>) -> f64 {
    match total {
        Some(total) if total > 0 => ((frames as f64 / total as f64) * 100.0).min(100.0),
        _ => 0.0,
    }
}
