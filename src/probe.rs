//! ffprobe queries for the source video's frame rate and frame count.
//!
//! Probing is best effort: every failure (missing binary, timeout, non-zero
//! exit, unparsable output) comes back as `None` and is only logged at debug
//! level. A missing frame count only means progress cannot be expressed as a
//! percentage.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::command::new_command;
use crate::FfmpegConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// What ffprobe could tell about the first video stream
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProbeResult {
    pub frame_rate: Option<f64>,
    pub total_frames: Option<u64>,
}

/// Parse an ffprobe `r_frame_rate` value such as `30000/1001` or `25`.
///
/// The result is rounded to two decimals. A zero denominator, or a rate that
/// is not positive, yields `None`.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let fps = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.parse().ok()?,
    };
    if !fps.is_finite() || fps <= 0.0 {
        return None;
    }
    Some((fps * 100.0).round() / 100.0)
}

/// Parse an ffprobe `nb_frames` value. Empty or non-numeric output (ffprobe
/// prints `N/A` for some containers) yields `None`.
pub fn parse_frame_count(raw: &str) -> Option<u64> {
    raw.trim().parse().ok()
}

fn stream_entry_command(ffmpeg: &FfmpegConfig, entry: &str, input: &Path) -> Command {
    let mut cmd = new_command(ffmpeg.ffprobe_cmd());
    cmd.args(["-v", "quiet", "-select_streams", "v:0", "-show_entries"])
        .arg(format!("stream={}", entry))
        .args(["-of", "csv=p=0"])
        .arg(input);
    cmd
}

fn probe_stream_entry(ffmpeg: &FfmpegConfig, entry: &str, input: &Path) -> Option<String> {
    let cmd = stream_entry_command(ffmpeg, entry, input);
    let output = run_bounded(cmd, ffmpeg.probe_timeout())?;
    if !output.status.success() {
        debug!(entry, status = %output.status, "ffprobe exited unsuccessfully");
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    // Multi-stream files can print one value per line; the first belongs to v:0.
    let value = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    Some(value.to_string())
}

/// Frame rate of the first video stream, rounded to two decimals
pub fn probe_frame_rate(ffmpeg: &FfmpegConfig, input: &Path) -> Option<f64> {
    let raw = probe_stream_entry(ffmpeg, "r_frame_rate", input)?;
    let fps = parse_frame_rate(&raw);
    if fps.is_none() {
        debug!(raw = %raw, "unparsable frame rate");
    }
    fps
}

/// Number of frames in the first video stream
pub fn probe_total_frames(ffmpeg: &FfmpegConfig, input: &Path) -> Option<u64> {
    let raw = probe_stream_entry(ffmpeg, "nb_frames", input)?;
    let frames = parse_frame_count(&raw);
    if frames.is_none() {
        debug!(raw = %raw, "unparsable frame count");
    }
    frames
}

/// Both probes, one after the other
pub fn probe_media(ffmpeg: &FfmpegConfig, input: &Path) -> ProbeResult {
    ProbeResult {
        frame_rate: probe_frame_rate(ffmpeg, input),
        total_frames: probe_total_frames(ffmpeg, input),
    }
}

/// Run `cmd` to completion, killing it if it is still alive after `timeout`.
///
/// Stdout is captured and stderr discarded. Returns `None` on spawn failure
/// or timeout.
pub(crate) fn run_bounded(mut cmd: Command, timeout: Duration) -> Option<Output> {
    let spawned = cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::null()).spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            debug!(program = ?cmd.get_program(), error = %e, "failed to spawn");
            return None;
        }
    };

    // Drain stdout on a helper thread so a chatty child can't stall on a full pipe.
    let stdout_reader = child.stdout.take().map(|mut stdout| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf);
            buf
        })
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                debug!(program = ?cmd.get_program(), ?timeout, "timed out, killing");
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                debug!(program = ?cmd.get_program(), error = %e, "wait failed");
                let _ = child.kill();
                return None;
            }
        }
    };

    let stdout = stdout_reader.and_then(|h| h.join().ok()).unwrap_or_default();
    Some(Output { status, stdout, stderr: Vec::new() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractional_frame_rate_is_rounded() {
        assert_eq!(parse_frame_rate("30000/1001"), Some(29.97));
        assert_eq!(parse_frame_rate("24000/1001\n"), Some(23.98));
    }

    #[test]
    fn plain_frame_rate() {
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("59.94"), Some(59.94));
    }

    #[test]
    fn zero_denominator_is_absent() {
        assert_eq!(parse_frame_rate("30/0"), None);
        assert_eq!(parse_frame_rate("0/0"), None);
    }

    #[test]
    fn garbage_frame_rate_is_absent() {
        assert_eq!(parse_frame_rate(""), None);
        assert_eq!(parse_frame_rate("N/A"), None);
        assert_eq!(parse_frame_rate("30/1/2"), None);
    }

    #[test]
    fn non_positive_frame_rate_is_absent() {
        assert_eq!(parse_frame_rate("0/1"), None);
        assert_eq!(parse_frame_rate("0"), None);
        assert_eq!(parse_frame_rate("-25"), None);
        assert_eq!(parse_frame_rate("-30000/1001"), None);
    }

    #[test]
    fn frame_count_zero_is_present() {
        assert_eq!(parse_frame_count("0"), Some(0));
        assert_eq!(parse_frame_count(" 1500\n"), Some(1500));
    }

    #[test]
    fn frame_count_garbage_is_absent() {
        assert_eq!(parse_frame_count(""), None);
        assert_eq!(parse_frame_count("N/A"), None);
        assert_eq!(parse_frame_count("-3"), None);
    }

    #[test]
    fn missing_prober_is_absorbed() {
        let ffmpeg = FfmpegConfig::default().with_ffprobe_path("/nonexistent/frameseq-ffprobe");
        let result = probe_media(&ffmpeg, Path::new("video.mp4"));
        assert_eq!(result, ProbeResult::default());
    }

    #[test]
    fn probe_command_shape() {
        let ffmpeg = FfmpegConfig::default();
        let cmd = stream_entry_command(&ffmpeg, "nb_frames", Path::new("in.mkv"));
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["-v", "quiet", "-select_streams", "v:0", "-show_entries", "stream=nb_frames", "-of", "csv=p=0", "in.mkv"]
        );
        assert_eq!(cmd.get_program(), "ffprobe");
    }
}
