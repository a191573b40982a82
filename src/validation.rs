//! Raw parameter state as a front end edits it, and validation into a
//! [`ConversionConfig`].

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::ValidationError;
use crate::pattern::preview_filename;
use crate::probe::ProbeResult;
use crate::{ConversionConfig, ImageFormat};

/// Digit widths offered for sequence numbering
pub const DIGIT_WIDTHS: [usize; 4] = [2, 3, 4, 5];

const INVALID_PREVIEW: &str = "Invalid parameters";

/// The conversion parameters exactly as the user typed them.
///
/// Numeric fields are kept as text until [`validate`] runs. Every setter
/// recomputes the preview filename.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterState {
    source: Option<PathBuf>,
    frame_rate: String,
    prefix: String,
    start_index: String,
    digit_width: usize,
    format: ImageFormat,
    output_dir: PathBuf,
    preview: String,
}

impl Default for ParameterState {
    fn default() -> Self {
        let mut state = Self {
            source: None,
            frame_rate: "30".to_string(),
            prefix: String::new(),
            start_index: "1".to_string(),
            digit_width: 3,
            format: ImageFormat::Png,
            output_dir: PathBuf::new(),
            preview: String::new(),
        };
        state.recompute_preview();
        state
    }
}

impl ParameterState {
    pub fn set_source(&mut self, path: impl Into<PathBuf>) {
        self.source = Some(path.into());
        self.recompute_preview();
    }

    pub fn set_frame_rate(&mut self, fps: impl Into<String>) {
        self.frame_rate = fps.into();
        self.recompute_preview();
    }

    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
        self.recompute_preview();
    }

    pub fn set_start_index(&mut self, start: impl Into<String>) {
        self.start_index = start.into();
        self.recompute_preview();
    }

    pub fn set_digit_width(&mut self, width: usize) {
        self.digit_width = width;
        self.recompute_preview();
    }

    pub fn set_format(&mut self, format: ImageFormat) {
        self.format = format;
        self.recompute_preview();
    }

    pub fn set_output_dir(&mut self, dir: impl Into<PathBuf>) {
        self.output_dir = dir.into();
        self.recompute_preview();
    }

    /// Take over what a probe learned about a freshly selected source
    pub fn apply_probe(&mut self, probe: &ProbeResult) {
        if let Some(fps) = probe.frame_rate {
            self.set_frame_rate(fps.to_string());
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn frame_rate(&self) -> &str {
        &self.frame_rate
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn start_index(&self) -> &str {
        &self.start_index
    }

    pub fn digit_width(&self) -> usize {
        self.digit_width
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Name of the first file the current parameters would produce
    pub fn preview(&self) -> &str {
        &self.preview
    }

    /// Whether a start request has everything it needs to be attempted
    pub fn is_ready(&self) -> bool {
        self.source.is_some() && !is_blank(&self.output_dir)
    }

    /// Recompute derived display state after a field changed.
    ///
    /// An empty start index previews as 1; an unparsable one shows an error marker.
    pub fn recompute_preview(&mut self) {
        let start = self.start_index.trim();
        let start = if start.is_empty() { Ok(1) } else { start.parse::<u64>() };
        self.preview = match start {
            Ok(start) => preview_filename(&self.prefix, start, self.digit_width, self.format.extension()),
            Err(_) => INVALID_PREVIEW.to_string(),
        };
    }
}

fn is_blank(path: &Path) -> bool {
    path.to_string_lossy().trim().is_empty()
}

/// Check `params` and turn them into a runnable configuration.
///
/// Checks run in order and stop at the first failure: source and output
/// directory present, frame rate, start index, then output directory
/// creation. A directory created here stays in place even if a later step
/// fails.
pub fn validate(params: &ParameterState) -> Result<ConversionConfig, ValidationError> {
    let source_path = params.source.clone().ok_or(ValidationError::MissingSource)?;
    if is_blank(&params.output_dir) {
        return Err(ValidationError::MissingOutputDirectory);
    }

    let frame_rate = match params.frame_rate.trim().parse::<f64>() {
        Ok(fps) if fps.is_finite() && fps > 0.0 => fps,
        _ => return Err(ValidationError::InvalidFrameRate(params.frame_rate.clone())),
    };

    let start_index = params
        .start_index
        .trim()
        .parse::<u64>()
        .map_err(|_| ValidationError::InvalidStartIndex(params.start_index.clone()))?;

    let output_dir = params.output_dir.clone();
    if !output_dir.is_dir() {
        fs::create_dir_all(&output_dir).map_err(|source| ValidationError::OutputDirectoryUnavailable {
            path: output_dir.clone(),
            source,
        })?;
        info!(dir = %output_dir.display(), "created output directory");
    }

    Ok(ConversionConfig {
        source_path,
        frame_rate,
        prefix: params.prefix.clone(),
        start_index,
        digit_width: params.digit_width,
        format: params.format,
        output_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_params(out: &Path) -> ParameterState {
        let mut params = ParameterState::default();
        params.set_source("movie.mp4");
        params.set_output_dir(out);
        params
    }

    #[test]
    fn preview_tracks_every_field() {
        let mut params = ParameterState::default();
        assert_eq!(params.preview(), "001.png");

        params.set_prefix("frame_");
        assert_eq!(params.preview(), "frame_001.png");
        params.set_digit_width(5);
        assert_eq!(params.preview(), "frame_00001.png");
        params.set_start_index("42");
        assert_eq!(params.preview(), "frame_00042.png");
        params.set_format(ImageFormat::Jpeg);
        assert_eq!(params.preview(), "frame_00042.jpeg");
    }

    #[test]
    fn preview_treats_empty_start_as_one_and_flags_garbage() {
        let mut params = ParameterState::default();
        params.set_start_index("");
        assert_eq!(params.preview(), "001.png");
        params.set_start_index("abc");
        assert_eq!(params.preview(), INVALID_PREVIEW);
    }

    #[test]
    fn huge_digit_width_still_previews() {
        let mut params = ParameterState::default();
        params.set_digit_width(70_000);
        assert_eq!(params.preview().len(), 70_000 + ".png".len());
        assert!(params.preview().ends_with("01.png"));
    }

    #[test]
    fn rejects_zero_and_negative_frame_rates() {
        let dir = tempfile::tempdir().unwrap();
        for fps in ["0", "-1", "abc", "", "inf", "NaN"] {
            let mut params = ready_params(dir.path());
            params.set_frame_rate(fps);
            assert!(
                matches!(validate(&params), Err(ValidationError::InvalidFrameRate(_))),
                "frame rate {:?} should be rejected",
                fps
            );
        }
    }

    #[test]
    fn accepts_small_positive_frame_rate() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = ready_params(dir.path());
        params.set_frame_rate("0.01");
        assert_eq!(validate(&params).unwrap().frame_rate, 0.01);
    }

    #[test]
    fn rejects_negative_start_index() {
        let dir = tempfile::tempdir().unwrap();
        for start in ["-1", "1.5", "x"] {
            let mut params = ready_params(dir.path());
            params.set_start_index(start);
            assert!(matches!(validate(&params), Err(ValidationError::InvalidStartIndex(_))));
        }
    }

    #[test]
    fn zero_start_index_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = ready_params(dir.path());
        params.set_start_index("0");
        assert_eq!(validate(&params).unwrap().start_index, 0);
    }

    #[test]
    fn frame_rate_checked_before_start_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = ready_params(dir.path());
        params.set_frame_rate("0");
        params.set_start_index("-3");
        assert!(matches!(validate(&params), Err(ValidationError::InvalidFrameRate(_))));
    }

    #[test]
    fn invalid_numbers_leave_output_dir_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("frames");
        let mut params = ready_params(&out);
        params.set_start_index("-1");
        assert!(validate(&params).is_err());
        assert!(!out.exists());
    }

    #[test]
    fn creates_missing_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("frames");
        let config = validate(&ready_params(&out)).unwrap();
        assert!(out.is_dir());
        assert_eq!(config.output_dir, out);
    }

    #[test]
    fn output_path_blocked_by_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("taken");
        fs::write(&blocker, b"not a directory").unwrap();
        let out = blocker.join("frames");
        assert!(matches!(
            validate(&ready_params(&out)),
            Err(ValidationError::OutputDirectoryUnavailable { .. })
        ));
    }

    #[test]
    fn missing_source_or_output_dir() {
        let mut params = ParameterState::default();
        params.set_output_dir("out");
        assert!(matches!(validate(&params), Err(ValidationError::MissingSource)));

        let mut params = ParameterState::default();
        params.set_source("movie.mp4");
        assert!(!params.is_ready());
        params.set_output_dir("   ");
        assert!(matches!(validate(&params), Err(ValidationError::MissingOutputDirectory)));
    }

    #[test]
    fn probe_result_fills_frame_rate() {
        let mut params = ParameterState::default();
        params.apply_probe(&ProbeResult { frame_rate: Some(29.97), total_frames: Some(10) });
        assert_eq!(params.frame_rate(), "29.97");

        params.apply_probe(&ProbeResult::default());
        assert_eq!(params.frame_rate(), "29.97");
    }
}
