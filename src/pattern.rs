//! Output filename patterns for the extracted image sequence.
//!
//! ffmpeg numbers image-sequence outputs itself through a printf-style
//! placeholder (`%03d`), but its counter always starts at 1. When the user
//! asks for a different start index the pattern degrades to a single literal
//! filename with the index already rendered, so only that one name is ever
//! written.

use std::path::{Path, PathBuf};

/// Filename template for the sequence, relative to the output directory.
///
/// `start_index == 1` yields `<prefix>%0<width>d.<ext>`; any other start index
/// yields the literal `<prefix><start padded to width>.<ext>`.
pub fn build_output_pattern(prefix: &str, start_index: u64, digit_width: usize, extension: &str) -> String {
    if start_index == 1 {
        format!("{}%0{}d.{}", prefix, digit_width, extension)
    } else {
        // TODO: render one pattern per frame so custom start indices produce a full sequence
        format!("{}{}.{}", prefix, zero_pad(start_index, digit_width), extension)
    }
}

/// `value` left-padded with zeros to at least `width` digits
fn zero_pad(value: u64, width: usize) -> String {
    let digits = value.to_string();
    let mut padded = "0".repeat(width.saturating_sub(digits.len()));
    padded.push_str(&digits);
    padded
}

/// [`build_output_pattern`] joined onto the output directory
pub fn output_pattern_path(output_dir: &Path, prefix: &str, start_index: u64, digit_width: usize, extension: &str) -> PathBuf {
    output_dir.join(build_output_pattern(prefix, start_index, digit_width, extension))
}

/// Name of the first file the sequence will contain, as shown in previews
pub fn preview_filename(prefix: &str, start_index: u64, digit_width: usize, extension: &str) -> String {
    format!("{}{}.{}", prefix, zero_pad(start_index, digit_width), extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_at_one_uses_counting_placeholder() {
        assert_eq!(build_output_pattern("frame_", 1, 3, "png"), "frame_%03d.png");
        assert_eq!(build_output_pattern("", 1, 5, "jpeg"), "%05d.jpeg");
    }

    #[test]
    fn other_start_index_renders_a_literal_name() {
        assert_eq!(build_output_pattern("", 5, 3, "png"), "005.png");
        assert_eq!(build_output_pattern("shot", 0, 2, "jpg"), "shot00.jpg");
    }

    #[test]
    fn wide_start_index_is_not_truncated() {
        assert_eq!(build_output_pattern("", 123456, 3, "png"), "123456.png");
    }

    #[test]
    fn out_of_range_widths_still_pad() {
        assert_eq!(build_output_pattern("a", 1, 8, "png"), "a%08d.png");
        assert_eq!(build_output_pattern("a", 7, 0, "png"), "a7.png");
        assert_eq!(build_output_pattern("a", 7, 9, "png"), "a000000007.png");
    }

    #[test]
    fn very_wide_padding_does_not_panic() {
        let pattern = build_output_pattern("a", 7, 70_000, "png");
        assert_eq!(pattern.len(), "a".len() + 70_000 + ".png".len());
        assert!(pattern.starts_with("a000") && pattern.ends_with("07.png"));

        let preview = preview_filename("a", 1, 70_000, "png");
        assert!(preview.ends_with("0001.png"));
        assert_eq!(build_output_pattern("a", 1, 70_000, "png"), "a%070000d.png");
    }

    #[test]
    fn pattern_path_is_inside_output_dir() {
        let path = output_pattern_path(Path::new("/tmp/out"), "f_", 1, 4, "png");
        assert_eq!(path, PathBuf::from("/tmp/out/f_%04d.png"));
    }

    #[test]
    fn preview_always_shows_the_first_filename() {
        assert_eq!(preview_filename("", 1, 3, "png"), "001.png");
        assert_eq!(preview_filename("clip-", 42, 5, "jpg"), "clip-00042.jpg");
    }
}
