use std::ffi::{OsStr, OsString};
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::info;

use crate::{ConversionConfig, FfmpegConfig};

/// `Command` for one of the ffmpeg tools, without a console window on Windows
pub(crate) fn new_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// ffmpeg arguments for a conversion: input, output frame rate, overwrite, output pattern
pub fn build_conversion_args(config: &ConversionConfig) -> Vec<OsString> {
    vec![
        "-i".into(),
        config.source_path.clone().into_os_string(),
        "-r".into(),
        config.frame_rate.to_string().into(),
        "-y".into(),
        config.output_pattern().into_os_string(),
    ]
}

/// The ffmpeg invocation for `config`, ready to spawn.
///
/// Stdin is closed so ffmpeg never waits on an interactive prompt; output
/// pipes are left for the caller to configure.
pub fn build_conversion_command(ffmpeg: &FfmpegConfig, config: &ConversionConfig) -> Command {
    let mut cmd = new_command(ffmpeg.ffmpeg_cmd());
    cmd.args(build_conversion_args(config)).stdin(Stdio::null());
    cmd
}

/// Show `dir` in the platform file manager
pub fn open_output_folder(dir: &Path) -> io::Result<()> {
    if !dir.is_dir() {
        return Err(io::Error::new(io::ErrorKind::NotFound, format!("{} is not a directory", dir.display())));
    }
    let opener = if cfg!(target_os = "windows") {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    info!(dir = %dir.display(), opener, "opening output folder");
    Command::new(opener)
        .arg(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageFormat;
    use std::path::PathBuf;

    fn config() -> ConversionConfig {
        ConversionConfig {
            source_path: PathBuf::from("clip.mov"),
            frame_rate: 29.97,
            prefix: "frame_".into(),
            start_index: 1,
            digit_width: 3,
            format: ImageFormat::Png,
            output_dir: PathBuf::from("out"),
        }
    }

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn arguments_in_order() {
        let expected_pattern = PathBuf::from("out").join("frame_%03d.png");
        assert_eq!(
            strings(&build_conversion_args(&config())),
            ["-i", "clip.mov", "-r", "29.97", "-y", expected_pattern.to_str().unwrap()]
        );
    }

    #[test]
    fn whole_frame_rates_have_no_fraction() {
        let cfg = ConversionConfig { frame_rate: 30.0, ..config() };
        assert_eq!(strings(&build_conversion_args(&cfg))[3], "30");
    }

    #[test]
    fn custom_start_index_uses_literal_output() {
        let cfg = ConversionConfig { start_index: 12, format: ImageFormat::Jpg, ..config() };
        let args = strings(&build_conversion_args(&cfg));
        assert!(args[5].ends_with("frame_012.jpg"));
    }

    #[test]
    fn command_uses_configured_binary() {
        let ffmpeg = FfmpegConfig::default().with_ffmpeg_path("/opt/ffmpeg/bin/ffmpeg");
        let cmd = build_conversion_command(&ffmpeg, &config());
        assert_eq!(cmd.get_program(), "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(cmd.get_args().count(), 6);
    }

    #[test]
    fn opening_a_missing_folder_fails_early() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_output_folder(&dir.path().join("gone")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
