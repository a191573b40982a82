use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dialoguer::{Confirm, FuzzySelect, Input, Select};
use frameseq::{
    open_output_folder, probe_frame_rate, AppConfig, CancelHandle, ImageFormat, ProgressUpdate,
    RunEvent, RunState, Session, DIGIT_WIDTHS,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use walkdir::WalkDir;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];
const FFMPEG_DOWNLOAD_URL: &str = "https://ffmpeg.org/download.html";

fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(p) = explicit {
        return AppConfig::from_file(p);
    }

    // Look in the user config dir, then the current dir, then fall back to built-in defaults
    let mut tried: Vec<PathBuf> = Vec::new();
    if let Some(mut d) = dirs::config_dir() {
        d.push("frameseq");
        tried.push(d.join("frameseq.toml"));
        tried.push(d.join("frameseq.json"));
    }
    tried.push(PathBuf::from("frameseq.toml"));
    tried.push(PathBuf::from("frameseq.json"));

    for p in &tried {
        if p.exists() {
            return AppConfig::from_file(p);
        }
    }

    Ok(AppConfig::default())
}

#[derive(Parser, Debug)]
#[command(version, about = "Extract a video's frames as a numbered image sequence using ffmpeg.")]
struct Args {
    /// Input video file
    input: Option<PathBuf>,

    /// Output directory for the image sequence
    out: Option<PathBuf>,

    /// Output frame rate (defaults to the source frame rate)
    #[arg(long, allow_hyphen_values = true)]
    fps: Option<String>,

    /// Filename prefix for every frame
    #[arg(long)]
    prefix: Option<String>,

    /// Number of the first frame
    #[arg(long, allow_hyphen_values = true)]
    start: Option<String>,

    /// Zero-padded width of the frame number
    #[arg(long, value_parser = clap::value_parser!(u8).range(2..=5))]
    digits: Option<u8>,

    /// Output image format
    #[arg(long, value_enum)]
    format: Option<ImageFormat>,

    /// Configuration file (.toml or .json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Accept defaults instead of prompting
    #[arg(long, short, default_value_t = false)]
    yes: bool,

    /// Open the output folder once the conversion succeeds
    #[arg(long, default_value_t = false)]
    open: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();
    let is_interactive = !args.yes && io::stdin().is_terminal();

    let cfg = load_config(args.config.as_deref())?;
    let ffmpeg = cfg.ffmpeg_config();

    if !ffmpeg.is_available() {
        eprintln!(
            "Warning: could not run {}. Install FFmpeg and make sure it is on your PATH.\nDownload: {}",
            ffmpeg.ffmpeg_cmd().display(),
            FFMPEG_DOWNLOAD_URL
        );
    }

    // --- Source ---
    let input_path = match args.input.clone() {
        Some(p) => p,
        None => {
            if !is_interactive {
                return Err(anyhow!("Input file must be provided when running non-interactively."));
            }
            let files = find_video_files();
            if files.is_empty() {
                return Err(anyhow!("No video files found in current directory."));
            }
            let selection = FuzzySelect::with_theme(&dialoguer::theme::ColorfulTheme::default())
                .with_prompt("Choose a video")
                .default(0)
                .items(&files)
                .interact()?;
            PathBuf::from(&files[selection])
        }
    };
    if !input_path.is_file() {
        return Err(anyhow!("Input file does not exist: {}", input_path.display()));
    }

    let mut params = cfg.parameter_state();
    params.set_source(&input_path);

    let file_name = input_path.file_name().and_then(|s| s.to_str()).unwrap_or("video");
    match probe_frame_rate(&ffmpeg, &input_path) {
        Some(fps) => {
            params.set_frame_rate(fps.to_string());
            println!("{} (source frame rate: {} fps)", file_name, fps);
        }
        None => println!("{} (could not read the source frame rate)", file_name),
    }

    // --- Parameters: flags first, then prompts for whatever is left ---
    let default_out = {
        let stem = input_path.file_stem().and_then(|s| s.to_str()).unwrap_or("frameseq");
        PathBuf::from(format!("{}_frames", stem))
    };

    if let Some(fps) = &args.fps {
        params.set_frame_rate(fps.clone());
    } else if is_interactive {
        let fps: String = Input::new()
            .with_prompt("Frame rate (fps)")
            .default(params.frame_rate().to_string())
            .interact_text()?;
        params.set_frame_rate(fps);
    }

    if let Some(prefix) = &args.prefix {
        params.set_prefix(prefix.clone());
    } else if is_interactive {
        let prefix: String = Input::new()
            .with_prompt("Filename prefix")
            .allow_empty(true)
            .default(params.prefix().to_string())
            .interact_text()?;
        params.set_prefix(prefix);
    }

    if let Some(start) = &args.start {
        params.set_start_index(start.clone());
    } else if is_interactive {
        let start: String = Input::new()
            .with_prompt("Start index")
            .default(params.start_index().to_string())
            .interact_text()?;
        params.set_start_index(start);
    }

    if let Some(digits) = args.digits {
        params.set_digit_width(digits as usize);
    } else if is_interactive {
        let current = DIGIT_WIDTHS.iter().position(|&w| w == params.digit_width()).unwrap_or(1);
        let idx = Select::new()
            .with_prompt("Digits in frame number")
            .items(&DIGIT_WIDTHS)
            .default(current)
            .interact()?;
        params.set_digit_width(DIGIT_WIDTHS[idx]);
    }

    if let Some(format) = args.format {
        params.set_format(format);
    } else if is_interactive {
        let current = ImageFormat::ALL.iter().position(|&f| f == params.format()).unwrap_or(0);
        let idx = Select::new()
            .with_prompt("Output format")
            .items(&ImageFormat::ALL)
            .default(current)
            .interact()?;
        params.set_format(ImageFormat::ALL[idx]);
    }

    match &args.out {
        Some(out) => params.set_output_dir(out),
        None if is_interactive => {
            let out: String = Input::new()
                .with_prompt("Output folder")
                .default(default_out.display().to_string())
                .interact_text()?;
            params.set_output_dir(out);
        }
        None => params.set_output_dir(&default_out),
    }

    println!("First file: {}", params.preview());
    if params.start_index().trim() != "1" {
        println!("Note: ffmpeg numbers sequences from 1; with a different start index only one file name is used.");
    }

    let open_when_done = args.open
        || (is_interactive
            && Confirm::new()
                .with_prompt("Open the output folder when done?")
                .default(false)
                .interact()?);

    // --- Execution ---
    let mut session = Session::new(ffmpeg);
    let run = session.start(&params)?;
    let output_dir = run.config().output_dir.clone();

    if is_interactive {
        println!("Type q and press Enter to cancel.");
        listen_for_cancel(run.cancel_handle());
    }

    let mut display = ProgressDisplay::default();
    let outcome = loop {
        match run.next_event() {
            Some(RunEvent::Started) => display.started()?,
            Some(RunEvent::Progress(update)) => display.update(&update)?,
            Some(RunEvent::Finished(outcome)) => break outcome,
            None => return Err(anyhow!("conversion ended without a result")),
        }
    };
    display.finish(outcome.state);

    match outcome.state {
        RunState::Succeeded => {
            println!("\n{} in {}", outcome.message, output_dir.display());
            if open_when_done {
                if let Err(e) = open_output_folder(&output_dir) {
                    eprintln!("Warning: failed to open {}: {}", output_dir.display(), e);
                }
            }
            Ok(())
        }
        RunState::Cancelled => {
            println!("\n{}.", outcome.message);
            Ok(())
        }
        _ => Err(anyhow!(outcome.message)).context("ffmpeg conversion failed"),
    }
}

/// Cancel the run when the user types `q` on stdin
fn listen_for_cancel(handle: CancelHandle) {
    let spawned = thread::Builder::new().name("frameseq-stdin".into()).spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(l) if l.trim().eq_ignore_ascii_case("q") => {
                    handle.cancel();
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });
    if let Err(e) = spawned {
        eprintln!("Warning: cancellation from the keyboard is unavailable: {}", e);
    }
}

/// Spinner while the total is unknown, a percentage bar once it is
#[derive(Default)]
struct ProgressDisplay {
    bar: Option<ProgressBar>,
    determinate: bool,
}

impl ProgressDisplay {
    fn started(&mut self) -> Result<()> {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
        spinner.set_message("Preparing...");
        spinner.enable_steady_tick(Duration::from_millis(100));
        self.bar = Some(spinner);
        Ok(())
    }

    fn update(&mut self, update: &ProgressUpdate) -> Result<()> {
        if update.total_frames.is_some() && !self.determinate {
            if let Some(spinner) = self.bar.take() {
                spinner.finish_and_clear();
            }
            let pb = ProgressBar::new(100);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}")?
                    .progress_chars("#>-"),
            );
            self.bar = Some(pb);
            self.determinate = true;
        }
        if self.bar.is_none() {
            self.started()?;
        }
        if let Some(pb) = &self.bar {
            if self.determinate {
                pb.set_position(update.percentage.round() as u64);
            }
            pb.set_message(format!("{} frames", update.frames_processed));
        }
        Ok(())
    }

    fn finish(&mut self, state: RunState) {
        if let Some(pb) = self.bar.take() {
            if state == RunState::Succeeded {
                if self.determinate {
                    pb.set_position(100);
                }
                pb.finish_with_message("Done");
            } else {
                pb.abandon();
            }
        }
    }
}

fn find_video_files() -> Vec<String> {
    WalkDir::new(".")
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path().is_file()
                && e.path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .map(|e| e.path().to_str().unwrap_or("").to_string())
        .collect()
}
