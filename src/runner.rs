//! Running ffmpeg and tracking its progress.
//!
//! A [`ConversionRun`] owns one ffmpeg process. A background monitor thread
//! spawns it, reads its diagnostic output line by line, picks the running
//! `frame=` counter out of each status line and sends [`RunEvent`]s to the
//! foreground over a bounded channel. The foreground applies those events to
//! its own copy of the run state; nothing else is shared between the two
//! sides except the process handle, which either side may kill.
//!
//! ```text
//! Idle -> Preparing -> Running -> Succeeded | Failed | Cancelled
//!         Preparing ----------------------------------> Cancelled
//! ```
//!
//! The terminal [`RunEvent::Finished`] is sent on the same channel after
//! every progress event, so it is always the last event delivered.

use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::command::build_conversion_command;
use crate::error::StartError;
use crate::probe::probe_total_frames;
use crate::validation::{validate, ParameterState};
use crate::{ConversionConfig, FfmpegConfig, ProgressUpdate};

/// Events buffered between the monitor thread and the foreground
const EVENT_CAPACITY: usize = 64;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Lifecycle of a conversion run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    /// Validated and handed to the monitor; ffmpeg not spawned yet
    Preparing,
    /// ffmpeg is running
    Running,
    Cancelled,
    Succeeded,
    Failed,
}

impl RunState {
    /// No further transition happens from a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Cancelled | RunState::Succeeded | RunState::Failed)
    }

    /// Whether a run in this state occupies the session's run slot
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Preparing | RunState::Running)
    }
}

/// Terminal notification for a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub state: RunState,
    pub message: String,
    pub frames_processed: u64,
}

impl RunOutcome {
    fn succeeded(frames: u64) -> Self {
        Self {
            state: RunState::Succeeded,
            message: format!("Conversion complete: {} frames", frames),
            frames_processed: frames,
        }
    }

    fn failed(message: String, frames: u64) -> Self {
        Self { state: RunState::Failed, message, frames_processed: frames }
    }

    fn cancelled(frames: u64) -> Self {
        Self {
            state: RunState::Cancelled,
            message: "Conversion cancelled".to_string(),
            frames_processed: frames,
        }
    }
}

/// What the monitor thread reports to the foreground
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// ffmpeg was spawned
    Started,
    Progress(ProgressUpdate),
    Finished(RunOutcome),
}

/// Pull the running frame counter out of an ffmpeg status line.
///
/// `frame=  120 fps= 30 q=-0.0 size=N/A time=00:00:04.00 ...` yields `Some(120)`.
pub fn parse_frame_counter(line: &str) -> Option<u64> {
    static FRAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = FRAME_RE.get_or_init(|| Regex::new(r"frame=\s*(\d+)").expect("valid frame regex"));
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Splits a byte stream into lines on `\n` and `\r`, decoding each line as
/// lossy UTF-8. ffmpeg rewrites its status line in place with `\r`, so
/// splitting on `\n` alone would hold every update until the process exits.
pub struct OutputLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> OutputLines<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, buf: Vec::new() }
    }

    fn next_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        loop {
            let available = match self.reader.fill_buf() {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()));
            }
            match available.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(i) => {
                    self.buf.extend_from_slice(&available[..i]);
                    self.reader.consume(i + 1);
                    return Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()));
                }
                None => {
                    let n = available.len();
                    self.buf.extend_from_slice(available);
                    self.reader.consume(n);
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for OutputLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}

struct Shared {
    cancelled: AtomicBool,
    child: Mutex<Option<Child>>,
}

fn lock_child(shared: &Shared) -> MutexGuard<'_, Option<Child>> {
    shared.child.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle that terminates a run's ffmpeg process.
///
/// Only the first [`cancel`](CancelHandle::cancel) call has an effect; later
/// calls from any clone are no-ops.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    /// Request cancellation, killing ffmpeg if it is running.
    ///
    /// Returns `true` if this call was the one honored.
    pub fn cancel(&self) -> bool {
        if self.shared.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(child) = lock_child(&self.shared).as_mut() {
            if let Err(e) = child.kill() {
                debug!(error = %e, "kill after cancellation failed");
            }
        }
        info!("conversion cancellation requested");
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }
}

/// One conversion, from spawn to terminal state.
///
/// The foreground drives it by pulling events with [`next_event`](Self::next_event)
/// (or its non-blocking variants); each pulled event is applied to the run's
/// state before it is returned. Dropping a run that has not reached a
/// terminal state cancels it.
pub struct ConversionRun {
    config: ConversionConfig,
    events: Receiver<RunEvent>,
    cancel: CancelHandle,
    state: RunState,
    progress: ProgressUpdate,
    outcome: Option<RunOutcome>,
}

impl ConversionRun {
    /// Hand `config` to a new monitor thread, which spawns ffmpeg.
    ///
    /// The run starts in [`RunState::Preparing`]; it moves to `Running` once
    /// the [`RunEvent::Started`] event has been pulled.
    pub(crate) fn spawn(ffmpeg: &FfmpegConfig, config: ConversionConfig) -> Self {
        let (tx, rx) = mpsc::sync_channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared { cancelled: AtomicBool::new(false), child: Mutex::new(None) });

        let spawned = {
            let ffmpeg = ffmpeg.clone();
            let config = config.clone();
            let shared = Arc::clone(&shared);
            let tx = tx.clone();
            thread::Builder::new()
                .name("frameseq-monitor".into())
                .spawn(move || monitor(ffmpeg, config, shared, tx))
        };
        if let Err(e) = spawned {
            let _ = tx.send(RunEvent::Finished(RunOutcome::failed(
                format!("Conversion failed: could not start monitor thread: {}", e),
                0,
            )));
        }

        Self {
            config,
            events: rx,
            cancel: CancelHandle { shared },
            state: RunState::Preparing,
            progress: ProgressUpdate::new(0, None),
            outcome: None,
        }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Latest progress the foreground has seen
    pub fn progress(&self) -> &ProgressUpdate {
        &self.progress
    }

    pub fn frames_processed(&self) -> u64 {
        self.progress.frames_processed
    }

    pub fn percentage(&self) -> f64 {
        self.progress.percentage
    }

    /// The terminal notification, once it has been pulled
    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancel the run. The state becomes `Cancelled` immediately and no
    /// further progress is delivered; the `Finished` event still follows.
    ///
    /// Returns `false` if the run already ended or was already cancelled.
    pub fn cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = RunState::Cancelled;
        self.cancel.cancel()
    }

    /// Block until the next event. Returns `None` after `Finished` was delivered.
    pub fn next_event(&mut self) -> Option<RunEvent> {
        loop {
            if self.outcome.is_some() {
                return None;
            }
            let event = self.events.recv().unwrap_or_else(|_| self.lost_monitor());
            if let Some(event) = self.apply(event) {
                return Some(event);
            }
        }
    }

    /// The next event if one is already queued
    pub fn try_next_event(&mut self) -> Option<RunEvent> {
        loop {
            if self.outcome.is_some() {
                return None;
            }
            let event = match self.events.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => self.lost_monitor(),
            };
            if let Some(event) = self.apply(event) {
                return Some(event);
            }
        }
    }

    /// Wait up to `timeout` for the next event
    pub fn next_event_timeout(&mut self, timeout: Duration) -> Option<RunEvent> {
        loop {
            if self.outcome.is_some() {
                return None;
            }
            let event = match self.events.recv_timeout(timeout) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => self.lost_monitor(),
            };
            if let Some(event) = self.apply(event) {
                return Some(event);
            }
        }
    }

    /// Drain every remaining event and return the terminal outcome
    pub fn wait(&mut self) -> RunOutcome {
        while self.next_event().is_some() {}
        self.outcome.clone().unwrap_or_else(|| RunOutcome::failed("Conversion failed".to_string(), 0))
    }

    fn lost_monitor(&self) -> RunEvent {
        RunEvent::Finished(RunOutcome::failed(
            "Conversion failed: progress monitor stopped unexpectedly".to_string(),
            self.progress.frames_processed,
        ))
    }

    /// Fold `event` into the foreground state; `None` means it is swallowed.
    fn apply(&mut self, event: RunEvent) -> Option<RunEvent> {
        match event {
            RunEvent::Started => {
                if self.state != RunState::Preparing {
                    return None;
                }
                self.state = RunState::Running;
                Some(RunEvent::Started)
            }
            RunEvent::Progress(update) => {
                if self.state.is_terminal() || self.cancel.is_cancelled() {
                    return None;
                }
                self.progress = update.clone();
                Some(RunEvent::Progress(update))
            }
            RunEvent::Finished(mut outcome) => {
                if self.state == RunState::Cancelled || self.cancel.is_cancelled() {
                    outcome.state = RunState::Cancelled;
                    outcome.message = RunOutcome::cancelled(outcome.frames_processed).message;
                }
                self.state = outcome.state;
                self.progress.frames_processed = outcome.frames_processed;
                if outcome.state == RunState::Succeeded {
                    self.progress.percentage = 100.0;
                }
                self.outcome = Some(outcome.clone());
                Some(RunEvent::Finished(outcome))
            }
        }
    }
}

impl Drop for ConversionRun {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            self.cancel.cancel();
        }
    }
}

fn monitor(ffmpeg: FfmpegConfig, config: ConversionConfig, shared: Arc<Shared>, events: SyncSender<RunEvent>) {
    let outcome = drive(&ffmpeg, &config, &shared, &events);
    info!(state = ?outcome.state, frames = outcome.frames_processed, "{}", outcome.message);
    let _ = events.send(RunEvent::Finished(outcome));
}

fn drive(ffmpeg: &FfmpegConfig, config: &ConversionConfig, shared: &Shared, events: &SyncSender<RunEvent>) -> RunOutcome {
    if shared.cancelled.load(Ordering::Acquire) {
        return RunOutcome::cancelled(0);
    }

    let mut cmd = build_conversion_command(ffmpeg, config);
    cmd.stdout(Stdio::null()).stderr(Stdio::piped());
    info!(input = %config.source_path.display(), output = %config.output_pattern().display(), "starting ffmpeg");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return RunOutcome::failed(
                format!("Conversion failed: could not start {}: {}", ffmpeg.ffmpeg_cmd().display(), e),
                0,
            );
        }
    };
    let stderr = child.stderr.take();
    {
        let mut slot = lock_child(shared);
        let child = slot.insert(child);
        if shared.cancelled.load(Ordering::Acquire) {
            let _ = child.kill();
        }
    }

    if events.send(RunEvent::Started).is_err() {
        kill(shared);
    }

    let total_rx = spawn_total_probe(ffmpeg.clone(), config.source_path.clone());
    let mut total: Option<u64> = None;
    let mut frames: u64 = 0;
    let mut read_error: Option<io::Error> = None;

    if let Some(stderr) = stderr {
        for line in OutputLines::new(BufReader::new(stderr)) {
            if shared.cancelled.load(Ordering::Acquire) {
                break;
            }
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "reading ffmpeg output failed");
                    read_error = Some(e);
                    kill(shared);
                    break;
                }
            };
            let Some(counter) = parse_frame_counter(&line) else {
                continue;
            };
            if let Ok(probed) = total_rx.try_recv() {
                total = probed;
            }
            frames = counter;
            if shared.cancelled.load(Ordering::Acquire) {
                break;
            }
            if events.send(RunEvent::Progress(ProgressUpdate::new(frames, total))).is_err() {
                // Foreground went away.
                kill(shared);
                break;
            }
        }
    }

    let status = wait_for_exit(shared);

    if shared.cancelled.load(Ordering::Acquire) {
        return RunOutcome::cancelled(frames);
    }
    if let Some(e) = read_error {
        return RunOutcome::failed(format!("Conversion failed while reading ffmpeg output: {}", e), frames);
    }
    match status {
        Ok(status) if status.success() => RunOutcome::succeeded(frames),
        Ok(status) => RunOutcome::failed(format!("Conversion failed: ffmpeg exited with {}", status), frames),
        Err(e) => RunOutcome::failed(format!("Conversion failed: {}", e), frames),
    }
}

fn kill(shared: &Shared) {
    if let Some(child) = lock_child(shared).as_mut() {
        let _ = child.kill();
    }
}

/// Poll for exit without holding the lock across sleeps, so a cancel can
/// still reach the process. Clears the handle once the process is reaped.
fn wait_for_exit(shared: &Shared) -> io::Result<ExitStatus> {
    loop {
        {
            let mut slot = lock_child(shared);
            let Some(child) = slot.as_mut() else {
                return Err(io::Error::new(io::ErrorKind::NotFound, "ffmpeg process handle missing"));
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    *slot = None;
                    return Ok(status);
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = child.kill();
                    *slot = None;
                    return Err(e);
                }
            }
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

/// Probe the total frame count off the monitor thread so ffmpeg's output
/// keeps flowing while ffprobe runs.
fn spawn_total_probe(ffmpeg: FfmpegConfig, source: PathBuf) -> Receiver<Option<u64>> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("frameseq-probe".into())
        .spawn(move || {
            let total = probe_total_frames(&ffmpeg, &source);
            debug!(?total, "probed total frames");
            let _ = tx.send(total);
        });
    if let Err(e) = spawned {
        debug!(error = %e, "could not spawn probe thread; progress will be indeterminate");
    }
    rx
}

/// The single "current run" slot.
///
/// At most one run may be preparing or running at a time. A run that reached
/// a terminal state stays in the slot, so its outcome can be read, until the
/// next start replaces it or [`acknowledge`](Session::acknowledge) clears it.
pub struct Session {
    ffmpeg: FfmpegConfig,
    current: Option<ConversionRun>,
}

impl Session {
    pub fn new(ffmpeg: FfmpegConfig) -> Self {
        Self { ffmpeg, current: None }
    }

    pub fn ffmpeg(&self) -> &FfmpegConfig {
        &self.ffmpeg
    }

    /// Whether a run currently occupies the slot
    pub fn is_active(&self) -> bool {
        self.current.as_ref().is_some_and(|run| run.state().is_active())
    }

    /// Validate `params` and start a run.
    ///
    /// Rejected without side effects while another run is active. Validation
    /// failures are returned before anything is spawned.
    pub fn start(&mut self, params: &ParameterState) -> Result<&mut ConversionRun, StartError> {
        if self.is_active() {
            return Err(StartError::AlreadyRunning);
        }
        let config = validate(params)?;
        Ok(self.current.insert(ConversionRun::spawn(&self.ffmpeg, config)))
    }

    pub fn current(&self) -> Option<&ConversionRun> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut ConversionRun> {
        self.current.as_mut()
    }

    /// Cancel the active run, if any
    pub fn cancel(&mut self) -> bool {
        self.current.as_mut().is_some_and(|run| run.cancel())
    }

    /// Clear a finished run from the slot and return its outcome.
    ///
    /// A run that is still active is left in place.
    pub fn acknowledge(&mut self) -> Option<RunOutcome> {
        if self.is_active() {
            return None;
        }
        let run = self.current.take()?;
        run.outcome().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn lines(input: &[u8]) -> Vec<String> {
        OutputLines::new(Cursor::new(input.to_vec())).map(Result::unwrap).collect()
    }

    #[test]
    fn frame_counter_from_status_line() {
        let line = "frame=  120 fps= 30 q=-0.0 size=N/A time=00:00:04.00 bitrate=N/A speed=1.2x";
        assert_eq!(parse_frame_counter(line), Some(120));
        assert_eq!(parse_frame_counter("frame=7"), Some(7));
    }

    #[test]
    fn lines_without_counter() {
        assert_eq!(parse_frame_counter("Input #0, mov,mp4,m4a, from 'in.mp4':"), None);
        assert_eq!(parse_frame_counter("frame= N/A"), None);
    }

    #[test]
    fn splits_on_carriage_returns_and_newlines() {
        assert_eq!(
            lines(b"header\nframe=  1\rframe=  2\r\nlast"),
            ["header", "frame=  1", "frame=  2", "", "last"]
        );
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let got = lines(b"caf\xe9 frame=3\n");
        assert_eq!(got.len(), 1);
        assert_eq!(parse_frame_counter(&got[0]), Some(3));
    }

    #[test]
    fn empty_stream_has_no_lines() {
        assert!(lines(b"").is_empty());
    }

    #[test]
    fn terminal_states() {
        assert!(!RunState::Idle.is_terminal());
        assert!(RunState::Preparing.is_active());
        assert!(RunState::Running.is_active());
        for state in [RunState::Cancelled, RunState::Succeeded, RunState::Failed] {
            assert!(state.is_terminal());
            assert!(!state.is_active());
        }
    }

    #[test]
    fn cancel_handle_honors_only_first_call() {
        let handle = CancelHandle {
            shared: Arc::new(Shared { cancelled: AtomicBool::new(false), child: Mutex::new(None) }),
        };
        let clone = handle.clone();
        assert!(handle.cancel());
        assert!(!clone.cancel());
        assert!(clone.is_cancelled());
    }

    #[test]
    fn missing_converter_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = FfmpegConfig::default()
            .with_ffmpeg_path(dir.path().join("no-such-ffmpeg"))
            .with_ffprobe_path(dir.path().join("no-such-ffprobe"));
        let mut params = ParameterState::default();
        params.set_source(dir.path().join("in.mp4"));
        params.set_output_dir(dir.path().join("out"));

        let mut session = Session::new(ffmpeg);
        let run = session.start(&params).unwrap();
        let outcome = run.wait();
        assert_eq!(outcome.state, RunState::Failed);
        assert!(outcome.message.contains("could not start"));
        assert!(!session.is_active());
        assert_eq!(session.acknowledge().map(|o| o.state), Some(RunState::Failed));
        assert!(session.current().is_none());
    }
}
