use crate::models::ffmpeg::FfmpegData;
use crate::models::title_info::TitleKey;
use crate::services::ffmpeg_command::DumpCommand;
use crate::services::ffmpeg_parser::{self, LineSplitter, EMPTY_TITLE_MARKER, OVERWRITE_PROMPT_MARKER};
use crate::standard_error::DumpError;
use crate::state::cancel_token::CancelToken;
use crate::state::job_state::{Job, JobStatus};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};

const READ_CHUNK: usize = 4096;

const FFMPEG_NOT_FOUND: &str =
    "FFmpeg not found. Please install FFmpeg and make sure it's in your PATH.";
const FFMPEG_NO_DVDVIDEO: &str = "FFmpeg installation does not support DVD video demuxing. \
     Please ensure FFmpeg was built with GPL library support and the configure switches \
     --enable-libdvdnav and --enable-libdvdread.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Success,
    /// The title holds only padding cells. Not an error.
    BenignSkip,
    Fatal,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "Success"),
            RunStatus::BenignSkip => write!(f, "Skipped"),
            RunStatus::Fatal => write!(f, "Failed"),
            RunStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Outcome of one runner invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub key: TitleKey,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    /// stderr with the version banner and library listing removed.
    pub diagnostics: String,
    /// Why the run did not succeed. Empty only for `Success`.
    pub reason: String,
    pub output_path: PathBuf,
}

impl RunResult {
    pub fn success(key: TitleKey, output_path: PathBuf, diagnostics: String) -> Self {
        Self {
            key,
            status: RunStatus::Success,
            exit_code: Some(0),
            diagnostics,
            reason: String::new(),
            output_path,
        }
    }

    pub fn fatal(key: TitleKey, output_path: PathBuf, reason: String) -> Self {
        Self {
            key,
            status: RunStatus::Fatal,
            exit_code: None,
            diagnostics: String::new(),
            reason,
            output_path,
        }
    }

    pub fn cancelled(key: TitleKey, output_path: PathBuf) -> Self {
        Self {
            key,
            status: RunStatus::Cancelled,
            exit_code: None,
            diagnostics: String::new(),
            reason: DumpError::Cancelled.to_string(),
            output_path,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProgressKind {
    /// The running title.
    Job,
    /// Jobs completed out of jobs planned.
    Batch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub kind: ProgressKind,
    /// `None` while the total is not known yet.
    pub fraction: Option<f64>,
    pub label: String,
}

impl ProgressUpdate {
    pub fn job(fraction: Option<f64>, label: String) -> Self {
        Self {
            kind: ProgressKind::Job,
            fraction,
            label,
        }
    }

    pub fn batch(completed: usize, total: usize, label: String) -> Self {
        let fraction = if total == 0 {
            1.0
        } else {
            completed as f64 / total as f64
        };
        Self {
            kind: ProgressKind::Batch,
            fraction: Some(fraction),
            label,
        }
    }
}

/// Receives progress from the runner and the orchestrator.
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        self(update)
    }
}

/// Executes dump commands. The orchestrator only talks to this seam.
pub trait TitleRunner: Send + Sync {
    /// Fails with `ToolUnavailable` when nothing can be dumped at all.
    fn check_tool(&self) -> impl Future<Output = Result<(), DumpError>> + Send;

    fn run(
        &self,
        command: &DumpCommand,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> impl Future<Output = RunResult> + Send;
}

/// Runs ffmpeg as a child process, one title at a time.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    ffmpeg_path: PathBuf,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(PathBuf::from("ffmpeg"))
    }
}

impl ProcessRunner {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        ProcessRunner { ffmpeg_path }
    }
}

impl TitleRunner for ProcessRunner {
    fn check_tool(&self) -> impl Future<Output = Result<(), DumpError>> + Send {
        check_tool(&self.ffmpeg_path)
    }

    fn run(
        &self,
        command: &DumpCommand,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> impl Future<Output = RunResult> + Send {
        run_command(command, sink, cancel)
    }
}

/// Per-run state threaded through the read loop.
struct Monitor<'a> {
    job: Job,
    sink: &'a dyn ProgressSink,
    lines: Vec<String>,
    reported_indeterminate: bool,
}

impl<'a> Monitor<'a> {
    fn new(command: &DumpCommand, sink: &'a dyn ProgressSink) -> Self {
        Self {
            job: Job::for_command(command),
            sink,
            lines: Vec::new(),
            reported_indeterminate: false,
        }
    }

    /// Returns true when the line is an overwrite prompt that needs an answer.
    fn handle_line(&mut self, line: String) -> bool {
        self.job.mark_running();
        let data = ffmpeg_parser::parse_line(&line);
        let mut prompt = false;
        match &data {
            FfmpegData::Duration(seconds) => {
                self.job.set_duration(*seconds);
            }
            FfmpegData::Progress(seconds) => {
                debug!("{}: {}", self.job.label, line.trim());
                match self.job.update_time(*seconds) {
                    Some(fraction) => self
                        .sink
                        .report(ProgressUpdate::job(Some(fraction), self.job.progress_label())),
                    None if !self.reported_indeterminate => {
                        self.reported_indeterminate = true;
                        self.sink
                            .report(ProgressUpdate::job(None, self.job.label.clone()));
                    }
                    None => {}
                }
            }
            FfmpegData::OverwritePrompt(_) => prompt = true,
            FfmpegData::EmptyTitle(_) | FfmpegData::Banner(_) | FfmpegData::Line(_) => {}
        }
        // Progress lines repeat hundreds of times and add nothing to a failure report.
        if !data.is_progress() {
            self.lines.push(line);
        }
        prompt
    }

    fn diagnostics(&self) -> String {
        ffmpeg_parser::strip_banner(&self.lines.join("\n"))
    }
}

fn remove_existing_output(output_path: &Path) -> std::io::Result<()> {
    if output_path.exists() {
        debug!("Deleting existing output file: {}", output_path.display());
        std::fs::remove_file(output_path)?;
    }
    Ok(())
}

async fn answer_overwrite_prompt(stdin: &mut Option<ChildStdin>) {
    warn!("ffmpeg is asking to overwrite the output file, answering yes");
    if let Some(pipe) = stdin.as_mut() {
        if let Err(e) = pipe.write_all(b"y\n").await {
            warn!("Failed to answer overwrite prompt: {e}");
            return;
        }
        if let Err(e) = pipe.flush().await {
            warn!("Failed to flush overwrite answer: {e}");
        }
    }
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        // Already exited on its own.
        debug!("Kill after cancel failed: {e}");
    }
}

fn spawn(command: &DumpCommand) -> std::io::Result<Child> {
    debug!("Executing command: {}", command.display());
    Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

async fn run_command(
    command: &DumpCommand,
    sink: &dyn ProgressSink,
    cancel: &CancelToken,
) -> RunResult {
    let key = command.key;
    let output_path = command.output_path.clone();

    if let Err(e) = remove_existing_output(&output_path) {
        error!("Could not remove {}: {e}", output_path.display());
        return RunResult::fatal(
            key,
            output_path.clone(),
            format!("Could not remove existing {}: {e}", output_path.display()),
        );
    }
    if cancel.is_cancelled() {
        return RunResult::cancelled(key, output_path);
    }

    let mut child = match spawn(command) {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to spawn {}: {e}", command.program.display());
            return RunResult::fatal(key, output_path, DumpError::Spawn(e.to_string()).to_string());
        }
    };
    let mut stdin = child.stdin.take();
    let Some(mut stderr) = child.stderr.take() else {
        terminate(&mut child).await;
        return RunResult::fatal(key, output_path, "ffmpeg stderr was not captured".to_string());
    };

    let mut monitor = Monitor::new(command, sink);
    let mut splitter = LineSplitter::new();
    let mut buffer = [0u8; READ_CHUNK];

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Cancelling {}", monitor.job.label);
                terminate(&mut child).await;
                monitor.job.update_status(JobStatus::Cancelled);
                return RunResult::cancelled(key, output_path);
            }
            read = stderr.read(&mut buffer) => read,
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                let mut prompt = false;
                for line in splitter.push(&buffer[..n]) {
                    prompt |= monitor.handle_line(line);
                }
                // The prompt is printed without a newline and ffmpeg then blocks on stdin.
                if splitter.pending().contains(OVERWRITE_PROMPT_MARKER) {
                    if let Some(line) = splitter.finish() {
                        prompt |= monitor.handle_line(line);
                    }
                }
                if prompt {
                    answer_overwrite_prompt(&mut stdin).await;
                }
            }
            Err(e) => {
                warn!("Failed reading ffmpeg diagnostics: {e}");
                break;
            }
        }
    }
    if let Some(line) = splitter.finish() {
        monitor.handle_line(line);
    }
    drop(stdin);

    let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            terminate(&mut child).await;
            monitor.job.update_status(JobStatus::Cancelled);
            return RunResult::cancelled(key, output_path);
        }
        status = child.wait() => status,
    };

    match status {
        Ok(status) => classify(monitor, status, output_path),
        Err(e) => {
            monitor.job.update_status(JobStatus::Failed);
            RunResult::fatal(key, output_path, format!("Failed waiting for ffmpeg: {e}"))
        }
    }
}

fn classify(mut monitor: Monitor<'_>, status: ExitStatus, output_path: PathBuf) -> RunResult {
    let key = monitor.job.key;
    let diagnostics = monitor.diagnostics();

    if status.success() {
        monitor.job.update_status(JobStatus::Completed);
        monitor
            .sink
            .report(ProgressUpdate::job(Some(1.0), monitor.job.progress_label()));
        info!("Finished {} -> {}", monitor.job.label, output_path.display());
        return RunResult::success(key, output_path, diagnostics);
    }

    let exit_code = status.code();
    let empty_title = monitor
        .lines
        .iter()
        .find(|line| line.contains(EMPTY_TITLE_MARKER))
        .cloned();

    if let Some(line) = empty_title {
        warn!("Skipping empty title {key} (padding cells)");
        monitor.job.update_status(JobStatus::Completed);
        return RunResult {
            key,
            status: RunStatus::BenignSkip,
            exit_code,
            diagnostics,
            reason: line.trim().to_string(),
            output_path,
        };
    }

    monitor.job.update_status(JobStatus::Failed);
    let exit = match exit_code {
        Some(code) => format!("ffmpeg exited with code {code}"),
        None => "ffmpeg was terminated by a signal".to_string(),
    };
    let reason = match diagnostics.lines().rev().find(|line| !line.trim().is_empty()) {
        Some(last) => format!("{exit}: {}", last.trim()),
        None => exit,
    };
    error!("FFmpeg process failed for {key}:\n{diagnostics}");
    RunResult {
        key,
        status: RunStatus::Fatal,
        exit_code,
        diagnostics,
        reason,
        output_path,
    }
}

/// Verifies that the tool exists and was built with the dvdvideo demuxer.
pub async fn check_tool(ffmpeg_path: &Path) -> Result<(), DumpError> {
    debug!("Checking FFmpeg installation and DVD video support");
    let output = Command::new(ffmpeg_path)
        .args(["-hide_banner", "-h", "demuxer=dvdvideo"])
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            error!("FFmpeg check failed: {e}");
            DumpError::ToolUnavailable(FFMPEG_NOT_FOUND.to_string())
        })?;

    if !output.status.success() {
        error!("FFmpeg check exited with {}", output.status);
        return Err(DumpError::ToolUnavailable(FFMPEG_NOT_FOUND.to_string()));
    }
    if !String::from_utf8_lossy(&output.stdout).contains("dvdvideo") {
        error!("FFmpeg installation does not support DVD video demuxing!");
        return Err(DumpError::ToolUnavailable(FFMPEG_NO_DVDVIDEO.to_string()));
    }
    Ok(())
}
