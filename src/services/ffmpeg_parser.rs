use crate::models::ffmpeg::FfmpegData;
use regex::Regex;

pub const OVERWRITE_PROMPT_MARKER: &str = "already exists. Overwrite?";
pub const EMPTY_TITLE_MARKER: &str = "looks empty (may consist of padding cells)";

lazy_static::lazy_static! {
    static ref DURATION_RE: Regex =
        Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid duration regex");
    static ref TIME_RE: Regex =
        Regex::new(r"time=\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid time regex");
    static ref LIBRARY_RE: Regex =
        Regex::new(r"^\s+lib[a-z0-9_]+\s+\d+\.\s*\d+\.\s*\d+").expect("valid library regex");
}

/// Converts the captures of `HH:MM:SS[.ms]` into seconds.
fn captured_seconds(captures: &regex::Captures) -> Option<f64> {
    let hours: f64 = captures.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = captures.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = captures.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

pub fn is_banner_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("ffmpeg version")
        || trimmed.starts_with("built with")
        || trimmed.starts_with("configuration:")
        || LIBRARY_RE.is_match(line)
}

pub fn parse_line(line: &str) -> FfmpegData {
    if line.contains(EMPTY_TITLE_MARKER) {
        return FfmpegData::EmptyTitle(line.to_string());
    }
    if line.contains(OVERWRITE_PROMPT_MARKER) {
        return FfmpegData::OverwritePrompt(line.to_string());
    }
    if let Some(seconds) = DURATION_RE.captures(line).and_then(|c| captured_seconds(&c)) {
        return FfmpegData::Duration(seconds);
    }
    // `time=N/A` does not match and falls through as a plain line.
    if let Some(seconds) = TIME_RE.captures(line).and_then(|c| captured_seconds(&c)) {
        return FfmpegData::Progress(seconds);
    }
    if is_banner_line(line) {
        return FfmpegData::Banner(line.to_string());
    }
    FfmpegData::Line(line.to_string())
}

/// Drops the version banner and library listing, keeping everything else verbatim.
pub fn strip_banner(diagnostics: &str) -> String {
    diagnostics
        .lines()
        .filter(|line| !is_banner_line(line))
        .collect::<Vec<&str>>()
        .join("\n")
}

/// Splits a raw stderr byte stream into lines.
///
/// ffmpeg ends progress reports with `\r` and leaves the overwrite prompt
/// unterminated, so both separators count and the unterminated tail stays
/// inspectable through `pending`.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for byte in bytes {
            if *byte == b'\n' || *byte == b'\r' {
                if !self.buffer.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.buffer).to_string());
                    self.buffer.clear();
                }
            } else {
                self.buffer.push(*byte);
            }
        }
        lines
    }

    /// Text received since the last separator.
    pub fn pending(&self) -> String {
        String::from_utf8_lossy(&self.buffer).to_string()
    }

    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buffer).to_string();
        self.buffer.clear();
        Some(line)
    }
}
