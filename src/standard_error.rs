use crate::models::title_info::TitleKey;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StandardError {
    pub title: String,
    pub message: String,
}

impl StandardError {
    pub fn new(title: String, message: String) -> Self {
        Self { title, message }
    }
}

impl std::fmt::Display for StandardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error {}: {}", self.title, self.message)
    }
}

/// Failures that stop an operation before or between jobs.
///
/// Per-job outcomes (benign skips, ffmpeg failures) are reported through
/// `RunResult` instead and never show up here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpError {
    ToolUnavailable(String),
    MetadataMissing(TitleKey),
    Cancelled,
    Busy,
    Catalog(String),
    Settings(String),
    Io(String),
    Spawn(String),
}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpError::ToolUnavailable(msg) => write!(f, "FFmpeg unavailable: {msg}"),
            DumpError::MetadataMissing(key) => write!(f, "No title information for {key}"),
            DumpError::Cancelled => write!(f, "Operation cancelled by user"),
            DumpError::Busy => write!(f, "Another dump is already running"),
            DumpError::Catalog(msg) => write!(f, "Invalid title catalog: {msg}"),
            DumpError::Settings(msg) => write!(f, "Invalid settings: {msg}"),
            DumpError::Io(msg) => write!(f, "IO error: {msg}"),
            DumpError::Spawn(msg) => write!(f, "Failed to start ffmpeg: {msg}"),
        }
    }
}

impl std::error::Error for DumpError {}

impl From<std::io::Error> for DumpError {
    fn from(error: std::io::Error) -> Self {
        DumpError::Io(error.to_string())
    }
}

impl From<DumpError> for StandardError {
    fn from(error: DumpError) -> Self {
        let title = match error {
            DumpError::ToolUnavailable(_) => "FFmpeg not available",
            DumpError::MetadataMissing(_) => "Title information not found",
            DumpError::Cancelled => "Cancelled",
            DumpError::Busy => "Dump in progress",
            DumpError::Catalog(_) => "Invalid catalog",
            DumpError::Settings(_) => "Invalid settings",
            DumpError::Io(_) => "File error",
            DumpError::Spawn(_) => "Failed to start ffmpeg",
        };
        StandardError::new(title.to_string(), error.to_string())
    }
}
