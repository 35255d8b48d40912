use serde::Serialize;

/// A diagnostic line from ffmpeg, classified by what the runner cares about.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FfmpegData {
    /// `Duration: HH:MM:SS.ms` from the input summary, in seconds.
    Duration(f64),
    /// `time=HH:MM:SS.ms` from a progress report, in seconds.
    Progress(f64),
    /// ffmpeg is waiting for an answer to `Overwrite? [y/N]`.
    OverwritePrompt(String),
    /// The dvdvideo demuxer found nothing but padding cells in the title.
    EmptyTitle(String),
    /// Version banner and library listing printed at startup.
    Banner(String),
    Line(String),
}

impl FfmpegData {
    pub fn is_progress(&self) -> bool {
        matches!(self, FfmpegData::Progress(_))
    }
}
