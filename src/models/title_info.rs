use humantime::format_duration as human_format_duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Addresses one extractable unit on the disc.
///
/// `angle` is `None` for single-angle titles, which the demuxer addresses
/// without an angle qualifier. The derived ordering sorts by title first and
/// puts the unqualified variant before numbered angles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TitleKey {
    pub title: u32,
    pub angle: Option<u32>,
}

impl TitleKey {
    pub fn new(title: u32, angle: Option<u32>) -> Self {
        Self { title, angle }
    }

    pub fn title(title: u32) -> Self {
        Self { title, angle: None }
    }

    pub fn with_angle(title: u32, angle: u32) -> Self {
        Self {
            title,
            angle: Some(angle),
        }
    }

    /// The key the catalog falls back to when this angle was never loaded.
    pub fn unqualified(&self) -> Self {
        Self::title(self.title)
    }
}

impl fmt::Display for TitleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.angle {
            Some(angle) => write!(f, "title {} angle {}", self.title, angle),
            None => write!(f, "title {}", self.title),
        }
    }
}

/// Structural facts about one (title, angle) as reported by the disc parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleEntry {
    pub chapter_count: u32,
    /// Starting frame of each chapter.
    #[serde(default)]
    pub chapters: Vec<u64>,
    /// Codec descriptor per audio stream, in physical stream order.
    #[serde(default)]
    pub audio_tracks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_langs: Option<Vec<String>>,
    pub angle_count: u32,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
    #[serde(default)]
    pub vts: String,
}

impl TitleEntry {
    /// Duration in seconds, always derived from the frame count.
    pub fn duration_secs(&self) -> f64 {
        if self.fps <= 0.0 {
            return 0.0;
        }
        self.frame_count as f64 / self.fps
    }

    pub fn human_duration(&self) -> String {
        let duration = Duration::from_secs(self.duration_secs().round() as u64);
        format!("{}", human_format_duration(duration))
    }

    pub fn is_multi_angle(&self) -> bool {
        self.angle_count > 1
    }

    pub fn full_trim(&self) -> TrimRange {
        TrimRange::full(self.chapter_count)
    }

    /// Language code for the given audio stream, if the parser reported one.
    pub fn audio_language(&self, index: usize) -> Option<&str> {
        self.audio_langs
            .as_ref()
            .and_then(|langs| langs.get(index))
            .map(|lang| lang.trim())
            .filter(|lang| !lang.is_empty())
    }

    /// Checks the invariants a single record must satisfy on its own.
    pub fn validate(&self) -> Result<(), String> {
        if self.angle_count == 0 {
            return Err("angle_count must be at least 1".to_string());
        }
        if self.width == 0 || self.height == 0 {
            return Err(format!(
                "invalid resolution {}x{}",
                self.width, self.height
            ));
        }
        if !(self.fps > 0.0) {
            return Err(format!("invalid frame rate {}", self.fps));
        }
        // The parser may omit the implicit chapter at frame 0.
        let listed = self.chapters.len();
        let expected = self.chapter_count as usize;
        if listed != 0 && listed != expected && listed + 1 != expected {
            return Err(format!(
                "chapter_count is {} but {} chapter offsets were given",
                self.chapter_count,
                self.chapters.len()
            ));
        }
        if self.chapters.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err("chapter offsets must be strictly increasing".to_string());
        }
        if let Some(langs) = &self.audio_langs {
            if langs.len() != self.audio_tracks.len() {
                return Err(format!(
                    "{} audio languages for {} audio tracks",
                    langs.len(),
                    self.audio_tracks.len()
                ));
            }
        }
        Ok(())
    }

    /// Whether two variants of the same title agree on the per-title chapter map.
    pub fn shares_title_structure(&self, other: &TitleEntry) -> bool {
        self.chapter_count == other.chapter_count
            && self.chapters == other.chapters
            && self.angle_count == other.angle_count
    }

    /// Lines for the title details panel.
    pub fn info_lines(&self, key: &TitleKey) -> Vec<String> {
        let mut lines = vec![
            format!(
                "Angle: {}/{}",
                key.angle.unwrap_or(1),
                self.angle_count
            ),
            format!("Duration: {}", format_duration(self.duration_secs())),
            format!("Resolution: {}x{}", self.width, self.height),
            format!("Chapters: {}", self.chapter_count),
            format!("Frame Count: {}", self.frame_count),
            format!("VTS: {}", self.vts),
        ];

        if self.audio_tracks.is_empty() {
            lines.push("Audio Track(s): None".to_string());
        } else {
            lines.push("Audio Track(s):".to_string());
            for (i, track) in self.audio_tracks.iter().enumerate() {
                lines.push(format!("  {}. {}", i + 1, track));
            }
        }
        lines
    }

    /// One row per chapter: `Chapter 2 - Frame 1200 - 00:00:50`.
    ///
    /// When the parser left out the implicit chapter at frame 0, the listed
    /// offsets start at chapter 2.
    pub fn chapter_rows(&self) -> Vec<String> {
        let first = if self.chapters.len() + 1 == self.chapter_count as usize {
            2
        } else {
            1
        };
        self.chapters
            .iter()
            .enumerate()
            .map(|(i, frame)| {
                let seconds = if self.fps > 0.0 {
                    *frame as f64 / self.fps
                } else {
                    0.0
                };
                format!(
                    "Chapter {} - Frame {} - {}",
                    i + first,
                    frame,
                    format_duration(seconds)
                )
            })
            .collect()
    }
}

/// Inclusive, 1-based chapter range selected for a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimRange {
    pub start: u32,
    pub end: u32,
}

impl TrimRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// The whole title. Titles without chapters still get `[1, 1]` so the
    /// range stays well formed; `is_full` treats it as untrimmed.
    pub fn full(chapter_count: u32) -> Self {
        Self {
            start: 1,
            end: chapter_count.max(1),
        }
    }

    pub fn is_full(&self, chapter_count: u32) -> bool {
        self.start <= 1 && self.end >= chapter_count
    }

    pub fn is_single_chapter(&self) -> bool {
        self.start == self.end
    }

    pub fn is_valid_for(&self, chapter_count: u32) -> bool {
        self.start >= 1 && self.start <= self.end && self.end <= chapter_count.max(1)
    }
}

/// Node of the title browser tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TitleNode {
    pub label: String,
    /// `None` for the non-selectable parent of a multi-angle title.
    pub key: Option<TitleKey>,
    pub children: Vec<TitleNode>,
}

/// Formats seconds as `HH:MM:SS`, truncating fractions.
pub fn format_duration(duration_secs: f64) -> String {
    let total = if duration_secs.is_finite() && duration_secs > 0.0 {
        duration_secs as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn entry(chapter_count: u32, audio_tracks: &[&str], angle_count: u32) -> TitleEntry {
        TitleEntry {
            chapter_count,
            chapters: (0..chapter_count as u64).map(|i| i * 1000).collect(),
            audio_tracks: audio_tracks.iter().map(|t| t.to_string()).collect(),
            audio_langs: None,
            angle_count,
            width: 720,
            height: 480,
            fps: 29.97,
            frame_count: 53_946,
            vts: "1".to_string(),
        }
    }

    #[test]
    fn test_duration_is_derived_from_frames() {
        let mut title = entry(4, &[], 1);
        title.fps = 25.0;
        title.frame_count = 2500;
        assert_eq!(title.duration_secs(), 100.0);

        title.frame_count = 5000;
        assert_eq!(title.duration_secs(), 200.0);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "00:00:00");
        assert_eq!(format_duration(3725.9), "01:02:05");
        assert_eq!(format_duration(-4.0), "00:00:00");
    }

    #[test]
    fn test_title_key_ordering_puts_unqualified_first() {
        let mut keys = vec![
            TitleKey::with_angle(2, 2),
            TitleKey::title(3),
            TitleKey::with_angle(2, 1),
            TitleKey::title(1),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                TitleKey::title(1),
                TitleKey::with_angle(2, 1),
                TitleKey::with_angle(2, 2),
                TitleKey::title(3),
            ]
        );
    }

    #[test]
    fn test_trim_range_full() {
        assert!(TrimRange::full(8).is_full(8));
        assert!(!TrimRange::new(2, 8).is_full(8));
        assert!(!TrimRange::new(1, 7).is_full(8));
        assert!(TrimRange::full(0).is_full(0));
        assert!(TrimRange::new(3, 3).is_single_chapter());
    }

    #[test]
    fn test_trim_range_validity() {
        assert!(TrimRange::new(2, 5).is_valid_for(8));
        assert!(!TrimRange::new(0, 5).is_valid_for(8));
        assert!(!TrimRange::new(6, 5).is_valid_for(8));
        assert!(!TrimRange::new(2, 9).is_valid_for(8));
    }

    #[test]
    fn test_validate_rejects_mismatched_languages() {
        let mut title = entry(2, &["ac3", "lpcm"], 1);
        title.audio_langs = Some(vec!["en".to_string()]);
        assert!(title.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unsorted_chapters() {
        let mut title = entry(3, &[], 1);
        title.chapters = vec![0, 500, 400];
        assert!(title.validate().is_err());
    }

    #[test]
    fn test_audio_language_ignores_blank_entries() {
        let mut title = entry(1, &["ac3", "ac3"], 1);
        title.audio_langs = Some(vec!["en".to_string(), " ".to_string()]);
        assert_eq!(title.audio_language(0), Some("en"));
        assert_eq!(title.audio_language(1), None);
        assert_eq!(title.audio_language(2), None);
    }

    #[test]
    fn test_info_lines() {
        let mut title = entry(2, &["ac3 2ch"], 2);
        title.fps = 25.0;
        title.frame_count = 250;
        let lines = title.info_lines(&TitleKey::with_angle(1, 2));
        assert_eq!(lines[0], "Angle: 2/2");
        assert_eq!(lines[1], "Duration: 00:00:10");
        assert_eq!(lines[2], "Resolution: 720x480");
        assert_eq!(lines.last().unwrap(), "  1. ac3 2ch");
    }

    #[test]
    fn test_chapter_rows() {
        let mut title = entry(2, &[], 1);
        title.fps = 25.0;
        title.chapters = vec![0, 1500];
        assert_eq!(
            title.chapter_rows(),
            vec![
                "Chapter 1 - Frame 0 - 00:00:00".to_string(),
                "Chapter 2 - Frame 1500 - 00:01:00".to_string(),
            ]
        );
    }

    #[test]
    fn test_chapter_rows_without_frame_zero_start_at_chapter_two() {
        let mut title = entry(3, &[], 1);
        title.fps = 25.0;
        title.chapters = vec![1500, 3000];
        assert!(title.validate().is_ok());
        assert_eq!(
            title.chapter_rows(),
            vec![
                "Chapter 2 - Frame 1500 - 00:01:00".to_string(),
                "Chapter 3 - Frame 3000 - 00:02:00".to_string(),
            ]
        );
    }

    #[test]
    fn test_human_duration() {
        let mut title = entry(1, &[], 1);
        title.fps = 25.0;
        title.frame_count = 25 * 3725;
        assert_eq!(title.human_duration(), "1h 2m 5s");
    }
}
