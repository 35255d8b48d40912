use crate::models::title_info::{TitleEntry, TitleKey, TrimRange};
use crate::services::shell;
use crate::settings::Settings;
use log::{debug, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A fully assembled ffmpeg invocation for one title dump.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DumpCommand {
    pub key: TitleKey,
    pub trim: TrimRange,
    /// Progress label prefix, `Title 2 - Angle 1/3`.
    pub label: String,
    pub program: PathBuf,
    /// Arguments after the program name, one argv entry each.
    pub args: Vec<String>,
    pub output_path: PathBuf,
    /// Set when no catalog entry was found and audio mapping was skipped.
    pub metadata_missing: bool,
}

impl DumpCommand {
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.to_string_lossy().to_string());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Shell-quoted rendering for logs and copy/paste.
    pub fn display(&self) -> String {
        shell::join_quoted(self.argv())
    }
}

/// `Title T`, or `Title T - Angle a/n` when the angle count is known.
pub fn job_label(key: &TitleKey, entry: Option<&TitleEntry>) -> String {
    match (key.angle, entry) {
        (Some(angle), Some(entry)) => {
            format!("Title {} - Angle {}/{}", key.title, angle, entry.angle_count)
        }
        (Some(angle), None) => format!("Title {} - Angle {}", key.title, angle),
        (None, _) => format!("Title {}", key.title),
    }
}

/// Whether an audio codec descriptor names uncompressed PCM (`pcm`, `lpcm`, ...).
pub fn is_pcm(descriptor: &str) -> bool {
    descriptor.to_lowercase().contains("pcm")
}

#[derive(Debug, Clone)]
pub struct CommandBuilder {
    ffmpeg_path: PathBuf,
    flac_compression_level: u8,
    preindex: bool,
}

impl CommandBuilder {
    pub fn new(settings: &Settings) -> Self {
        Self {
            ffmpeg_path: settings.ffmpeg_path.clone(),
            flac_compression_level: settings.flac_compression_level,
            preindex: settings.preindex,
        }
    }

    // ffmpeg [global] -f dvdvideo [demuxer options] -i INPUT [mapping] OUTPUT
    //
    // dvdvideo demuxer options used here:
    //
    // -preindex True
    // Walk the whole title once to build an accurate chapter/timestamp index.
    //
    // -chapter_start N / -chapter_end N
    // 1-based inclusive chapter bounds. Both default to the whole title, so
    // they are only passed when the range is actually trimmed.
    //
    // -title T
    // 1-based index into the disc's title table.
    //
    // -angle A
    // 1-based angle. Omitted for single-angle titles.
    //
    // Mapping:
    // Video is always stream-copied. Each audio stream keeps its position;
    // PCM is re-encoded to FLAC, everything else is copied.
    pub fn build(
        &self,
        input_path: &Path,
        output_path: &Path,
        key: &TitleKey,
        entry: Option<&TitleEntry>,
        trim: &TrimRange,
    ) -> DumpCommand {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-f".into(), "dvdvideo".into()];
        if self.preindex {
            args.extend(["-preindex".into(), "True".into()]);
        }

        self.push_chapter_args(&mut args, entry, trim);

        args.extend(["-title".into(), key.title.to_string()]);
        if let Some(angle) = key.angle {
            args.extend(["-angle".into(), angle.to_string()]);
        }

        args.extend(["-i".into(), shell::normalize_path(input_path)]);
        args.extend([
            "-map".into(),
            "0:v:0".into(),
            "-c:v".into(),
            "copy".into(),
        ]);

        match entry {
            Some(entry) => self.push_audio_args(&mut args, entry),
            None => warn!("No title information for {key}, dumping video only"),
        }

        args.push(shell::normalize_path(output_path));

        let command = DumpCommand {
            key: *key,
            trim: *trim,
            label: job_label(key, entry),
            program: self.ffmpeg_path.clone(),
            args,
            output_path: output_path.to_path_buf(),
            metadata_missing: entry.is_none(),
        };
        debug!("Built command for {key}: {}", command.display());
        command
    }

    fn push_chapter_args(&self, args: &mut Vec<String>, entry: Option<&TitleEntry>, trim: &TrimRange) {
        // Without a chapter count a trimmed end cannot be told from the last
        // chapter, so the whole title is dumped rather than half a range.
        let Some(entry) = entry else {
            warn!(
                "No chapter information, ignoring chapters {}-{} and dumping the whole title",
                trim.start, trim.end
            );
            return;
        };
        if trim.start > 1 {
            debug!("Adding chapter start: {}", trim.start);
            args.extend(["-chapter_start".into(), trim.start.to_string()]);
        }
        if trim.end < entry.chapter_count {
            debug!("Adding chapter end: {}", trim.end);
            args.extend(["-chapter_end".into(), trim.end.to_string()]);
        }
    }

    fn push_audio_args(&self, args: &mut Vec<String>, entry: &TitleEntry) {
        for (idx, descriptor) in entry.audio_tracks.iter().enumerate() {
            args.extend(["-map".into(), format!("0:a:{idx}")]);

            if is_pcm(descriptor) {
                warn!("PCM audio detected for track {idx}, re-encoding to FLAC");
                args.extend([
                    format!("-c:a:{idx}"),
                    "flac".into(),
                    "-compression_level".into(),
                    self.flac_compression_level.to_string(),
                ]);
            } else {
                debug!("{descriptor} audio detected for track {idx}, copying stream");
                args.extend([format!("-c:a:{idx}"), "copy".into()]);
            }

            if let Some(lang) = entry.audio_language(idx) {
                args.extend([
                    format!("-metadata:s:a:{idx}"),
                    format!("language={lang}"),
                    format!("-metadata:s:a:{idx}"),
                    format!("title=Audio Track {} ({})", idx + 1, lang.to_uppercase()),
                ]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::title_info::tests::entry;

    fn builder() -> CommandBuilder {
        CommandBuilder::new(&Settings::default())
    }

    fn build(key: TitleKey, title: Option<&TitleEntry>, trim: TrimRange) -> DumpCommand {
        builder().build(
            Path::new("/discs/movie.iso"),
            Path::new("/out/movie_title_01.mkv"),
            &key,
            title,
            &trim,
        )
    }

    fn position(args: &[String], value: &str) -> Option<usize> {
        args.iter().position(|arg| arg == value)
    }

    #[test]
    fn test_full_range_single_angle_command() {
        let title = entry(8, &["ac3 6ch"], 1);
        let command = build(TitleKey::title(1), Some(&title), TrimRange::full(8));
        assert_eq!(
            command.argv(),
            vec![
                "ffmpeg", "-hide_banner", "-f", "dvdvideo", "-preindex", "True", "-title", "1",
                "-i", "/discs/movie.iso", "-map", "0:v:0", "-c:v", "copy", "-map", "0:a:0",
                "-c:a:0", "copy", "/out/movie_title_01.mkv",
            ]
        );
        assert!(!command.metadata_missing);
    }

    #[test]
    fn test_no_chapter_start_when_trim_starts_at_one() {
        let title = entry(8, &[], 1);
        let command = build(TitleKey::title(1), Some(&title), TrimRange::new(1, 5));
        assert!(position(&command.args, "-chapter_start").is_none());
        let end = position(&command.args, "-chapter_end").unwrap();
        assert_eq!(command.args[end + 1], "5");
    }

    #[test]
    fn test_no_chapter_end_when_trim_reaches_last_chapter() {
        let title = entry(8, &[], 1);
        let command = build(TitleKey::title(1), Some(&title), TrimRange::new(3, 8));
        assert!(position(&command.args, "-chapter_end").is_none());
        let start = position(&command.args, "-chapter_start").unwrap();
        assert_eq!(command.args[start + 1], "3");
    }

    #[test]
    fn test_chapter_args_come_before_title() {
        let title = entry(8, &[], 1);
        let command = build(TitleKey::title(1), Some(&title), TrimRange::new(2, 5));
        let start = position(&command.args, "-chapter_start").unwrap();
        let end = position(&command.args, "-chapter_end").unwrap();
        let title_arg = position(&command.args, "-title").unwrap();
        assert!(start < end && end < title_arg);
    }

    #[test]
    fn test_angle_only_when_qualified() {
        let title = entry(1, &[], 2);
        let command = build(TitleKey::with_angle(2, 2), Some(&title), TrimRange::full(1));
        let angle = position(&command.args, "-angle").unwrap();
        assert_eq!(command.args[angle + 1], "2");

        let single = entry(1, &[], 1);
        let command = build(TitleKey::title(2), Some(&single), TrimRange::full(1));
        assert!(position(&command.args, "-angle").is_none());
    }

    #[test]
    fn test_pcm_tracks_are_reencoded_others_copied() {
        let title = entry(1, &["ac3 2ch", "lpcm 2ch 48kHz", "dts 6ch", "PCM"], 1);
        let command = build(TitleKey::title(1), Some(&title), TrimRange::full(1));
        let joined = command.args.join(" ");
        assert!(joined.contains("-map 0:a:0 -c:a:0 copy"));
        assert!(joined.contains("-map 0:a:1 -c:a:1 flac -compression_level 8"));
        assert!(joined.contains("-map 0:a:2 -c:a:2 copy"));
        assert!(joined.contains("-map 0:a:3 -c:a:3 flac -compression_level 8"));
    }

    #[test]
    fn test_audio_map_order_matches_tracks() {
        let title = entry(1, &["ac3", "dts", "ac3", "mp2"], 1);
        let command = build(TitleKey::title(1), Some(&title), TrimRange::full(1));
        let maps: Vec<&String> = command
            .args
            .windows(2)
            .filter(|pair| pair[0] == "-map")
            .map(|pair| &pair[1])
            .collect();
        assert_eq!(maps, vec!["0:v:0", "0:a:0", "0:a:1", "0:a:2", "0:a:3"]);
    }

    #[test]
    fn test_language_metadata() {
        let mut title = entry(1, &["ac3", "ac3"], 1);
        title.audio_langs = Some(vec!["en".to_string(), "".to_string()]);
        let command = build(TitleKey::title(1), Some(&title), TrimRange::full(1));
        let joined = command.args.join("|");
        assert!(joined.contains("-metadata:s:a:0|language=en|-metadata:s:a:0|title=Audio Track 1 (EN)"));
        assert!(!joined.contains("-metadata:s:a:1"));
    }

    #[test]
    fn test_missing_metadata_builds_video_only() {
        let command = build(TitleKey::with_angle(4, 2), None, TrimRange::new(2, 3));
        assert!(command.metadata_missing);
        assert!(!command.args.iter().any(|arg| arg.starts_with("0:a:")));
        assert_eq!(command.args.last().unwrap(), "/out/movie_title_01.mkv");
        // A trim cannot be honoured by halves, so neither bound is passed.
        assert!(position(&command.args, "-chapter_start").is_none());
        assert!(position(&command.args, "-chapter_end").is_none());
        let angle = position(&command.args, "-angle").unwrap();
        assert_eq!(command.args[angle + 1], "2");
    }

    #[test]
    fn test_paths_with_spaces_stay_single_arguments() {
        let title = entry(1, &[], 1);
        let command = builder().build(
            Path::new("/discs/My Movie.iso"),
            Path::new("/out/My Movie_title_01.mkv"),
            &TitleKey::title(1),
            Some(&title),
            &TrimRange::full(1),
        );
        let input = position(&command.args, "-i").unwrap();
        assert_eq!(command.args[input + 1], "/discs/My Movie.iso");
        assert!(command.display().contains("'/discs/My Movie.iso'"));
    }

    #[test]
    fn test_job_label() {
        let title = entry(1, &[], 3);
        assert_eq!(job_label(&TitleKey::with_angle(2, 1), Some(&title)), "Title 2 - Angle 1/3");
        assert_eq!(job_label(&TitleKey::with_angle(2, 1), None), "Title 2 - Angle 1");
        assert_eq!(job_label(&TitleKey::title(5), Some(&title)), "Title 5");
    }

    #[test]
    fn test_custom_compression_level_and_program() {
        let settings = Settings {
            ffmpeg_path: PathBuf::from("/opt/ffmpeg"),
            flac_compression_level: 5,
            ..Settings::default()
        };
        let title = entry(1, &["lpcm"], 1);
        let command = CommandBuilder::new(&settings).build(
            Path::new("a.iso"),
            Path::new("b.mkv"),
            &TitleKey::title(1),
            Some(&title),
            &TrimRange::full(1),
        );
        assert_eq!(command.argv()[0], "/opt/ffmpeg");
        assert!(command.args.join(" ").contains("flac -compression_level 5"));
    }
}
