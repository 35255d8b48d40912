use crate::models::title_info::{TitleEntry, TitleKey, TrimRange};
use std::path::Path;

pub const DEFAULT_EXTENSION: &str = "mkv";

/// Build the output filename for a title dump.
///
/// Layout:
///   {base}_title_{TT}[_angle_{AA}][_ch{SS}[-{EE}]].{ext}
///
/// 1. `base` is usually the disc image stem.
/// 2. The angle component appears only when the title has several angles.
///    A multi-angle key without an angle qualifier is treated as angle 1.
/// 3. The chapter component appears only when the trim is not the whole
///    title; a single chapter renders as `_ch03`, a range as `_ch02-05`.
///
/// Every call derives the name from scratch, so the per-angle names of a
/// bulk dump differ only in their angle component.
///
/// Examples:
/// - `movie`, title 1, one angle, full range -> `movie_title_01.mkv`
/// - `movie`, title 2 angle 2, chapters 2..5 of 8 -> `movie_title_02_angle_02_ch02-05.mkv`
pub fn suggest_filename(
    base_name: &str,
    key: &TitleKey,
    entry: &TitleEntry,
    trim: &TrimRange,
    extension: &str,
) -> String {
    let mut file_name = format!("{}_title_{:02}", base_name, key.title);

    if entry.is_multi_angle() {
        file_name.push_str(&format!("_angle_{:02}", key.angle.unwrap_or(1)));
    }

    if !trim.is_full(entry.chapter_count) {
        if trim.is_single_chapter() {
            file_name.push_str(&format!("_ch{:02}", trim.start));
        } else {
            file_name.push_str(&format!("_ch{:02}-{:02}", trim.start, trim.end));
        }
    }

    let extension = extension.trim_start_matches('.');
    format!("{file_name}.{extension}")
}

/// Stem of the disc image, used as the default base name.
pub fn base_name_for(input_path: &Path) -> String {
    input_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "disc".to_string())
}
