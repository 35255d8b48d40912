use std::path::{Path, PathBuf};

/// Rebuilds a path from its components so separators match the platform.
pub fn normalize_path(path: &Path) -> String {
    let normalized: PathBuf = path.components().collect();
    normalized.to_string_lossy().to_string()
}

/// Quotes an argument for display in a POSIX shell.
///
/// Only used to render commands for logs and copy/paste; processes are
/// always spawned with discrete argv entries.
pub fn quote(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    let safe = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

pub fn join_quoted<I: IntoIterator<Item = S>, S: AsRef<str>>(args: I) -> String {
    args.into_iter()
        .map(|arg| quote(arg.as_ref()))
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain_args_untouched() {
        assert_eq!(quote("-map"), "-map");
        assert_eq!(quote("0:a:1"), "0:a:1");
        assert_eq!(quote("language=eng"), "language=eng");
    }

    #[test]
    fn test_quote_spaces_and_quotes() {
        assert_eq!(quote("My Disc.iso"), "'My Disc.iso'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn test_join_quoted() {
        assert_eq!(
            join_quoted(["ffmpeg", "-i", "a b.iso"]),
            "ffmpeg -i 'a b.iso'"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_normalize_path_collapses_redundant_separators() {
        assert_eq!(normalize_path(Path::new("/discs//movie/./a.iso")), "/discs/movie/a.iso");
    }
}
