use crate::standard_error::DumpError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "dvd-dumper";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// ffmpeg executable, resolved through PATH when not absolute.
    pub ffmpeg_path: PathBuf,
    /// FLAC level used when PCM audio is re-encoded.
    pub flac_compression_level: u8,
    /// Passed as `-preindex` so chapter seeking is frame accurate.
    pub preindex: bool,
    pub output_extension: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            flac_compression_level: 8,
            preindex: true,
            output_extension: crate::services::filename::DEFAULT_EXTENSION.to_string(),
        }
    }
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
    }

    /// Loads from the user config directory, falling back to defaults when
    /// there is no config directory or no settings file yet.
    pub fn load() -> Result<Self, DumpError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, DumpError> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&contents)
            .map_err(|e| DumpError::Settings(format!("{}: {e}", path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), DumpError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| DumpError::Settings(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), DumpError> {
        if self.flac_compression_level > 12 {
            return Err(DumpError::Settings(format!(
                "flac_compression_level must be between 0 and 12, got {}",
                self.flac_compression_level
            )));
        }
        if self.output_extension.trim_start_matches('.').is_empty() {
            return Err(DumpError::Settings(
                "output_extension must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.flac_compression_level, 8);
        assert_eq!(settings.output_extension, "mkv");
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, r#"{"ffmpeg_path": "/opt/ffmpeg/bin/ffmpeg"}"#).unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert!(settings.preindex);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let settings = Settings {
            flac_compression_level: 5,
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Settings::load_from(&path),
            Err(DumpError::Settings(_))
        ));
    }

    #[test]
    fn test_out_of_range_compression_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, r#"{"flac_compression_level": 40}"#).unwrap();
        assert!(Settings::load_from(&path).is_err());
    }
}
