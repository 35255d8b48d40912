use crate::models::title_info::{format_duration, TitleEntry, TitleKey, TitleNode, TrimRange};
use crate::standard_error::DumpError;
use log::{debug, info};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

/// One record as handed over by the disc parser.
#[derive(Debug, Deserialize)]
struct TitleRecord {
    title: u32,
    #[serde(default)]
    angle: Option<u32>,
    #[serde(flatten)]
    entry: TitleEntry,
}

/// Structural metadata for every (title, angle) on the loaded disc, plus the
/// chapter trim chosen for each title.
#[derive(Debug, Default, Clone)]
pub struct TitleCatalog {
    entries: BTreeMap<TitleKey, TitleEntry>,
    // Keyed by title index so every angle of a title shares one range.
    trims: HashMap<u32, TrimRange>,
}

impl TitleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, DumpError> {
        let records: Vec<TitleRecord> =
            serde_json::from_str(json).map_err(|e| DumpError::Catalog(e.to_string()))?;
        let mut catalog = Self::new();
        for record in records {
            catalog.put(TitleKey::new(record.title, record.angle), record.entry)?;
        }
        info!(
            "Loaded {} title entries for {} titles",
            catalog.len(),
            catalog.unique_title_indices().len()
        );
        Ok(catalog)
    }

    pub fn load_json(path: &Path) -> Result<Self, DumpError> {
        debug!("Loading title catalog from {}", path.display());
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Exact lookup, no fallback.
    pub fn get(&self, key: &TitleKey) -> Option<&TitleEntry> {
        self.entries.get(key)
    }

    /// Looks up `key`, falling back to the unqualified title when that angle
    /// was never loaded. Returns the key that actually matched.
    pub fn resolve(&self, key: &TitleKey) -> Option<(TitleKey, &TitleEntry)> {
        if let Some(entry) = self.entries.get(key) {
            return Some((*key, entry));
        }
        let fallback = key.unqualified();
        if fallback != *key {
            if let Some(entry) = self.entries.get(&fallback) {
                debug!("No entry for {key}, using {fallback}");
                return Some((fallback, entry));
            }
        }
        None
    }

    pub fn put(&mut self, key: TitleKey, entry: TitleEntry) -> Result<(), DumpError> {
        if key.title == 0 {
            return Err(DumpError::Catalog("title indices start at 1".to_string()));
        }
        entry
            .validate()
            .map_err(|e| DumpError::Catalog(format!("{key}: {e}")))?;

        if let Some(angle) = key.angle {
            if !entry.is_multi_angle() {
                return Err(DumpError::Catalog(format!(
                    "{key}: single-angle titles are stored without an angle"
                )));
            }
            if angle == 0 || angle > entry.angle_count {
                return Err(DumpError::Catalog(format!(
                    "{key}: angle must be between 1 and {}",
                    entry.angle_count
                )));
            }
        }

        let conflicting = self
            .variants(key.title)
            .find(|(other_key, other)| **other_key != key && !other.shares_title_structure(&entry));
        if let Some((other_key, _)) = conflicting {
            return Err(DumpError::Catalog(format!(
                "{key}: chapter map or angle count differs from {other_key}"
            )));
        }

        self.entries.insert(key, entry);
        Ok(())
    }

    /// Ascending title indices, one per title however many angles it has.
    pub fn unique_title_indices(&self) -> Vec<u32> {
        self.entries
            .keys()
            .map(|key| key.title)
            .collect::<BTreeSet<u32>>()
            .into_iter()
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.trims.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All stored variants of a title, unqualified first.
    fn variants(&self, title: u32) -> impl Iterator<Item = (&TitleKey, &TitleEntry)> {
        self.entries
            .range(TitleKey::title(title)..=TitleKey::with_angle(title, u32::MAX))
    }

    /// Any variant of the title. They all share the chapter map and angle count.
    pub fn representative(&self, title: u32) -> Option<&TitleEntry> {
        self.variants(title).next().map(|(_, entry)| entry)
    }

    /// The trim for a title; the whole title until one is set.
    pub fn trim(&self, title: u32) -> TrimRange {
        if let Some(trim) = self.trims.get(&title) {
            return *trim;
        }
        let chapter_count = self
            .representative(title)
            .map(|entry| entry.chapter_count)
            .unwrap_or(0);
        TrimRange::full(chapter_count)
    }

    /// Sets the trim for every angle of a title.
    ///
    /// Both ends are clamped to the title's chapters. If the new start passes
    /// the end, the end follows it; if the new end drops below the start, the
    /// start follows it.
    pub fn set_trim(&mut self, title: u32, start: u32, end: u32) -> Result<TrimRange, DumpError> {
        let chapter_count = self
            .representative(title)
            .map(|entry| entry.chapter_count)
            .ok_or_else(|| DumpError::MetadataMissing(TitleKey::title(title)))?;
        let last = chapter_count.max(1);
        let current = self.trim(title);

        let mut start = start.clamp(1, last);
        let mut end = end.clamp(1, last);
        if start > end {
            if start != current.start {
                end = start;
            } else {
                start = end;
            }
        }

        let trim = TrimRange::new(start, end);
        debug!("Trim for title {title} is now chapters {start}-{end}");
        self.trims.insert(title, trim);
        Ok(trim)
    }

    pub fn reset_trim(&mut self, title: u32) {
        self.trims.remove(&title);
    }

    /// Every job a full dump runs, in ascending (title, angle) order.
    pub fn dump_plan(&self) -> Vec<TitleKey> {
        let mut plan = Vec::new();
        for title in self.unique_title_indices() {
            let Some(entry) = self.representative(title) else {
                continue;
            };
            if entry.is_multi_angle() {
                plan.extend((1..=entry.angle_count).map(|angle| TitleKey::with_angle(title, angle)));
            } else {
                plan.push(TitleKey::title(title));
            }
        }
        plan
    }

    /// Browser tree: one node per title, with angle children for multi-angle titles.
    pub fn tree(&self) -> Vec<TitleNode> {
        let mut nodes = Vec::new();
        for title in self.unique_title_indices() {
            let Some(entry) = self.representative(title) else {
                continue;
            };
            if entry.is_multi_angle() {
                let children = (1..=entry.angle_count)
                    .filter_map(|angle| {
                        let key = TitleKey::with_angle(title, angle);
                        self.resolve(&key).map(|(_, angle_entry)| TitleNode {
                            label: format!(
                                "Angle {angle} ({})",
                                format_duration(angle_entry.duration_secs())
                            ),
                            key: Some(key),
                            children: Vec::new(),
                        })
                    })
                    .collect();
                nodes.push(TitleNode {
                    label: format!("Title {title} (Multi-Angle)"),
                    key: None,
                    children,
                });
            } else {
                nodes.push(TitleNode {
                    label: format!("Title {title} ({})", format_duration(entry.duration_secs())),
                    key: Some(TitleKey::title(title)),
                    children: Vec::new(),
                });
            }
        }
        nodes
    }
}
