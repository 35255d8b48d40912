use crate::models::title_info::{TitleEntry, TitleKey, TrimRange};
use crate::services::ffmpeg::{ProgressSink, ProgressUpdate, RunResult, RunStatus, TitleRunner};
use crate::services::ffmpeg_command::CommandBuilder;
use crate::services::filename;
use crate::settings::Settings;
use crate::standard_error::DumpError;
use crate::state::cancel_token::CancelToken;
use crate::state::catalog::TitleCatalog;
use log::{error, info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// What a bulk dump did, job by job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub succeeded: Vec<TitleKey>,
    /// Titles that turned out to be padding only.
    pub skipped: Vec<(TitleKey, String)>,
    pub failed: Vec<(TitleKey, String)>,
    /// Set when the batch stopped early on request.
    pub cancelled: bool,
    pub planned: usize,
}

impl Summary {
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.skipped.len() + self.failed.len()
    }

    fn record(&mut self, result: RunResult) {
        match result.status {
            RunStatus::Success => self.succeeded.push(result.key),
            RunStatus::BenignSkip => self.skipped.push((result.key, result.reason)),
            RunStatus::Fatal => self.failed.push((result.key, result.reason)),
            RunStatus::Cancelled => self.cancelled = true,
        }
    }
}

/// One job of a bulk dump, resolved against the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedJob {
    pub key: TitleKey,
    pub entry: Option<TitleEntry>,
    pub trim: TrimRange,
    pub output_path: PathBuf,
}

/// Sequences dumps over the catalog, one external process at a time.
pub struct DumpOrchestrator<R: TitleRunner> {
    catalog: Arc<RwLock<TitleCatalog>>,
    builder: CommandBuilder,
    runner: R,
    extension: String,
}

impl<R: TitleRunner> DumpOrchestrator<R> {
    pub fn new(catalog: Arc<RwLock<TitleCatalog>>, settings: &Settings, runner: R) -> Self {
        Self {
            catalog,
            builder: CommandBuilder::new(settings),
            runner,
            extension: settings.output_extension.clone(),
        }
    }

    fn read_catalog(&self) -> Result<RwLockReadGuard<'_, TitleCatalog>, DumpError> {
        self.catalog
            .read()
            .map_err(|_| DumpError::Catalog("catalog lock poisoned".to_string()))
    }

    /// Output path the name synthesizer picks for `key` inside `output_dir`.
    pub fn output_path_for(
        &self,
        input_path: &Path,
        output_dir: &Path,
        key: &TitleKey,
        trim: &TrimRange,
    ) -> Result<PathBuf, DumpError> {
        let catalog = self.read_catalog()?;
        let entry = catalog
            .resolve(key)
            .map(|(_, entry)| entry)
            .or_else(|| catalog.representative(key.title))
            .ok_or(DumpError::MetadataMissing(*key))?;
        let name = filename::suggest_filename(
            &filename::base_name_for(input_path),
            key,
            entry,
            trim,
            &self.extension,
        );
        Ok(output_dir.join(name))
    }

    /// Every job `dump_all` would run, full chapter range, ascending order.
    pub fn plan(&self, input_path: &Path, output_dir: &Path) -> Result<Vec<PlannedJob>, DumpError> {
        let catalog = self.read_catalog()?;
        let base_name = filename::base_name_for(input_path);
        let mut jobs = Vec::new();
        for key in catalog.dump_plan() {
            // Every variant of a title shares its chapter map and angle count,
            // so a missing angle is still named and trimmed like its siblings.
            let Some(shape) = catalog.representative(key.title) else {
                continue;
            };
            let entry = catalog.resolve(&key).map(|(_, entry)| entry.clone());
            if entry.is_none() {
                warn!("{}, it will be dumped video-only", DumpError::MetadataMissing(key));
            }
            let trim = shape.full_trim();
            // Each name is derived from scratch so angle jobs never share a path.
            let name = filename::suggest_filename(&base_name, &key, shape, &trim, &self.extension);
            jobs.push(PlannedJob {
                key,
                entry,
                trim,
                output_path: output_dir.join(name),
            });
        }
        Ok(jobs)
    }

    /// Dumps a single title or angle with the given chapter range.
    ///
    /// A missing catalog entry degrades to a video-only dump rather than an
    /// error. Only an unusable tool or an out-of-range trim fail outright.
    pub async fn dump_one(
        &self,
        input_path: &Path,
        output_path: &Path,
        key: TitleKey,
        trim: TrimRange,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RunResult, DumpError> {
        self.runner.check_tool().await?;

        let entry = self.read_catalog()?.resolve(&key).map(|(_, entry)| entry.clone());
        // Single-angle titles are always addressed without an angle.
        let key = match &entry {
            Some(entry) if !entry.is_multi_angle() => key.unqualified(),
            _ => key,
        };
        match &entry {
            Some(entry) if !trim.is_valid_for(entry.chapter_count) => {
                return Err(DumpError::Catalog(format!(
                    "chapters {}-{} are outside {key} (1-{})",
                    trim.start, trim.end, entry.chapter_count
                )));
            }
            Some(_) => {}
            None => warn!("{}", DumpError::MetadataMissing(key)),
        }

        let command = self
            .builder
            .build(input_path, output_path, &key, entry.as_ref(), &trim);
        info!("Dumping {} to {}", command.label, output_path.display());
        let result = self.runner.run(&command, sink, cancel).await;
        log_result(&result);
        Ok(result)
    }

    /// Dumps every title (every angle of multi-angle titles) into `output_dir`.
    ///
    /// Per-job failures are recorded and the batch moves on. A cancel is
    /// honoured between jobs and returns what was done so far.
    pub async fn dump_all(
        &self,
        input_path: &Path,
        output_dir: &Path,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Summary, DumpError> {
        self.runner.check_tool().await?;
        fs::create_dir_all(output_dir)?;

        let jobs = self.plan(input_path, output_dir)?;
        let total = jobs.len();
        let mut summary = Summary {
            planned: total,
            ..Summary::default()
        };
        info!("Found {total} jobs to dump into {}", output_dir.display());
        sink.report(ProgressUpdate::batch(0, total, format!("Dumping titles 0/{total}")));

        for (index, job) in jobs.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Dump cancelled after {index} of {total} jobs");
                summary.cancelled = true;
                break;
            }

            let command = self.builder.build(
                input_path,
                &job.output_path,
                &job.key,
                job.entry.as_ref(),
                &job.trim,
            );
            info!(
                "Processing {} ({}/{total}) -> {}",
                command.label,
                index + 1,
                job.output_path.display()
            );
            let result = self.runner.run(&command, sink, cancel).await;
            log_result(&result);
            summary.record(result);
            if summary.cancelled {
                break;
            }

            sink.report(ProgressUpdate::batch(
                index + 1,
                total,
                format!("Dumping titles {}/{total} - {}", index + 1, command.label),
            ));
        }

        info!(
            "Dump finished: {} succeeded, {} skipped, {} failed{}",
            summary.succeeded.len(),
            summary.skipped.len(),
            summary.failed.len(),
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        Ok(summary)
    }
}

fn log_result(result: &RunResult) {
    match result.status {
        RunStatus::Success => info!("Dumped {} to {}", result.key, result.output_path.display()),
        RunStatus::BenignSkip => warn!("Skipped {}: {}", result.key, result.reason),
        RunStatus::Fatal => error!("Failed to dump {}: {}", result.key, result.reason),
        RunStatus::Cancelled => info!("Cancelled {}", result.key),
    }
}
