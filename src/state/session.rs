use crate::models::title_info::{TitleKey, TitleNode, TrimRange};
use crate::services::dumper::{DumpOrchestrator, Summary};
use crate::services::ffmpeg::{ProcessRunner, ProgressUpdate, RunResult, TitleRunner};
use crate::settings::Settings;
use crate::standard_error::DumpError;
use crate::state::cancel_token::CancelToken;
use crate::state::catalog::TitleCatalog;
use log::{debug, info};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const PROGRESS_CAPACITY: usize = 64;

/// Holds the loaded catalog and runs at most one dump in the background.
pub struct DumpSession<R = ProcessRunner> {
    catalog: Arc<RwLock<TitleCatalog>>,
    settings: Settings,
    runner: R,
    progress: broadcast::Sender<ProgressUpdate>,
    active: Arc<Mutex<Option<CancelToken>>>,
}

/// Frees the active slot when the background dump ends, however it ends.
struct ActiveSlot {
    active: Arc<Mutex<Option<CancelToken>>>,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        match self.active.lock() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

impl DumpSession<ProcessRunner> {
    pub fn new(catalog: TitleCatalog, settings: Settings) -> Self {
        let runner = ProcessRunner::new(settings.ffmpeg_path.clone());
        Self::with_runner(catalog, settings, runner)
    }
}

impl<R> DumpSession<R>
where
    R: TitleRunner + Clone + 'static,
{
    pub fn with_runner(catalog: TitleCatalog, settings: Settings, runner: R) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);
        Self {
            catalog: Arc::new(RwLock::new(catalog)),
            settings,
            runner,
            progress,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn catalog(&self) -> Arc<RwLock<TitleCatalog>> {
        Arc::clone(&self.catalog)
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.progress.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.active.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Signals the running dump, if any. Returns whether there was one.
    pub fn cancel(&self) -> bool {
        let slot = match self.active.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        match slot.as_ref() {
            Some(token) => {
                info!("Cancel requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Replaces the catalog for a newly loaded disc.
    pub fn load_catalog(&self, catalog: TitleCatalog) -> Result<(), DumpError> {
        if self.is_busy() {
            return Err(DumpError::Busy);
        }
        *self.write_catalog()? = catalog;
        Ok(())
    }

    pub fn set_trim(&self, title: u32, start: u32, end: u32) -> Result<TrimRange, DumpError> {
        self.write_catalog()?.set_trim(title, start, end)
    }

    pub fn tree(&self) -> Result<Vec<TitleNode>, DumpError> {
        Ok(self.read_catalog()?.tree())
    }

    fn read_catalog(&self) -> Result<std::sync::RwLockReadGuard<'_, TitleCatalog>, DumpError> {
        self.catalog
            .read()
            .map_err(|_| DumpError::Catalog("catalog lock poisoned".to_string()))
    }

    fn write_catalog(&self) -> Result<std::sync::RwLockWriteGuard<'_, TitleCatalog>, DumpError> {
        self.catalog
            .write()
            .map_err(|_| DumpError::Catalog("catalog lock poisoned".to_string()))
    }

    fn claim_slot(&self) -> Result<(CancelToken, ActiveSlot), DumpError> {
        let mut slot = self
            .active
            .lock()
            .map_err(|_| DumpError::Catalog("job slot lock poisoned".to_string()))?;
        if slot.is_some() {
            return Err(DumpError::Busy);
        }
        let token = CancelToken::new();
        *slot = Some(token.clone());
        Ok((
            token,
            ActiveSlot {
                active: Arc::clone(&self.active),
            },
        ))
    }

    fn orchestrator(&self) -> DumpOrchestrator<R> {
        DumpOrchestrator::new(self.catalog(), &self.settings, self.runner.clone())
    }

    fn sink(&self) -> impl Fn(ProgressUpdate) + Send + Sync + 'static {
        let sender = self.progress.clone();
        move |update: ProgressUpdate| {
            // No subscribers is fine.
            let _ = sender.send(update);
        }
    }

    /// Starts a single-title dump in the background.
    ///
    /// `trim` defaults to the title's current trim and `output_path` to the
    /// synthesized name next to the disc image.
    pub fn spawn_dump_one(
        &self,
        input_path: PathBuf,
        key: TitleKey,
        trim: Option<TrimRange>,
        output_path: Option<PathBuf>,
    ) -> Result<JoinHandle<Result<RunResult, DumpError>>, DumpError> {
        let orchestrator = self.orchestrator();
        let trim = match trim {
            Some(trim) => trim,
            None => self.read_catalog()?.trim(key.title),
        };
        let output_path = match output_path {
            Some(path) => path,
            None => {
                let output_dir = input_path
                    .parent()
                    .map(PathBuf::from)
                    .unwrap_or_default();
                orchestrator.output_path_for(&input_path, &output_dir, &key, &trim)?
            }
        };

        let (cancel, slot) = self.claim_slot()?;
        let sink = self.sink();
        debug!("Spawning dump of {key} to {}", output_path.display());
        Ok(tokio::spawn(async move {
            let _slot = slot;
            orchestrator
                .dump_one(&input_path, &output_path, key, trim, &sink, &cancel)
                .await
        }))
    }

    /// Starts a dump of every title and angle in the background.
    pub fn spawn_dump_all(
        &self,
        input_path: PathBuf,
        output_dir: PathBuf,
    ) -> Result<JoinHandle<Result<Summary, DumpError>>, DumpError> {
        let orchestrator = self.orchestrator();
        let (cancel, slot) = self.claim_slot()?;
        let sink = self.sink();
        debug!("Spawning dump of all titles to {}", output_dir.display());
        Ok(tokio::spawn(async move {
            let _slot = slot;
            orchestrator
                .dump_all(&input_path, &output_dir, &sink, &cancel)
                .await
        }))
    }
}
