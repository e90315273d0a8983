use std::{
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
};

use anyhow::Context as _;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{error, warn};

use crate::{
    dataset::Dataset,
    error::{Error, Result},
    settings::Settings,
    status::StatusBoard,
};

/// Completion signals emitted by background jobs.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    DatabaseLoaded,
    RoiLoaded,
    JobFailed(String),
}

/// Shared application state: settings, the status gate, and the loaded
/// dataset. Clones share the same underlying state; long operations run
/// on worker threads and signal completion through the event channel.
#[derive(Clone)]
pub struct AppContext {
    settings: Arc<Mutex<Settings>>,
    status: StatusBoard,
    dataset: Arc<RwLock<Option<Dataset>>>,
    events_tx: Sender<AppEvent>,
    events_rx: Receiver<AppEvent>,
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AppContext {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        if let Err(error) = settings.ensure_output_dir() {
            warn!(%error, "could not create the output directory");
        }
        let (events_tx, events_rx) = unbounded();
        Self {
            settings: Arc::new(Mutex::new(settings)),
            status: StatusBoard::new(),
            dataset: Arc::new(RwLock::new(None)),
            events_tx,
            events_rx,
        }
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    /// A receiver of completion events; every clone sees every event.
    pub fn events(&self) -> Receiver<AppEvent> {
        self.events_rx.clone()
    }

    pub fn settings(&self) -> MutexGuard<'_, Settings> {
        self.settings.lock()
    }

    pub fn dataset(&self) -> Arc<RwLock<Option<Dataset>>> {
        Arc::clone(&self.dataset)
    }

    pub fn is_loaded(&self) -> bool {
        self.dataset.read().is_some()
    }

    /// Check the configured paths before starting an analysis.
    pub fn validate_options(&self) -> Result<()> {
        self.settings.lock().validate()
    }

    /// Show an error on the status bar; the board is released afterwards.
    pub fn report_error(&self, error: &anyhow::Error) {
        self.status.set_error(&format!("Error: {error:#}"));
    }

    /// Load a dataset archive on a worker thread; emits `DatabaseLoaded`
    /// (or `JobFailed`) when done.
    pub fn load_database(&self, path: PathBuf) -> JoinHandle<()> {
        self.status.set_busy("Loading database...");
        let ctx = self.clone();
        thread::spawn(move || {
            let result = Dataset::load(&path)
                .with_context(|| format!("failed to load database {}", path.display()));
            match result {
                Ok(dataset) => {
                    *ctx.dataset.write() = Some(dataset);
                    ctx.status.mark_ready();
                    let _ = ctx.events_tx.send(AppEvent::DatabaseLoaded);
                }
                Err(err) => {
                    error!("{err:#}");
                    ctx.report_error(&err);
                    let _ = ctx.events_tx.send(AppEvent::JobFailed(err.to_string()));
                }
            }
        })
    }

    /// Apply (or clear) the configured region of interest on a worker
    /// thread; emits `RoiLoaded` when done.
    ///
    /// Declined with `None` while another task holds the status board.
    pub fn load_roi(&self) -> Option<JoinHandle<()>> {
        if !self.status.begin("Loading ROI...") {
            return None;
        }
        let ctx = self.clone();
        Some(thread::spawn(move || {
            let roi = ctx.settings.lock().roi_file().map(PathBuf::from);
            let result = (|| -> anyhow::Result<()> {
                let mut guard = ctx.dataset.write();
                let dataset = guard.as_mut().ok_or(Error::DatasetNotLoaded)?;
                match &roi {
                    Some(path) => dataset.apply_mask_file(path)?,
                    None => dataset.clear_mask(),
                }
                Ok(())
            })();
            match result {
                Ok(()) => {
                    let name = ctx.settings.lock().roi_name(true);
                    ctx.status
                        .update(&format!("Done. ROI {name} loaded."), true, false, false);
                    let _ = ctx.events_tx.send(AppEvent::RoiLoaded);
                }
                Err(err) => {
                    error!("{err:#}");
                    ctx.report_error(&err);
                    let _ = ctx.events_tx.send(AppEvent::JobFailed(err.to_string()));
                }
            }
        }))
    }

    /// Drop any configured region of interest and restore the full voxel
    /// universe.
    pub fn use_default_roi(&self) -> Option<JoinHandle<()>> {
        self.settings.lock().set_roi_file(None);
        self.load_roi()
    }
}
