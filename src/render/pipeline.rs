use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tempfile::TempDir;
use tokio::task;
use tracing::{debug, info, warn};

use crate::{
    config::{Config, RenderConfig},
    error::{ArtfolioError, LedgerError, RenderError, Result},
    ledger::{sort_chronologically, Item, ItemId, VersionLedger},
    media::MediaStore,
    render::{
        encoder::{EncodeInvoker, Encoder},
        interpolate::{interpolated_path, InterpolationStage},
        manifest::{is_listable, ManifestBuilder},
    },
};

/// Per-request render parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RenderRequest {
    /// Seconds each version is shown
    pub duration: u32,
    /// Interpolation factor, 1 disables the second pass
    pub interpolate: u32,
    /// Base frame rate the interpolation factor multiplies
    pub fps: u32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self { duration: 2, interpolate: 1, fps: 25 }
    }
}

impl From<&RenderConfig> for RenderRequest {
    fn from(config: &RenderConfig) -> Self {
        Self {
            duration: config.duration,
            interpolate: config.interpolate,
            fps: config.fps,
        }
    }
}

impl RenderRequest {
    /// Build a request from raw query values.
    ///
    /// Missing, unparsable and non-positive values fall back to `defaults`
    /// instead of failing.
    pub fn from_query(
        defaults: RenderRequest,
        duration: Option<&str>,
        interpolate: Option<&str>,
        fps: Option<&str>,
    ) -> Self {
        fn positive(raw: Option<&str>, fallback: u32) -> u32 {
            raw.and_then(|value| value.trim().parse::<i64>().ok())
                .filter(|value| *value > 0)
                .and_then(|value| u32::try_from(value).ok())
                .unwrap_or(fallback)
        }

        Self {
            duration: positive(duration, defaults.duration),
            interpolate: positive(interpolate, defaults.interpolate),
            fps: positive(fps, defaults.fps),
        }
    }

    /// Replace zero fields with the defaults
    fn normalized(self, defaults: RenderRequest) -> Self {
        let or = |value: u32, fallback: u32| if value == 0 { fallback } else { value };
        Self {
            duration: or(self.duration, defaults.duration),
            interpolate: or(self.interpolate, defaults.interpolate),
            fps: or(self.fps, defaults.fps),
        }
    }
}

/// Everything one run needs, fixed once validation succeeds
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub ordered_input_paths: Vec<PathBuf>,
    pub per_frame_duration_seconds: u32,
    pub base_fps: u32,
    pub interpolation_factor: u32,
}

/// A finished video
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderArtifact {
    pub path: PathBuf,
    pub public_url: String,
    pub filename: String,
}

/// Observable phase of a render run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Validating,
    BuildingManifest,
    Encoding,
    Interpolating,
    Done,
    Failed,
}

impl fmt::Display for RenderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::BuildingManifest => "building-manifest",
            Self::Encoding => "encoding",
            Self::Interpolating => "interpolating",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// State carried between phases. Dropping a state that owns the scratch
/// directory removes the manifest with it.
enum RenderState {
    Validating,
    BuildingManifest {
        item: Item,
        job: RenderJob,
    },
    Encoding {
        item: Item,
        job: RenderJob,
        scratch: TempDir,
        manifest: PathBuf,
    },
    Interpolating {
        item: Item,
        job: RenderJob,
        _scratch: TempDir,
        primary: PathBuf,
    },
    Done(RenderArtifact),
}

impl RenderState {
    fn phase(&self) -> RenderPhase {
        match self {
            Self::Validating => RenderPhase::Validating,
            Self::BuildingManifest { .. } => RenderPhase::BuildingManifest,
            Self::Encoding { .. } => RenderPhase::Encoding,
            Self::Interpolating { .. } => RenderPhase::Interpolating,
            Self::Done(_) => RenderPhase::Done,
        }
    }
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Turns an item's version history into a timelapse video
///
/// Each call is one blocking unit of work: it waits on the encoder with no
/// deadline of its own unless the encoder was configured with a timeout.
/// Use [`RenderPipeline::render_async`] to keep async callers responsive.
pub struct RenderPipeline {
    ledger: Arc<dyn VersionLedger>,
    media: MediaStore,
    invoker: EncodeInvoker,
    defaults: RenderRequest,
    exclusive_per_item: bool,
    item_locks: Mutex<HashMap<ItemId, Arc<Mutex<()>>>>,
    clock: Clock,
}

impl RenderPipeline {
    pub fn new(
        ledger: Arc<dyn VersionLedger>,
        media: MediaStore,
        invoker: EncodeInvoker,
        render: &RenderConfig,
    ) -> Self {
        Self {
            ledger,
            media,
            invoker,
            defaults: RenderRequest::from(render),
            exclusive_per_item: render.exclusive_per_item,
            item_locks: Mutex::new(HashMap::new()),
            clock: Box::new(Utc::now),
        }
    }

    /// Wire a pipeline from configuration
    pub fn from_config(
        config: &Config,
        ledger: Arc<dyn VersionLedger>,
        encoder: Arc<dyn Encoder>,
    ) -> Self {
        Self::new(
            ledger,
            MediaStore::from_config(&config.media),
            EncodeInvoker::new(encoder, config.encoder.clone()),
            &config.render,
        )
    }

    /// Replace the time source used to name outputs
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    /// Request defaults this pipeline was configured with
    pub fn defaults(&self) -> RenderRequest {
        self.defaults
    }

    /// Render with the configured defaults
    pub fn render(&self, item_id: ItemId) -> Result<RenderArtifact> {
        self.render_with(item_id, &self.defaults)
    }

    /// Render and interpolate to `base_fps * factor`
    pub fn render_interpolated(
        &self,
        item_id: ItemId,
        factor: u32,
        base_fps: u32,
    ) -> Result<RenderArtifact> {
        let request = RenderRequest { interpolate: factor, fps: base_fps, ..self.defaults };
        self.render_with(item_id, &request)
    }

    /// Run the blocking pipeline on tokio's blocking pool
    pub async fn render_async(
        self: Arc<Self>,
        item_id: ItemId,
        request: RenderRequest,
    ) -> Result<RenderArtifact> {
        task::spawn_blocking(move || self.render_with(item_id, &request))
            .await
            .map_err(|e| ArtfolioError::Io(std::io::Error::other(format!("render task failed: {}", e))))?
    }

    /// Render with explicit parameters
    pub fn render_with(&self, item_id: ItemId, request: &RenderRequest) -> Result<RenderArtifact> {
        let request = request.normalized(self.defaults);

        let Some(lock) = self.exclusive_per_item.then(|| self.item_lock(item_id)) else {
            return self.run(item_id, &request);
        };

        let guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let result = self.run(item_id, &request);
        drop(guard);

        self.release_lock(item_id, lock);
        result
    }

    fn run(&self, item_id: ItemId, request: &RenderRequest) -> Result<RenderArtifact> {
        info!(
            "Rendering item {} (duration {}s, {}x at {} fps)",
            item_id, request.duration, request.interpolate, request.fps
        );

        let mut state = RenderState::Validating;
        loop {
            let phase = state.phase();
            debug!(item_id, %phase, "Render phase");

            state = match self.advance(item_id, request, state) {
                Ok(RenderState::Done(artifact)) => {
                    info!("Rendered item {} to {}", item_id, artifact.public_url);
                    return Ok(artifact);
                }
                Ok(next) => next,
                Err(err) => {
                    warn!(item_id, from = %phase, to = %RenderPhase::Failed, "Render failed: {}", err);
                    return Err(err);
                }
            };
        }
    }

    fn advance(
        &self,
        item_id: ItemId,
        request: &RenderRequest,
        state: RenderState,
    ) -> Result<RenderState> {
        match state {
            RenderState::Validating => {
                let (item, job) = self.validate(item_id, request)?;
                Ok(RenderState::BuildingManifest { item, job })
            }

            RenderState::BuildingManifest { item, job } => {
                let scratch = tempfile::Builder::new().prefix("artfolio-render-").tempdir()?;
                let manifest = ManifestBuilder::new(job.per_frame_duration_seconds)
                    .write(scratch.path(), &job.ordered_input_paths)?;
                Ok(RenderState::Encoding { item, job, scratch, manifest })
            }

            RenderState::Encoding { item, job, scratch, manifest } => {
                let (output, filename) =
                    self.media.reserve_output(item.group_id, item.id, (self.clock)())?;

                if let Err(err) = self.invoker.encode(&manifest, &output) {
                    discard(&output);
                    return Err(err);
                }

                if job.interpolation_factor > 1 {
                    Ok(RenderState::Interpolating { item, job, _scratch: scratch, primary: output })
                } else {
                    Ok(RenderState::Done(self.artifact(&item, output, filename)))
                }
            }

            RenderState::Interpolating { item, job, primary, .. } => {
                let stage = InterpolationStage::new(&self.invoker);
                match stage.run(&primary, job.base_fps, job.interpolation_factor) {
                    Ok(outcome) => Ok(RenderState::Done(self.artifact(&item, outcome.path, outcome.filename))),
                    Err(err) => {
                        // the primary stays; only the half-written pass goes
                        discard(&interpolated_path(&primary, job.interpolation_factor));
                        Err(err)
                    }
                }
            }

            done @ RenderState::Done(_) => Ok(done),
        }
    }

    fn validate(&self, item_id: ItemId, request: &RenderRequest) -> Result<(Item, RenderJob)> {
        let item = self.ledger.item(item_id).map_err(item_not_found)?;
        let mut versions = self.ledger.list_versions(item_id).map_err(item_not_found)?;
        if versions.is_empty() {
            return Err(RenderError::NoVersions { item_id }.into());
        }
        sort_chronologically(&mut versions);

        let mut inputs = Vec::with_capacity(versions.len());
        for version in &versions {
            let resolved = self
                .media
                .resolve(&version.storage_path)
                .and_then(|path| Ok(fs::canonicalize(path)?));
            match resolved {
                Ok(path) if is_listable(&path) => inputs.push(path),
                Ok(path) => warn!(
                    item_id,
                    version_id = version.id,
                    "Skipping version {:?}: line breaks cannot be listed",
                    path
                ),
                // tolerated: the timelapse just loses this frame
                Err(err) => warn!(
                    item_id,
                    version_id = version.id,
                    "Skipping version {}: {}",
                    version.storage_path.display(),
                    err
                ),
            }
        }

        if inputs.is_empty() {
            return Err(RenderError::NoFilesAvailable { item_id }.into());
        }
        debug!("{} of {} versions available", inputs.len(), versions.len());

        let job = RenderJob {
            ordered_input_paths: inputs,
            per_frame_duration_seconds: request.duration,
            base_fps: request.fps,
            interpolation_factor: request.interpolate,
        };
        Ok((item, job))
    }

    fn artifact(&self, item: &Item, path: PathBuf, filename: String) -> RenderArtifact {
        RenderArtifact {
            public_url: self.media.public_url(item.group_id, item.id, &filename),
            path,
            filename,
        }
    }

    fn item_lock(&self, item_id: ItemId) -> Arc<Mutex<()>> {
        let mut locks = self.item_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(item_id).or_default().clone()
    }

    /// Drop the item's lock entry unless another render is holding or waiting on it
    fn release_lock(&self, item_id: ItemId, lock: Arc<Mutex<()>>) {
        let mut locks = self.item_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // one reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&item_id);
        }
    }
}

fn item_not_found(err: ArtfolioError) -> ArtfolioError {
    match err {
        ArtfolioError::Ledger(LedgerError::ItemNotFound { item_id }) => {
            RenderError::NotFound { item_id }.into()
        }
        other => other,
    }
}

fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Discarded partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial output {}: {}", path.display(), e),
    }
}
