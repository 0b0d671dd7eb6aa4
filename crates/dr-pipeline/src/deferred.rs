use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dr_model::{ModelError, Stage, StageKind, StageLoader};
use dr_tensor::TensorMap;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

impl LoadState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => LoadState::Loading,
            2 => LoadState::Loaded,
            _ => LoadState::Unloaded,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LoadState::Unloaded => 0,
            LoadState::Loading => 1,
            LoadState::Loaded => 2,
        }
    }
}

/// A stage that is only instantiated when asked to be.
///
/// `load` and `unload` serialize on an internal mutex, so concurrent loads
/// instantiate the artifact once and every caller observes the result.
/// `state` reads an atomic and never waits on an in-flight load.
pub struct DeferredModel {
    loader: Box<dyn StageLoader>,
    slot: Mutex<Option<Arc<dyn Stage>>>,
    state: AtomicU8,
}

impl DeferredModel {
    pub fn new(loader: Box<dyn StageLoader>) -> Self {
        Self {
            loader,
            slot: Mutex::new(None),
            state: AtomicU8::new(LoadState::Unloaded.as_u8()),
        }
    }

    pub fn kind(&self) -> StageKind {
        self.loader.kind()
    }

    pub fn describe(&self) -> String {
        self.loader.describe()
    }

    pub fn state(&self) -> LoadState {
        LoadState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: LoadState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    // A panic inside a loader must not wedge the handle.
    fn lock_slot(&self) -> MutexGuard<'_, Option<Arc<dyn Stage>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Instantiate the stage if it is not resident yet.
    ///
    /// Returns the load time, or `None` when the stage was already loaded.
    /// On failure the handle is left `Unloaded`.
    pub fn load(&self) -> Result<Option<Duration>> {
        let mut slot = self.lock_slot();
        if slot.is_some() {
            return Ok(None);
        }

        let kind = self.kind();
        let attempt = LoadAttempt::begin(&self.state);
        let start = Instant::now();
        let loaded = self.loader.load().and_then(|stage| {
            if stage.kind() == kind {
                Ok(stage)
            } else {
                Err(ModelError::WrongStage {
                    expected: kind,
                    found: stage.kind().to_string(),
                })
            }
        });

        match loaded {
            Ok(stage) => {
                *slot = Some(Arc::from(stage));
                attempt.commit();
                let elapsed = start.elapsed();
                tracing::info!(
                    stage = %kind,
                    artifact = %self.describe(),
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    "stage loaded"
                );
                Ok(Some(elapsed))
            }
            Err(source) => {
                drop(attempt);
                tracing::warn!(
                    stage = %kind,
                    artifact = %self.describe(),
                    error = %source,
                    "stage load failed"
                );
                Err(PipelineError::LoadFailed { stage: kind, source })
            }
        }
    }

    /// Drop the stage. Returns whether anything was resident.
    pub fn unload(&self) -> bool {
        let mut slot = self.lock_slot();
        let was_loaded = slot.take().is_some();
        self.set_state(LoadState::Unloaded);
        if was_loaded {
            tracing::info!(stage = %self.kind(), "stage unloaded");
        }
        was_loaded
    }

    /// One forward pass. A prediction already running keeps its stage alive
    /// even if `unload` is called meanwhile.
    pub fn predict(&self, inputs: &TensorMap) -> Result<TensorMap> {
        let kind = self.kind();
        let stage = self
            .lock_slot()
            .clone()
            .ok_or(PipelineError::NotLoaded { stage: kind })?;
        stage
            .predict(inputs)
            .map_err(|e| PipelineError::prediction(kind, e))
    }

    /// Load now and unload when the guard drops.
    ///
    /// A stage that was already loaded stays loaded after the guard drops;
    /// only the load this call performed is undone.
    pub fn resident(&self) -> Result<ResidentGuard<'_>> {
        let owned = self.load()?.is_some();
        Ok(ResidentGuard { model: self, owned })
    }
}

/// Marks a handle `Loading` and puts it back to `Unloaded` on drop unless
/// committed, so a failing or panicking loader never leaves it `Loading`.
struct LoadAttempt<'a> {
    state: &'a AtomicU8,
    committed: bool,
}

impl<'a> LoadAttempt<'a> {
    fn begin(state: &'a AtomicU8) -> Self {
        state.store(LoadState::Loading.as_u8(), Ordering::Release);
        Self {
            state,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.state.store(LoadState::Loaded.as_u8(), Ordering::Release);
        self.committed = true;
    }
}

impl Drop for LoadAttempt<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.state.store(LoadState::Unloaded.as_u8(), Ordering::Release);
        }
    }
}

/// Keeps a `DeferredModel` loaded for its lifetime.
pub struct ResidentGuard<'a> {
    model: &'a DeferredModel,
    owned: bool,
}

impl std::ops::Deref for ResidentGuard<'_> {
    type Target = DeferredModel;

    fn deref(&self) -> &DeferredModel {
        self.model
    }
}

impl Drop for ResidentGuard<'_> {
    fn drop(&mut self) {
        if self.owned {
            self.model.unload();
        }
    }
}
