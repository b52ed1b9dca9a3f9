//! Application state shared across request handlers.

use std::sync::Arc;

use crate::cluster::{HostRuntime, Scheduler};
use crate::scheduler::{FormationReconciler, JobLauncher};

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    scheduler: Arc<dyn Scheduler>,
    runtime: Arc<dyn HostRuntime>,
    reconciler: FormationReconciler,
    launcher: JobLauncher,
}

impl AppState {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        runtime: Arc<dyn HostRuntime>,
        reconciler: FormationReconciler,
        launcher: JobLauncher,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                scheduler,
                runtime,
                reconciler,
                launcher,
            }),
        }
    }

    pub fn scheduler(&self) -> &dyn Scheduler {
        self.inner.scheduler.as_ref()
    }

    pub fn runtime(&self) -> &dyn HostRuntime {
        self.inner.runtime.as_ref()
    }

    pub fn reconciler(&self) -> &FormationReconciler {
        &self.inner.reconciler
    }

    pub fn launcher(&self) -> &JobLauncher {
        &self.inner.launcher
    }
}
