//! Job placement and lifecycle.
//!
//! - [`FormationReconciler`] keeps a formation at its desired replica count
//! - [`JobLauncher`] starts one-shot jobs, optionally attached
//!
//! Both read cluster state fresh from the scheduler on every call and never
//! cache it.

mod launcher;
mod locks;
mod reconciler;

pub use launcher::{JobLauncher, LaunchError, Launched, RunRequest};
pub use locks::FormationLocks;
pub use reconciler::{
    Formation, FormationReconciler, ReconcileError, ReconcileOutcome, DEFAULT_MAX_QUANTITY,
};
