//! Per-formation serialization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use shoal_id::{AppId, FormationType};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type FormationKey = (AppId, FormationType);

/// One async lock per `(app, formation type)`.
///
/// Idle entries are pruned whenever a lock is taken.
#[derive(Debug, Default)]
pub struct FormationLocks {
    locks: Mutex<HashMap<FormationKey, Arc<AsyncMutex<()>>>>,
}

impl FormationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one formation.
    pub async fn lock(&self, app: &AppId, formation_type: &FormationType) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry((app.clone(), formation_type.clone()))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of formations with a held or awaited lock.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn key(app: &str, ty: &str) -> (AppId, FormationType) {
        (AppId::new(app).unwrap(), FormationType::new(ty).unwrap())
    }

    #[tokio::test]
    async fn test_same_formation_is_exclusive() {
        let locks = FormationLocks::new();
        let (app, ty) = key("blog", "web");

        let guard = locks.lock(&app, &ty).await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock(&app, &ty)).await;
        assert!(second.is_err());

        drop(guard);
        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock(&app, &ty)).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_distinct_formations_do_not_block() {
        let locks = FormationLocks::new();
        let (app, web) = key("blog", "web");
        let (_, worker) = key("blog", "worker");

        let _web = locks.lock(&app, &web).await;
        let other = tokio::time::timeout(Duration::from_millis(50), locks.lock(&app, &worker)).await;
        assert!(other.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_idle_locks_are_pruned() {
        let locks = FormationLocks::new();
        let (app, web) = key("blog", "web");
        drop(locks.lock(&app, &web).await);
        assert!(locks.is_empty());
    }
}
