//! Per-workload-name operation serialization.
//!
//! Mutexes are created lazily on first use and collected once no operation
//! holds them, so a long-lived manager does not accumulate one mutex per
//! name ever seen.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default, Clone)]
pub(crate) struct NameMutexMap {
    inner: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

/// Held for the duration of one per-name operation. Dropping it releases the
/// mutex and sweeps unused entries out of the map.
pub(crate) struct NameGuard {
    guard: Option<OwnedMutexGuard<()>>,
    map: NameMutexMap,
}

impl Drop for NameGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.map.collect();
    }
}

impl NameMutexMap {
    pub(crate) async fn lock(&self, name: &str) -> NameGuard {
        let mutex = {
            let mut inner = self.inner.lock().expect("name mutex map poisoned");
            Arc::clone(
                inner
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let guard = mutex.lock_owned().await;
        NameGuard {
            guard: Some(guard),
            map: self.clone(),
        }
    }

    /// Drop entries no operation references anymore.
    fn collect(&self) {
        self.inner
            .lock()
            .expect("name mutex map poisoned")
            .retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().expect("name mutex map poisoned").len()
    }
}
