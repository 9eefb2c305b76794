//! In-memory mutex-map lock backend, for tests and single-process embedding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use gait_error::{ErrorCode, GaitError};

use crate::{LockGuard, LockManager};

/// Lock backend keyed by an in-process mutex map. Never touches disk.
#[derive(Debug, Default)]
pub struct InMemoryLockManager {
    slots: Mutex<HashMap<String, Arc<Mutex<bool>>>>,
}

impl InMemoryLockManager {
    /// Create an empty lock manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<Mutex<bool>> {
        let mut slots = self.slots.lock().expect("lock map poisoned");
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(false)))
            .clone()
    }
}

struct InMemoryGuard {
    slot: Arc<Mutex<bool>>,
}

impl LockGuard for InMemoryGuard {}

impl Drop for InMemoryGuard {
    fn drop(&mut self) {
        *self.slot.lock().expect("lock poisoned") = false;
    }
}

impl LockManager for InMemoryLockManager {
    fn acquire(&self, key: &str, timeout: Duration) -> Result<Box<dyn LockGuard>, GaitError> {
        let slot = self.slot(key);
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut locked = slot.lock().expect("lock poisoned");
                if !*locked {
                    *locked = true;
                    return Ok(Box::new(InMemoryGuard { slot: slot.clone() }));
                }
            }
            if Instant::now() >= deadline {
                return Err(GaitError::new(
                    ErrorCode::LockContention,
                    format!("timed out acquiring in-memory lock for {key}"),
                ));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
