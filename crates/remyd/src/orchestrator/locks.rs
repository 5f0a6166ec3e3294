//! Per-user turn serialization.
//!
//! Two requests for the same user must not interleave: both could read the
//! same pending action and commit it twice. Each user gets their own async
//! mutex; requests for different users run in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct UserLocks {
    inner: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Take the user's lock, creating it on first sight. The map only ever
    /// grows; entries are tiny and the user population is small.
    pub async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap();
            Arc::clone(map.entry(user_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

impl Default for UserLocks {
    fn default() -> Self {
        Self::new()
    }
}
