// src/registry.rs
//! Process-wide map from session id to the live call's handle.
//!
//! Entries are weak: the registry never keeps a call alive. The map lock is
//! held only for the insert/lookup itself; per-session serialization lives in
//! `SessionHandle`. Absence on `get` is not an error, it means "no active call".

use metrics::gauge;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use tracing::debug;

use crate::worker::SessionHandle;

#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<HashMap<String, Weak<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish (or replace) the entry for `id`.
    pub fn save(&self, id: &str, handle: &Arc<SessionHandle>) {
        let len = {
            let mut map = self.inner.write().unwrap_or_else(|p| p.into_inner());
            map.insert(id.to_string(), Arc::downgrade(handle));
            map.len()
        };
        gauge!("guard_active_sessions").set(len as f64);
        debug!(target: "registry", session = %id, "session published");
    }

    /// Shared access to a live session, or `None` if absent, ended or closed.
    pub fn get(&self, id: &str) -> Option<Arc<SessionHandle>> {
        let map = self.inner.read().unwrap_or_else(|p| p.into_inner());
        map.get(id)
            .and_then(Weak::upgrade)
            .filter(|h| !h.is_closed())
    }

    /// Remove the entry. Returns whether something was removed.
    pub fn delete(&self, id: &str) -> bool {
        let (removed, len) = {
            let mut map = self.inner.write().unwrap_or_else(|p| p.into_inner());
            let removed = map.remove(id).is_some();
            (removed, map.len())
        };
        gauge!("guard_active_sessions").set(len as f64);
        if removed {
            debug!(target: "registry", session = %id, "session removed");
        }
        removed
    }

    /// Remove only if the entry still points at `handle` (a newer call may
    /// have reused the id).
    pub fn delete_if_same(&self, id: &str, handle: &Arc<SessionHandle>) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let same = map
            .get(id)
            .map(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(handle)))
            .unwrap_or(false);
        if same {
            map.remove(id);
        }
        gauge!("guard_active_sessions").set(map.len() as f64);
        same
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        let map = self.inner.read().unwrap_or_else(|p| p.into_inner());
        let mut ids: Vec<String> = map.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop entries whose owner is gone. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut map = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let before = map.len();
        map.retain(|_, w| w.strong_count() > 0);
        let removed = before - map.len();
        gauge!("guard_active_sessions").set(map.len() as f64);
        removed
    }
}
