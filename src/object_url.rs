//! Revocable references to in-memory image data.
//!
//! A browser hands out `blob:` URLs for in-memory files and expects them to
//! be revoked explicitly. [`ObjectUrlRegistry`] plays that role here: it maps
//! URLs to shared byte buffers, and every [`ObjectUrl`] it issues is a guard
//! that revokes its entry when dropped. Holders never have to remember to
//! release: dropping the `SourceImage` or `EncodedArtifact` that owns the
//! guard is enough, on every exit path.
//!
//! Each wizard owns its own registry, so [`ObjectUrlRegistry::live_count`]
//! is an exact leak counter for that wizard.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Bytes and MIME type behind an object URL.
#[derive(Debug, Clone)]
pub struct ObjectBlob {
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

#[derive(Default)]
struct RegistryInner {
    next: u64,
    entries: HashMap<String, ObjectBlob>,
}

/// Issues and resolves object URLs.
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Clone)]
pub struct ObjectUrlRegistry {
    id: u64,
    inner: Arc<Mutex<RegistryInner>>,
}

impl Default for ObjectUrlRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectUrlRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectUrlRegistry")
            .field("id", &self.id)
            .field("live", &self.live_count())
            .finish()
    }
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            inner: Arc::new(Mutex::new(RegistryInner::default())),
        }
    }

    // A poisoned lock only means another holder panicked mid-insert/remove;
    // the map itself is still consistent.
    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `bytes` and return a guard for the new URL.
    pub fn create(&self, bytes: Arc<[u8]>, mime_type: impl Into<String>) -> ObjectUrl {
        let mut inner = self.lock();
        inner.next += 1;
        let url = format!("blob:proofcrop/{}/{}", self.id, inner.next);
        inner.entries.insert(
            url.clone(),
            ObjectBlob {
                mime_type: mime_type.into(),
                bytes,
            },
        );
        debug!("Created object URL {} ({} live)", url, inner.entries.len());

        ObjectUrl {
            url,
            registry: self.clone(),
            revoked: false,
        }
    }

    /// Look up a live URL.
    pub fn resolve(&self, url: &str) -> Option<ObjectBlob> {
        self.lock().entries.get(url).cloned()
    }

    /// Number of URLs issued and not yet revoked.
    pub fn live_count(&self) -> usize {
        self.lock().entries.len()
    }

    fn revoke(&self, url: &str) -> bool {
        let mut inner = self.lock();
        let removed = inner.entries.remove(url).is_some();
        if removed {
            debug!("Revoked object URL {} ({} live)", url, inner.entries.len());
        }
        removed
    }
}

/// A live object URL. Revoked when dropped.
pub struct ObjectUrl {
    url: String,
    registry: ObjectUrlRegistry,
    revoked: bool,
}

impl ObjectUrl {
    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    /// Revoke now. Safe to call more than once.
    pub fn revoke(&mut self) {
        if !self.revoked {
            self.registry.revoke(&self.url);
            self.revoked = true;
        }
    }
}

impl Drop for ObjectUrl {
    fn drop(&mut self) {
        self.revoke();
    }
}

impl fmt::Debug for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectUrl")
            .field("url", &self.url)
            .field("revoked", &self.revoked)
            .finish()
    }
}

impl fmt::Display for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
