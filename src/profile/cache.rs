//! Read-through cache in front of a [`ProfileAccess`] implementation.
//!
//! Two structures live behind one lock:
//! - an LRU map of id -> (profile, inserted-at), entries older than the TTL
//!   count as misses
//! - the set of ids known to exist, filled lazily by the first `get_all`
//!
//! A `load_by_id` miss only fills the entry map. Ids join the known set
//! through `create`, `save` and the `get_all` scan, so an id loaded on its own
//! never stands in for the full listing.
//!
//! The lock is never held while the delegate runs. This cache assumes it is
//! the only writer to the underlying store.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::model::{Profile, ProfileRequest};
use super::{ProfileAccess, ProfileError};

/// Default entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Default number of cached profiles.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

struct CacheState {
    entries: LruCache<i64, (Profile, Instant)>,
    known_ids: BTreeSet<i64>,
    scanned: bool,
}

pub struct CachingProfileManager<P: ProfileAccess> {
    delegate: P,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl<P: ProfileAccess> CachingProfileManager<P> {
    pub fn new(delegate: P) -> Self {
        Self::with_config(delegate, CacheConfig::default())
    }

    pub fn with_config(delegate: P, config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            delegate,
            ttl: config.ttl,
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                known_ids: BTreeSet::new(),
                scanned: false,
            }),
        }
    }

    pub fn delegate(&self) -> &P {
        &self.delegate
    }

    /// Ids currently believed to exist, ascending.
    pub fn known_ids(&self) -> Vec<i64> {
        self.state.lock().known_ids.iter().copied().collect()
    }

    /// Drop every cached entry and forget the known ids.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.known_ids.clear();
        state.scanned = false;
    }

    fn cached(&self, id: i64) -> Option<Profile> {
        let mut state = self.state.lock();
        let fresh = match state.entries.get(&id) {
            Some((profile, inserted)) if inserted.elapsed() < self.ttl => Some(profile.clone()),
            Some(_) => None,
            None => return None,
        };
        if fresh.is_none() {
            trace!(id, "Cache entry expired");
            state.entries.pop(&id);
        }
        fresh
    }

    fn cache_entry(&self, profile: &Profile) {
        let id = profile.id();
        if id <= 0 {
            return;
        }
        self.state
            .lock()
            .entries
            .put(id, (profile.clone(), Instant::now()));
    }

    fn remember(&self, profile: &Profile) {
        let id = profile.id();
        if id <= 0 {
            return;
        }
        let mut state = self.state.lock();
        state.entries.put(id, (profile.clone(), Instant::now()));
        state.known_ids.insert(id);
    }

    fn forget(&self, id: i64) {
        let mut state = self.state.lock();
        state.entries.pop(&id);
        state.known_ids.remove(&id);
    }
}

impl<P: ProfileAccess> ProfileAccess for CachingProfileManager<P> {
    fn create(&self, request: ProfileRequest) -> Result<Profile, ProfileError> {
        let profile = self.delegate.create(request)?;
        self.remember(&profile);
        Ok(profile)
    }

    fn load_by_id(&self, id: i64) -> Result<Option<Profile>, ProfileError> {
        if let Some(profile) = self.cached(id) {
            trace!(id, "Profile cache hit");
            return Ok(Some(profile));
        }

        debug!(id, "Profile cache miss");
        let loaded = self.delegate.load_by_id(id)?;
        match &loaded {
            Some(profile) => self.cache_entry(profile),
            None => self.forget(id),
        }
        Ok(loaded)
    }

    fn get_all(&self) -> Result<Vec<Profile>, ProfileError> {
        let needs_scan = {
            let state = self.state.lock();
            !state.scanned || state.known_ids.is_empty()
        };
        if needs_scan {
            let ids: Vec<i64> = self.delegate.get_all()?.iter().map(Profile::id).collect();
            debug!(count = ids.len(), "Populated known profile ids");
            let mut state = self.state.lock();
            state.known_ids.extend(ids);
            state.scanned = true;
        }

        let ids = self.known_ids();
        let mut profiles = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(profile) = self.load_by_id(id)? {
                profiles.push(profile);
            }
        }
        Ok(profiles)
    }

    fn save(&self, profile: &mut Profile) -> Result<(), ProfileError> {
        self.delegate.save(profile)?;
        self.remember(profile);
        Ok(())
    }

    fn delete(&self, profile: &Profile) -> Result<(), ProfileError> {
        self.delegate.delete(profile)?;
        self.forget(profile.id());
        Ok(())
    }
}
