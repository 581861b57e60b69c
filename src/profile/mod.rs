//! Site profiles: the record, its durable store, and the read-through cache.
//!
//! ```rust,ignore
//! use remote_site_installer::profile::{CachingProfileManager, ProfileAccess, SqliteProfileStore};
//!
//! let store = SqliteProfileStore::open(&db_path, Box::new(probe))?;
//! let profiles = CachingProfileManager::new(store);
//!
//! let profile = profiles.create(request)?;       // probes the site, assigns an id
//! let again = profiles.load_by_id(profile.id())?; // served from cache
//! ```

pub mod cache;
pub mod model;
pub mod store;

use thiserror::Error;

use crate::remote::RemoteError;

pub use cache::{CacheConfig, CachingProfileManager};
pub use model::{PlatformKind, Profile, ProfileRequest, parse_platform_version};
pub use store::SqliteProfileStore;

/// Errors from profile storage and creation.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Probe(#[from] RemoteError),

    #[error("Invalid platform version: {0}")]
    InvalidVersion(String),

    #[error("Profile has not been saved yet")]
    NotPersisted,

    #[error("Profile already has id {0}")]
    IdAlreadyAssigned(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// CRUD over site profiles. Implemented by the durable store and by the
/// caching decorator in front of it.
pub trait ProfileAccess {
    /// Probe the site, persist a new profile, and return it with its id and
    /// the in-memory password attached.
    fn create(&self, request: ProfileRequest) -> Result<Profile, ProfileError>;

    fn load_by_id(&self, id: i64) -> Result<Option<Profile>, ProfileError>;

    fn get_all(&self) -> Result<Vec<Profile>, ProfileError>;

    /// Insert when the id is 0 (assigning it), otherwise update.
    fn save(&self, profile: &mut Profile) -> Result<(), ProfileError>;

    fn delete(&self, profile: &Profile) -> Result<(), ProfileError>;

    /// Save each profile in order. Stops at the first failure; earlier saves
    /// stay committed.
    fn save_all(&self, profiles: &mut [Profile]) -> Result<(), ProfileError> {
        for profile in profiles.iter_mut() {
            self.save(profile)?;
        }
        Ok(())
    }

    /// Delete each profile in order. Stops at the first failure; earlier
    /// deletes stay committed.
    fn delete_all(&self, profiles: &[Profile]) -> Result<(), ProfileError> {
        for profile in profiles {
            self.delete(profile)?;
        }
        Ok(())
    }
}
