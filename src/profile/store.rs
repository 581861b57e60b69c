//! Durable profile storage in `SQLite`.
//!
//! The password and the soft-delete flag are never written. Ids come from
//! `AUTOINCREMENT`, so a deleted id is never handed out again.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use super::model::{PlatformKind, Profile, ProfileRequest, parse_platform_version};
use super::{ProfileAccess, ProfileError};
use crate::remote::VersionDetector;

const TABLE_NAME: &str = "site_profile";

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS site_profile (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid INTEGER NOT NULL DEFAULT 0,
    title TEXT NOT NULL DEFAULT '',
    username TEXT NOT NULL DEFAULT '',
    uri TEXT NOT NULL DEFAULT '',
    directory TEXT NOT NULL DEFAULT '',
    platform_type TEXT NOT NULL DEFAULT 'DRUPAL',
    version_string TEXT NOT NULL DEFAULT '',
    created INTEGER NOT NULL DEFAULT 0,
    modified INTEGER NOT NULL DEFAULT 0,
    extra BLOB
);
";

const SELECT_COLUMNS: &str =
    "SELECT id, uid, title, username, uri, directory, platform_type, version_string, created, modified FROM site_profile";

/// `SQLite`-backed [`ProfileAccess`]. Creating a profile probes the remote
/// site through the [`VersionDetector`] to record its platform version.
pub struct SqliteProfileStore {
    conn: Connection,
    detector: Box<dyn VersionDetector>,
}

impl SqliteProfileStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path, detector: Box<dyn VersionDetector>) -> Result<Self, ProfileError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Self::with_connection(conn, detector)
    }

    /// In-memory store, mostly for tests.
    pub fn open_in_memory(detector: Box<dyn VersionDetector>) -> Result<Self, ProfileError> {
        Self::with_connection(Connection::open_in_memory()?, detector)
    }

    fn with_connection(
        conn: Connection,
        detector: Box<dyn VersionDetector>,
    ) -> Result<Self, ProfileError> {
        conn.execute_batch(SCHEMA)?;
        debug!(table = TABLE_NAME, "Profile schema ready");
        Ok(Self { conn, detector })
    }

    pub fn count(&self) -> Result<usize, ProfileError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM site_profile", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn insert(&self, profile: &mut Profile) -> Result<(), ProfileError> {
        info!(table = TABLE_NAME, title = %profile.title, "Inserting profile");
        self.conn.execute(
            "INSERT INTO site_profile (uid, title, username, uri, directory, platform_type, version_string, created, modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                profile.uid,
                profile.title,
                profile.user_name,
                profile.host,
                profile.directory,
                profile.platform.as_str(),
                profile.version.to_string(),
                profile.created,
                profile.modified,
            ],
        )?;
        profile.assign_id(self.conn.last_insert_rowid())
    }

    fn update(&self, profile: &mut Profile) -> Result<(), ProfileError> {
        profile.touch();
        info!(table = TABLE_NAME, id = profile.id(), "Updating profile");
        let rows = self.conn.execute(
            "UPDATE site_profile SET uid = ?1, title = ?2, username = ?3, uri = ?4, directory = ?5,
                 platform_type = ?6, version_string = ?7, created = ?8, modified = ?9
             WHERE id = ?10",
            params![
                profile.uid,
                profile.title,
                profile.user_name,
                profile.host,
                profile.directory,
                profile.platform.as_str(),
                profile.version.to_string(),
                profile.created,
                profile.modified,
                profile.id(),
            ],
        )?;
        if rows == 0 {
            warn!(id = profile.id(), "Update matched no stored profile");
        }
        Ok(())
    }
}

impl ProfileAccess for SqliteProfileStore {
    fn create(&self, request: ProfileRequest) -> Result<Profile, ProfileError> {
        let info = self.detector.detect(
            &request.user_name,
            &request.password,
            &request.host,
            &request.directory,
        )?;
        let version = parse_platform_version(&info.version)?;

        let mut profile = Profile::new(
            request.title,
            request.user_name,
            request.host,
            request.directory,
        )
        .with_version(version);

        self.insert(&mut profile)?;
        profile.set_password(request.password);
        Ok(profile)
    }

    fn load_by_id(&self, id: i64) -> Result<Option<Profile>, ProfileError> {
        let profile = self
            .conn
            .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), [id], row_to_profile)
            .optional()?;
        Ok(profile)
    }

    fn get_all(&self) -> Result<Vec<Profile>, ProfileError> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))?;
        let rows = stmt.query_map([], row_to_profile)?;
        let profiles = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(profiles)
    }

    fn save(&self, profile: &mut Profile) -> Result<(), ProfileError> {
        if profile.is_persisted() {
            self.update(profile)
        } else {
            self.insert(profile)
        }
    }

    fn delete(&self, profile: &Profile) -> Result<(), ProfileError> {
        let rows = self
            .conn
            .execute("DELETE FROM site_profile WHERE id = ?1", [profile.id()])?;
        debug!(id = profile.id(), rows, "Deleted profile");
        Ok(())
    }
}

fn row_to_profile(row: &rusqlite::Row) -> rusqlite::Result<Profile> {
    let platform_raw: String = row.get(6)?;
    let version_raw: String = row.get(7)?;

    let platform = PlatformKind::parse(&platform_raw).unwrap_or_default();
    let version = parse_platform_version(&version_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let mut profile = Profile::new(
        row.get::<_, String>(2)?,
        row.get::<_, String>(3)?,
        row.get::<_, String>(4)?,
        row.get::<_, String>(5)?,
    )
    .with_id(row.get(0)?)
    .with_uid(row.get(1)?)
    .with_timestamps(row.get(8)?, row.get(9)?)
    .with_version(version);
    profile.platform = platform;
    Ok(profile)
}

/// Default database location (`<data_dir>/profiles.db`).
pub fn default_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("profiles.db")
}
