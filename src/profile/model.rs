//! The site profile record.

use semver::Version;
use serde::{Deserialize, Serialize};

use super::ProfileError;

/// Owner id given to profiles created on this machine.
pub const DEFAULT_UID: i32 = 1;

/// Platform version assumed until a probe says otherwise.
pub const DEFAULT_PLATFORM_VERSION: Version = Version::new(11, 0, 0);

/// Kind of platform a profile points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlatformKind {
    #[default]
    Drupal,
}

impl PlatformKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PlatformKind::Drupal => "DRUPAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DRUPAL" | "" => Some(PlatformKind::Drupal),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Saved connection facts for one remote site.
///
/// `id` is 0 until the profile is first persisted and never changes after
/// that. The password lives only in memory and is never serialized.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    id: i64,
    pub uid: i32,
    pub title: String,
    pub user_name: String,
    /// `host` or `host:port`
    pub host: String,
    /// Project root on the remote host (where composer.json lives)
    pub directory: String,
    #[serde(skip)]
    password: Option<String>,
    /// Unix seconds
    pub created: i64,
    /// Unix seconds
    pub modified: i64,
    pub platform: PlatformKind,
    pub version: Version,
    /// UI intent only, never persisted
    #[serde(skip)]
    pub to_be_deleted: bool,
}

impl Profile {
    /// New, unsaved profile: id 0, uid 1, created/modified now, version 11.0.0.
    pub fn new(
        title: impl Into<String>,
        user_name: impl Into<String>,
        host: impl Into<String>,
        directory: impl Into<String>,
    ) -> Self {
        let now = current_timestamp();
        Self {
            id: 0,
            uid: DEFAULT_UID,
            title: title.into(),
            user_name: user_name.into(),
            host: host.into(),
            directory: directory.into(),
            password: None,
            created: now,
            modified: now,
            platform: PlatformKind::Drupal,
            version: DEFAULT_PLATFORM_VERSION,
            to_be_deleted: false,
        }
    }

    /// Set the id of a row loaded from storage.
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    pub fn with_uid(mut self, uid: i32) -> Self {
        self.uid = uid;
        self
    }

    pub fn with_timestamps(mut self, created: i64, modified: i64) -> Self {
        self.created = created;
        self.modified = modified;
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }

    /// Record the id assigned on first persist. Fails if one is already set.
    pub fn assign_id(&mut self, id: i64) -> Result<(), ProfileError> {
        if self.id != 0 {
            return Err(ProfileError::IdAlreadyAssigned(self.id));
        }
        if id <= 0 {
            return Err(ProfileError::NotPersisted);
        }
        self.id = id;
        Ok(())
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = Some(password.into());
    }

    pub fn clear_password(&mut self) {
        self.password = None;
    }

    /// Parse and set the platform version ("10.3.2", "10.3", "11.1.0-dev").
    pub fn set_version_str(&mut self, version: &str) -> Result<(), ProfileError> {
        self.version = parse_platform_version(version)?;
        Ok(())
    }

    pub fn touch(&mut self) {
        self.modified = current_timestamp();
    }

    /// Case-insensitive title match.
    pub fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(&needle.to_lowercase())
    }

    /// One-line listing form: `#3 Blog deploy@example.org:/var/www/blog (DRUPAL 10.3.2)`.
    pub fn summary(&self) -> String {
        format!(
            "#{} {} {}@{}:{} ({} {})",
            self.id, self.title, self.user_name, self.host, self.directory, self.platform, self.version
        )
    }
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("id", &self.id)
            .field("uid", &self.uid)
            .field("title", &self.title)
            .field("user_name", &self.user_name)
            .field("host", &self.host)
            .field("directory", &self.directory)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("created", &self.created)
            .field("modified", &self.modified)
            .field("platform", &self.platform)
            .field("version", &self.version)
            .field("to_be_deleted", &self.to_be_deleted)
            .finish()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ title: {}, userName: {}, toBeDeleted: {} }}",
            self.title, self.user_name, self.to_be_deleted
        )
    }
}

/// Input for creating a profile. The password is used to probe the site and
/// is then kept only on the returned in-memory profile.
#[derive(Clone)]
pub struct ProfileRequest {
    pub title: String,
    pub user_name: String,
    pub password: String,
    pub host: String,
    pub directory: String,
}

impl std::fmt::Debug for ProfileRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileRequest")
            .field("title", &self.title)
            .field("user_name", &self.user_name)
            .field("host", &self.host)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

/// Lenient semver parse: "10.3" becomes 10.3.0, "11" becomes 11.0.0.
pub fn parse_platform_version(raw: &str) -> Result<Version, ProfileError> {
    let trimmed = raw.trim();
    if let Ok(version) = Version::parse(trimmed) {
        return Ok(version);
    }

    let (core, suffix) = match trimmed.find(['-', '+']) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, ""),
    };
    let padded = match core.split('.').count() {
        1 => format!("{core}.0.0{suffix}"),
        2 => format!("{core}.0{suffix}"),
        _ => return Err(ProfileError::InvalidVersion(raw.to_string())),
    };
    Version::parse(&padded).map_err(|_| ProfileError::InvalidVersion(raw.to_string()))
}

pub(crate) fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
