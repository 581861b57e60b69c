//! Error types for the remote execution layer.

use thiserror::Error;

/// Failures raised while talking to a remote host.
///
/// Connection, authentication and host-key failures abort the whole flow.
/// Precondition failures name the path that was missing. A single candidate
/// command failing at the transport level surfaces as
/// [`RemoteError::CommandExecution`] or [`RemoteError::Timeout`], which the
/// installer treats as "this candidate failed" and moves on.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("SSH connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("SSH authentication failed for {user}: {reason}")]
    Auth { user: String, reason: String },

    #[error("Host key for {host} is not trusted: {reason}")]
    HostKey { host: String, reason: String },

    #[error("Root path does not exist: {0}")]
    RootPathMissing(String),

    #[error("composer.json does not exist in {0}")]
    ManifestMissing(String),

    #[error("Drupal.php does not exist at any of: {}", .0.join(", "))]
    VersionFileMissing(Vec<String>),

    #[error("Cannot get VERSION from Drupal.php at {0}")]
    VersionPatternNotFound(String),

    #[error("Remote command failed to run: {0}")]
    CommandExecution(String),

    #[error("Remote command timed out after {0} seconds")]
    Timeout(u64),

    #[error("No composer commands worked: {}", .attempted.join(" | "))]
    NoInstallCommandSucceeded { attempted: Vec<String> },
}

impl RemoteError {
    /// True for the three "remote site is not what we expect" failures.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            RemoteError::RootPathMissing(_)
                | RemoteError::ManifestMissing(_)
                | RemoteError::VersionFileMissing(_)
        )
    }

    /// True for failures that make the whole session unusable.
    pub fn is_fatal_transport(&self) -> bool {
        matches!(
            self,
            RemoteError::Connection { .. } | RemoteError::Auth { .. } | RemoteError::HostKey { .. }
        )
    }
}
