//! Remote execution over SSH.
//!
//! - **session**: one connection + password auth, single-shot commands
//! - **probe**: precondition checks and `Drupal.php` version detection
//! - **install**: composer require/update with ordered fallback commands
//! - **quote**: POSIX quoting for every value placed in a command line
//!
//! Each probe or install opens exactly one session and runs its commands one
//! at a time. The session is released on drop, so it is closed on success,
//! on a declared failure, and on any early error return.

pub mod error;
pub mod install;
pub mod probe;
pub mod quote;
pub mod session;

#[cfg(test)]
pub(crate) mod scripted;

pub use error::RemoteError;
pub use install::{InstallReport, RemoteInstaller, SUCCESS_MARKER};
pub use probe::{InstallationInfo, InstallationProbe, PathKind, VersionDetector};
pub use quote::shell_quote;
pub use session::{CommandResult, Connector, RemoteShell, RemoteTarget, SshConnector, SshOptions};
