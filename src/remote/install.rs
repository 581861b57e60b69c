//! Remote composer installs with ordered fallback commands.
//!
//! # Candidate commands (priority order)
//!
//! 1. `cd <dir> && composer require <pkg> && echo <marker>`
//! 2. the same, after relaxing stability (`minimum-stability dev`,
//!    `prefer-stable true`)
//!
//! Every step is joined with `&&`, so the marker is printed only when every
//! step before it succeeded. A candidate counts as successful when its output
//! contains the marker; exit status is not consulted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::error::RemoteError;
use super::probe::require_manifest;
use super::quote::shell_quote;
use super::session::{Connector, DEFAULT_COMMAND_TIMEOUT, RemoteShell, RemoteTarget};
use crate::profile::Profile;

/// Appended to every candidate; only a fully successful pipeline prints it.
pub const SUCCESS_MARKER: &str = "flubr";

/// What a finished install or update did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// The candidate that printed the marker.
    pub command: String,
    /// 1-based position of that candidate.
    pub attempt: usize,
    pub output: String,
}

/// Commands that install `namespace` into the project at `directory`.
pub fn install_candidates(directory: &str, namespace: &str) -> Vec<String> {
    let change_dir = format!("cd {}", shell_quote(directory));
    let require = format!("composer require {}", shell_quote(namespace));
    let marker = format!("echo '{SUCCESS_MARKER}'");
    let allow_dev = "composer config minimum-stability dev && composer config prefer-stable true";

    vec![
        [change_dir.as_str(), require.as_str(), marker.as_str()].join(" && "),
        [change_dir.as_str(), allow_dev, require.as_str(), marker.as_str()].join(" && "),
    ]
}

/// Commands that run `composer update` in the project at `directory`.
pub fn update_candidates(directory: &str) -> Vec<String> {
    vec![format!(
        "cd {} && composer update && echo '{SUCCESS_MARKER}'",
        shell_quote(directory)
    )]
}

/// Runs composer operations on a profile's site.
#[derive(Clone)]
pub struct RemoteInstaller {
    connector: Arc<dyn Connector>,
    timeout: Duration,
}

impl RemoteInstaller {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Install a composer package (e.g. `drupal/token`) on the profile's site.
    pub fn install_package(
        &self,
        profile: &Profile,
        secret: &str,
        namespace: &str,
    ) -> Result<InstallReport, RemoteError> {
        let candidates = install_candidates(&profile.directory, namespace);
        self.run_candidates(profile, secret, candidates)
    }

    /// Run `composer update` on the profile's site.
    pub fn update_packages(&self, profile: &Profile, secret: &str) -> Result<InstallReport, RemoteError> {
        let candidates = update_candidates(&profile.directory);
        self.run_candidates(profile, secret, candidates)
    }

    fn run_candidates(
        &self,
        profile: &Profile,
        secret: &str,
        candidates: Vec<String>,
    ) -> Result<InstallReport, RemoteError> {
        let target = RemoteTarget::parse(&profile.host, &profile.user_name);
        let mut shell = self.connector.open(&target, secret)?;

        // The site may have changed since the profile was probed.
        require_manifest(shell.as_mut(), &profile.directory, self.timeout)?;

        info!(target = %target, candidates = ?candidates, "Trying composer commands");
        attempt_in_order(shell.as_mut(), &candidates, self.timeout)
    }
}

/// Execute candidates in order until one prints the marker.
///
/// A transport error on one candidate counts as that candidate failing.
fn attempt_in_order(
    shell: &mut dyn RemoteShell,
    candidates: &[String],
    timeout: Duration,
) -> Result<InstallReport, RemoteError> {
    for (index, command) in candidates.iter().enumerate() {
        info!(attempt = index + 1, command = %command, "Trying candidate");

        match shell.execute(command, timeout) {
            Ok(result) if result.contains(SUCCESS_MARKER) => {
                info!(attempt = index + 1, result = %result, "Candidate succeeded");
                return Ok(InstallReport {
                    command: command.clone(),
                    attempt: index + 1,
                    output: result.output,
                });
            }
            Ok(result) => {
                info!(attempt = index + 1, result = %result, "Candidate did not succeed");
            }
            Err(e) => {
                warn!(attempt = index + 1, error = %e, "Candidate failed to run");
            }
        }
    }

    Err(RemoteError::NoInstallCommandSucceeded {
        attempted: candidates.to_vec(),
    })
}
