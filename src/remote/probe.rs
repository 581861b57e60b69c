//! Read-only probing of a remote Drupal installation.
//!
//! The probe verifies, strictly in order, that the root directory exists,
//! that `composer.json` sits directly under it, and that `Drupal.php` exists
//! in either the packaged web-root layout or the bare layout. It then reads
//! `Drupal.php` and extracts the `VERSION` constant.
//!
//! Existence checks never look at the remote exit status. The check echoes
//! one of two disjoint tokens and only the token decides, because restricted
//! shells do not always report a meaningful status.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::RemoteError;
use super::quote::{join_remote, shell_quote};
use super::session::{CommandResult, Connector, DEFAULT_COMMAND_TIMEOUT, RemoteShell, RemoteTarget};

/// Printed by the existence check when the path is present.
pub const EXISTS_TOKEN: &str = "flibbity";

/// Printed by the existence check when the path is absent.
pub const ABSENT_TOKEN: &str = "zurbness";

/// Project manifest expected directly under the root directory.
pub const MANIFEST_FILE: &str = "composer.json";

/// Where `Drupal.php` may live relative to the root, in priority order.
pub const VERSION_FILE_CANDIDATES: [&str; 2] = ["web/core/lib/Drupal.php", "core/lib/Drupal.php"];

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\sconst\sVERSION\s=\s(.*);").expect("valid VERSION regex"));

/// What the probe learned about a remote installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationInfo {
    pub root_directory: String,
    /// Full path of the `Drupal.php` that was read.
    pub version_file: String,
    pub version: String,
}

impl std::fmt::Display for InstallationInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.root_directory, self.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Directory,
}

impl PathKind {
    fn test_flag(self) -> &'static str {
        match self {
            PathKind::File => "-f",
            PathKind::Directory => "-d",
        }
    }
}

/// Check whether `path` exists on the remote host as the given kind.
pub fn check_path_exists(
    shell: &mut dyn RemoteShell,
    path: &str,
    kind: PathKind,
    timeout: Duration,
) -> Result<bool, RemoteError> {
    let command = format!(
        "[ {} {} ] && echo '{EXISTS_TOKEN}' || echo '{ABSENT_TOKEN}'",
        kind.test_flag(),
        shell_quote(path)
    );
    let result = shell.execute(&command, timeout)?;
    debug!(command = %command, status = result.status, output = %result.output, "Existence check");
    Ok(result.contains(EXISTS_TOKEN))
}

/// `cat` a remote file.
pub fn read_file(
    shell: &mut dyn RemoteShell,
    path: &str,
    timeout: Duration,
) -> Result<CommandResult, RemoteError> {
    shell.execute(&format!("cat {}", shell_quote(path)), timeout)
}

/// Fail with [`RemoteError::ManifestMissing`] unless `composer.json` exists
/// directly under `root`.
pub fn require_manifest(
    shell: &mut dyn RemoteShell,
    root: &str,
    timeout: Duration,
) -> Result<(), RemoteError> {
    let manifest = join_remote(root, MANIFEST_FILE);
    if check_path_exists(shell, &manifest, PathKind::File, timeout)? {
        Ok(())
    } else {
        Err(RemoteError::ManifestMissing(root.to_string()))
    }
}

/// Pull the `VERSION` constant out of `Drupal.php` source, without quotes.
pub fn extract_version(contents: &str) -> Option<String> {
    let captures = VERSION_PATTERN.captures(contents)?;
    let raw = captures.get(1)?.as_str();
    Some(raw.replace(['"', '\''], "").trim().to_string())
}

/// Seam used by the profile store to learn a site's version on creation.
pub trait VersionDetector {
    fn detect(
        &self,
        user: &str,
        secret: &str,
        host: &str,
        root_dir: &str,
    ) -> Result<InstallationInfo, RemoteError>;
}

/// Probes remote installations over a [`Connector`].
#[derive(Clone)]
pub struct InstallationProbe {
    connector: Arc<dyn Connector>,
    timeout: Duration,
}

impl InstallationProbe {
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

    /// Open a session and verify the installation, failing fast at the first
    /// unmet precondition. The session is released before returning.
    pub fn get_installation_info(
        &self,
        user: &str,
        secret: &str,
        host: &str,
        root_dir: &str,
    ) -> Result<InstallationInfo, RemoteError> {
        let target = RemoteTarget::parse(host, user);
        info!(target = %target, root = %root_dir, "Probing installation");

        let mut shell = self.connector.open(&target, secret)?;
        let info = self.inspect(shell.as_mut(), root_dir)?;

        info!(target = %target, version = %info.version, file = %info.version_file, "Probe complete");
        Ok(info)
    }

    fn inspect(&self, shell: &mut dyn RemoteShell, root_dir: &str) -> Result<InstallationInfo, RemoteError> {
        if !check_path_exists(shell, root_dir, PathKind::Directory, self.timeout)? {
            return Err(RemoteError::RootPathMissing(root_dir.to_string()));
        }

        require_manifest(shell, root_dir, self.timeout)?;

        let candidates: Vec<String> = VERSION_FILE_CANDIDATES
            .iter()
            .map(|relative| join_remote(root_dir, relative))
            .collect();

        let mut version_file = None;
        for candidate in &candidates {
            if check_path_exists(shell, candidate, PathKind::File, self.timeout)? {
                version_file = Some(candidate.clone());
                break;
            }
        }
        let version_file = version_file.ok_or(RemoteError::VersionFileMissing(candidates))?;

        let contents = read_file(shell, &version_file, self.timeout)?;
        let version = extract_version(&contents.output)
            .ok_or_else(|| RemoteError::VersionPatternNotFound(version_file.clone()))?;

        Ok(InstallationInfo {
            root_directory: root_dir.to_string(),
            version_file,
            version,
        })
    }
}

impl VersionDetector for InstallationProbe {
    fn detect(
        &self,
        user: &str,
        secret: &str,
        host: &str,
        root_dir: &str,
    ) -> Result<InstallationInfo, RemoteError> {
        self.get_installation_info(user, secret, host, root_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::scripted::{ScriptedConnector, exists_reply};

    const DRUPAL_PHP: &str = "<?php\n\nnamespace Drupal;\n\nclass Drupal {\n\n  const VERSION = '10.3.2';\n\n  const CORE_COMPATIBILITY = '8.x';\n}\n";

    /// A site where every path in `present` exists and Drupal.php reads as `contents`.
    fn site(present: &'static [&'static str], contents: &'static str) -> ScriptedConnector {
        ScriptedConnector::new(move |cmd| {
            if cmd.starts_with("cat ") {
                return Ok(CommandResult::new(0, contents));
            }
            let exists = present.iter().any(|p| cmd.contains(&format!("'{p}'")));
            exists_reply(exists)
        })
    }

    fn probe(connector: &ScriptedConnector) -> InstallationProbe {
        InstallationProbe::new(Arc::new(connector.clone()))
    }

    #[test]
    fn test_check_path_exists_ignores_exit_status() {
        let connector = ScriptedConnector::new(|_| Ok(CommandResult::new(127, EXISTS_TOKEN)));
        let mut shell = connector.open(&RemoteTarget::parse("h", "u"), "pw").unwrap();
        assert!(check_path_exists(shell.as_mut(), "/srv", PathKind::Directory, DEFAULT_COMMAND_TIMEOUT).unwrap());

        let connector = ScriptedConnector::new(|_| Ok(CommandResult::new(0, ABSENT_TOKEN)));
        let mut shell = connector.open(&RemoteTarget::parse("h", "u"), "pw").unwrap();
        assert!(!check_path_exists(shell.as_mut(), "/srv", PathKind::Directory, DEFAULT_COMMAND_TIMEOUT).unwrap());
    }

    #[test]
    fn test_check_path_command_shape() {
        let connector = ScriptedConnector::new(|_| exists_reply(true));
        let mut shell = connector.open(&RemoteTarget::parse("h", "u"), "pw").unwrap();
        check_path_exists(shell.as_mut(), "/srv/o'brien/site", PathKind::File, DEFAULT_COMMAND_TIMEOUT).unwrap();
        assert_eq!(
            connector.commands(),
            vec![r"[ -f '/srv/o'\''brien/site' ] && echo 'flibbity' || echo 'zurbness'".to_string()]
        );
    }

    #[test]
    fn test_extract_version_strips_quotes() {
        assert_eq!(extract_version(DRUPAL_PHP), Some("10.3.2".into()));
        assert_eq!(
            extract_version("class Drupal {\n  const VERSION = \"11.0.5\";\n}"),
            Some("11.0.5".into())
        );
    }

    #[test]
    fn test_extract_version_missing() {
        assert_eq!(extract_version("<?php\nclass Drupal {}\n"), None);
        assert_eq!(extract_version("const VERSIONS = '1.0.0';"), None);
    }

    #[test]
    fn test_probe_web_root_layout() {
        let connector = site(
            &["/srv/site", "/srv/site/composer.json", "/srv/site/web/core/lib/Drupal.php"],
            DRUPAL_PHP,
        );
        let info = probe(&connector)
            .get_installation_info("deploy", "pw", "example.org", "/srv/site")
            .unwrap();

        assert_eq!(info.root_directory, "/srv/site");
        assert_eq!(info.version_file, "/srv/site/web/core/lib/Drupal.php");
        assert_eq!(info.version, "10.3.2");
        assert_eq!(connector.closed(), 1);
    }

    #[test]
    fn test_probe_falls_back_to_bare_layout() {
        let connector = site(
            &["/srv/site", "/srv/site/composer.json", "/srv/site/core/lib/Drupal.php"],
            DRUPAL_PHP,
        );
        let info = probe(&connector)
            .get_installation_info("deploy", "pw", "example.org", "/srv/site")
            .unwrap();

        assert_eq!(info.version_file, "/srv/site/core/lib/Drupal.php");
        let commands = connector.commands();
        assert!(commands[2].contains("web/core/lib/Drupal.php"));
        assert!(commands[3].contains("'/srv/site/core/lib/Drupal.php'"));
        assert_eq!(commands[4], "cat '/srv/site/core/lib/Drupal.php'");
    }

    #[test]
    fn test_probe_root_missing_stops_immediately() {
        let connector = site(&[], DRUPAL_PHP);
        let err = probe(&connector)
            .get_installation_info("deploy", "pw", "example.org", "/srv/site")
            .unwrap_err();

        assert!(matches!(err, RemoteError::RootPathMissing(ref p) if p == "/srv/site"));
        assert_eq!(connector.commands().len(), 1);
        assert_eq!(connector.closed(), 1);
    }

    #[test]
    fn test_probe_manifest_missing() {
        let connector = site(&["/srv/site"], DRUPAL_PHP);
        let err = probe(&connector)
            .get_installation_info("deploy", "pw", "example.org", "/srv/site")
            .unwrap_err();

        assert!(matches!(err, RemoteError::ManifestMissing(_)));
        assert_eq!(connector.commands().len(), 2);
    }

    #[test]
    fn test_probe_version_file_missing() {
        let connector = site(&["/srv/site", "/srv/site/composer.json"], DRUPAL_PHP);
        let err = probe(&connector)
            .get_installation_info("deploy", "pw", "example.org", "/srv/site")
            .unwrap_err();

        match err {
            RemoteError::VersionFileMissing(paths) => {
                assert_eq!(
                    paths,
                    vec![
                        "/srv/site/web/core/lib/Drupal.php".to_string(),
                        "/srv/site/core/lib/Drupal.php".to_string()
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(connector.closed(), 1);
    }

    #[test]
    fn test_probe_unparsable_version_file() {
        let connector = site(
            &["/srv/site", "/srv/site/composer.json", "/srv/site/web/core/lib/Drupal.php"],
            "<?php // nothing here",
        );
        let err = probe(&connector)
            .get_installation_info("deploy", "pw", "example.org", "/srv/site")
            .unwrap_err();

        assert!(
            matches!(err, RemoteError::VersionPatternNotFound(ref p) if p == "/srv/site/web/core/lib/Drupal.php")
        );
        assert_eq!(connector.closed(), 1);
    }

    #[test]
    fn test_probe_auth_failure_aborts() {
        let connector = ScriptedConnector::refusing(|| RemoteError::Auth {
            user: "deploy".into(),
            reason: "denied".into(),
        });
        let err = probe(&connector)
            .get_installation_info("deploy", "bad", "example.org", "/srv/site")
            .unwrap_err();

        assert!(matches!(err, RemoteError::Auth { .. }));
        assert!(connector.commands().is_empty());
    }

    #[test]
    fn test_probe_transport_error_releases_session() {
        let connector = ScriptedConnector::new(|_| Err(RemoteError::Timeout(5)));
        let err = probe(&connector)
            .get_installation_info("deploy", "pw", "example.org", "/srv/site")
            .unwrap_err();

        assert!(matches!(err, RemoteError::Timeout(5)));
        assert_eq!(connector.opened(), 1);
        assert_eq!(connector.closed(), 1);
    }
}
