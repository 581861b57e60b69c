use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use remote_site_installer::remote::{CommandResult, Connector, RemoteError, RemoteShell, RemoteTarget};

pub const EXISTS_TOKEN: &str = "flibbity";
pub const ABSENT_TOKEN: &str = "zurbness";

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }

    pub fn assert_not_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            !out.contains(needle),
            "expected logs not to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Path to a file under `tests/fixtures`.
#[allow(dead_code)]
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// A Drupal site that exists only in memory.
///
/// Paths listed in `present` answer the existence check; `cat` returns a
/// `Drupal.php` declaring `version`; composer commands print the success
/// marker only when `composer_works` is set.
#[derive(Clone)]
#[allow(dead_code)]
pub struct FakeSite {
    pub present: Vec<String>,
    pub version: String,
    pub composer_works: bool,
    pub accepted_password: String,
    commands: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl FakeSite {
    /// A healthy site rooted at `root` with the web/ layout.
    pub fn drupal(root: &str, version: &str) -> Self {
        Self {
            present: vec![
                root.to_string(),
                format!("{root}/composer.json"),
                format!("{root}/web/core/lib/Drupal.php"),
            ],
            version: version.to_string(),
            composer_works: true,
            accepted_password: "hunter2".to_string(),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn answer(&self, command: &str) -> CommandResult {
        if command.starts_with("[ ") {
            let exists = self.present.iter().any(|p| command.contains(&format!("'{p}'")));
            let token = if exists { EXISTS_TOKEN } else { ABSENT_TOKEN };
            return CommandResult::new(1, token);
        }
        if command.starts_with("cat ") {
            return CommandResult::new(
                0,
                format!("<?php\nfinal class Drupal {{\n  const VERSION = '{}';\n}}\n", self.version),
            );
        }
        if command.contains("composer") && self.composer_works {
            return CommandResult::new(0, "Package operations: 1 install, 0 updates\nflubr");
        }
        CommandResult::new(1, "Your requirements could not be resolved")
    }
}

impl Connector for FakeSite {
    fn open(&self, target: &RemoteTarget, secret: &str) -> Result<Box<dyn RemoteShell>, RemoteError> {
        if secret != self.accepted_password {
            return Err(RemoteError::Auth {
                user: target.user.clone(),
                reason: "password rejected".into(),
            });
        }
        Ok(Box::new(FakeShell { site: self.clone() }))
    }
}

struct FakeShell {
    site: FakeSite,
}

impl RemoteShell for FakeShell {
    fn execute(&mut self, command: &str, _timeout: Duration) -> Result<CommandResult, RemoteError> {
        self.site.commands.lock().unwrap().push(command.to_string());
        Ok(self.site.answer(command))
    }
}
