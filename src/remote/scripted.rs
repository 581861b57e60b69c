//! In-memory transport for tests: commands are answered by a closure and
//! recorded so tests can assert ordering and session release.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::error::RemoteError;
use super::session::{CommandResult, Connector, RemoteShell, RemoteTarget};

type Responder = dyn Fn(&str) -> Result<CommandResult, RemoteError> + Send + Sync;

#[derive(Clone)]
pub struct ScriptedConnector {
    responder: Arc<Responder>,
    commands: Arc<Mutex<Vec<String>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    refuse: Option<fn() -> RemoteError>,
}

impl ScriptedConnector {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<CommandResult, RemoteError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            commands: Arc::new(Mutex::new(Vec::new())),
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            refuse: None,
        }
    }

    /// A connector whose `open` always fails with the given error.
    pub fn refusing(make_error: fn() -> RemoteError) -> Self {
        let mut connector = Self::new(|_| Ok(CommandResult::new(0, "")));
        connector.refuse = Some(make_error);
        connector
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, _target: &RemoteTarget, _secret: &str) -> Result<Box<dyn RemoteShell>, RemoteError> {
        if let Some(make_error) = self.refuse {
            return Err(make_error());
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedShell {
            responder: Arc::clone(&self.responder),
            commands: Arc::clone(&self.commands),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct ScriptedShell {
    responder: Arc<Responder>,
    commands: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
}

impl RemoteShell for ScriptedShell {
    fn execute(&mut self, command: &str, _timeout: Duration) -> Result<CommandResult, RemoteError> {
        self.commands.lock().push(command.to_string());
        (self.responder)(command)
    }
}

impl Drop for ScriptedShell {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Answer an existence check the way a restricted shell might: the right
/// token, but always a non-zero status.
pub fn exists_reply(exists: bool) -> Result<CommandResult, RemoteError> {
    let token = if exists {
        super::probe::EXISTS_TOKEN
    } else {
        super::probe::ABSENT_TOKEN
    };
    Ok(CommandResult::new(1, token))
}
