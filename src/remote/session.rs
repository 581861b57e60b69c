//! SSH session: one transport connection, password authentication, and
//! single-shot command execution.
//!
//! A session is released when it is dropped, so every exit path (success,
//! declared failure, or early `?` return) disconnects from the host.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use ssh2::{CheckResult, ExtendedData, KnownHostFileKind, Session};
use tracing::{debug, info, warn};

use super::error::RemoteError;

/// Default SSH port when the host string does not carry one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default per-command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Exit status and trimmed combined output of one remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Remote exit status; `-1` when the server did not report one.
    pub status: i32,
    /// stdout and stderr interleaved in arrival order, trimmed.
    pub output: String,
}

impl CommandResult {
    pub fn new(status: i32, output: impl Into<String>) -> Self {
        Self {
            status,
            output: output.into().trim().to_string(),
        }
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.output.contains(needle)
    }
}

impl std::fmt::Display for CommandResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "status={}, result={}", self.status, self.output)
    }
}

/// Where to connect and as whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl RemoteTarget {
    /// Build a target from a `host` or `host:port` string.
    pub fn parse(address: &str, user: &str) -> Self {
        let (host, port) = split_host_port(address);
        Self {
            host,
            port,
            user: user.to_string(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

fn split_host_port(address: &str) -> (String, u16) {
    let address = address.trim();
    // Bracketed IPv6: [::1]:2222
    if let Some(rest) = address.strip_prefix('[')
        && let Some((host, tail)) = rest.split_once(']')
    {
        let port = tail
            .strip_prefix(':')
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_SSH_PORT);
        return (host.to_string(), port);
    }
    match address.rsplit_once(':') {
        // A bare IPv6 address has several colons and no port.
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (address.to_string(), DEFAULT_SSH_PORT),
        },
        _ => (address.to_string(), DEFAULT_SSH_PORT),
    }
}

/// An authenticated remote shell that runs one command at a time.
///
/// Implementations release their transport on drop.
pub trait RemoteShell {
    /// Run `command` to completion.
    ///
    /// A non-zero exit status is not an error; it is reported in the
    /// [`CommandResult`]. Only transport failures and timeouts are errors.
    fn execute(&mut self, command: &str, timeout: Duration) -> Result<CommandResult, RemoteError>;
}

/// Opens authenticated shells. This is the seam between the probe/installer
/// and the SSH transport.
pub trait Connector {
    fn open(&self, target: &RemoteTarget, secret: &str) -> Result<Box<dyn RemoteShell>, RemoteError>;
}

/// Connection settings shared by every session the connector opens.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub connect_timeout: Duration,
    /// OpenSSH known_hosts file; `None` skips host key verification.
    pub known_hosts: Option<PathBuf>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            known_hosts: default_known_hosts(),
        }
    }
}

/// `~/.ssh/known_hosts` when it exists.
pub fn default_known_hosts() -> Option<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".ssh").join("known_hosts"))
        .filter(|path| path.exists())
}

/// A live SSH connection.
pub struct SshSession {
    session: Session,
    target: RemoteTarget,
}

impl SshSession {
    /// Open the TCP connection, run the handshake and check the host key.
    pub fn connect(target: &RemoteTarget, options: &SshOptions) -> Result<Self, RemoteError> {
        info!(host = %target.host, port = target.port, "Connecting");

        let connection_error = |reason: String| RemoteError::Connection {
            host: target.host.clone(),
            reason,
        };

        let addr = target
            .address()
            .to_socket_addrs()
            .map_err(|e| connection_error(format!("cannot resolve host: {e}")))?
            .next()
            .ok_or_else(|| connection_error("no addresses found".into()))?;

        let tcp = TcpStream::connect_timeout(&addr, options.connect_timeout)
            .map_err(|e| connection_error(e.to_string()))?;

        let mut session =
            Session::new().map_err(|e| connection_error(format!("cannot create session: {e}")))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(duration_millis(options.connect_timeout));
        session
            .handshake()
            .map_err(|e| connection_error(format!("handshake failed: {e}")))?;

        match &options.known_hosts {
            Some(path) => verify_host_key(&session, target, path)?,
            None => warn!(host = %target.host, "No known_hosts store configured, host key not verified"),
        }

        Ok(Self {
            session,
            target: target.clone(),
        })
    }

    /// Authenticate with a password.
    pub fn authenticate(&mut self, user: &str, secret: &str) -> Result<(), RemoteError> {
        debug!(user = %user, "Authenticating");
        self.session
            .userauth_password(user, secret)
            .map_err(|e| RemoteError::Auth {
                user: user.to_string(),
                reason: e.message().to_string(),
            })?;

        if !self.session.authenticated() {
            return Err(RemoteError::Auth {
                user: user.to_string(),
                reason: "server did not accept the credentials".into(),
            });
        }
        Ok(())
    }

    /// Disconnect. Called from `Drop`; errors are only logged.
    pub fn close(&mut self) {
        if let Err(e) = self.session.disconnect(None, "closing", None) {
            debug!(host = %self.target.host, error = %e, "Disconnect failed");
        }
    }
}

impl RemoteShell for SshSession {
    fn execute(&mut self, command: &str, timeout: Duration) -> Result<CommandResult, RemoteError> {
        let secs = timeout.as_secs();
        self.session.set_timeout(duration_millis(timeout));

        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| map_ssh_error(e, secs))?;
        // Single stream: stderr is merged into stdout by the server channel.
        channel
            .handle_extended_data(ExtendedData::Merge)
            .map_err(|e| map_ssh_error(e, secs))?;
        channel.exec(command).map_err(|e| map_ssh_error(e, secs))?;

        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .map_err(|e| map_io_error(e, secs))?;

        channel.wait_close().map_err(|e| map_ssh_error(e, secs))?;
        let status = channel.exit_status().unwrap_or(-1);

        let result = CommandResult::new(status, output);
        debug!(command = %command, status = result.status, "Remote command finished");
        Ok(result)
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn verify_host_key(
    session: &Session,
    target: &RemoteTarget,
    known_hosts: &std::path::Path,
) -> Result<(), RemoteError> {
    let host_key_error = |reason: String| RemoteError::HostKey {
        host: target.host.clone(),
        reason,
    };

    let (key, _key_type) = session
        .host_key()
        .ok_or_else(|| host_key_error("server sent no host key".into()))?;

    let mut store = session
        .known_hosts()
        .map_err(|e| host_key_error(format!("cannot initialise known_hosts: {e}")))?;
    store
        .read_file(known_hosts, KnownHostFileKind::OpenSSH)
        .map_err(|e| host_key_error(format!("cannot read {}: {e}", known_hosts.display())))?;

    match store.check_port(&target.host, target.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(host_key_error("host key mismatch".into())),
        CheckResult::NotFound => Err(host_key_error(format!(
            "host not present in {}",
            known_hosts.display()
        ))),
        CheckResult::Failure => Err(host_key_error("host key check failed".into())),
    }
}

fn duration_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

fn map_ssh_error(err: ssh2::Error, timeout_secs: u64) -> RemoteError {
    map_io_error(err.into(), timeout_secs)
}

fn map_io_error(err: std::io::Error, timeout_secs: u64) -> RemoteError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            RemoteError::Timeout(timeout_secs)
        }
        _ => RemoteError::CommandExecution(err.to_string()),
    }
}

/// Production [`Connector`]: connect, then authenticate, over `ssh2`.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

impl Connector for SshConnector {
    fn open(&self, target: &RemoteTarget, secret: &str) -> Result<Box<dyn RemoteShell>, RemoteError> {
        let mut session = SshSession::connect(target, &self.options)?;
        session.authenticate(&target.user, secret)?;
        Ok(Box::new(session))
    }
}
