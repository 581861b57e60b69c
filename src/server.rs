//! Loopback HTTP listener for the browser-extension handshake.
//!
//! Two paths are served, both answering `200` with a short plain-text body:
//! - `/hurdy` answers `gurdy` so the extension can tell the app is running
//! - `/install-module` takes a form body with `machine_name`, answers
//!   `bombarde`, and forwards an [`InstallRequest`] over the channel
//!
//! Anything else, including requests from non-loopback peers, gets an empty
//! body. Connections are handled one at a time on the listener thread.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::Sender;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::profile::PlatformKind;

pub const DEFAULT_LISTEN_PORT: u16 = 41295;

pub const PING_PATH: &str = "hurdy";
pub const PING_REPLY: &str = "gurdy";
pub const INSTALL_PATH: &str = "install-module";
pub const INSTALL_ACK: &str = "bombarde";

const MACHINE_NAME_FIELD: &str = "machine_name";
const MAX_BODY_BYTES: usize = 64 * 1024;
const MAX_HEADER_LINES: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectKind {
    Extension,
}

/// Ask the app to install an extension by machine name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallRequest {
    pub platform: PlatformKind,
    pub project: ProjectKind,
    pub machine_name: String,
}

/// The parts of an HTTP request the handler looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Path without query string
    pub path: String,
    pub body: String,
}

/// What to answer and what to forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub body: &'static str,
    pub event: Option<InstallRequest>,
}

impl Dispatch {
    fn empty() -> Self {
        Self { body: "", event: None }
    }
}

/// Route one request. Pure: no I/O.
pub fn dispatch(peer: IpAddr, request: &HttpRequest) -> Dispatch {
    if request.path.chars().count() < 2 {
        return Dispatch::empty();
    }
    if !peer.to_canonical().is_loopback() {
        debug!(peer = %peer, "Ignoring non-loopback request");
        return Dispatch::empty();
    }

    let path = request.path.replace('/', "");
    match path.as_str() {
        PING_PATH => Dispatch {
            body: PING_REPLY,
            event: None,
        },
        INSTALL_PATH => match form_value(&request.body, MACHINE_NAME_FIELD) {
            Some(machine_name) => {
                info!(machine_name = %machine_name, "Received install request");
                Dispatch {
                    body: INSTALL_ACK,
                    event: Some(InstallRequest {
                        platform: PlatformKind::Drupal,
                        project: ProjectKind::Extension,
                        machine_name,
                    }),
                }
            }
            None => {
                debug!("Install request without a usable machine name");
                Dispatch::empty()
            }
        },
        _ => Dispatch::empty(),
    }
}

/// First value of `field` longer than one character in a form-urlencoded body.
fn form_value(body: &str, field: &str) -> Option<String> {
    body.split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(name, _)| decode_component(name) == field)
        .map(|(_, value)| decode_component(value))
        .find(|value| value.chars().count() > 1)
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// Read the request line, headers, and a `Content-Length` body.
pub fn read_request<R: Read>(reader: R) -> io::Result<HttpRequest> {
    let mut reader = BufReader::new(reader);

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default();
    let path = target.split(['?', '#']).next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    for _ in 0..MAX_HEADER_LINES {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }

    let mut body = vec![0u8; content_length.min(MAX_BODY_BYTES)];
    reader.read_exact(&mut body)?;

    Ok(HttpRequest {
        method,
        path,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn write_response<W: Write>(mut writer: W, body: &str) -> io::Result<()> {
    write!(
        writer,
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )?;
    writer.flush()
}

/// Accept loop bound to a local address.
pub struct LoopbackServer {
    listener: TcpListener,
    events: Sender<InstallRequest>,
    shutdown: Arc<AtomicBool>,
}

impl LoopbackServer {
    pub fn bind(addr: SocketAddr, events: Sender<InstallRequest>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            events,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Flag that stops [`run`](Self::run) when set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn run(&self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "Loopback listener started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested, stopping listener");
                break;
            }

            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.handle_connection(stream, peer) {
                        debug!(peer = %peer, error = %e, "Connection error");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }

        info!("Loopback listener stopped");
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
        stream.set_write_timeout(Some(REQUEST_TIMEOUT))?;

        let request = read_request(&stream)?;
        debug!(peer = %peer, method = %request.method, path = %request.path, "Request");

        let outcome = dispatch(peer.ip(), &request);
        write_response(&stream, outcome.body)?;

        if let Some(event) = outcome.event
            && self.events.send(event).is_err()
        {
            warn!("Install request dropped: no receiver");
        }
        Ok(())
    }
}
