//! Static file server for the blob store.
//!
//! A minimal blocking HTTP server rooted at the storage directory. It runs
//! as its own process (the `serve` subcommand) next to the pipeline; the
//! two share only the filesystem. A file read mid-write may legitimately
//! come back empty or short; consumers refetch or ignore on empty.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::ForagerError;

pub struct StaticServer {
    root: PathBuf,
    listener: TcpListener,
}

impl StaticServer {
    /// Bind to the given port, serving files under `root`.
    pub fn bind(root: &Path, port: u16) -> Result<Self, ForagerError> {
        std::fs::create_dir_all(root)?;
        let root = std::fs::canonicalize(root)?;
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        info!(root = %root.display(), port = listener.local_addr()?.port(), "Static blob server bound");
        Ok(StaticServer { root, listener })
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Serve until `shutdown` flips true. Connections are handled one at a
    /// time; blob files are small text payloads.
    pub fn run(&self, shutdown: Arc<AtomicBool>) -> Result<(), ForagerError> {
        self.listener.set_nonblocking(true)?;
        loop {
            if shutdown.load(Ordering::Acquire) {
                info!("Static blob server stopped");
                return Ok(());
            }
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    let _ = stream.set_nonblocking(false);
                    if let Err(e) = handle_request(stream, &self.root) {
                        debug!(error = %e, "Request handling failed");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }
}

fn handle_request(mut stream: TcpStream, root: &Path) -> std::io::Result<()> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > 16 * 1024 {
            return respond(&mut stream, 431, "Request Header Fields Too Large", b"");
        }
    }

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut request = httparse::Request::new(&mut headers);
    if request.parse(&buf).is_err() {
        return respond(&mut stream, 400, "Bad Request", b"");
    }

    let method = request.method.unwrap_or("");
    let target = request.path.unwrap_or("/");
    if method != "GET" && method != "HEAD" {
        return respond(&mut stream, 405, "Method Not Allowed", b"");
    }

    let relative = target.split('?').next().unwrap_or("/").trim_start_matches('/');
    match resolve(root, relative) {
        Some(path) => {
            let body = std::fs::read(&path).unwrap_or_default();
            if method == "HEAD" {
                respond(&mut stream, 200, "OK", b"")
            } else {
                respond(&mut stream, 200, "OK", &body)
            }
        }
        None => respond(&mut stream, 404, "Not Found", b"not found"),
    }
}

/// Resolve a request path under the root, refusing anything that escapes
/// it (dot segments, symlinks out of the tree, absolute components).
fn resolve(root: &Path, relative: &str) -> Option<PathBuf> {
    if relative.is_empty() || relative.split('/').any(|seg| seg == ".." || seg.is_empty()) {
        return None;
    }
    let candidate = root.join(relative);
    let resolved = std::fs::canonicalize(&candidate).ok()?;
    if !resolved.starts_with(root) || !resolved.is_file() {
        return None;
    }
    Some(resolved)
}

fn respond(stream: &mut TcpStream, status: u16, reason: &str, body: &[u8]) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        body.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(body)
}
