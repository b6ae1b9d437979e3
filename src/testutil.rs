//! Loopback HTTP stub for forge-client and collector tests.
//!
//! Binds an ephemeral port, serves canned responses keyed by path (query
//! string included), and records every request line + headers it saw.
//! Responses for a path are consumed in order; the last one repeats.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

/// One canned HTTP response.
#[derive(Clone)]
pub struct StubResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StubResponse {
    pub fn json(body: &str) -> Self {
        StubResponse {
            status: 200,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.to_string(),
        }
    }

    pub fn text(body: &str) -> Self {
        StubResponse {
            status: 200,
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: body.to_string(),
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        StubResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

type RouteMap = HashMap<String, Vec<StubResponse>>;

/// A one-thread HTTP server with canned routes.
pub struct StubServer {
    addr: String,
    routes: Arc<Mutex<RouteMap>>,
    /// Raw request headers seen, one `Vec<String>` per request.
    pub requests: Arc<Mutex<Vec<Vec<String>>>>,
}

impl StubServer {
    /// Start serving on an ephemeral localhost port.
    pub fn start(routes: Vec<(&str, Vec<StubResponse>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub server");
        let addr = format!("http://{}", listener.local_addr().unwrap());
        let route_map: Arc<Mutex<RouteMap>> = Arc::new(Mutex::new(
            routes
                .into_iter()
                .map(|(path, responses)| (path.to_string(), responses))
                .collect(),
        ));
        let requests: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));

        let thread_routes = Arc::clone(&route_map);
        let thread_requests = Arc::clone(&requests);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                handle_connection(stream, &thread_routes, &thread_requests);
            }
        });

        StubServer {
            addr,
            routes: route_map,
            requests,
        }
    }

    /// Base URL of the stub (`http://127.0.0.1:<port>`).
    pub fn url(&self) -> &str {
        &self.addr
    }

    /// Register more responses after startup.
    pub fn add_route(&self, path: &str, responses: Vec<StubResponse>) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), responses);
    }

    /// Total requests handled so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// True if any observed request carried the given header line
    /// (case-insensitive `name: value` match).
    pub fn saw_header(&self, name: &str, value: &str) -> bool {
        let needle = format!("{}: {}", name, value).to_lowercase();
        self.requests
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .any(|line| line.to_lowercase() == needle)
    }
}

fn handle_connection(
    mut stream: TcpStream,
    routes: &Arc<Mutex<RouteMap>>,
    requests: &Arc<Mutex<Vec<Vec<String>>>>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    // Read the full head, then drain any Content-Length body so the client
    // finishes writing before we respond and close.
    let header_end = loop {
        match stream.read(&mut chunk) {
            Ok(0) => break buf.len(),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            }
            Err(_) => return,
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|l| {
            let lower = l.to_lowercase();
            lower.strip_prefix("content-length:").map(|v| v.trim().to_string())
        })
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(_) => return,
        }
    }

    let text = head;
    let mut lines = text.lines();
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers: Vec<String> = lines
        .take_while(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    // Request target: "GET /path?query HTTP/1.1"
    let target = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();

    requests.lock().unwrap().push(
        std::iter::once(request_line)
            .chain(headers)
            .collect::<Vec<_>>(),
    );

    let response = {
        let mut map = routes.lock().unwrap();
        match map.get_mut(&target) {
            Some(queue) if queue.len() > 1 => Some(queue.remove(0)),
            Some(queue) => queue.first().cloned(),
            None => None,
        }
    };

    let response =
        response.unwrap_or_else(|| StubResponse::status(404, &format!("no stub for {}", target)));

    let mut out = format!(
        "HTTP/1.1 {} Stub\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        response.body.len()
    );
    for (name, value) in &response.headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str("\r\n");
    out.push_str(&response.body);
    let _ = stream.write_all(out.as_bytes());
}
