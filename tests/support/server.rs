//! Minimal threaded HTTP/1.1 fixture server for end-to-end tests.
//!
//! Serves configured routes, understands `Range` and `If-Modified-Since`
//! well enough for the scenarios here, answers `HEAD`, and records every
//! request it sees. Connections are closed after each response.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// A configured response for one path.
#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    pub extra_headers: Vec<(String, String)>,
    /// Serve `Range` requests with 206 slices of `body`.
    pub ranges: bool,
    /// Respond 304 when the request carries `If-Modified-Since`.
    pub not_modified_on_ims: bool,
    /// Respond 500 for the first N requests, then normally.
    pub fail_first: usize,
    /// Demand an `Authorization` header, challenging with Basic otherwise.
    pub basic_auth: bool,
}

impl Route {
    pub fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            body: body.into(),
            extra_headers: Vec::new(),
            ranges: false,
            not_modified_on_ims: false,
            fail_first: 0,
            basic_auth: false,
        }
    }

    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, content_type, body)
    }

    pub fn html(body: &str) -> Self {
        Self::ok("text/html", body.as_bytes().to_vec())
    }

    pub fn not_found() -> Self {
        Self::new(404, "text/plain", b"not found".to_vec())
    }

    pub fn redirect(location: &str) -> Self {
        let mut route = Self::new(302, "text/plain", Vec::new());
        route.extra_headers.push(("Location".to_string(), location.to_string()));
        route
    }

    pub fn with_ranges(mut self) -> Self {
        self.ranges = true;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_not_modified_on_ims(mut self) -> Self {
        self.not_modified_on_ims = true;
        self
    }

    pub fn with_fail_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn with_basic_auth(mut self) -> Self {
        self.basic_auth = true;
        self
    }
}

/// One recorded request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

struct State {
    routes: Mutex<HashMap<String, Route>>,
    fail_counters: Mutex<HashMap<String, AtomicUsize>>,
    requests: Mutex<Vec<RecordedRequest>>,
    shutdown: AtomicBool,
}

/// The fixture server.
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<State>,
    accept_thread: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Binds to an ephemeral localhost port and starts accepting.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fixture server");
        let addr = listener.local_addr().expect("local addr");
        listener
            .set_nonblocking(false)
            .expect("blocking listener");
        let state = Arc::new(State {
            routes: Mutex::new(HashMap::new()),
            fail_counters: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        });

        let accept_state = Arc::clone(&state);
        let accept_thread = std::thread::spawn(move || {
            for stream in listener.incoming() {
                if accept_state.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { continue };
                let conn_state = Arc::clone(&accept_state);
                std::thread::spawn(move || handle_connection(&conn_state, stream));
            }
        });

        Self {
            addr,
            state,
            accept_thread: Some(accept_thread),
        }
    }

    pub fn route(&self, path: &str, route: Route) {
        self.state
            .routes
            .lock()
            .expect("routes lock")
            .insert(path.to_string(), route);
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().expect("requests lock").clone()
    }

    pub fn requests_for(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
        // Unblock the accept loop.
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

fn handle_connection(state: &Arc<State>, stream: TcpStream) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() || request_line.trim().is_empty() {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let target = parts.next().unwrap_or("/").to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    headers.insert(
                        name.trim().to_ascii_lowercase(),
                        value.trim().to_string(),
                    );
                }
            }
            Err(_) => return,
        }
    }

    let path = target.split('?').next().unwrap_or("/").to_string();
    state
        .requests
        .lock()
        .expect("requests lock")
        .push(RecordedRequest {
            method: method.clone(),
            path: path.clone(),
            headers: headers.clone(),
        });

    let route = state
        .routes
        .lock()
        .expect("routes lock")
        .get(&path)
        .cloned();
    let mut stream = reader.into_inner();
    let Some(route) = route else {
        respond(&mut stream, 404, "text/plain", &[], b"not found", &method);
        return;
    };

    // Scripted failures come first.
    if route.fail_first > 0 {
        let mut counters = state.fail_counters.lock().expect("counters lock");
        let counter = counters
            .entry(path.clone())
            .or_insert_with(|| AtomicUsize::new(0));
        let served = counter.fetch_add(1, Ordering::SeqCst);
        drop(counters);
        if served < route.fail_first {
            respond(&mut stream, 500, "text/plain", &[], b"boom", &method);
            return;
        }
    }

    if route.basic_auth && !headers.contains_key("authorization") {
        respond(
            &mut stream,
            401,
            "text/plain",
            &[(
                "WWW-Authenticate".to_string(),
                "Basic realm=\"fixture\"".to_string(),
            )],
            b"auth required",
            &method,
        );
        return;
    }

    if route.not_modified_on_ims && headers.contains_key("if-modified-since") {
        respond(&mut stream, 304, &route.content_type, &route.extra_headers, b"", &method);
        return;
    }

    if route.ranges {
        if let Some(range) = headers.get("range").and_then(|r| parse_range(r, route.body.len())) {
            let (start, end) = range;
            let slice = &route.body[start..=end];
            let mut extra = route.extra_headers.clone();
            extra.push((
                "Content-Range".to_string(),
                format!("bytes {start}-{end}/{}", route.body.len()),
            ));
            respond(&mut stream, 206, &route.content_type, &extra, slice, &method);
            return;
        }
        let mut extra = route.extra_headers.clone();
        extra.push(("Accept-Ranges".to_string(), "bytes".to_string()));
        respond(&mut stream, route.status, &route.content_type, &extra, &route.body, &method);
        return;
    }

    respond(
        &mut stream,
        route.status,
        &route.content_type,
        &route.extra_headers,
        &route.body,
        &method,
    );
}

fn parse_range(value: &str, total: usize) -> Option<(usize, usize)> {
    let spec = value.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: usize = start.trim().parse().ok()?;
    let end: usize = if end.trim().is_empty() {
        total.checked_sub(1)?
    } else {
        end.trim().parse().ok()?
    };
    if start > end || end >= total {
        return None;
    }
    Some((start, end))
}

fn respond(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    extra_headers: &[(String, String)],
    body: &[u8],
    method: &str,
) {
    let reason = match status {
        200 => "OK",
        206 => "Partial Content",
        302 => "Found",
        304 => "Not Modified",
        404 => "Not Found",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        _ => "Unknown",
    };
    let mut response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for (name, value) in extra_headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    let _ = stream.write_all(response.as_bytes());
    if method != "HEAD" && status != 304 {
        let _ = stream.write_all(body);
    }
    let _ = stream.flush();
    // Drain anything the client still has in flight before closing.
    let _ = stream.set_read_timeout(Some(Duration::from_millis(50)));
    let mut sink = [0u8; 512];
    let _ = stream.read(&mut sink);
}
