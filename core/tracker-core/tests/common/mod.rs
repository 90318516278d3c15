//! Minimal HTTP/1.1 backend for driving the real delivery stack in tests.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use activity_tracker_protocol::Endpoint;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub cookie: Option<String>,
    pub body: Value,
}

#[derive(Default)]
struct State {
    requests: Vec<Recorded>,
    statuses: HashMap<String, u16>,
    next_id: i64,
}

pub struct FakeBackend {
    addr: String,
    state: Arc<Mutex<State>>,
    shutdown: Arc<AtomicBool>,
}

impl FakeBackend {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind fake backend");
        listener
            .set_nonblocking(true)
            .expect("Failed to set nonblocking");
        let addr = listener.local_addr().expect("Missing local addr").to_string();
        let state = Arc::new(Mutex::new(State::default()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_state = Arc::clone(&state);
        let thread_shutdown = Arc::clone(&shutdown);
        thread::spawn(move || {
            while !thread_shutdown.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let state = Arc::clone(&thread_state);
                        thread::spawn(move || handle(stream, state));
                    }
                    Err(_) => thread::sleep(Duration::from_millis(5)),
                }
            }
        });

        Self {
            addr,
            state,
            shutdown,
        }
    }

    /// Base URL that mirrors the production mount point.
    pub fn base_url(&self) -> String {
        format!("http://{}/api/analytics/", self.addr)
    }

    /// Answers every request whose path ends with `suffix` with `status`.
    pub fn respond_with(&self, suffix: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(suffix.to_string(), status);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn handle(stream: TcpStream, state: Arc<Mutex<State>>) {
    stream.set_nonblocking(false).ok();
    let mut reader = BufReader::new(stream.try_clone().expect("Failed to clone stream"));

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    let mut cookie = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                "cookie" => cookie = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).ok();
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let (status, payload) = {
        let mut state = state.lock().unwrap();
        state.requests.push(Recorded {
            method: method.clone(),
            path: path.clone(),
            cookie,
            body,
        });
        let status = state
            .statuses
            .iter()
            .find(|(suffix, _)| path.ends_with(suffix.as_str()))
            .map(|(_, status)| *status)
            .unwrap_or(200);
        state.next_id += 1;
        let payload = match (status, Endpoint::from_path(&path)) {
            (200, Some(Endpoint::SessionStart)) => json!({"session_id": state.next_id}),
            (200, Some(Endpoint::PageViewStart)) => json!({"page_view_id": state.next_id}),
            (200, Some(Endpoint::Me)) => json!({"id": 1, "username": "tester"}),
            (200, _) => json!({"ok": true}),
            _ => json!({"detail": "error"}),
        };
        (status, payload)
    };

    let body = payload.to_string();
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        body.len(),
        body
    );
    let mut stream = reader.into_inner();
    stream.write_all(response.as_bytes()).ok();
    stream.flush().ok();
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
