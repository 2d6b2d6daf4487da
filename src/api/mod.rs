//! HTTP control surface.
//!
//! A small hand-rolled HTTP/1.1 server over `std::net::TcpListener`.
//! The accept loop is non-blocking with a shutdown flag; each connection is
//! served on its own thread so a long-lived event stream never stalls
//! other requests.
//!
//! Routes:
//! - `GET  /health`
//! - `POST /sessions`                       start a monitoring session
//! - `GET  /sessions`                       list sessions
//! - `GET  /sessions/{id}`                  one session
//! - `GET  /sessions/{id}/violations`       stored alerts for a session
//! - `POST /sessions/{id}/pause|resume|stop`
//! - `GET  /sessions/{id}/events`           newline-delimited JSON stream
//!
//! The event stream registers the connection as a broadcast observer; a
//! failed write drops the observer, so a vanished client cleans itself up
//! on the next delivery attempt.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::monitor::manager::{MonitorManager, StartRequest};

const MAX_REQUEST_BYTES: usize = 65536;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8750".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    manager: Arc<MonitorManager>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, manager: Arc<MonitorManager>) -> Self {
        Self { cfg, manager }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let manager = self.manager;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, manager, shutdown_thread) {
                log::error!("monitoring api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    manager: Arc<MonitorManager>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &manager) {
                        log::warn!("monitoring api request rejected: {}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CreateSessionBody {
    source_path: String,
    #[serde(default)]
    analysis_interval_seconds: Option<f64>,
    #[serde(default)]
    auto_ticket: bool,
}

fn handle_connection(mut stream: TcpStream, manager: &Arc<MonitorManager>) -> Result<()> {
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    let segments: Vec<&str> = request
        .path
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["health"]) => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("POST", ["sessions"]) => {
            let body: CreateSessionBody = match serde_json::from_slice(&request.body) {
                Ok(body) => body,
                Err(err) => {
                    write_error(&mut stream, 400, &format!("invalid request body: {err}"))?;
                    return Ok(());
                }
            };
            match manager.start(StartRequest {
                source_path: body.source_path,
                analysis_interval_s: body.analysis_interval_seconds,
                auto_ticket: body.auto_ticket,
            }) {
                Ok(session) => {
                    let payload = serde_json::to_vec(&session)?;
                    write_response(&mut stream, 201, "application/json", &payload)
                }
                Err(err) => write_error(&mut stream, 400, &format!("{err:#}")),
            }
        }
        ("GET", ["sessions"]) => {
            let sessions = manager.sessions()?;
            let payload = serde_json::to_vec(&sessions)?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        ("GET", ["sessions", id]) => match manager.session(id)? {
            Some(session) => {
                let payload = serde_json::to_vec(&session)?;
                write_response(&mut stream, 200, "application/json", &payload)
            }
            None => write_error(&mut stream, 404, "session not found"),
        },
        ("GET", ["sessions", id, "violations"]) => {
            if manager.session(id)?.is_none() {
                write_error(&mut stream, 404, "session not found")?;
                return Ok(());
            }
            let violations = manager.violations(id)?;
            let payload = serde_json::to_vec(&violations)?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        ("POST", ["sessions", id, "pause"]) => {
            respond_control(&mut stream, manager.pause(id), id, "paused")
        }
        ("POST", ["sessions", id, "resume"]) => {
            respond_control(&mut stream, manager.resume(id), id, "resumed")
        }
        ("POST", ["sessions", id, "stop"]) => {
            respond_control(&mut stream, manager.stop(id), id, "stopping")
        }
        ("GET", ["sessions", id, "events"]) => serve_event_stream(stream, manager, id),
        (_, ["health" | "sessions", ..]) => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn respond_control(
    stream: &mut TcpStream,
    outcome: Result<()>,
    session_id: &str,
    verb: &str,
) -> Result<()> {
    match outcome {
        Ok(()) => {
            let payload = format!(r#"{{"session_id":"{session_id}","status":"{verb}"}}"#);
            write_json_response(stream, 200, &payload)
        }
        Err(_) => write_error(stream, 404, "session not active"),
    }
}

/// Hand the connection to the broadcast registry as an NDJSON observer.
///
/// The stream stays open inside the observer sink until a write fails,
/// which unsubscribes it. Observers of a finished session keep their
/// connection; the terminal message has already told them everything.
fn serve_event_stream(
    mut stream: TcpStream,
    manager: &Arc<MonitorManager>,
    session_id: &str,
) -> Result<()> {
    if manager.session(session_id)?.is_none() {
        write_error(&mut stream, 404, "session not found")?;
        return Ok(());
    }

    stream.set_read_timeout(None)?;
    let header =
        "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n";
    stream.write_all(header.as_bytes())?;
    stream.flush()?;

    let sink_stream = Mutex::new(stream);
    manager.registry().subscribe(
        session_id,
        Box::new(move |message| {
            let mut stream = sink_stream
                .lock()
                .map_err(|_| anyhow!("event stream lock poisoned"))?;
            let mut line = serde_json::to_vec(message)?;
            line.push(b'\n');
            stream.write_all(&line)?;
            stream.flush()?;
            Ok(())
        }),
    );
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break data
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .ok_or_else(|| anyhow!("connection closed mid-request"))?;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };
    let body_start = header_end + 4;

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .map(|v| v.parse())
        .transpose()
        .map_err(|_| anyhow!("invalid content-length"))?
        .unwrap_or(0);
    if body_start + content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request too large"));
    }
    let mut body = data[body_start.min(data.len())..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed mid-body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_error(stream: &mut TcpStream, status: u16, message: &str) -> Result<()> {
    let payload = serde_json::to_string(&serde_json::json!({ "error": message }))?;
    write_json_response(stream, status, &payload)
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        201 => "HTTP/1.1 201 Created",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}
