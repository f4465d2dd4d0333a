use crate::error::AnalysisError;
use crate::session::SessionManager;
use crate::storage::ZoneDraft;
use crate::upload::validate_user_id;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 8192;
const DEFAULT_UPLOAD_NAME: &str = "video";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Largest request body accepted, in bytes.
    pub max_body_bytes: usize,
    pub read_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8799".to_string(),
            max_body_bytes: 512 * 1024 * 1024,
            read_timeout: Duration::from_secs(30),
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
    /// Stop accepting connections. Requests already being served finish on
    /// their own threads.
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
    sessions: Arc<SessionManager>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, sessions: Arc<SessionManager>) -> Self {
        Self { cfg, sessions }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid api address '{}'", self.cfg.addr))?;
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
        let cfg = self.cfg.clone();
        let sessions = self.sessions.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, sessions, shutdown_thread) {
                log::error!("analysis api stopped: {}", err);
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
    cfg: ApiConfig,
    sessions: Arc<SessionManager>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let cfg = cfg.clone();
                let sessions = sessions.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &cfg, &sessions) {
                        log::warn!("analysis api connection failed: {:#}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    sessions: &SessionManager,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        return write_response(&mut stream, &ApiResponse::error(403, "forbidden", "loopback only"));
    }

    let mut request = read_request_head(&mut stream, cfg.read_timeout)?;
    if let Some(length) = request.content_length()? {
        if length > cfg.max_body_bytes {
            let err = AnalysisError::PayloadTooLarge {
                size: length,
                limit: cfg.max_body_bytes,
            };
            log::warn!("{} {} rejected: {}", request.method, request.path, err);
            return write_response(&mut stream, &ApiResponse::from_error(&err));
        }
        read_body(&mut stream, &mut request.body, length)?;
    }

    let response = route(sessions, &request);
    write_response(&mut stream, &response)
}

/// Dispatch one parsed request. Socket-free so handlers can be exercised
/// directly.
pub(crate) fn route(sessions: &SessionManager, request: &HttpRequest) -> ApiResponse {
    let method = request.method.as_str();
    let path = request.path.as_str();

    if path == "/health" {
        return match method {
            "GET" => ApiResponse::json(
                200,
                &json!({"status": "ok", "model_ready": sessions.model_ready()}),
            ),
            _ => ApiResponse::method_not_allowed(),
        };
    }

    let zone_id = path.strip_prefix("/api/zones/").filter(|id| !id.is_empty());
    let known = matches!(
        path,
        "/api/zones"
            | "/api/upload_video"
            | "/api/analysis/start"
            | "/api/analysis/frame"
            | "/api/analysis/stop"
    ) || zone_id.is_some();
    if !known {
        return ApiResponse::error(404, "not_found", "no such route");
    }

    if request.has_query_token() {
        return ApiResponse::error(
            400,
            "token_query_param_not_allowed",
            "send the user token in the Authorization header",
        );
    }
    let user = match request.bearer_token() {
        Some(user) => user,
        None => return ApiResponse::error(401, "missing_token", "Authorization: Bearer required"),
    };
    if let Err(err) = validate_user_id(&user) {
        return ApiResponse::from_error(&err);
    }

    let result = match (method, path, zone_id) {
        ("GET", "/api/zones", _) => sessions
            .zones()
            .list_zones(&user)
            .map(|zones| ApiResponse::json(200, &zones)),
        ("POST", "/api/zones", _) => match serde_json::from_slice::<ZoneDraft>(&request.body) {
            Ok(draft) => sessions
                .zones()
                .create_zone(&user, draft)
                .map(|zone| ApiResponse::json(201, &zone)),
            Err(err) => Ok(ApiResponse::error(
                400,
                "invalid_json",
                &format!("zone body: {}", err),
            )),
        },
        ("DELETE", _, Some(zone_id)) => sessions
            .zones()
            .delete_zone(&user, zone_id)
            .map(|()| ApiResponse::json(200, &json!({"status": "deleted", "id": zone_id}))),
        ("POST", "/api/upload_video", _) => {
            let file_name = request
                .headers
                .get("x-filename")
                .map(String::as_str)
                .unwrap_or(DEFAULT_UPLOAD_NAME);
            sessions
                .upload(&user, file_name, &request.body)
                .map(|path| {
                    let stored = path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    ApiResponse::json(200, &json!({"status": "uploaded", "file": stored}))
                })
        }
        ("POST", "/api/analysis/start", _) => sessions
            .start(&user)
            .map(|total| ApiResponse::json(200, &json!({"status": "started", "total_frames": total}))),
        ("GET", "/api/analysis/frame", _) => sessions
            .step(&user)
            .map(|result| ApiResponse::json(200, &result)),
        ("POST", "/api/analysis/stop", _) => sessions
            .teardown(&user)
            .map(|()| ApiResponse::json(200, &json!({"status": "stopped"}))),
        _ => return ApiResponse::method_not_allowed(),
    };

    match result {
        Ok(response) => response,
        Err(err) => {
            if err.status_code() >= 500 {
                log::error!("{} {} failed: {}", method, path, err);
            } else {
                log::warn!("{} {} rejected: {}", method, path, err);
            }
            ApiResponse::from_error(&err)
        }
    }
}

#[derive(Debug)]
pub(crate) struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self { status, body },
            Err(err) => Self::error(500, "internal_error", &format!("serialize response: {}", err)),
        }
    }

    fn error(status: u16, code: &str, message: &str) -> Self {
        let body = json!({"error": code, "message": message}).to_string().into_bytes();
        Self { status, body }
    }

    fn from_error(err: &AnalysisError) -> Self {
        Self::error(err.status_code(), err.code(), &err.to_string())
    }

    fn method_not_allowed() -> Self {
        Self::error(405, "method_not_allowed", "method not allowed for this route")
    }
}

fn read_request_head(stream: &mut TcpStream, timeout: Duration) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(timeout))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request head"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request head too large"));
        }
    };
    let body = data.split_off(header_end + 4);
    let mut request = parse_head(&data[..header_end])?;
    request.body = body;
    Ok(request)
}

fn read_body(stream: &mut TcpStream, body: &mut Vec<u8>, length: usize) -> Result<()> {
    if body.len() > length {
        body.truncate(length);
        return Ok(());
    }
    let start = body.len();
    body.resize(length, 0);
    stream
        .read_exact(&mut body[start..])
        .context("request body shorter than Content-Length")?;
    Ok(())
}

fn parse_head(head: &[u8]) -> Result<HttpRequest> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split("\r\n");
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
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        raw_path: raw_path.to_string(),
        body: Vec::new(),
    })
}

fn write_response(stream: &mut TcpStream, response: &ApiResponse) -> Result<()> {
    let status_line = match response.status {
        200 => "HTTP/1.1 200 OK",
        201 => "HTTP/1.1 201 Created",
        400 => "HTTP/1.1 400 Bad Request",
        401 => "HTTP/1.1 401 Unauthorized",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        422 => "HTTP/1.1 422 Unprocessable Entity",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        len = response.body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(&response.body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug, Default)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub raw_path: String,
    pub body: Vec<u8>,
}

impl HttpRequest {
    fn content_length(&self) -> Result<Option<usize>> {
        self.headers
            .get("content-length")
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| anyhow!("invalid Content-Length '{}'", value))
            })
            .transpose()
    }

    fn bearer_token(&self) -> Option<String> {
        if let Some(value) = self.headers.get("authorization") {
            let parts: Vec<&str> = value.split_whitespace().collect();
            if parts.len() == 2 && parts[0].eq_ignore_ascii_case("bearer") {
                return Some(parts[1].to_string());
            }
        }
        None
    }

    fn has_query_token(&self) -> bool {
        if let Some(query) = self.raw_path.split('?').nth(1) {
            for pair in query.split('&') {
                if let Some((k, _)) = pair.split_once('=') {
                    if k == "token" {
                        return true;
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BlobBackend, ModelSlot};
    use crate::storage::InMemoryZoneStore;
    use crate::upload::UploadStore;

    fn sessions(dir: &std::path::Path) -> SessionManager {
        SessionManager::new(
            UploadStore::new(dir, 1 << 20),
            Arc::new(InMemoryZoneStore::new()),
            ModelSlot::ready(Arc::new(BlobBackend::new())),
        )
    }

    fn request(method: &str, path: &str, user: Option<&str>, body: &[u8]) -> HttpRequest {
        let mut headers = HashMap::new();
        if let Some(user) = user {
            headers.insert("authorization".to_string(), format!("Bearer {}", user));
        }
        HttpRequest {
            method: method.to_string(),
            path: path.split('?').next().unwrap_or(path).to_string(),
            headers,
            raw_path: path.to_string(),
            body: body.to_vec(),
        }
    }

    fn body(response: &ApiResponse) -> serde_json::Value {
        serde_json::from_slice(&response.body).expect("json body")
    }

    #[test]
    fn parses_request_head() {
        let head = b"POST /api/zones?x=1 HTTP/1.1\r\nAuthorization: Bearer alice\r\nContent-Length: 12";
        let request = parse_head(head).expect("parse");
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/api/zones");
        assert_eq!(request.bearer_token().as_deref(), Some("alice"));
        assert_eq!(request.content_length().expect("length"), Some(12));
    }

    #[test]
    fn routes_require_a_user() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sessions = sessions(dir.path());

        let health = route(&sessions, &request("GET", "/health", None, b""));
        assert_eq!(health.status, 200);
        assert_eq!(body(&health)["model_ready"], true);

        let missing = route(&sessions, &request("GET", "/api/zones", None, b""));
        assert_eq!(missing.status, 401);

        let bad_user = route(&sessions, &request("GET", "/api/zones", Some("../x"), b""));
        assert_eq!(bad_user.status, 401);
        assert_eq!(body(&bad_user)["error"], "invalid_user");

        let query = route(&sessions, &request("GET", "/api/zones?token=abc", Some("a"), b""));
        assert_eq!(query.status, 400);

        let unknown = route(&sessions, &request("GET", "/nope", Some("alice"), b""));
        assert_eq!(unknown.status, 404);

        let wrong_method = route(&sessions, &request("PUT", "/api/zones", Some("alice"), b""));
        assert_eq!(wrong_method.status, 405);
    }

    #[test]
    fn zone_crud_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sessions = sessions(dir.path());
        let draft = br#"{"name":"door","coordinates":[{"x":0,"y":0},{"x":10,"y":0},{"x":10,"y":10}]}"#;

        let created = route(&sessions, &request("POST", "/api/zones", Some("alice"), draft));
        assert_eq!(created.status, 201);
        let id = body(&created)["id"].as_str().expect("id").to_string();

        let listed = route(&sessions, &request("GET", "/api/zones", Some("alice"), b""));
        assert_eq!(body(&listed).as_array().map(Vec::len), Some(1));

        let path = format!("/api/zones/{}", id);
        let deleted = route(&sessions, &request("DELETE", &path, Some("alice"), b""));
        assert_eq!(deleted.status, 200);
        let again = route(&sessions, &request("DELETE", &path, Some("alice"), b""));
        assert_eq!(again.status, 404);

        let invalid = route(
            &sessions,
            &request("POST", "/api/zones", Some("alice"), br#"{"coordinates":[]}"#),
        );
        assert_eq!(invalid.status, 400);
        assert_eq!(body(&invalid)["error"], "invalid_zone");

        let garbage = route(&sessions, &request("POST", "/api/zones", Some("alice"), b"{"));
        assert_eq!(body(&garbage)["error"], "invalid_json");
    }

    #[test]
    fn analysis_errors_map_to_statuses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sessions = sessions(dir.path());

        let start = route(&sessions, &request("POST", "/api/analysis/start", Some("alice"), b""));
        assert_eq!(start.status, 400);
        assert_eq!(body(&start)["error"], "no_upload");

        let frame = route(&sessions, &request("GET", "/api/analysis/frame", Some("alice"), b""));
        assert_eq!(body(&frame)["error"], "no_active_session");

        let stop = route(&sessions, &request("POST", "/api/analysis/stop", Some("alice"), b""));
        assert_eq!(stop.status, 200);
    }
}
