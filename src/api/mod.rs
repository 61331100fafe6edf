//! HTTP plumbing shared by the gateway and inference servers.
//!
//! Both services speak a deliberately small HTTP/1.1 subset: one request per
//! connection, `Content-Length` bodies only, JSON envelopes for structured
//! responses. Each accepted connection is handled on its own thread; in-
//! flight requests run to completion when the server stops.

mod gateway;
mod inference;

pub use gateway::GatewayServer;
pub use inference::InferenceServer;

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::json;

use crate::MAX_UPLOAD_BYTES;

const MAX_HEADER_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub raw_path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or("")
    }

    /// Percent-decoded value of a query parameter, if present.
    pub fn query_param(&self, key: &str) -> Option<String> {
        let query = self.raw_path.split('?').nth(1)?;
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            if k == key {
                return Some(urlencoding::decode(v).map(|s| s.into_owned()).unwrap_or_else(|_| v.to_string()));
            }
        }
        None
    }
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            body: body.to_string().into_bytes(),
        }
    }

    /// Structured error envelope: `{status:"error", message, data:null}`.
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(
            status,
            json!({"status": "error", "message": message, "data": null}),
        )
    }

    /// Success envelope: `{status:"success", message, data}`.
    pub fn success(message: &str, data: serde_json::Value) -> Self {
        Self::json(
            200,
            json!({"status": "success", "message": message, "data": data}),
        )
    }

    pub fn bytes(content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: content_type.to_string(),
            body,
        }
    }
}

#[derive(Debug)]
enum RequestError {
    TooLarge,
    Malformed(String),
    Io(std::io::Error),
}

/// Handle to a spawned API server. Dropping does not stop the server; call
/// [`ApiHandle::stop`].
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

pub(crate) type Handler = Arc<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// Bind `addr` and serve `handler` until the handle is stopped.
///
/// Accepts on a nonblocking listener; each connection gets its own thread so
/// a slow inference call never blocks history reads.
pub(crate) fn spawn_server(name: &'static str, addr: &str, handler: Handler) -> Result<ApiHandle> {
    let configured_addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(configured_addr)?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_thread = shutdown.clone();
    let join = std::thread::spawn(move || {
        run_server(name, listener, handler, shutdown_thread);
    });

    Ok(ApiHandle {
        addr,
        shutdown,
        join: Some(join),
    })
}

fn run_server(
    name: &'static str,
    listener: TcpListener,
    handler: Handler,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let handler = handler.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &handler) {
                        log::warn!("{name} request failed: {err}");
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                log::error!("{name} accept failed: {err}");
                break;
            }
        }
    }
}

fn handle_connection(mut stream: TcpStream, handler: &Handler) -> Result<()> {
    let response = match read_request(&mut stream) {
        Ok(request) => handler(&request),
        Err(RequestError::TooLarge) => HttpResponse::error(413, "Upload too large"),
        Err(RequestError::Malformed(detail)) => {
            HttpResponse::error(400, &format!("Malformed request: {detail}"))
        }
        Err(RequestError::Io(err)) => return Err(err.into()),
    };
    write_response(&mut stream, &response)?;
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest, RequestError> {
    stream
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(RequestError::Io)?;

    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = find_header_end(&data) {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::Malformed("header section too large".into()));
        }
        let n = stream.read(&mut buf).map_err(RequestError::Io)?;
        if n == 0 {
            return Err(RequestError::Malformed("connection closed mid-header".into()));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let header_text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = header_text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::Malformed("empty request".into()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing method".into()))?
        .to_string();
    let raw_path = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing path".into()))?
        .to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .map(|value| {
            value
                .parse()
                .map_err(|_| RequestError::Malformed("bad content-length".into()))
        })
        .transpose()?
        .unwrap_or(0);
    if content_length > MAX_UPLOAD_BYTES {
        return Err(RequestError::TooLarge);
    }

    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf).map_err(RequestError::Io)?;
        if n == 0 {
            return Err(RequestError::Malformed("connection closed mid-body".into()));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path
        .split('?')
        .next()
        .unwrap_or(&raw_path)
        .to_string();
    Ok(HttpRequest {
        method,
        path,
        raw_path,
        headers,
        body,
    })
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn write_response(stream: &mut TcpStream, response: &HttpResponse) -> Result<()> {
    let status_line = match response.status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        415 => "HTTP/1.1 415 Unsupported Media Type",
        502 => "HTTP/1.1 502 Bad Gateway",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = response.content_type,
        len = response.body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(&response.body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_are_percent_decoded() {
        let request = HttpRequest {
            method: "GET".into(),
            path: "/api/v1/history".into(),
            raw_path: "/api/v1/history?date_from=2026-08-07T00%3A00%3A00Z&limit=5".into(),
            headers: HashMap::new(),
            body: vec![],
        };
        assert_eq!(
            request.query_param("date_from").as_deref(),
            Some("2026-08-07T00:00:00Z")
        );
        assert_eq!(request.query_param("limit").as_deref(), Some("5"));
        assert!(request.query_param("skip").is_none());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "image/png".to_string());
        let request = HttpRequest {
            method: "POST".into(),
            path: "/api/v1/detect".into(),
            raw_path: "/api/v1/detect".into(),
            headers,
            body: vec![1, 2, 3],
        };
        assert_eq!(request.header("Content-Type"), Some("image/png"));
        assert_eq!(request.content_type(), "image/png");
    }

    #[test]
    fn error_envelope_shape() {
        let response = HttpResponse::error(503, "inference service unavailable");
        let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["data"], serde_json::Value::Null);
        assert_eq!(response.status, 503);
    }
}
