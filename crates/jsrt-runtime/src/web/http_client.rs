//! Event-loop-driven HTTP/1.1 client behind `fetch`.
//!
//! One request per connection (`connection: close`); the response is
//! accumulated until EOF and parsed in one pass. The driver is an explicit
//! state machine so failures carry the phase they happened in.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, lookup_host};

/// Everything needed to serialise and send one request.
#[derive(Debug, Clone)]
pub struct HttpRequestPlan {
    pub method: String,
    pub host: String,
    pub port: u16,
    /// True when `port` is the scheme default, which keeps it out of the
    /// `Host` header.
    pub port_is_default: bool,
    /// Path plus optional `?query`.
    pub path: String,
    /// Ordered request headers, names already lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// Parsed response, ready to be turned into a `Response` host object.
#[derive(Debug)]
pub struct HttpResponseData {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchState {
    Resolving,
    Connecting,
    Writing,
    Reading,
    Parsing,
    Settled,
}

/// Drive one request through every state. The error string is what the
/// rejected promise's `message` will carry.
pub async fn execute(plan: HttpRequestPlan) -> Result<HttpResponseData, String> {
    let mut state = FetchState::Resolving;
    tracing::debug!(host = %plan.host, port = plan.port, method = %plan.method, "fetch start");

    let address = lookup_host((plan.host.as_str(), plan.port))
        .await
        .map_err(|err| format!("DNS resolution failed: {err}"))?
        .next()
        .ok_or_else(|| "DNS resolution failed: no address found".to_string())?;

    state = FetchState::Connecting;
    tracing::trace!(state = ?state, %address);
    let mut stream = TcpStream::connect(address)
        .await
        .map_err(|err| format!("Connection failed: {err}"))?;

    state = FetchState::Writing;
    tracing::trace!(state = ?state);
    let request = build_request(&plan);
    stream
        .write_all(&request)
        .await
        .map_err(|err| format!("Write failed: {err}"))?;

    state = FetchState::Reading;
    tracing::trace!(state = ?state);
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|err| format!("Read failed: {err}"))?;
        if n == 0 {
            break;
        }
        reserve_for(&mut buffer, n);
        buffer.extend_from_slice(&chunk[..n]);
    }

    state = FetchState::Parsing;
    tracing::trace!(state = ?state, bytes = buffer.len());
    let response = parse_response(&buffer)?;

    state = FetchState::Settled;
    tracing::debug!(status = response.status, state = ?state, "fetch done");
    Ok(response)
}

/// Grow-on-demand accumulation: double the capacity, with a 1 KiB floor on
/// every increment.
fn reserve_for(buffer: &mut Vec<u8>, additional: usize) {
    let needed = buffer.len() + additional;
    if needed <= buffer.capacity() {
        return;
    }
    let target = needed
        .max(buffer.capacity() * 2)
        .max(buffer.capacity() + 1024);
    buffer.reserve_exact(target - buffer.len());
}

/// Request line, `Host`, caller headers, blank line, optional body.
fn build_request(plan: &HttpRequestPlan) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(format!("{} {} HTTP/1.1\r\n", plan.method, plan.path).as_bytes());
    if plan.port_is_default {
        out.extend_from_slice(format!("Host: {}\r\n", plan.host).as_bytes());
    } else {
        out.extend_from_slice(format!("Host: {}:{}\r\n", plan.host, plan.port).as_bytes());
    }
    for (name, value) in &plan.headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    if let Some(body) = &plan.body {
        out.extend_from_slice(body);
    }
    out
}

fn default_reason(status: u16) -> &'static str {
    match status {
        200..=299 => "OK",
        400..=499 => "Client Error",
        500..=599 => "Server Error",
        _ => "Unknown",
    }
}

fn find_header_end(data: &[u8]) -> Option<(usize, usize)> {
    let crlf = data.windows(4).position(|window| window == b"\r\n\r\n");
    let lf = data.windows(2).position(|window| window == b"\n\n");
    match (crlf, lf) {
        (Some(c), Some(l)) if l < c => Some((l, 2)),
        (Some(c), _) => Some((c, 4)),
        (None, Some(l)) => Some((l, 2)),
        (None, None) => None,
    }
}

/// Parse status line, header block, and body out of the accumulated bytes.
pub fn parse_response(data: &[u8]) -> Result<HttpResponseData, String> {
    if data.is_empty() {
        return Err("empty response".to_string());
    }
    let (header_end, separator_len) =
        find_header_end(data).ok_or_else(|| "malformed response: no header block".to_string())?;
    let head = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = head.split('\n').map(|line| line.trim_end_matches('\r'));

    let status_line = lines.next().unwrap_or_default();
    let (status, status_text) = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    for line in lines {
        let Some(colon) = line.find(':') else {
            continue;
        };
        let name = line[..colon].trim();
        let value = line[colon + 1..].trim_start_matches([' ', '\t']);
        if !name.is_empty() {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    Ok(HttpResponseData {
        status,
        status_text,
        headers,
        body: data[header_end + separator_len..].to_vec(),
    })
}

fn parse_status_line(line: &str) -> Result<(u16, String), String> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err("malformed response: bad status line".to_string());
    }
    let status: u16 = parts
        .next()
        .unwrap_or_default()
        .parse()
        .map_err(|_| "malformed response: bad status code".to_string())?;
    let reason = parts.next().unwrap_or_default().trim();
    let status_text = if reason.is_empty() {
        default_reason(status).to_string()
    } else {
        reason.to_string()
    };
    Ok((status, status_text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> HttpRequestPlan {
        HttpRequestPlan {
            method: "GET".to_string(),
            host: "example.com".to_string(),
            port: 80,
            port_is_default: true,
            path: "/index.html".to_string(),
            headers: vec![
                ("user-agent".to_string(), "jsrt/0.3.0".to_string()),
                ("connection".to_string(), "close".to_string()),
            ],
            body: None,
        }
    }

    #[test]
    fn request_elides_default_port_in_host() {
        let bytes = build_request(&plan());
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("GET /index.html HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn request_keeps_non_default_port_and_body() {
        let mut plan = plan();
        plan.port = 8080;
        plan.port_is_default = false;
        plan.method = "POST".to_string();
        plan.body = Some(b"hello".to_vec());
        let text = String::from_utf8(build_request(&plan)).unwrap();
        assert!(text.contains("Host: example.com:8080\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn response_parse_with_crlf() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nX-Trace: a\r\n\r\nhello";
        let response = parse_response(raw).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.status_text, "OK");
        assert_eq!(
            response.headers,
            vec![
                ("Content-Type".to_string(), "text/plain".to_string()),
                ("X-Trace".to_string(), "a".to_string()),
            ]
        );
        assert_eq!(response.body, b"hello");
    }

    #[test]
    fn response_parse_with_bare_lf() {
        let raw = b"HTTP/1.0 404 Not Found\nServer: t\n\nmissing";
        let response = parse_response(raw).unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.status_text, "Not Found");
        assert_eq!(response.body, b"missing");
    }

    #[test]
    fn missing_reason_defaults_by_status_class() {
        assert_eq!(parse_status_line("HTTP/1.1 204").unwrap().1, "OK");
        assert_eq!(parse_status_line("HTTP/1.1 404").unwrap().1, "Client Error");
        assert_eq!(parse_status_line("HTTP/1.1 503").unwrap().1, "Server Error");
        assert_eq!(parse_status_line("HTTP/1.1 302").unwrap().1, "Unknown");
    }

    #[test]
    fn garbage_status_line_is_an_error() {
        assert!(parse_response(b"FTP 200 OK\r\n\r\n").is_err());
        assert!(parse_response(b"HTTP/1.1 abc\r\n\r\n").is_err());
    }

    #[test]
    fn buffer_growth_doubles_with_floor() {
        let mut buffer: Vec<u8> = Vec::new();
        reserve_for(&mut buffer, 10);
        assert!(buffer.capacity() >= 1024);
        let first = buffer.capacity();
        buffer.resize(first, 0);
        reserve_for(&mut buffer, 1);
        assert!(buffer.capacity() >= first * 2);
    }
}
