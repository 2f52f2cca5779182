use std::collections::HashMap;
use std::io::Read;

use crate::error::WebError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    fn parse(value: &str) -> Result<Self, WebError> {
        match value {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            other => Err(WebError::Parse(format!("unsupported method: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
}

/// Parse the request head from a stream. Bodies are not consumed; the
/// dashboard API is GET-only.
pub fn parse_request(stream: &mut impl Read) -> Result<HttpRequest, WebError> {
    const MAX_HEADER_BYTES: usize = 64 * 1024;
    const CHUNK_SIZE: usize = 1024;

    let mut bytes = Vec::new();
    let mut header_end = None;

    loop {
        let mut chunk = [0_u8; CHUNK_SIZE];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..read]);

        if bytes.len() > MAX_HEADER_BYTES {
            return Err(WebError::Parse("request headers too large".to_string()));
        }
        if let Some(pos) = bytes.windows(4).position(|w| w == b"\r\n\r\n") {
            header_end = Some(pos + 4);
            break;
        }
    }

    let header_end = header_end.ok_or_else(|| WebError::Parse("incomplete request".to_string()))?;
    let head = std::str::from_utf8(&bytes[..header_end])
        .map_err(|_| WebError::Parse("headers are not valid UTF-8".to_string()))?;

    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| WebError::Parse("missing request line".to_string()))?;

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| WebError::Parse("missing HTTP method".to_string()))?;
    let target = parts
        .next()
        .ok_or_else(|| WebError::Parse("missing request path".to_string()))?;
    let version = parts
        .next()
        .ok_or_else(|| WebError::Parse("missing HTTP version".to_string()))?;
    if !version.starts_with("HTTP/1.") {
        return Err(WebError::Parse(format!("unsupported HTTP version: {version}")));
    }

    let method = HttpMethod::parse(method)?;
    let (path, query) = split_target(target);

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| WebError::Parse(format!("malformed header: {line}")))?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    Ok(HttpRequest {
        method,
        path,
        query,
        headers,
    })
}

fn split_target(target: &str) -> (String, HashMap<String, String>) {
    let Some((path, raw_query)) = target.split_once('?') else {
        return (target.to_string(), HashMap::new());
    };

    let mut query = HashMap::new();
    for pair in raw_query.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((name, value)) => query.insert(name.to_string(), value.to_string()),
            None => query.insert(pair.to_string(), String::new()),
        };
    }
    (path.to_string(), query)
}
