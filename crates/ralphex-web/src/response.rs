use std::collections::HashMap;
use std::io::Write;

use serde::Serialize;

use crate::error::WebError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

fn with_body(status: u16, content_type: &str, body: String) -> HttpResponse {
    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), content_type.to_string());
    headers.insert("Connection".to_string(), "close".to_string());
    headers.insert("Content-Length".to_string(), body.len().to_string());
    HttpResponse {
        status_code: status,
        status_text: status_text(status).to_string(),
        headers,
        body,
    }
}

pub fn json_response(status: u16, body: &impl Serialize) -> HttpResponse {
    let serialized = serde_json::to_string(body)
        .unwrap_or_else(|_| "{\"error\":\"failed to serialize response\"}".to_string());
    with_body(status, "application/json", serialized)
}

pub fn html_response(body: &str) -> HttpResponse {
    with_body(200, "text/html; charset=utf-8", body.to_string())
}

pub fn error_response(status: u16, message: &str) -> HttpResponse {
    json_response(status, &serde_json::json!({ "error": message }))
}

pub fn write_response(stream: &mut impl Write, response: &HttpResponse) -> Result<(), WebError> {
    let mut output = String::new();
    output.push_str(&format!(
        "HTTP/1.1 {} {}\r\n",
        response.status_code, response.status_text
    ));
    for (name, value) in &response.headers {
        output.push_str(&format!("{name}: {value}\r\n"));
    }
    output.push_str("\r\n");
    output.push_str(&response.body);

    stream.write_all(output.as_bytes())?;
    stream.flush()?;
    Ok(())
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "OK",
    }
}
