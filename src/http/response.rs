//! HTTP/1.1 response builder.
//!
//! Provides a fluent builder API for constructing HTTP responses and
//! serializing them to a byte buffer for transmission over TCP.
//!
//! Responses also derive `serde` so a cache store can persist them; only the
//! status, headers and body are serialized. The body is written as a base64
//! string.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use super::{Headers, StatusCode};
use crate::background::AfterResponse;

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use restash::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    #[serde(with = "base64_body")]
    body: Vec<u8>,
    #[serde(skip, default = "default_keep_alive")]
    keep_alive: bool,
    #[serde(skip)]
    after: AfterResponse,
}

fn default_keep_alive() -> bool {
    true
}

mod base64_body {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(body).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(&encoded)
            .map_err(|e| serde::de::Error::custom(format!("invalid base64 body: {e}")))
    }
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            keep_alive: true,
            after: AfterResponse::new(),
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place. Intended for middleware pipelines that receive
    /// a `Response` from downstream and need to decorate it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets a header in-place, replacing any existing values of that name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Sets the response body from a string.
    ///
    /// The `Content-Length` header is written automatically by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Serializes `value` as the JSON body and sets `Content-Type: application/json`.
    ///
    /// Falls back to a `500` response if `value` cannot be serialized.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status)
                .header("Content-Type", "application/json")
                .body_bytes(body),
            Err(e) => Self::new(StatusCode::INTERNAL_SERVER_ERROR)
                .body(format!("failed to encode response: {e}")),
        }
    }

    /// Controls whether the `Connection: keep-alive` or `Connection: close` header is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// In-place form of [`keep_alive`](Self::keep_alive).
    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response headers for in-place edits.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the body bytes.
    pub fn content(&self) -> &[u8] {
        &self.body
    }

    /// Returns the tasks queued to run after this response is sent.
    pub fn after_response(&self) -> &AfterResponse {
        &self.after
    }

    /// Returns the post-response task list for queuing more work.
    pub fn after_response_mut(&mut self) -> &mut AfterResponse {
        &mut self.after
    }

    /// Detaches the post-response task list, leaving an empty one behind.
    ///
    /// The caller becomes responsible for running it once the response has
    /// been written.
    pub fn take_after_response(&mut self) -> AfterResponse {
        std::mem::take(&mut self.after)
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if the body is non-empty and no
    ///   `Content-Type` header was set.
    /// - `Content-Length: <n>` (always written).
    /// - `Connection: keep-alive` or `Connection: close`.
    ///
    /// Post-response tasks still attached are dropped; take them first with
    /// [`take_after_response`](Self::take_after_response).
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.set("Connection", connection);

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Status line
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        // Content-Length is always the last header before the blank line
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());

        // Header/body separator
        buf.put(&b"\r\n"[..]);

        if !self.body.is_empty() {
            buf.put(self.body.as_slice());
        }

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let r = Response::new(StatusCode::OK).body("Hello");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn custom_header() {
        let r = Response::new(StatusCode::OK)
            .header("X-Request-Id", "abc-123")
            .body("ok");
        let s = to_string(r.into_bytes());
        assert!(s.contains("X-Request-Id: abc-123\r\n"));
    }

    #[test]
    fn no_body_no_content_type() {
        let r = Response::new(StatusCode::NO_CONTENT);
        let s = to_string(r.into_bytes());
        assert!(!s.contains("Content-Type"));
        assert!(s.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn connection_close() {
        let r = Response::new(StatusCode::OK).keep_alive(false);
        let s = to_string(r.into_bytes());
        assert!(s.contains("Connection: close\r\n"));
    }

    #[test]
    fn stale_content_length_is_not_duplicated() {
        let r = Response::new(StatusCode::OK)
            .header("Content-Length", "99")
            .body("abc");
        let s = to_string(r.into_bytes());
        assert_eq!(s.matches("Content-Length").count(), 1);
        assert!(s.contains("Content-Length: 3\r\n"));
    }

    #[test]
    fn json_round_trip_skips_tasks() {
        let mut r = Response::new(StatusCode::NOT_FOUND)
            .header("X-Api-Cache", "cached")
            .body("missing");
        r.after_response_mut().push(async {});

        let encoded = serde_json::to_vec(&r).unwrap();
        drop(r.take_after_response());
        let decoded: Response = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(decoded.status(), StatusCode::NOT_FOUND);
        assert_eq!(decoded.headers().get("x-api-cache"), Some("cached"));
        assert_eq!(decoded.content(), b"missing");
        assert!(decoded.after_response().is_empty());
    }

    #[test]
    fn stored_body_is_a_base64_string() {
        let r = Response::new(StatusCode::OK).body(r#"[{"id":1}]"#);
        let stored: serde_json::Value = serde_json::to_value(&r).unwrap();
        assert_eq!(stored["body"], "W3siaWQiOjF9XQ==");

        let bad = r#"{"status":200,"headers":[],"body":"not base64!"}"#;
        assert!(serde_json::from_str::<Response>(bad).is_err());
    }

    #[test]
    fn json_helper_sets_content_type() {
        let r = Response::json(StatusCode::OK, &serde_json::json!({"flushed": true}));
        assert_eq!(r.headers().get("content-type"), Some("application/json"));
        assert_eq!(r.content(), br#"{"flushed":true}"#);
    }
}
