//! Blocking HTTP helpers shared by the forge clients.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl From<ureq::Error> for HttpError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => {
                let mut body = response.into_string().unwrap_or_default();
                if body.len() > MAX_ERROR_BODY {
                    let mut cut = MAX_ERROR_BODY;
                    while !body.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    body.truncate(cut);
                    body.push_str("...");
                }
                Self::Status { status, body }
            }
            ureq::Error::Transport(transport) => Self::Transport(transport.to_string()),
        }
    }
}

/// Agent with the given per-request timeout and our user agent.
pub fn agent(timeout: Duration) -> ureq::Agent {
    ureq::builder()
        .timeout(timeout)
        .user_agent(concat!("hgmirror/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Decode a JSON response body.
pub fn decode<T: DeserializeOwned>(response: ureq::Response) -> Result<T, HttpError> {
    let body = response
        .into_string()
        .map_err(|e| HttpError::Decode(e.to_string()))?;
    serde_json::from_str(&body).map_err(|e| HttpError::Decode(e.to_string()))
}

/// Send `body` as JSON.
pub fn send_json<B: Serialize>(request: ureq::Request, body: &B) -> Result<ureq::Response, HttpError> {
    let payload = serde_json::to_string(body).map_err(|e| HttpError::Decode(e.to_string()))?;
    Ok(request
        .set("Content-Type", "application/json")
        .send_string(&payload)?)
}

/// Percent-encode one URL path segment (GitLab addresses groups as `a%2Fb`).
pub fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
