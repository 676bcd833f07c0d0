// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! JSON-RPC 2.0 messages and Content-Length framing.
//!
//! The LSP transport prefixes every JSON body with MIME-style headers,
//! of which only `Content-Length` matters. [`decode`] lifts one complete
//! frame at a time off the receive buffer; malformed headers are a hard
//! error rather than something to wait out, since the stream cannot
//! recover once framing is lost.

use anyhow::{Context, Result, bail};
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

/// Protocol version stamped on every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error code: the method does not exist on the receiver.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC error code: internal server error.
pub const INTERNAL_ERROR: i64 = -32603;

/// Error code servers use for a cancelled request.
pub const REQUEST_CANCELLED: i64 = -32800;

/// Blank line separating the frame headers from the JSON body.
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Correlation id tying a reply back to its request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric form, what this client sends.
    Number(i64),
    /// String form, which some servers use for their own requests.
    String(String),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// A call that expects a reply, correlated through its id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RequestMessage {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Correlation id echoed by the reply.
    pub id: RequestId,
    /// LSP method, e.g. `textDocument/documentSymbol`.
    pub method: String,
    /// Method parameters; `null` when absent.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl RequestMessage {
    /// Builds a request with the protocol version filled in.
    #[must_use]
    pub fn new(id: RequestId, method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// A reply carrying either a result or an error, never both.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseMessage {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Id of the request being answered; absent on protocol-level errors.
    pub id: Option<RequestId>,
    /// Payload of a successful call. A JSON `null` deserialises to `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure description of an unsuccessful call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl ResponseMessage {
    /// A successful reply to a server-initiated request.
    #[must_use]
    pub fn result(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// A failed reply to a server-initiated request.
    #[must_use]
    pub fn error(id: RequestId, code: i64, message: String) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: None,
            error: Some(ResponseError {
                code,
                message,
                data: None,
            }),
        }
    }
}

/// A call with no reply expected.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationMessage {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// LSP method, e.g. `textDocument/didOpen`.
    pub method: String,
    /// Method parameters; `null` when absent.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl NotificationMessage {
    /// Builds a notification with the protocol version filled in.
    #[must_use]
    pub fn new(method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// Error object of a failed response.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseError {
    /// Well-known JSON-RPC code, e.g. [`METHOD_NOT_FOUND`].
    pub code: i64,
    /// Human-readable description.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Serialises a message behind its Content-Length header.
///
/// # Errors
///
/// Returns an error if the message cannot be serialised to JSON.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message).context("LSP message does not serialise")?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Takes one complete frame off the front of `buffer` and returns its
/// JSON body.
///
/// Returns `None` while more bytes are needed; nothing is consumed until
/// the headers and the full body have arrived.
///
/// # Errors
///
/// Returns an error when the headers are complete but unusable: not
/// UTF-8, no `Content-Length`, or an unparseable length value. A body
/// that is not valid UTF-8 is also an error.
pub fn decode(buffer: &mut BytesMut) -> Result<Option<String>> {
    let Some(header_end) = buffer
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
    else {
        return Ok(None);
    };

    let headers =
        std::str::from_utf8(&buffer[..header_end]).context("frame headers are not UTF-8")?;
    let length = content_length(headers)?;

    let body_start = header_end + HEADER_TERMINATOR.len();
    if buffer.len() < body_start + length {
        return Ok(None);
    }

    buffer.advance(body_start);
    let body = buffer.split_to(length);
    let body = String::from_utf8(body.to_vec()).context("frame body is not UTF-8")?;
    Ok(Some(body))
}

/// Extracts the Content-Length value from a complete header block.
fn content_length(headers: &str) -> Result<usize> {
    let Some((_, value)) = headers
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
    else {
        bail!("frame headers carry no Content-Length: {headers:?}");
    };
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid Content-Length value: {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn framed(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{body}", body.len()).into_bytes()
    }

    #[test]
    fn test_decode_waits_for_more_bytes() -> Result<()> {
        let frame = framed(r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#);
        let mut buffer = BytesMut::new();

        // Feed the frame in three slices: half the headers, the rest of
        // the headers plus part of the body, then the remainder.
        buffer.extend_from_slice(&frame[..10]);
        assert_eq!(decode(&mut buffer)?, None);

        buffer.extend_from_slice(&frame[10..30]);
        assert_eq!(decode(&mut buffer)?, None);

        buffer.extend_from_slice(&frame[30..]);
        let body = decode(&mut buffer)?;
        assert!(body.is_some_and(|b| b.contains("initialized")));
        assert!(buffer.is_empty());
        Ok(())
    }

    #[test]
    fn test_decode_drains_back_to_back_frames() -> Result<()> {
        let open = r#"{"jsonrpc":"2.0","method":"textDocument/didOpen","params":{}}"#;
        let reply = r#"{"jsonrpc":"2.0","id":3,"result":[]}"#;

        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&framed(open));
        buffer.extend_from_slice(&framed(reply));

        assert_eq!(decode(&mut buffer)?.as_deref(), Some(open));
        assert_eq!(decode(&mut buffer)?.as_deref(), Some(reply));
        assert_eq!(decode(&mut buffer)?, None);
        assert!(buffer.is_empty());
        Ok(())
    }

    #[test]
    fn test_decode_skips_unrelated_headers() -> Result<()> {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let raw = format!(
            "content-LENGTH: {}\r\nContent-Type: application/vscode-jsonrpc; charset=utf-8\r\n\r\n{body}",
            body.len()
        );
        let mut buffer = BytesMut::from(raw.as_str());

        assert_eq!(decode(&mut buffer)?.as_deref(), Some(body));
        Ok(())
    }

    #[test]
    fn test_decode_rejects_headers_without_length() {
        let mut buffer = BytesMut::from("Content-Type: application/vscode-jsonrpc\r\n\r\n{}");
        assert!(decode(&mut buffer).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_length_value() {
        let mut buffer = BytesMut::from("Content-Length: plenty\r\n\r\n{}");
        assert!(decode(&mut buffer).is_err());
    }

    #[test]
    fn test_encode_round_trips_through_decode() -> Result<()> {
        let request = RequestMessage::new(
            7.into(),
            "textDocument/documentSymbol",
            json!({"textDocument": {"uri": "file:///tmp/lib.rs"}}),
        );

        let mut buffer = BytesMut::from(&encode(&request)?[..]);
        let body = decode(&mut buffer)?.context("one full frame was encoded")?;

        let decoded: RequestMessage = serde_json::from_str(&body)?;
        assert_eq!(decoded.jsonrpc, JSONRPC_VERSION);
        assert_eq!(decoded.id, RequestId::Number(7));
        assert_eq!(decoded.method, "textDocument/documentSymbol");
        Ok(())
    }

    #[test]
    fn test_response_forms() -> Result<()> {
        let failed: ResponseMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"unknown"}}"#,
        )?;
        assert!(failed.result.is_none());
        assert_eq!(failed.error.map(|e| e.code), Some(METHOD_NOT_FOUND));

        // A null result is indistinguishable from an absent one.
        let empty: ResponseMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":2,"result":null}"#)?;
        assert!(empty.result.is_none());
        assert!(empty.error.is_none());
        Ok(())
    }

    #[test]
    fn test_response_constructors() {
        let ok = ResponseMessage::result(RequestId::Number(4), serde_json::Value::Null);
        assert_eq!(ok.id, Some(RequestId::Number(4)));
        assert!(ok.error.is_none());

        let failed = ResponseMessage::error(5.into(), INTERNAL_ERROR, "boom".to_string());
        assert!(failed.result.is_none());
        assert_eq!(failed.error.map(|e| e.code), Some(INTERNAL_ERROR));
    }

    #[test]
    fn test_request_id_forms() -> Result<()> {
        let numeric: RequestMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":12,"method":"shutdown"}"#)?;
        assert_eq!(numeric.id, RequestId::Number(12));
        assert_eq!(numeric.id.to_string(), "12");

        let named: RequestMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"reg-1","method":"shutdown"}"#)?;
        assert_eq!(named.id, RequestId::String("reg-1".to_string()));
        assert_eq!(named.id.to_string(), "reg-1");
        Ok(())
    }

    #[test]
    fn test_missing_params_default_to_null() -> Result<()> {
        let notification: NotificationMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"exit"}"#)?;
        assert_eq!(notification.method, "exit");
        assert_eq!(notification.params, serde_json::Value::Null);
        Ok(())
    }
}
