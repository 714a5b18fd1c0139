//! HTTP upgrade handshake, server and client role.
//!
//! The handshake is plain HTTP: read a CRLF-CRLF-terminated head, pull the
//! `Sec-WebSocket-Key`, answer 101 with the accept token. Any bytes the
//! transport delivered past the head already belong to frame mode and are
//! handed back to the caller.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::HandshakeError;

/// Fixed GUID the protocol appends to the client key before hashing.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on an HTTP head before we give up on the peer.
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// A parsed HTTP head (request or response): start line plus headers with
/// lowercased names.
#[derive(Debug)]
pub struct HttpHead {
    pub start_line: String,
    headers: Vec<(String, String)>,
}

impl HttpHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Request path from the start line, e.g. `GET /health HTTP/1.1` → `/health`.
    pub fn path(&self) -> &str {
        self.start_line.split_whitespace().nth(1).unwrap_or("/")
    }

    /// Whether this request asks to switch to the WebSocket protocol.
    pub fn wants_upgrade(&self) -> bool {
        self.header("upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
    }

    /// Status code of a response start line, e.g. `HTTP/1.1 101 ...` → 101.
    pub fn status(&self) -> Result<u16, HandshakeError> {
        self.start_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| HandshakeError::Malformed(self.start_line.clone()))
    }
}

/// Read one HTTP head off the stream. Returns the parsed head and any bytes
/// that arrived after the terminating blank line.
pub async fn read_head<S>(stream: &mut S) -> Result<(HttpHead, Vec<u8>), HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 1024];

    loop {
        if let Some(end) = find_head_end(&buf) {
            let head = std::str::from_utf8(&buf[..end])
                .map_err(|e| HandshakeError::Malformed(e.to_string()))?;
            let parsed = parse_head(head)?;
            return Ok((parsed, buf[end + 4..].to_vec()));
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(HandshakeError::HeadTooLarge(MAX_HEAD_BYTES));
        }

        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| HandshakeError::Malformed(e.to_string()))?;
        if n == 0 {
            return Err(HandshakeError::UnexpectedEof);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_head(head: &str) -> Result<HttpHead, HandshakeError> {
    let mut lines = head.split("\r\n");
    let start_line = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| HandshakeError::Malformed("empty head".into()))?
        .to_string();

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HandshakeError::Malformed(format!("bad header line: {line}")))?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    Ok(HttpHead {
        start_line,
        headers,
    })
}

/// Accept token mandated by the protocol: `base64(SHA1(key ++ GUID))`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Build the 101 response for an upgrade request, or fail with
/// [`HandshakeError::MissingKey`] when the client sent no key.
pub fn accept_response(request: &HttpHead) -> Result<String, HandshakeError> {
    let key = request
        .header("sec-websocket-key")
        .ok_or(HandshakeError::MissingKey)?;
    Ok(format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    ))
}

/// Response for requests we refuse (missing key). Fatal for the connection.
pub fn bad_request_response() -> &'static str {
    "HTTP/1.1 400 Bad Request\r\n\r\n"
}

/// Random 16-byte base64 nonce for the client role.
pub fn client_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// Upgrade request sent by the client role.
pub fn client_request(host: &str, path: &str, nonce: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {nonce}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
}

/// Validate the server's 101 response against the nonce we sent.
pub fn validate_accept(nonce: &str, response: &HttpHead) -> Result<(), HandshakeError> {
    let status = response.status()?;
    if status != 101 {
        return Err(HandshakeError::UnexpectedStatus(status));
    }
    match response.header("sec-websocket-accept") {
        Some(token) if token == accept_key(nonce) => Ok(()),
        _ => Err(HandshakeError::AcceptMismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request(key: Option<&str>) -> String {
        let mut head = String::from("GET /chat HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n");
        if let Some(key) = key {
            head.push_str(&format!("Sec-WebSocket-Key: {key}\r\n"));
        }
        head.push_str("\r\n");
        head
    }

    #[test]
    fn test_accept_key_rfc_vector() {
        // Worked example from RFC 6455 §1.3.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_accept_response_carries_token() {
        let head = parse_head(sample_request(Some("dGhlIHNhbXBsZSBub25jZQ==")).trim_end()).unwrap();
        assert!(head.wants_upgrade());
        let response = accept_response(&head).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let head = parse_head(sample_request(None).trim_end()).unwrap();
        assert!(matches!(
            accept_response(&head),
            Err(HandshakeError::MissingKey)
        ));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let head = parse_head("GET / HTTP/1.1\r\nUPGRADE: WebSocket\r\nX-Thing:  padded  ").unwrap();
        assert!(head.wants_upgrade());
        assert_eq!(head.header("x-thing"), Some("padded"));
        assert_eq!(head.path(), "/");
    }

    #[test]
    fn test_client_roundtrip_validation() {
        let nonce = client_nonce();
        let request = client_request("127.0.0.1:9090", "/", &nonce);
        let (req_head, leftover) = {
            let head_text = request.trim_end_matches("\r\n\r\n");
            (parse_head(head_text).unwrap(), Vec::<u8>::new())
        };
        assert!(leftover.is_empty());

        let response_text = accept_response(&req_head).unwrap();
        let response = parse_head(response_text.trim_end_matches("\r\n\r\n")).unwrap();
        validate_accept(&nonce, &response).unwrap();

        // A different nonce must not validate.
        assert!(matches!(
            validate_accept(&client_nonce(), &response),
            Err(HandshakeError::AcceptMismatch)
        ));
    }

    #[test]
    fn test_non_101_status_rejected() {
        let response = parse_head("HTTP/1.1 400 Bad Request").unwrap();
        assert!(matches!(
            validate_accept("whatever", &response),
            Err(HandshakeError::UnexpectedStatus(400))
        ));
    }

    #[tokio::test]
    async fn test_read_head_returns_leftover_bytes() {
        let request = sample_request(Some("dGhlIHNhbXBsZSBub25jZQ=="));
        let mut wire = request.into_bytes();
        wire.extend_from_slice(&[0x81, 0x02, b'h', b'i']); // first frame rides along
        let mut reader = std::io::Cursor::new(wire);

        let (head, leftover) = read_head(&mut reader).await.unwrap();
        assert!(head.wants_upgrade());
        assert_eq!(leftover, vec![0x81, 0x02, b'h', b'i']);
    }

    #[tokio::test]
    async fn test_read_head_truncated_stream() {
        let mut reader = std::io::Cursor::new(b"GET / HTTP/1.1\r\nHost: x".to_vec());
        assert!(matches!(
            read_head(&mut reader).await,
            Err(HandshakeError::UnexpectedEof)
        ));
    }
}
