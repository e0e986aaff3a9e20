//! HTTP response head parsing
//!
//! Parsing works on a byte buffer: [`parse_head`] either finds a complete
//! status line plus header block, asks for more bytes, or rejects the input.
//! [`body_framing`] then decides how the body that follows is delimited.

use super::{Error, Headers, Method, Result, Status, Version, MAX_HEADERS};

/// Every status line the client accepts starts with this
pub const STATUS_PREFIX: &[u8] = b"HTTP/1.";

/// Largest response head (status line plus headers) accepted
pub const MAX_HEAD_LEN: usize = 64 * 1024;

/// Status line and headers of one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: Version,
    pub status: Status,
    pub reason: String,
    pub headers: Headers,
}

/// How the body following a response head is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body at all
    None,
    /// Exactly this many bytes
    Length(usize),
    /// Chunked transfer-encoding
    Chunked,
    /// Neither header present: the body is taken as empty, but anything the
    /// server sends afterwards would corrupt the next exchange
    Unframed,
}

/// Parse HTTP response status line
///
/// Format: VERSION STATUS REASON
/// Example: HTTP/1.1 200 OK
pub fn parse_status_line(line: &str) -> Result<(Version, Status, String)> {
    if !line.as_bytes().starts_with(STATUS_PREFIX) {
        return Err(Error::Protocol(format!("Invalid status line: {:?}", line)));
    }

    let parts: Vec<&str> = line.splitn(3, ' ').collect();
    if parts.len() < 2 {
        return Err(Error::Protocol(format!(
            "Invalid status line: expected at least 2 parts, got {}",
            parts.len()
        )));
    }

    let version = parts[0].parse::<Version>()?;

    let code = parts[1];
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Protocol(format!("Invalid status code: {}", code)));
    }
    let status = code
        .parse::<u16>()
        .map_err(|_| Error::Protocol(format!("Invalid status code: {}", code)))
        .and_then(Status::new)?;

    let reason = match parts.get(2) {
        Some(reason) => reason.trim().to_string(),
        None => status.reason_phrase().to_string(),
    };

    Ok((version, status, reason))
}

/// Offset just past the empty line ending the head, if it is buffered
///
/// Lines end in LF; a preceding CR is optional.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    let mut line_start = 0;
    for (i, &b) in buf.iter().enumerate() {
        if b == b'\n' {
            let line = &buf[line_start..i];
            if line.is_empty() || line == b"\r" {
                return Some(i + 1);
            }
            line_start = i + 1;
        }
    }
    None
}

/// Try to parse a complete response head from the front of `buf`
///
/// Returns the head and the number of bytes it occupied, or `None` when
/// more input is needed. Input that can never become a valid head fails
/// early, without waiting for the terminating empty line.
pub fn parse_head(buf: &[u8]) -> Result<Option<(ResponseHead, usize)>> {
    let prefix_len = buf.len().min(STATUS_PREFIX.len());
    if buf[..prefix_len] != STATUS_PREFIX[..prefix_len] {
        let line = buf.split(|&b| b == b'\n').next().unwrap_or(buf);
        return Err(Error::Protocol(format!(
            "Invalid status line: {:?}",
            String::from_utf8_lossy(line).trim_end()
        )));
    }

    let Some(end) = find_head_end(buf) else {
        if buf.len() > MAX_HEAD_LEN {
            return Err(Error::Protocol(format!(
                "Response head exceeds {} bytes",
                MAX_HEAD_LEN
            )));
        }
        return Ok(None);
    };

    let text = String::from_utf8_lossy(&buf[..end]);
    let mut lines = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .take_while(|line| !line.is_empty());

    let status_line = lines.next().unwrap_or_default();
    let (version, status, reason) = parse_status_line(status_line)?;

    let mut headers = Headers::new();
    for line in lines {
        if headers.len() == MAX_HEADERS {
            return Err(Error::Protocol(format!(
                "Too many headers (max {})",
                MAX_HEADERS
            )));
        }
        let (name, value) = Headers::parse_header_line(line)?;
        headers.insert(name, value);
    }

    Ok(Some((
        ResponseHead {
            version,
            status,
            reason,
            headers,
        },
        end,
    )))
}

/// The declared `Content-Length`, rejecting malformed or conflicting values
pub fn content_length(headers: &Headers) -> Result<Option<usize>> {
    let mut length = None;

    for value in headers.get_all("Content-Length") {
        for item in value.split(',') {
            let item = item.trim();
            let parsed = item
                .parse::<usize>()
                .ok()
                .filter(|_| item.bytes().all(|b| b.is_ascii_digit()))
                .ok_or_else(|| Error::Protocol(format!("Invalid Content-Length: {}", item)))?;

            match length {
                Some(existing) if existing != parsed => {
                    return Err(Error::Protocol(format!(
                        "Conflicting Content-Length values: {} and {}",
                        existing, parsed
                    )));
                }
                _ => length = Some(parsed),
            }
        }
    }

    Ok(length)
}

/// Whether chunked is the final transfer coding
pub fn is_chunked(headers: &Headers) -> bool {
    headers
        .get_all("Transfer-Encoding")
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .last()
        .is_some_and(|t| t.eq_ignore_ascii_case("chunked"))
}

/// Decide how the body of a response to `method` is delimited
///
/// `Content-Length` takes precedence over chunked framing.
pub fn body_framing(method: Method, head: &ResponseHead) -> Result<BodyFraming> {
    if method == Method::Head || head.status.is_bodyless() {
        return Ok(BodyFraming::None);
    }

    if let Some(length) = content_length(&head.headers)? {
        return Ok(BodyFraming::Length(length));
    }

    if is_chunked(&head.headers) {
        return Ok(BodyFraming::Chunked);
    }

    Ok(BodyFraming::Unframed)
}

/// Whether the server is willing to keep the connection open
pub fn keep_alive(head: &ResponseHead) -> bool {
    if head.headers.has_token("Connection", "close") {
        return false;
    }
    match head.version {
        Version::Http10 => head.headers.has_token("Connection", "keep-alive"),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(raw: &str) -> ResponseHead {
        parse_head(raw.as_bytes()).unwrap().unwrap().0
    }

    #[test]
    fn test_parse_status_line() {
        let (version, status, reason) = parse_status_line("HTTP/1.1 200 OK").unwrap();
        assert_eq!(version, Version::Http11);
        assert_eq!(status.code(), 200);
        assert_eq!(reason, "OK");

        let (_, status, reason) = parse_status_line("HTTP/1.0 404 Not Found").unwrap();
        assert_eq!(status.code(), 404);
        assert_eq!(reason, "Not Found");

        let (_, _, reason) = parse_status_line("HTTP/1.1 204").unwrap();
        assert_eq!(reason, "No Content");
    }

    #[test]
    fn test_parse_status_line_rejects_garbage() {
        assert!(matches!(parse_status_line("ICY 200 OK"), Err(Error::Protocol(_))));
        assert!(matches!(parse_status_line("HTTP/2 200 OK"), Err(Error::Protocol(_))));
        assert!(matches!(parse_status_line("HTTP/1.1 2x0 OK"), Err(Error::Protocol(_))));
        assert!(matches!(parse_status_line("HTTP/1.1"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_parse_head_complete() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\
                    Set-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\nbody";
        let (head, consumed) = parse_head(raw).unwrap().unwrap();

        assert_eq!(head.status.code(), 200);
        assert_eq!(head.headers.get("content-type"), Some("text/plain"));
        assert_eq!(head.headers.get_all("Set-Cookie"), vec!["a=1", "b=2"]);
        assert_eq!(head.headers.get_last("Set-Cookie"), Some("b=2"));
        assert_eq!(&raw[consumed..], b"body");
    }

    #[test]
    fn test_parse_head_needs_more_input() {
        assert!(parse_head(b"HTTP/1.1 200 OK\r\nContent-").unwrap().is_none());
        assert!(parse_head(b"HTT").unwrap().is_none());
    }

    #[test]
    fn test_parse_head_rejects_early() {
        assert!(matches!(parse_head(b"SSH-2.0"), Err(Error::Protocol(_))));
        assert!(matches!(
            parse_head(b"HTTP/1.1 200 OK\r\nbroken header\r\n\r\n"),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_head_accepts_bare_lf() {
        let head = head("HTTP/1.1 200 OK\nContent-Length: 0\n\n");
        assert_eq!(content_length(&head.headers).unwrap(), Some(0));
    }

    #[test]
    fn test_too_many_headers() {
        let mut raw = String::from("HTTP/1.1 200 OK\r\n");
        for i in 0..=MAX_HEADERS {
            raw.push_str(&format!("X-H{}: v\r\n", i));
        }
        raw.push_str("\r\n");
        assert!(matches!(parse_head(raw.as_bytes()), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_content_length_validation() {
        let h = head("HTTP/1.1 200 OK\r\nContent-Length: 5\r\nContent-Length: 5\r\n\r\n");
        assert_eq!(content_length(&h.headers).unwrap(), Some(5));

        let h = head("HTTP/1.1 200 OK\r\nContent-Length: 5\r\nContent-Length: 6\r\n\r\n");
        assert!(matches!(content_length(&h.headers), Err(Error::Protocol(_))));

        let h = head("HTTP/1.1 200 OK\r\nContent-Length: -1\r\n\r\n");
        assert!(matches!(content_length(&h.headers), Err(Error::Protocol(_))));

        let h = head("HTTP/1.1 200 OK\r\nContent-Length: +3\r\n\r\n");
        assert!(content_length(&h.headers).is_err());
    }

    #[test]
    fn test_body_framing() {
        let h = head("HTTP/1.1 200 OK\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert_eq!(body_framing(Method::Get, &h).unwrap(), BodyFraming::Length(3));
        assert_eq!(body_framing(Method::Head, &h).unwrap(), BodyFraming::None);

        let h = head("HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip, Chunked\r\n\r\n");
        assert_eq!(body_framing(Method::Get, &h).unwrap(), BodyFraming::Chunked);

        let h = head("HTTP/1.1 304 Not Modified\r\nContent-Length: 10\r\n\r\n");
        assert_eq!(body_framing(Method::Get, &h).unwrap(), BodyFraming::None);

        let h = head("HTTP/1.1 200 OK\r\n\r\n");
        assert_eq!(body_framing(Method::Get, &h).unwrap(), BodyFraming::Unframed);
    }

    #[test]
    fn test_keep_alive() {
        assert!(keep_alive(&head("HTTP/1.1 200 OK\r\n\r\n")));
        assert!(!keep_alive(&head("HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n")));
        assert!(!keep_alive(&head("HTTP/1.0 200 OK\r\n\r\n")));
        assert!(keep_alive(&head("HTTP/1.0 200 OK\r\nConnection: Keep-Alive\r\n\r\n")));
    }
}
