//! HTTP/1.1 wire exchange
//!
//! [`WireClient`] writes one request and reads exactly one response over a
//! borrowed [`HttpSession`]. It owns a read buffer for the duration of the
//! exchange; bytes left in it afterwards mean the stream is out of sync and
//! the connection must not be reused.

use super::chunked::ChunkedDecoder;
use super::chunked::ChunkedEncoder;
use super::parser::{self, BodyFraming};
use super::response::ResponseBuilder;
use super::{
    Body, Error, HttpSession, Method, Request, Response, Result, SessionOps, Target, CRLF,
};
use bytes::{Buf, Bytes, BytesMut};
use std::fmt::Write as _;
use std::time::Instant;
use tracing::{debug, trace};

const READ_CHUNK: usize = 8 * 1024;

/// Largest up-front allocation for a declared body length
const MAX_PREALLOC: usize = 1024 * 1024;

/// Serialize the request line and header block
///
/// Header names or values containing CR or LF are rejected.
pub fn serialize_head(request: &Request, target: &Target) -> Result<Vec<u8>> {
    let headers = request.headers();
    let mut head = String::with_capacity(256);

    let _ = write!(
        head,
        "{} {} HTTP/1.1{}",
        request.method(),
        target.path_and_query(),
        CRLF
    );

    if !headers.contains("Host") {
        push_header(&mut head, "Host", &target.host_header())?;
    }

    let cookie = merged_cookie(request);
    for (name, value) in headers.iter() {
        if cookie.is_some() && name.eq_ignore_ascii_case("Cookie") {
            continue;
        }
        push_header(&mut head, name, value)?;
    }
    if let Some(ref cookie) = cookie {
        push_header(&mut head, "Cookie", cookie)?;
    }

    let framed = headers.contains("Content-Length") || headers.contains("Transfer-Encoding");
    if !framed {
        match request.body() {
            Body::Fixed(bytes) => {
                push_header(&mut head, "Content-Length", &bytes.len().to_string())?;
            }
            Body::Empty
                if matches!(request.method(), Method::Post | Method::Put | Method::Patch) =>
            {
                push_header(&mut head, "Content-Length", "0")?;
            }
            Body::Lazy(_) => push_header(&mut head, "Transfer-Encoding", "chunked")?,
            Body::Empty => {}
        }
    }

    if !headers.contains("Connection") {
        push_header(&mut head, "Connection", "keep-alive")?;
    }

    head.push_str(CRLF);
    Ok(head.into_bytes())
}

fn push_header(head: &mut String, name: &str, value: &str) -> Result<()> {
    let invalid = |s: &str| s.bytes().any(|b| b == b'\r' || b == b'\n');
    if name.is_empty() || invalid(name) || invalid(value) {
        return Err(Error::Protocol(format!("Invalid header: {:?}", name)));
    }
    let _ = write!(head, "{}: {}{}", name, value, CRLF);
    Ok(())
}

/// Request cookies plus any caller-set `Cookie` header, as one value
fn merged_cookie(request: &Request) -> Option<String> {
    let ours = request.cookie_header()?;
    let mut parts = request.headers().get_all("Cookie");
    parts.push(&ours);
    Some(parts.join("; "))
}

/// One request/response exchange over a borrowed session
pub struct WireClient<'a, S: SessionOps> {
    session: &'a mut HttpSession<S>,
    buffer: BytesMut,
}

impl<'a, S: SessionOps> WireClient<'a, S> {
    pub fn new(session: &'a mut HttpSession<S>) -> Self {
        WireClient {
            session,
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Write the request head and body
    pub fn send_request(&mut self, request: &Request, target: &Target) -> Result<()> {
        let head = serialize_head(request, target)?;
        debug!(method = %request.method(), url = %target.url(), "sending request");

        self.session.write_all(&head)?;

        match request.body() {
            Body::Empty => {}
            Body::Fixed(bytes) => self.session.write_all(bytes)?,
            Body::Lazy(producer) if request.headers().contains("Content-Length") => {
                for chunk in producer() {
                    let chunk = chunk.map_err(|e| Error::Body(e.to_string()))?;
                    self.session.write_all(&chunk)?;
                }
            }
            Body::Lazy(producer) => {
                let mut encoder = ChunkedEncoder::new(&mut *self.session);
                for chunk in producer() {
                    let chunk = chunk.map_err(|e| Error::Body(e.to_string()))?;
                    encoder.write_chunk(&chunk)?;
                }
                encoder.finish()?;
            }
        }

        self.session.flush()
    }

    /// Read one final response to a `method` request
    ///
    /// Interim 1xx responses other than 101 are skipped. The returned
    /// builder still lacks the URL and elapsed time.
    pub fn receive_response(&mut self, method: Method) -> Result<ResponseBuilder> {
        let head = loop {
            match parser::parse_head(&self.buffer)? {
                Some((head, consumed)) => {
                    self.buffer.advance(consumed);
                    if head.status.is_informational() && head.status.code() != 101 {
                        trace!(status = head.status.code(), "skipping interim response");
                        continue;
                    }
                    break head;
                }
                None => self.fill()?,
            }
        };

        debug!(status = head.status.code(), version = %head.version, "received response head");
        for (name, value) in head.headers.iter() {
            trace!("{}: {}", name, value);
        }

        let framing = parser::body_framing(method, &head)?;
        let body = match framing {
            BodyFraming::None | BodyFraming::Unframed => Bytes::new(),
            BodyFraming::Length(len) => self.read_exact_body(len)?,
            BodyFraming::Chunked => self.read_chunked_body()?,
        };

        let reusable = parser::keep_alive(&head)
            && framing != BodyFraming::Unframed
            && head.status.code() != 101;
        if !reusable {
            self.session.set_keep_alive(false);
        }

        Ok(Response::builder()
            .version(head.version)
            .status(head.status)
            .reason(head.reason)
            .headers(head.headers)
            .body(body))
    }

    /// Whether bytes beyond the parsed response are buffered
    pub fn has_buffered(&self) -> bool {
        !self.buffer.is_empty()
    }

    fn fill(&mut self) -> Result<()> {
        let mut temp = [0u8; READ_CHUNK];
        let n = self.session.read(&mut temp)?;

        if n == 0 {
            self.session.mark_failed();
            return Err(Error::ConnectionClosed);
        }

        self.buffer.extend_from_slice(&temp[..n]);
        Ok(())
    }

    fn read_exact_body(&mut self, len: usize) -> Result<Bytes> {
        self.buffer.reserve(len.min(MAX_PREALLOC));
        while self.buffer.len() < len {
            self.fill()?;
        }
        Ok(self.buffer.split_to(len).freeze())
    }

    fn read_chunked_body(&mut self) -> Result<Bytes> {
        let mut decoder = ChunkedDecoder::new();
        let mut body = BytesMut::new();

        loop {
            let (consumed, complete) = decoder.decode(&self.buffer, &mut body)?;
            self.buffer.advance(consumed);

            if complete {
                return Ok(body.freeze());
            }
            self.fill()?;
        }
    }
}

/// Send `request` to `target` over `session` and read the response
///
/// On any error the session is marked failed so it is never reused.
pub fn send_and_receive<S: SessionOps>(
    session: &mut HttpSession<S>,
    request: &Request,
    target: &Target,
) -> Result<Response> {
    let started = Instant::now();

    let mut wire = WireClient::new(session);
    let result = wire
        .send_request(request, target)
        .and_then(|()| wire.receive_response(request.method()));
    let leftover = wire.has_buffered();

    match result {
        Ok(builder) => {
            if leftover || request.headers().has_token("Connection", "close") {
                session.set_keep_alive(false);
            }
            Ok(builder
                .url(target.url().as_str())
                .elapsed(started.elapsed())
                .build())
        }
        Err(e) => {
            session.mark_failed();
            Err(e)
        }
    }
}
