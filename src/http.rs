//! Minimal HTTP/1.0 request handling.
//!
//! Just enough protocol to drive the cache and scheduler: parse a `GET`
//! request line, map its target into the serving root, and emit
//! fixed-format responses. Every response carries `Connection: close`;
//! one request, one connection, one transfer.

use std::io::{self, BufRead, Read, Write};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Longest request line we are willing to buffer.
const MAX_REQUEST_LINE: u64 = 8 * 1024;

/// Errors from an unserviceable request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    /// The request line was not of the form `METHOD target HTTP/x.y`.
    #[error("malformed request line")]
    Malformed,
    /// A well-formed method we do not implement.
    #[error("method {0} not supported")]
    Method(String),
}

/// Error responses the server can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    BadRequest,
    NotFound,
    MethodNotAllowed,
    Unavailable,
}

impl Status {
    /// Status line, without the trailing CRLF.
    #[must_use]
    pub fn line(self) -> &'static str {
        match self {
            Self::BadRequest => "HTTP/1.0 400 Bad Request",
            Self::NotFound => "HTTP/1.0 404 Not Found",
            Self::MethodNotAllowed => "HTTP/1.0 405 Method Not Allowed",
            Self::Unavailable => "HTTP/1.0 503 Service Unavailable",
        }
    }

    fn body(self) -> &'static str {
        match self {
            Self::BadRequest => "bad request",
            Self::NotFound => "not found",
            Self::MethodNotAllowed => "only GET is supported",
            Self::Unavailable => "try again later",
        }
    }

    /// The status that answers a request parsing failure.
    #[must_use]
    pub fn for_request_error(err: &RequestError) -> Self {
        match err {
            RequestError::Malformed => Self::BadRequest,
            RequestError::Method(_) => Self::MethodNotAllowed,
        }
    }
}

/// Read the request line off the socket, CRLF stripped.
///
/// Lines longer than [`MAX_REQUEST_LINE`] are cut off there; the remainder
/// then fails to parse rather than filling memory.
pub fn read_request_line<R: BufRead>(stream: &mut R) -> io::Result<String> {
    let mut line = String::new();
    stream.take(MAX_REQUEST_LINE).read_line(&mut line)?;
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Pull the target out of a `GET` request line.
pub fn parse_request_line(line: &str) -> Result<&str, RequestError> {
    let mut parts = line.split_whitespace();
    let method = parts.next().ok_or(RequestError::Malformed)?;
    let target = parts.next().ok_or(RequestError::Malformed)?;
    let version = parts.next().ok_or(RequestError::Malformed)?;
    if parts.next().is_some() || !version.starts_with("HTTP/") {
        return Err(RequestError::Malformed);
    }
    if !method.eq_ignore_ascii_case("GET") {
        return Err(RequestError::Method(method.to_owned()));
    }
    Ok(target)
}

/// Map a request target to a path under `root`.
///
/// The target must be absolute and may not traverse upwards; query and
/// fragment suffixes are ignored. A bare `/` serves `index.html`. `None`
/// means the target cannot name a file under the root.
#[must_use]
pub fn resolve_target(root: &Path, target: &str) -> Option<PathBuf> {
    let path = target.split(['?', '#']).next().unwrap_or(target);
    let rel = path.strip_prefix('/')?;
    let rel = if rel.is_empty() { "index.html" } else { rel };
    let rel = Path::new(rel);
    if !rel
        .components()
        .all(|part| matches!(part, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(rel))
}

/// Write the success header for a body of `size` bytes.
pub fn write_ok_header<W: Write>(writer: &mut W, size: u64) -> io::Result<()> {
    write!(
        writer,
        "HTTP/1.0 200 OK\r\nServer: fairserve\r\nContent-Length: {size}\r\nConnection: close\r\n\r\n"
    )
}

/// Write a complete plain-text error response.
pub fn write_error<W: Write>(writer: &mut W, status: Status) -> io::Result<()> {
    let body = status.body();
    write!(
        writer,
        "{}\r\nServer: fairserve\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status.line(),
        body.len(),
        body
    )
}
