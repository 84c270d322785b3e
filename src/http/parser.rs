use bytes::Bytes;
use thiserror::Error;

use crate::http::headers::Headers;
use crate::http::request::{Method, Request, Version};

/// Largest header block accepted before the blank-line delimiter shows up.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Not a complete message yet; keep buffering.
    #[error("incomplete request")]
    Incomplete,
    #[error("malformed request line")]
    MalformedStartLine,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("request headers are not valid UTF-8")]
    InvalidEncoding,
    #[error("missing required header \"{0}\"")]
    MissingRequiredHeader(&'static str),
    #[error("request headers exceed {MAX_HEADER_BYTES} bytes")]
    TooLarge,
}

impl ParseError {
    /// `true` for every error except [`ParseError::Incomplete`].
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ParseError::Incomplete)
    }
}

/// Decodes one request from the front of `buf`.
///
/// Returns the request and the number of bytes it occupied, so the caller can
/// drain them and keep any trailing bytes for the next exchange.
pub fn decode_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    let start = buf
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .ok_or(ParseError::Incomplete)?;
    let message = &buf[start..];

    let line_end = match find(message, b"\r\n") {
        Some(pos) => pos,
        None if message.len() > MAX_HEADER_BYTES => return Err(ParseError::TooLarge),
        None => return Err(ParseError::Incomplete),
    };
    let start_line =
        std::str::from_utf8(&message[..line_end]).map_err(|_| ParseError::MalformedStartLine)?;

    match parse_start_line(start_line)? {
        StartLine::Simple { target } => {
            let request = Request {
                version: Version::Http09,
                method: Method::GET,
                target: target.to_string(),
                headers: Headers::new(),
                body: None,
            };
            Ok((request, start + line_end + 2))
        }
        StartLine::Full {
            method,
            target,
            version,
        } => {
            let headers_end = match find(message, b"\r\n\r\n") {
                Some(pos) => pos,
                None if message.len() > MAX_HEADER_BYTES => return Err(ParseError::TooLarge),
                None => return Err(ParseError::Incomplete),
            };

            let header_block = std::str::from_utf8(&message[line_end..headers_end])
                .map_err(|_| ParseError::InvalidEncoding)?;
            let headers = parse_headers(header_block)?;

            if version == Version::Http11 && !headers.contains("Host") {
                return Err(ParseError::MissingRequiredHeader("Host"));
            }

            let body_start = headers_end + 4;
            let rest = &message[body_start..];
            let (body, body_consumed) = match headers.get("Content-Length") {
                Some(value) => {
                    let length = value
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| ParseError::InvalidContentLength)?;
                    if rest.len() < length {
                        return Err(ParseError::Incomplete);
                    }
                    let body = (length > 0).then(|| Bytes::copy_from_slice(&rest[..length]));
                    (body, length)
                }
                None => {
                    let trimmed = rest.trim_ascii_start();
                    let body = (!trimmed.is_empty()).then(|| Bytes::copy_from_slice(trimmed));
                    (body, rest.len())
                }
            };

            let request = Request {
                version,
                method,
                target: target.to_string(),
                headers,
                body,
            };
            Ok((request, start + body_start + body_consumed))
        }
    }
}

enum StartLine<'a> {
    Simple {
        target: &'a str,
    },
    Full {
        method: Method,
        target: &'a str,
        version: Version,
    },
}

fn parse_start_line(line: &str) -> Result<StartLine<'_>, ParseError> {
    let parts: Vec<&str> = line.split(' ').filter(|part| !part.is_empty()).collect();

    match parts.as_slice() {
        ["GET", target] => Ok(StartLine::Simple { target: *target }),
        [method, target, protocol] => {
            let method = Method::parse(method).ok_or(ParseError::MalformedStartLine)?;
            let version = protocol
                .strip_prefix("HTTP/")
                .and_then(Version::from_token)
                .filter(|version| *version != Version::Http09)
                .ok_or(ParseError::MalformedStartLine)?;
            Ok(StartLine::Full {
                method,
                target: *target,
                version,
            })
        }
        _ => Err(ParseError::MalformedStartLine),
    }
}

fn parse_headers(block: &str) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();

    for line in block.split("\r\n") {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    Ok(headers)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
