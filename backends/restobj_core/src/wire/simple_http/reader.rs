use std::io::{BufRead, Read};

use super::{add_header, first_header, header_has_token, SimpleHeader, SimpleHeaders, SimpleMethod, TransportError};

/// Upper bound on the buffer reserved up front for a sized body.
const BODY_PREALLOCATION_LIMIT: usize = 64 * 1024;

/// A response read off the wire with its body fully spooled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: SimpleHeaders,
    pub body: Vec<u8>,

    /// The connection cannot carry another request after this one.
    pub close_connection: bool,
}

/// Reads one response, skipping interim 1xx responses.
///
/// # Errors
///
/// Returns [`TransportError::BadStatusLine`] when the first line is empty
/// or not a status line, [`TransportError::MalformedResponse`] on broken
/// framing, and I/O errors as they occur.
pub fn read_response<R: BufRead>(
    reader: &mut R,
    method: SimpleMethod,
) -> Result<RawResponse, TransportError> {
    loop {
        let (version, status, reason) = read_status_line(reader)?;
        let headers = read_headers(reader)?;

        if (100..200).contains(&status) {
            continue;
        }

        let keep_alive = header_has_token(&headers, &SimpleHeader::CONNECTION, "keep-alive");
        let mut close_connection = header_has_token(&headers, &SimpleHeader::CONNECTION, "close")
            || (version == "HTTP/1.0" && !keep_alive);

        let body = if method.expects_no_body() || status == 204 || status == 304 {
            Vec::new()
        } else if header_has_token(&headers, &SimpleHeader::TRANSFER_ENCODING, "chunked") {
            read_chunked_body(reader)?
        } else if let Some(length) = first_header(&headers, &SimpleHeader::CONTENT_LENGTH) {
            let length: usize = length.trim().parse().map_err(|_| {
                TransportError::MalformedResponse(format!("invalid content length {length:?}"))
            })?;
            read_exact_body(reader, length)?
        } else {
            close_connection = true;
            let mut body = Vec::new();
            reader.read_to_end(&mut body)?;
            body
        };

        return Ok(RawResponse {
            version,
            status,
            reason,
            headers,
            body,
            close_connection,
        });
    }
}

/// A request read off the wire, for servers that talk to the client in
/// tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    pub method: SimpleMethod,
    pub target: String,
    pub version: String,
    pub headers: SimpleHeaders,
    pub body: Vec<u8>,
}

impl RawRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        first_header(&self.headers, &SimpleHeader::from(name))
    }

    /// True when the body arrived with chunked transfer coding.
    #[must_use]
    pub fn was_chunked(&self) -> bool {
        header_has_token(&self.headers, &SimpleHeader::TRANSFER_ENCODING, "chunked")
    }
}

/// Reads one request; `Ok(None)` when the peer closed the connection
/// before sending anything.
///
/// # Errors
///
/// [`TransportError::MalformedResponse`] on a broken request line or
/// framing, and I/O errors as they occur.
pub fn read_request<R: BufRead>(reader: &mut R) -> Result<Option<RawRequest>, TransportError> {
    let line = loop {
        match read_line(reader)? {
            None => return Ok(None),
            Some(line) if line.is_empty() => {}
            Some(line) => break line,
        }
    };

    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(TransportError::MalformedResponse(format!(
            "bad request line {line:?}"
        )));
    };
    let method = SimpleMethod::parse(method).ok_or_else(|| {
        TransportError::MalformedResponse(format!("unsupported method {method:?}"))
    })?;

    let headers = read_headers(reader)?;
    let body = if header_has_token(&headers, &SimpleHeader::TRANSFER_ENCODING, "chunked") {
        read_chunked_body(reader)?
    } else if let Some(length) = first_header(&headers, &SimpleHeader::CONTENT_LENGTH) {
        let length: usize = length.trim().parse().map_err(|_| {
            TransportError::MalformedResponse(format!("invalid content length {length:?}"))
        })?;
        read_exact_body(reader, length)?
    } else {
        Vec::new()
    };

    Ok(Some(RawRequest {
        method,
        target: target.to_string(),
        version: version.to_string(),
        headers,
        body,
    }))
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>, TransportError> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

fn read_status_line<R: BufRead>(reader: &mut R) -> Result<(String, u16, String), TransportError> {
    let Some(line) = read_line(reader)? else {
        return Err(TransportError::BadStatusLine(String::new()));
    };

    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(TransportError::BadStatusLine(line));
    }
    let Some(status) = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..1000).contains(code))
    else {
        return Err(TransportError::BadStatusLine(line));
    };
    let reason = parts.next().unwrap_or_default().trim().to_string();
    Ok((version.to_string(), status, reason))
}

fn read_headers<R: BufRead>(reader: &mut R) -> Result<SimpleHeaders, TransportError> {
    let mut headers = SimpleHeaders::new();
    loop {
        let Some(line) = read_line(reader)? else {
            return Err(TransportError::MalformedResponse(
                "connection closed inside headers".into(),
            ));
        };
        if line.is_empty() {
            return Ok(headers);
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(TransportError::MalformedResponse(format!(
                "header line without colon: {line:?}"
            )));
        };
        add_header(&mut headers, name, value.trim());
    }
}

/// Reads exactly `length` bytes. The buffer grows with what actually
/// arrives, so a bogus length from the peer cannot size the allocation.
fn read_exact_body<R: BufRead>(reader: &mut R, length: usize) -> Result<Vec<u8>, TransportError> {
    let limit = u64::try_from(length).unwrap_or(u64::MAX);
    let mut body = Vec::with_capacity(length.min(BODY_PREALLOCATION_LIMIT));
    Read::take(&mut *reader, limit)
        .read_to_end(&mut body)
        .map_err(|err| {
            TransportError::MalformedResponse(format!("body shorter than {length} bytes: {err}"))
        })?;
    if body.len() != length {
        return Err(TransportError::MalformedResponse(format!(
            "body shorter than {length} bytes: got {}",
            body.len()
        )));
    }
    Ok(body)
}

fn read_chunked_body<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, TransportError> {
    let mut body = Vec::new();
    loop {
        let Some(size_line) = read_line(reader)? else {
            return Err(TransportError::MalformedResponse(
                "connection closed inside chunked body".into(),
            ));
        };
        let size_text = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_text, 16).map_err(|_| {
            TransportError::MalformedResponse(format!("invalid chunk size {size_line:?}"))
        })?;

        if size == 0 {
            // trailers
            while let Some(line) = read_line(reader)? {
                if line.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }

        body.extend(read_exact_body(reader, size)?);
        match read_line(reader)? {
            Some(line) if line.is_empty() => {}
            _ => {
                return Err(TransportError::MalformedResponse(
                    "chunk not terminated by CRLF".into(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(raw: &str, method: SimpleMethod) -> Result<RawResponse, TransportError> {
        read_response(&mut Cursor::new(raw.as_bytes().to_vec()), method)
    }

    #[test]
    fn test_reads_content_length_body() {
        let response = parse(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n{}",
            SimpleMethod::GET,
        )
        .expect("should parse");

        assert_eq!(response.status, 200);
        assert_eq!(response.reason, "OK");
        assert_eq!(response.body, b"{}");
        assert!(!response.close_connection);
        assert_eq!(
            first_header(&response.headers, &SimpleHeader::CONTENT_TYPE),
            Some("application/json")
        );
    }

    /// WHY: A keep-alive socket closed by the server yields an empty status line
    /// WHAT: That case is reported as a bad status line so the worker can retry
    #[test]
    fn test_empty_stream_is_bad_status_line() {
        let result = parse("", SimpleMethod::GET);
        assert_eq!(result, Err(TransportError::BadStatusLine(String::new())));

        let result = parse("garbage\r\n\r\n", SimpleMethod::GET);
        assert!(matches!(result, Err(TransportError::BadStatusLine(_))));
    }

    #[test]
    fn test_reads_chunked_body_with_trailers() {
        let response = parse(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nX-Trailer: yes\r\n\r\n",
            SimpleMethod::GET,
        )
        .expect("should parse");
        assert_eq!(response.body, b"hello world");
    }

    #[test]
    fn test_skips_interim_continue() {
        let response = parse(
            "HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n",
            SimpleMethod::POST,
        )
        .expect("should parse");
        assert_eq!(response.status, 201);
    }

    #[test]
    fn test_no_body_statuses_and_head() {
        let response = parse(
            "HTTP/1.1 304 Not Modified\r\nContent-Length: 10\r\n\r\n",
            SimpleMethod::GET,
        )
        .expect("should parse");
        assert!(response.body.is_empty());

        let response = parse("HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n", SimpleMethod::HEAD)
            .expect("should parse");
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_body_without_length_reads_to_eof_and_closes() {
        let response = parse("HTTP/1.0 200 OK\r\n\r\nall of it", SimpleMethod::GET)
            .expect("should parse");
        assert_eq!(response.body, b"all of it");
        assert!(response.close_connection);
    }

    #[test]
    fn test_connection_close_is_honoured() {
        let response = parse(
            "HTTP/1.1 404 Not Found\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
            SimpleMethod::DELETE,
        )
        .expect("should parse");
        assert_eq!(response.status, 404);
        assert!(response.close_connection);
    }

    #[test]
    fn test_reads_chunked_request() {
        let raw = "POST /api/files HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n";
        let request = read_request(&mut Cursor::new(raw.as_bytes().to_vec()))
            .expect("should parse")
            .expect("one request");
        assert_eq!(request.method, SimpleMethod::POST);
        assert_eq!(request.target, "/api/files");
        assert_eq!(request.body, b"abc");
        assert!(request.was_chunked());
        assert_eq!(request.header("host"), Some("x"));

        let closed = read_request(&mut Cursor::new(Vec::new())).expect("should parse");
        assert!(closed.is_none());
    }

    #[test]
    fn test_truncated_body_is_malformed() {
        let result = parse("HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc", SimpleMethod::GET);
        assert!(matches!(result, Err(TransportError::MalformedResponse(_))));
    }

    /// WHY: Lengths come from the peer and cannot be trusted to size buffers
    /// WHAT: An absurd Content-Length or chunk size is a malformed response
    #[test]
    fn test_oversized_lengths_are_malformed() {
        let huge_length = parse(
            "HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\nabc",
            SimpleMethod::GET,
        );
        assert!(matches!(huge_length, Err(TransportError::MalformedResponse(_))));

        let huge_chunk = parse(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nabc\r\n0\r\n\r\n",
            SimpleMethod::GET,
        );
        assert!(matches!(huge_chunk, Err(TransportError::MalformedResponse(_))));
    }
}
