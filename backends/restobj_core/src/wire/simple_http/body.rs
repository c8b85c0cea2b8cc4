use std::io::{self, Read, Write};

use super::{set_header, SimpleHeader, SimpleHeaders, SimpleMethod, TransportError};

/// Largest frame written when sending a chunked body.
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Body of an outgoing request.
pub enum Payload {
    Empty,

    /// Sent with a `Content-Length`.
    Bytes(Vec<u8>),

    /// Sent with identity transfer bounded by `size` when it is known and
    /// `chunked` is false, otherwise with chunked transfer coding.
    Stream {
        reader: Box<dyn Read + Send>,
        size: Option<u64>,
        chunked: bool,
        consumed: bool,
    },
}

impl core::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Payload::Empty"),
            Self::Bytes(data) => write!(f, "Payload::Bytes({} bytes)", data.len()),
            Self::Stream { size, chunked, .. } => {
                write!(f, "Payload::Stream(size={size:?}, chunked={chunked})")
            }
        }
    }
}

impl Payload {
    #[must_use]
    pub fn uses_chunked_coding(&self) -> bool {
        match self {
            Self::Stream { size, chunked, .. } => *chunked || size.is_none(),
            _ => false,
        }
    }

    fn framing_headers(&self, method: SimpleMethod, headers: &mut SimpleHeaders) {
        match self {
            Self::Empty => {
                if matches!(method, SimpleMethod::POST | SimpleMethod::PUT) {
                    set_header(headers, SimpleHeader::CONTENT_LENGTH, "0");
                }
            }
            Self::Bytes(data) => {
                set_header(headers, SimpleHeader::CONTENT_LENGTH, data.len().to_string());
            }
            Self::Stream { size, .. } => {
                if self.uses_chunked_coding() {
                    set_header(headers, SimpleHeader::TRANSFER_ENCODING, "chunked");
                } else if let Some(size) = size {
                    set_header(headers, SimpleHeader::CONTENT_LENGTH, size.to_string());
                }
            }
        }
    }

    fn write_to<W: Write>(&mut self, writer: &mut W) -> Result<(), TransportError> {
        let chunked = self.uses_chunked_coding();
        match self {
            Self::Empty => Ok(()),
            Self::Bytes(data) => Ok(writer.write_all(data)?),
            Self::Stream {
                reader,
                size,
                consumed,
                ..
            } => {
                if *consumed {
                    return Err(TransportError::BodyRead(
                        "stream payload was already consumed by an earlier attempt".into(),
                    ));
                }
                *consumed = true;
                if chunked {
                    write_chunked(reader, writer)
                } else {
                    let expected = size.unwrap_or_default();
                    let copied = copy_exact(&mut reader.take(expected), writer)?;
                    if copied < expected {
                        return Err(TransportError::BodyRead(format!(
                            "stream ended after {copied} of {expected} declared bytes"
                        )));
                    }
                    Ok(())
                }
            }
        }
    }
}

/// Encodes one chunk frame: hex size line, data, CRLF.
#[must_use]
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut frame = format!("{:X}\r\n", data.len()).into_bytes();
    frame.extend_from_slice(data);
    frame.extend_from_slice(b"\r\n");
    frame
}

fn write_chunked<R: Read + ?Sized, W: Write>(
    reader: &mut R,
    writer: &mut W,
) -> Result<(), TransportError> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = fill_buffer(reader, &mut buffer)?;
        if read == 0 {
            break;
        }
        writer.write_all(&encode_chunk(&buffer[..read]))?;
        if read < buffer.len() {
            break;
        }
    }
    writer.write_all(b"0\r\n\r\n")?;
    Ok(())
}

/// Reads until the buffer is full or the reader is exhausted.
fn fill_buffer<R: Read + ?Sized>(reader: &mut R, buffer: &mut [u8]) -> Result<usize, TransportError> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(TransportError::BodyRead(err.to_string())),
        }
    }
    Ok(filled)
}

fn copy_exact<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> Result<u64, TransportError> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;
    loop {
        let read = fill_buffer(reader, &mut buffer)?;
        if read == 0 {
            return Ok(copied);
        }
        writer.write_all(&buffer[..read])?;
        copied += read as u64;
    }
}

/// Raw content sent as a request body, as opposed to a serialized document.
///
/// ```no_run
/// use restobj_core::wire::simple_http::HttpData;
///
/// let upload = HttpData::bytes(b"hello".to_vec(), "text/plain");
/// let streamed = HttpData::stream(std::io::Cursor::new(vec![0u8; 10]), None, "application/octet-stream");
/// ```
#[derive(Debug)]
pub struct HttpData {
    pub payload: Payload,
    pub content_type: String,
    pub headers: SimpleHeaders,
}

impl HttpData {
    pub fn bytes(data: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            payload: Payload::Bytes(data),
            content_type: content_type.into(),
            headers: SimpleHeaders::new(),
        }
    }

    pub fn stream<R>(reader: R, size: Option<u64>, content_type: impl Into<String>) -> Self
    where
        R: Read + Send + 'static,
    {
        Self {
            payload: Payload::Stream {
                reader: Box::new(reader),
                size,
                chunked: false,
                consumed: false,
            },
            content_type: content_type.into(),
            headers: SimpleHeaders::new(),
        }
    }

    /// Forces chunked transfer coding even when the size is known.
    #[must_use]
    pub fn chunked(mut self) -> Self {
        if let Payload::Stream { chunked, .. } = &mut self.payload {
            *chunked = true;
        }
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<SimpleHeader>, value: impl Into<String>) -> Self {
        set_header(&mut self.headers, name, value);
        self
    }
}

/// Writes a full HTTP/1.1 request: request line, headers with framing
/// derived from the payload, and the body.
///
/// # Errors
///
/// Socket failures are returned as I/O errors; failures reading a stream
/// payload as [`TransportError::BodyRead`].
pub fn write_request<W: Write>(
    writer: &mut W,
    method: SimpleMethod,
    path: &str,
    headers: &SimpleHeaders,
    payload: &mut Payload,
) -> Result<(), TransportError> {
    let mut headers = headers.clone();
    headers.remove(&SimpleHeader::CONTENT_LENGTH);
    headers.remove(&SimpleHeader::TRANSFER_ENCODING);
    payload.framing_headers(method, &mut headers);

    let mut head = format!("{method} {path} HTTP/1.1\r\n");
    for (name, values) in &headers {
        for value in values {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
    }
    head.push_str("\r\n");

    writer.write_all(head.as_bytes())?;
    payload.write_to(writer)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn render(method: SimpleMethod, payload: &mut Payload) -> String {
        let mut out = Vec::new();
        let mut headers = SimpleHeaders::new();
        set_header(&mut headers, SimpleHeader::HOST, "localhost");
        write_request(&mut out, method, "/api", &headers, payload).expect("should write");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn test_encode_chunk_uses_hex_size() {
        let frame = encode_chunk(&[b'a'; 26]);
        assert!(frame.starts_with(b"1A\r\naaaa"));
        assert!(frame.ends_with(b"a\r\n"));
        assert_eq!(frame.len(), 4 + 26 + 2);
    }

    /// WHY: Byte payloads must be framed by Content-Length
    /// WHAT: The rendered request carries the length and the raw bytes
    #[test]
    fn test_bytes_payload_uses_content_length() {
        let rendered = render(SimpleMethod::PUT, &mut Payload::Bytes(b"{\"a\":1}".to_vec()));
        assert!(rendered.starts_with("PUT /api HTTP/1.1\r\n"));
        assert!(rendered.contains("CONTENT-LENGTH: 7\r\n"));
        assert!(rendered.ends_with("\r\n\r\n{\"a\":1}"));
    }

    #[test]
    fn test_empty_post_sends_zero_length() {
        let rendered = render(SimpleMethod::POST, &mut Payload::Empty);
        assert!(rendered.contains("CONTENT-LENGTH: 0\r\n"));

        let rendered = render(SimpleMethod::GET, &mut Payload::Empty);
        assert!(!rendered.contains("CONTENT-LENGTH"));
    }

    /// WHY: Streams of unknown size can only be framed with chunked coding
    /// WHAT: The body is emitted as hex-sized frames closed by a zero frame
    #[test]
    fn test_unsized_stream_is_chunked() {
        let mut payload = HttpData::stream(Cursor::new(b"hello world".to_vec()), None, "text/plain").payload;
        let rendered = render(SimpleMethod::POST, &mut payload);
        assert!(rendered.contains("TRANSFER-ENCODING: chunked\r\n"));
        assert!(rendered.ends_with("\r\n\r\nB\r\nhello world\r\n0\r\n\r\n"));
    }

    #[test]
    fn test_sized_stream_uses_identity_transfer() {
        let mut payload = HttpData::stream(Cursor::new(b"hello world".to_vec()), Some(5), "text/plain").payload;
        let rendered = render(SimpleMethod::POST, &mut payload);
        assert!(rendered.contains("CONTENT-LENGTH: 5\r\n"));
        assert!(rendered.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn test_short_stream_is_an_error() {
        let mut payload = HttpData::stream(Cursor::new(b"abc".to_vec()), Some(10), "text/plain").payload;
        let mut out = Vec::new();
        let result = write_request(&mut out, SimpleMethod::POST, "/", &SimpleHeaders::new(), &mut payload);
        assert!(matches!(result, Err(TransportError::BodyRead(_))));
    }

    #[test]
    fn test_stream_cannot_be_sent_twice() {
        let mut payload = HttpData::stream(Cursor::new(b"abc".to_vec()), None, "text/plain")
            .chunked()
            .payload;
        let mut out = Vec::new();
        write_request(&mut out, SimpleMethod::POST, "/", &SimpleHeaders::new(), &mut payload)
            .expect("first attempt writes");
        let second = write_request(&mut out, SimpleMethod::POST, "/", &SimpleHeaders::new(), &mut payload);
        assert!(matches!(second, Err(TransportError::BodyRead(_))));
    }
}
