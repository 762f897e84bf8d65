//! Line framing for resource streams.
//!
//! The server writes one JSON document per line. Server-sent-events framing
//! is accepted as well: `data:` prefixes are stripped, while comments
//! (`:keep-alive`) and the `event:`, `id:` and `retry:` fields carry nothing
//! for this client and are skipped.
//!
//! [`LineCodec`] splits the body into raw lines. A line over the length limit
//! is reported as [`Line::Oversized`] instead of an error, so one bad line
//! never ends the stream.

use bytes::{Bytes, BytesMut};
use serde_json::Value;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder};

/// SSE fields that never carry an event payload.
const IGNORED_FIELDS: [&str; 3] = ["event:", "id:", "retry:"];

/// Extract the payload text of one line, or `None` if the line carries no
/// event.
pub fn payload(line: &str) -> Option<&str> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() || line.starts_with(':') {
        return None;
    }
    if let Some(data) = line.strip_prefix("data:") {
        let data = data.strip_prefix(' ').unwrap_or(data);
        return (!data.trim().is_empty()).then_some(data);
    }
    if IGNORED_FIELDS.iter().any(|field| line.starts_with(field)) {
        return None;
    }
    Some(line)
}

/// Parse one line into an event.
///
/// `None` for lines without a payload; `Some(Err)` when the payload is not
/// JSON.
pub fn parse_event(line: &str) -> Option<Result<Value, serde_json::Error>> {
    payload(line).map(serde_json::from_str)
}

/// One framed line of a stream body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Raw bytes of a line, without the trailing `\n`.
    Text(Bytes),
    /// A line over the limit; its bytes were discarded.
    Oversized,
}

/// Newline framing with a per-line limit that survives over-long lines.
#[derive(Debug, Clone)]
pub struct LineCodec {
    inner: AnyDelimiterCodec,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), max_length),
        }
    }

    fn map(result: Result<Option<Bytes>, AnyDelimiterCodecError>) -> Result<Option<Line>, std::io::Error> {
        match result {
            Ok(chunk) => Ok(chunk.map(Line::Text)),
            // The inner codec keeps discarding up to the next newline.
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => Ok(Some(Line::Oversized)),
            Err(AnyDelimiterCodecError::Io(e)) => Err(e),
        }
    }
}

impl Decoder for LineCodec {
    type Item = Line;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, std::io::Error> {
        Self::map(self.inner.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, std::io::Error> {
        Self::map(self.inner.decode_eof(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_all(codec: &mut LineCodec, input: &[u8]) -> Vec<Line> {
        let mut buf = BytesMut::from(input);
        let mut lines = Vec::new();
        while let Some(line) = codec.decode_eof(&mut buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_codec_reports_oversized_line_and_continues() {
        let mut codec = LineCodec::new(8);
        let lines = decode_all(&mut codec, b"short\nwaytoolongforthelimit\nnext\ntail");
        assert_eq!(
            lines,
            vec![
                Line::Text(Bytes::from_static(b"short")),
                Line::Oversized,
                Line::Text(Bytes::from_static(b"next")),
                Line::Text(Bytes::from_static(b"tail")),
            ]
        );
    }

    #[test]
    fn test_codec_passes_invalid_utf8_through_as_bytes() {
        let mut codec = LineCodec::new(64);
        let lines = decode_all(&mut codec, b"\xff\xfe\nok\n");
        assert_eq!(
            lines,
            vec![
                Line::Text(Bytes::from_static(b"\xff\xfe")),
                Line::Text(Bytes::from_static(b"ok")),
            ]
        );
    }

    #[test]
    fn test_plain_json_line() {
        assert_eq!(
            parse_event(r#"{"level":"warn","msg":"port scan"}"#).unwrap().unwrap(),
            json!({"level": "warn", "msg": "port scan"})
        );
    }

    #[test]
    fn test_sse_data_prefix_is_stripped() {
        assert_eq!(payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(payload("data:{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(payload("data: {\"a\":1}\r"), Some("{\"a\":1}"));
    }

    #[test]
    fn test_non_payload_lines_are_skipped() {
        for line in ["", "   ", ":keep-alive", "event: log", "id: 42", "retry: 1000", "data:", "data:  "] {
            assert_eq!(payload(line), None, "line {line:?}");
        }
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        assert!(parse_event("data: {not json").unwrap().is_err());
        assert!(parse_event("plain text").unwrap().is_err());
    }
}
