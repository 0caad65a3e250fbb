//! Streaming `multipart/form-data` decoder.
//!
//! The HTTP server hands over the request body in reads of whatever size the
//! socket produced. The decoder finds the configured file field and reports
//! its bytes as they arrive, holding back just enough of the tail to spot a
//! delimiter split across two reads.

use thiserror::Error;

/// RFC 2046 caps boundaries at 70 characters.
pub const MAX_BOUNDARY_LEN: usize = 70;

const MAX_PART_HEADERS: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultipartError {
    #[error("Missing multipart boundary")]
    MissingBoundary,
    #[error("multipart boundary too long")]
    BoundaryTooLong,
    #[error("part headers too large")]
    HeadersTooLarge,
    #[error("malformed multipart body")]
    Malformed,
    #[error("upload incomplete")]
    Truncated,
}

/// Decoded piece of the selected field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part<'a> {
    Start { filename: &'a str },
    Data(&'a [u8]),
    End,
}

/// Pulls the boundary out of a `Content-Type` header value.
pub fn boundary_from_content_type(
    content_type: &str,
) -> Result<heapless::String<MAX_BOUNDARY_LEN>, MultipartError> {
    let lower = content_type.to_ascii_lowercase();
    let start = lower
        .find("boundary=")
        .ok_or(MultipartError::MissingBoundary)?
        + "boundary=".len();
    let rest = &content_type[start..];

    let value = match rest.strip_prefix('"') {
        Some(quoted) => quoted
            .split('"')
            .next()
            .ok_or(MultipartError::MissingBoundary)?,
        None => rest
            .split(|c: char| c == ';' || c.is_ascii_whitespace())
            .next()
            .unwrap_or_default(),
    };
    if value.is_empty() {
        return Err(MultipartError::MissingBoundary);
    }

    let mut boundary = heapless::String::new();
    boundary
        .push_str(value)
        .map_err(|_| MultipartError::BoundaryTooLong)?;
    Ok(boundary)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the first delimiter.
    Preamble,
    /// Just past a delimiter, deciding between another part and the close.
    AfterDelimiter,
    PartHeaders,
    Body { selected: bool },
    Done,
}

pub struct MultipartDecoder {
    /// `\r\n--<boundary>`
    delimiter: Vec<u8>,
    field: String,
    state: State,
    buf: Vec<u8>,
    field_seen: bool,
}

impl MultipartDecoder {
    pub fn new(boundary: &str, field: &str) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());
        Self {
            delimiter,
            field: field.to_string(),
            state: State::Preamble,
            // A leading CRLF lets the first delimiter match like every other one
            buf: b"\r\n".to_vec(),
            field_seen: false,
        }
    }

    pub fn from_content_type(content_type: &str, field: &str) -> Result<Self, MultipartError> {
        let boundary = boundary_from_content_type(content_type)?;
        Ok(Self::new(&boundary, field))
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Consumes one read of the body.
    pub fn feed<S>(&mut self, chunk: &[u8], sink: &mut S) -> Result<(), MultipartError>
    where
        S: FnMut(Part<'_>),
    {
        if self.state == State::Done {
            return Ok(());
        }
        self.buf.extend_from_slice(chunk);
        while self.step(sink)? {}
        Ok(())
    }

    /// Called once the body is exhausted.
    pub fn finish(&mut self) -> Result<(), MultipartError> {
        if self.state == State::Done {
            return Ok(());
        }
        Err(MultipartError::Truncated)
    }

    /// Advances as far as the buffered bytes allow; `false` means more input
    /// is needed.
    fn step<S>(&mut self, sink: &mut S) -> Result<bool, MultipartError>
    where
        S: FnMut(Part<'_>),
    {
        match self.state {
            State::Preamble => match find(&self.buf, &self.delimiter) {
                Some(pos) => {
                    self.buf.drain(..pos + self.delimiter.len());
                    self.state = State::AfterDelimiter;
                    Ok(true)
                }
                None => {
                    let keep = self.delimiter.len() - 1;
                    if self.buf.len() > keep {
                        let drop = self.buf.len() - keep;
                        self.buf.drain(..drop);
                    }
                    Ok(false)
                }
            },
            State::AfterDelimiter => {
                if self.buf.len() < 2 {
                    return Ok(false);
                }
                if self.buf.starts_with(b"--") {
                    self.state = State::Done;
                    self.buf.clear();
                    return Ok(false);
                }
                if !self.buf.starts_with(b"\r\n") {
                    return Err(MultipartError::Malformed);
                }
                // The CRLF stays so an empty header block is still "\r\n\r\n"
                self.state = State::PartHeaders;
                Ok(true)
            }
            State::PartHeaders => {
                let Some(pos) = find(&self.buf, b"\r\n\r\n") else {
                    if self.buf.len() > MAX_PART_HEADERS {
                        return Err(MultipartError::HeadersTooLarge);
                    }
                    return Ok(false);
                };
                let headers = String::from_utf8_lossy(&self.buf[2.min(pos)..pos]).into_owned();
                self.buf.drain(..pos + 4);

                let name = header_param(&headers, "name");
                let selected = !self.field_seen && name.as_deref() == Some(self.field.as_str());
                if selected {
                    self.field_seen = true;
                    let filename = header_param(&headers, "filename").unwrap_or_default();
                    log::debug!("multipart: field '{}' file '{}'", self.field, filename);
                    sink(Part::Start {
                        filename: &filename,
                    });
                } else {
                    log::debug!("multipart: skipping field {:?}", name);
                }
                self.state = State::Body { selected };
                Ok(true)
            }
            State::Body { selected } => match find(&self.buf, &self.delimiter) {
                Some(pos) => {
                    if selected {
                        if pos > 0 {
                            sink(Part::Data(&self.buf[..pos]));
                        }
                        sink(Part::End);
                    }
                    self.buf.drain(..pos + self.delimiter.len());
                    self.state = State::AfterDelimiter;
                    Ok(true)
                }
                None => {
                    let keep = self.delimiter.len() - 1;
                    if self.buf.len() > keep {
                        let safe = self.buf.len() - keep;
                        if selected {
                            sink(Part::Data(&self.buf[..safe]));
                        }
                        self.buf.drain(..safe);
                    }
                    Ok(false)
                }
            },
            State::Done => Ok(false),
        }
    }
}

/// Value of `key="..."` in a part's Content-Disposition line.
fn header_param(headers: &str, key: &str) -> Option<String> {
    let disposition = headers.lines().find(|line| {
        line.to_ascii_lowercase()
            .starts_with("content-disposition:")
    })?;
    for param in disposition.split(';').skip(1) {
        let Some((k, v)) = param.trim().split_once('=') else {
            continue;
        };
        if k.eq_ignore_ascii_case(key) {
            return Some(v.trim().trim_matches('"').to_string());
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BOUNDARY: &str = "----railyard7MA4YWxkTrZu0gW";

    fn body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, filename, data) in parts {
            out.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match filename {
                Some(f) => out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, f
                    )
                    .as_bytes(),
                ),
                None => out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        out
    }

    #[derive(Debug, Default, PartialEq)]
    struct Collected {
        filename: Option<String>,
        data: Vec<u8>,
        ends: usize,
    }

    fn decode(body: &[u8], splits: &[usize]) -> (Collected, Result<(), MultipartError>) {
        let mut decoder = MultipartDecoder::new(BOUNDARY, "update");
        let mut got = Collected::default();
        let mut sink = |part: Part<'_>| match part {
            Part::Start { filename } => got.filename = Some(filename.to_string()),
            Part::Data(d) => got.data.extend_from_slice(d),
            Part::End => got.ends += 1,
        };
        let mut last = 0;
        let mut cuts: Vec<usize> = splits.iter().map(|s| s % (body.len() + 1)).collect();
        cuts.sort_unstable();
        cuts.push(body.len());
        for cut in cuts {
            if let Err(e) = decoder.feed(&body[last..cut], &mut sink) {
                return (got, Err(e));
            }
            last = cut;
        }
        let result = decoder.finish();
        (got, result)
    }

    #[test]
    fn test_boundary_from_content_type() {
        let b = boundary_from_content_type("multipart/form-data; boundary=abc123").unwrap();
        assert_eq!(b.as_str(), "abc123");
        let quoted =
            boundary_from_content_type("multipart/form-data; Boundary=\"a b\"; charset=x").unwrap();
        assert_eq!(quoted.as_str(), "a b");
        assert_eq!(
            boundary_from_content_type("multipart/form-data"),
            Err(MultipartError::MissingBoundary)
        );
        let long = format!("multipart/form-data; boundary={}", "x".repeat(71));
        assert_eq!(
            boundary_from_content_type(&long),
            Err(MultipartError::BoundaryTooLong)
        );
    }

    #[test]
    fn test_single_file_part() {
        let raw = body(&[("update", Some("firmware.bin"), b"\x00\x01binary\r\nimage")]);
        let (got, result) = decode(&raw, &[]);
        assert_eq!(result, Ok(()));
        assert_eq!(got.filename.as_deref(), Some("firmware.bin"));
        assert_eq!(got.data, b"\x00\x01binary\r\nimage");
        assert_eq!(got.ends, 1);
    }

    #[test]
    fn test_other_fields_are_skipped() {
        let raw = body(&[
            ("note", None, b"hello"),
            ("update", Some("littlefs.bin"), b"fsimage"),
            ("trailer", None, b"bye"),
        ]);
        let (got, result) = decode(&raw, &[7, 50, 90]);
        assert_eq!(result, Ok(()));
        assert_eq!(got.data, b"fsimage");
        assert_eq!(got.ends, 1);
    }

    #[test]
    fn test_empty_file_part() {
        let raw = body(&[("update", Some("empty.bin"), b"")]);
        let (got, result) = decode(&raw, &[]);
        assert_eq!(result, Ok(()));
        assert!(got.data.is_empty());
        assert_eq!(got.ends, 1);
    }

    #[test]
    fn test_truncated_body_is_an_error() {
        let raw = body(&[("update", Some("firmware.bin"), b"0123456789")]);
        let cut = raw.len() - 20;
        let (got, result) = decode(&raw[..cut], &[]);
        assert_eq!(result, Err(MultipartError::Truncated));
        assert_eq!(got.ends, 0);
    }

    #[test]
    fn test_missing_field_yields_no_events() {
        let raw = body(&[("other", Some("x.bin"), b"data")]);
        let (got, result) = decode(&raw, &[]);
        assert_eq!(result, Ok(()));
        assert_eq!(got, Collected::default());
    }

    #[test]
    fn test_preamble_is_ignored() {
        let mut raw = b"this is a preamble\r\n".to_vec();
        raw.extend(body(&[("update", Some("a.bin"), b"abc")]));
        let (got, result) = decode(&raw, &[3]);
        assert_eq!(result, Ok(()));
        assert_eq!(got.data, b"abc");
    }

    #[test]
    fn test_garbage_after_delimiter_is_malformed() {
        let raw = format!("--{}XX", BOUNDARY);
        let (_, result) = decode(raw.as_bytes(), &[]);
        assert_eq!(result, Err(MultipartError::Malformed));
    }

    proptest! {
        #[test]
        fn prop_split_invariance(
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
            splits in proptest::collection::vec(any::<usize>(), 0..16),
        ) {
            let raw = body(&[("update", Some("image.bin"), &payload)]);
            let (got, result) = decode(&raw, &splits);
            prop_assert_eq!(result, Ok(()));
            prop_assert_eq!(got.data, payload);
            prop_assert_eq!(got.ends, 1);
        }
    }
}
