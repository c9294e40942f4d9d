//! STOMP 1.0 wire codec.
//!
//! [`StompCodec`] plugs into `tokio_util::codec::Framed` to turn a byte
//! stream into [`StompFrame`]s and back. The format is:
//!
//! ```text
//! COMMAND\n
//! name:value\n
//! \n
//! body\0
//! ```
//!
//! EOLs between frames are skipped, `\r\n` line endings are accepted, and a
//! `content-length` header allows bodies that contain NUL bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;
use crate::frame::{Command, Headers, StompFrame, header};

/// Default maximum frame size in bytes (10 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Frame codec with a size limit.
///
/// The limit applies to the whole frame (command, headers, body and
/// terminator) and is enforced while the frame is still incomplete, so a
/// peer cannot make the broker buffer an unbounded header block or body.
#[derive(Debug, Clone, Copy)]
pub struct StompCodec {
    max_frame_size: usize,
}

impl StompCodec {
    /// Creates a codec with the given frame size limit.
    #[must_use]
    pub const fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Returns the configured frame size limit.
    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    const fn check_size(&self, size: usize) -> Result<(), FrameError> {
        if size > self.max_frame_size {
            Err(FrameError::FrameTooLarge {
                size,
                limit: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for StompCodec {
    type Item = StompFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StompFrame>, FrameError> {
        // Heart-beats and the optional EOL after a NUL terminator.
        let leading = src
            .iter()
            .take_while(|&&b| b == b'\n' || b == b'\r')
            .count();
        src.advance(leading);

        if src.is_empty() {
            return Ok(None);
        }

        let Some((head_end, body_start)) = find_head_end(src) else {
            self.check_size(src.len())?;
            return Ok(None);
        };

        let (command, headers) = parse_head(&src[..head_end])?;

        let content_length = match headers.get(header::CONTENT_LENGTH) {
            Some(raw) => Some(raw.parse::<usize>().map_err(|_| {
                FrameError::Malformed(format!("invalid content-length: {raw:?}"))
            })?),
            None => None,
        };

        let body_end = if let Some(len) = content_length {
            let total = body_start
                .checked_add(len)
                .and_then(|n| n.checked_add(1))
                .ok_or_else(|| FrameError::Malformed(format!("content-length overflow: {len}")))?;
            self.check_size(total)?;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }
            if src[body_start + len] != 0 {
                return Err(FrameError::Malformed(
                    "body is not followed by NUL after content-length bytes".into(),
                ));
            }
            body_start + len
        } else {
            match src[body_start..].iter().position(|&b| b == 0) {
                Some(offset) => body_start + offset,
                None => {
                    self.check_size(src.len())?;
                    return Ok(None);
                }
            }
        };
        self.check_size(body_end + 1)?;

        let mut raw = src.split_to(body_end + 1);
        let mut body = raw.split_off(body_start);
        body.truncate(body.len() - 1);

        Ok(Some(StompFrame {
            command,
            headers,
            body: body.freeze(),
        }))
    }
}

impl Encoder<StompFrame> for StompCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: StompFrame, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(&frame, dst);
        Ok(())
    }
}

/// Appends the wire encoding of `frame` to `dst`.
pub fn encode_frame(frame: &StompFrame, dst: &mut BytesMut) {
    dst.reserve(frame.body.len() + 64);
    dst.put_slice(frame.command.as_str().as_bytes());
    dst.put_u8(b'\n');
    for (name, value) in frame.headers.iter() {
        put_header_text(dst, name);
        dst.put_u8(b':');
        put_header_text(dst, value);
        dst.put_u8(b'\n');
    }
    if !frame.body.is_empty() && !frame.headers.contains(header::CONTENT_LENGTH) {
        dst.put_slice(header::CONTENT_LENGTH.as_bytes());
        dst.put_u8(b':');
        dst.put_slice(frame.body.len().to_string().as_bytes());
        dst.put_u8(b'\n');
    }
    dst.put_u8(b'\n');
    dst.put_slice(&frame.body);
    dst.put_u8(0);
}

/// Header text may not contain line breaks; they would end the header block.
fn put_header_text(dst: &mut BytesMut, text: &str) {
    for b in text.bytes() {
        dst.put_u8(if b == b'\n' || b == b'\r' { b' ' } else { b });
    }
}

impl StompFrame {
    /// Encodes the frame into a standalone buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        encode_frame(self, &mut buf);
        buf.freeze()
    }

    /// Decodes exactly one frame from `bytes`.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] if the bytes are not a complete, valid frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut buf = BytesMut::from(bytes);
        StompCodec::new(usize::MAX)
            .decode(&mut buf)?
            .ok_or_else(|| FrameError::Malformed("incomplete frame".into()))
    }
}

/// Locates the blank line ending the command/header block.
///
/// Returns `(head_end, body_start)`.
fn find_head_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut from = 0;
    while let Some(offset) = buf[from..].iter().position(|&b| b == b'\n') {
        let nl = from + offset;
        match buf.get(nl + 1) {
            Some(b'\n') => return Some((nl, nl + 2)),
            Some(b'\r') if buf.get(nl + 2) == Some(&b'\n') => return Some((nl, nl + 3)),
            Some(_) => from = nl + 1,
            None => return None,
        }
    }
    None
}

fn parse_head(head: &[u8]) -> Result<(Command, Headers), FrameError> {
    let text = std::str::from_utf8(head).map_err(|_| FrameError::InvalidUtf8)?;
    let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));

    let command: Command = lines.next().unwrap_or_default().trim_end().parse()?;

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::Malformed(format!("header line without ':': {line:?}")))?;
        headers.insert_if_absent(name.trim(), value.trim());
    }
    Ok((command, headers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_all(input: &[u8]) -> Result<Vec<StompFrame>, FrameError> {
        let mut codec = StompCodec::default();
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    #[test]
    fn decodes_simple_send() {
        let frames = decode_all(b"SEND\ndestination:/queue/a\n\nhello\0").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Send);
        assert_eq!(frames[0].destination(), Some("/queue/a"));
        assert_eq!(&frames[0].body[..], b"hello");
    }

    #[test]
    fn decodes_frame_without_headers() {
        let frames = decode_all(b"CONNECT\n\n\0").unwrap();
        assert_eq!(frames[0].command, Command::Connect);
        assert!(frames[0].headers.is_empty());
        assert!(frames[0].body.is_empty());
    }

    #[test]
    fn skips_eols_between_frames() {
        let frames = decode_all(b"\n\r\nBEGIN\ntransaction:t1\n\n\0\n\nCOMMIT\ntransaction:t1\n\n\0\n")
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].command, Command::Commit);
        assert_eq!(frames[1].transaction(), Some("t1"));
    }

    #[test]
    fn accepts_crlf_line_endings() {
        let frames = decode_all(b"SEND\r\ndestination:/topic/x\r\n\r\nbody\0").unwrap();
        assert_eq!(frames[0].destination(), Some("/topic/x"));
        assert_eq!(&frames[0].body[..], b"body");
    }

    #[test]
    fn header_values_are_trimmed_and_may_contain_colons() {
        let frames = decode_all(b"SEND\ndestination: /queue/a \nx-url:http://h:1/\n\n\0").unwrap();
        assert_eq!(frames[0].destination(), Some("/queue/a"));
        assert_eq!(frames[0].header("x-url"), Some("http://h:1/"));
    }

    #[test]
    fn first_repeated_header_wins() {
        let frames = decode_all(b"SEND\ndestination:/queue/a\ndestination:/queue/b\n\n\0").unwrap();
        assert_eq!(frames[0].destination(), Some("/queue/a"));
    }

    #[test]
    fn content_length_allows_nul_in_body() {
        let frames = decode_all(b"SEND\ndestination:/queue/a\ncontent-length:3\n\na\0b\0").unwrap();
        assert_eq!(&frames[0].body[..], b"a\0b");
    }

    #[test]
    fn content_length_without_trailing_nul_is_malformed() {
        let err = decode_all(b"SEND\ncontent-length:1\n\nab\0").unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn invalid_content_length_is_malformed() {
        let err = decode_all(b"SEND\ncontent-length:abc\n\n\0").unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn partial_frame_waits_for_more_data() {
        let mut codec = StompCodec::default();
        let mut buf = BytesMut::from(&b"SEND\ndestination:/queue/a\n\nhel"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"lo\0");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame.body[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_content_length_body_waits() {
        let mut codec = StompCodec::default();
        let mut buf = BytesMut::from(&b"SEND\ncontent-length:4\n\nab"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\0d\0");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame.body[..], b"ab\0d");
    }

    #[test]
    fn unknown_command_is_rejected() {
        let err = decode_all(b"FOO\n\n\0").unwrap_err();
        assert!(matches!(err, FrameError::UnknownCommand(c) if c == "FOO"));
    }

    #[test]
    fn header_without_colon_is_malformed() {
        let err = decode_all(b"SEND\nnocolon\n\n\0").unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn invalid_utf8_header_is_rejected() {
        let err = decode_all(b"SEND\nx:\xff\xfe\n\n\0").unwrap_err();
        assert!(matches!(err, FrameError::InvalidUtf8));
    }

    #[test]
    fn oversized_incomplete_frame_is_rejected() {
        let mut codec = StompCodec::new(16);
        let mut buf = BytesMut::from(&b"SEND\ndestination:/queue/a-very-long-name"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { limit: 16, .. }));
    }

    #[test]
    fn oversized_content_length_is_rejected_before_buffering() {
        let mut codec = StompCodec::new(64);
        let mut buf = BytesMut::from(&b"SEND\ncontent-length:1000000\n\n"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { .. }));
    }

    #[test]
    fn encode_adds_content_length_for_body() {
        let frame = StompFrame::new(Command::Message)
            .with_header("destination", "/queue/a")
            .with_body("hi");
        let bytes = frame.to_bytes();
        assert_eq!(
            &bytes[..],
            b"MESSAGE\ndestination:/queue/a\ncontent-length:2\n\nhi\0"
        );
    }

    #[test]
    fn encode_without_body_has_no_content_length() {
        let bytes = StompFrame::receipt_for("r1").to_bytes();
        assert_eq!(&bytes[..], b"RECEIPT\nreceipt-id:r1\n\n\0");
    }

    #[test]
    fn encode_replaces_line_breaks_in_headers() {
        let frame = StompFrame::error("bad\nthing", "");
        assert_eq!(&frame.to_bytes()[..], b"ERROR\nmessage:bad thing\n\n\0");
    }

    #[test]
    fn from_bytes_rejects_incomplete_input() {
        assert!(StompFrame::from_bytes(b"SEND\n\nabc").is_err());
    }

    proptest! {
        #[test]
        fn decoder_never_panics(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let mut codec = StompCodec::new(256);
            let mut buf = BytesMut::from(&data[..]);
            while let Ok(Some(_)) = codec.decode(&mut buf) {}
        }

        #[test]
        fn arbitrary_bodies_survive_the_wire(body in proptest::collection::vec(any::<u8>(), 0..256)) {
            let frame = StompFrame::new(Command::Send)
                .with_header("destination", "/queue/p")
                .with_body(body.clone());
            let decoded = StompFrame::from_bytes(&frame.to_bytes()).unwrap();
            prop_assert_eq!(&decoded.body[..], &body[..]);
            prop_assert_eq!(decoded.destination(), Some("/queue/p"));
        }
    }
}
