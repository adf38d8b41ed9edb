//! Frame codec for the sparse stream.
//!
//! Every frame begins with a fixed-size header:
//!
//! ```text
//! <kind:4> <space> <start:16 hex> <space> <length:16 hex> CR LF
//! ```
//!
//! `kind` is one of `meta`, `data`, `zero`, `stop`. `start` and `length`
//! are zero-padded lowercase hexadecimal u64 fields, so the header is
//! always exactly 40 bytes and can be consumed with a single fixed-size
//! read. A `meta` body is JSON followed by CRLF, a `data` body is raw
//! bytes followed by CRLF, and `zero`/`stop` carry no body at all.
//!
//! The codec is stateless; the stream grammar (`meta (data|zero)* stop`)
//! is enforced by the engines.

use std::fmt;
use std::io::{self, Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};

/// Size of every frame header in bytes: 4 + 1 + 16 + 1 + 16 + 2.
pub const HEADER_SIZE: usize = 40;

/// Maximum accepted meta payload. Real meta documents are under a
/// hundred bytes; anything larger is a corrupt or hostile stream.
pub const MAX_META_SIZE: u64 = 1024 * 1024;

const CRLF: &[u8; 2] = b"\r\n";

// =============================================================================
// Frame kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Meta,
    Data,
    Zero,
    Stop,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meta => "meta",
            Self::Data => "data",
            Self::Zero => "zero",
            Self::Stop => "stop",
        }
    }

    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        match b {
            b"meta" => Some(Self::Meta),
            b"data" => Some(Self::Data),
            b"zero" => Some(Self::Zero),
            b"stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Header encoding and decoding
// =============================================================================

/// A decoded frame header.
///
/// For `stop` frames `start` and `length` are reserved; they are emitted
/// as zero and ignored on parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub start: u64,
    pub length: u64,
}

/// Emit one frame header to `sink`.
pub fn write_header<W: Write + ?Sized>(
    sink: &mut W,
    kind: FrameKind,
    start: u64,
    length: u64,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE);
    buf.put_slice(kind.as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(format!("{start:016x}").as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(format!("{length:016x}").as_bytes());
    buf.put_slice(CRLF);
    sink.write_all(&buf)?;
    Ok(())
}

/// Read one frame header from `source`.
///
/// Consumes exactly [`HEADER_SIZE`] bytes. A stream that ends inside the
/// header, an unknown kind, a non-hex field or a missing CRLF terminator
/// all fail with `MalformedFrame`.
pub fn read_header<R: Read + ?Sized>(source: &mut R) -> Result<FrameHeader> {
    let mut buf = [0u8; HEADER_SIZE];
    source.read_exact(&mut buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            StreamError::MalformedFrame("stream ended inside a frame header".to_string())
        } else {
            StreamError::Io(err)
        }
    })?;

    if buf[4] != b' ' || buf[21] != b' ' {
        return Err(StreamError::MalformedFrame(format!(
            "bad field separators in header {:?}",
            String::from_utf8_lossy(&buf)
        )));
    }
    if &buf[38..40] != CRLF {
        return Err(StreamError::MalformedFrame(
            "frame header is not CRLF terminated".to_string(),
        ));
    }

    let kind = FrameKind::from_bytes(&buf[0..4]).ok_or_else(|| {
        StreamError::MalformedFrame(format!(
            "unknown frame kind {:?}",
            String::from_utf8_lossy(&buf[0..4])
        ))
    })?;
    let start = parse_hex(&buf[5..21])?;
    let length = parse_hex(&buf[22..38])?;

    Ok(FrameHeader {
        kind,
        start,
        length,
    })
}

fn parse_hex(field: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(field)
        .map_err(|_| StreamError::MalformedFrame("non-ASCII bytes in hex field".to_string()))?;
    u64::from_str_radix(text, 16).map_err(|_| {
        StreamError::MalformedFrame(format!("bad hex field {text:?} in frame header"))
    })
}

// =============================================================================
// Body helpers
// =============================================================================

/// Read exactly `length` bytes of frame body.
pub(crate) fn read_exact<R: Read + ?Sized>(source: &mut R, length: usize) -> Result<Bytes> {
    let mut buf = vec![0u8; length];
    source.read_exact(&mut buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            StreamError::ShortIo(format!("stream ended inside a {length} byte frame body"))
        } else {
            StreamError::Io(err)
        }
    })?;
    Ok(buf.into())
}

/// Emit the CRLF terminator that follows a `meta` or `data` body.
pub(crate) fn write_crlf<W: Write + ?Sized>(sink: &mut W) -> Result<()> {
    sink.write_all(CRLF)?;
    Ok(())
}

/// Consume the CRLF terminator that follows a `meta` or `data` body.
pub(crate) fn expect_crlf<R: Read + ?Sized>(source: &mut R) -> Result<()> {
    let mut buf = [0u8; 2];
    source.read_exact(&mut buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            StreamError::ShortIo("stream ended before frame terminator".to_string())
        } else {
            StreamError::Io(err)
        }
    })?;
    if &buf != CRLF {
        return Err(StreamError::MalformedFrame(
            "missing CRLF after frame body".to_string(),
        ));
    }
    Ok(())
}

// =============================================================================
// Meta document
// =============================================================================

/// The JSON payload of the leading `meta` frame.
///
/// Emitted with all keys present; parsed leniently. Unknown keys are
/// ignored and only `virtual-size` is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Virtual size of the image in bytes.
    #[serde(rename = "virtual-size")]
    pub virtual_size: u64,

    /// Sum of the data extent lengths actually emitted in the stream.
    #[serde(rename = "data-size", default)]
    pub data_size: u64,

    /// Local ISO-8601 creation time. Informational only.
    #[serde(default)]
    pub date: String,

    /// Whether the stream covers only extents changed since the previous
    /// checkpoint.
    #[serde(default)]
    pub incremental: bool,
}

impl Meta {
    pub fn new(virtual_size: u64, data_size: u64, incremental: bool) -> Self {
        Self {
            virtual_size,
            data_size,
            date: chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
            incremental,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let buf = serde_json::to_vec(self)
            .map_err(|err| StreamError::MalformedFrame(format!("encoding meta: {err}")))?;
        Ok(buf.into())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|err| StreamError::MalformedFrame(format!("invalid meta payload: {err}")))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(kind: FrameKind, start: u64, length: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        write_header(&mut buf, kind, start, length).unwrap();
        buf
    }

    #[test]
    fn test_header_is_fixed_size() {
        for kind in [
            FrameKind::Meta,
            FrameKind::Data,
            FrameKind::Zero,
            FrameKind::Stop,
        ] {
            assert_eq!(header_bytes(kind, 0, 0).len(), HEADER_SIZE);
            assert_eq!(header_bytes(kind, u64::MAX, u64::MAX).len(), HEADER_SIZE);
        }
    }

    #[test]
    fn test_header_shape() {
        let buf = header_bytes(FrameKind::Data, 0x40100000, 0x1000);
        assert_eq!(buf, b"data 0000000040100000 0000000000001000\r\n");
    }

    #[test]
    fn test_header_roundtrip() {
        for (kind, start, length) in [
            (FrameKind::Meta, 0, 90),
            (FrameKind::Data, 0x40100000, 0x1000),
            (FrameKind::Zero, 0x100000, 0x4000000),
            (FrameKind::Stop, 0, 0),
            (FrameKind::Data, u64::MAX, u64::MAX),
        ] {
            let buf = header_bytes(kind, start, length);
            let header = read_header(&mut buf.as_slice()).unwrap();
            assert_eq!(header, FrameHeader {
                kind,
                start,
                length
            });
        }
    }

    #[test]
    fn test_header_unknown_kind() {
        let err = read_header(&mut &b"blob 0000000000000000 0000000000000000\r\n"[..])
            .unwrap_err();
        assert!(matches!(err, StreamError::MalformedFrame(_)), "{err}");
    }

    #[test]
    fn test_header_bad_hex() {
        let err = read_header(&mut &b"data 00000000000000zz 0000000000000000\r\n"[..])
            .unwrap_err();
        assert!(matches!(err, StreamError::MalformedFrame(_)), "{err}");
    }

    #[test]
    fn test_header_missing_crlf() {
        let err = read_header(&mut &b"data 0000000000000000 0000000000000000XX"[..])
            .unwrap_err();
        assert!(matches!(err, StreamError::MalformedFrame(_)), "{err}");
    }

    #[test]
    fn test_header_truncated() {
        let err = read_header(&mut &b"data 00000000"[..]).unwrap_err();
        assert!(matches!(err, StreamError::MalformedFrame(_)), "{err}");
    }

    #[test]
    fn test_expect_crlf() {
        expect_crlf(&mut &b"\r\n"[..]).unwrap();

        let err = expect_crlf(&mut &b"xy"[..]).unwrap_err();
        assert!(matches!(err, StreamError::MalformedFrame(_)), "{err}");

        let err = expect_crlf(&mut &b"\r"[..]).unwrap_err();
        assert!(matches!(err, StreamError::ShortIo(_)), "{err}");
    }

    #[test]
    fn test_read_exact_short() {
        let err = read_exact(&mut &b"abc"[..], 6).unwrap_err();
        assert!(matches!(err, StreamError::ShortIo(_)), "{err}");
    }

    #[test]
    fn test_meta_roundtrip() {
        let meta = Meta::new(1 << 30, 4096, true);
        let payload = meta.encode().unwrap();
        let decoded = Meta::decode(&payload).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_meta_emits_all_keys() {
        let payload = Meta::new(6, 6, false).encode().unwrap();
        let text = std::str::from_utf8(&payload).unwrap();
        for key in ["virtual-size", "data-size", "date", "incremental"] {
            assert!(text.contains(&format!("\"{key}\"")), "{text}");
        }
    }

    #[test]
    fn test_meta_ignores_unknown_keys() {
        let meta = Meta::decode(
            br#"{"virtual-size": 6, "data-size": 6, "date": "", "incremental": false,
                "checkpoint": "abc", "backup-mode": "full"}"#,
        )
        .unwrap();
        assert_eq!(meta.virtual_size, 6);
    }

    #[test]
    fn test_meta_only_virtual_size_required() {
        let meta = Meta::decode(br#"{"virtual-size": 42}"#).unwrap();
        assert_eq!(meta.virtual_size, 42);
        assert_eq!(meta.data_size, 0);
        assert!(!meta.incremental);

        let err = Meta::decode(br#"{"data-size": 42}"#).unwrap_err();
        assert!(matches!(err, StreamError::MalformedFrame(_)), "{err}");
    }
}
