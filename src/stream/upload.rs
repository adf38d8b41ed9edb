//! Upload engine: sparse stream to image.
//!
//! Parses a framed stream from a byte source, validates the leading meta
//! frame against the destination size before any write, then applies each
//! frame in stream order. The restorer does not depend on frame ordering;
//! every frame's effect is confined to its own address range. One flush
//! after the stop frame commits the result; error paths never flush.

use std::io::Read;

use tracing::debug;

use crate::client::ImageioClient;
use crate::error::{Result, StreamError};
use crate::stream::frame::{self, FrameKind, Meta, MAX_META_SIZE};
use crate::stream::TransferStats;

/// Upload engine.
#[derive(Debug, Default)]
pub struct Uploader;

impl Uploader {
    pub fn new() -> Self {
        Self
    }

    /// Apply the stream read from `source` to the image behind `client`.
    pub fn run<C, R>(&self, client: &mut C, source: &mut R) -> Result<TransferStats>
    where
        C: ImageioClient,
        R: Read,
    {
        let meta = read_meta(source)?;
        debug!(
            virtual_size = meta.virtual_size,
            data_size = meta.data_size,
            incremental = meta.incremental,
            "stream meta"
        );

        let destination = client.size()?;
        if meta.virtual_size > destination {
            return Err(StreamError::DestinationTooSmall {
                image: meta.virtual_size,
                destination,
            });
        }

        let mut stats = TransferStats::default();
        loop {
            let header = frame::read_header(source)?;
            match header.kind {
                FrameKind::Zero => {
                    client.zero(header.start, header.length)?;
                    stats.zero_frames += 1;
                    stats.zero_bytes += header.length;
                }
                FrameKind::Data => {
                    client.read_from(source, header.start, header.length)?;
                    frame::expect_crlf(source)?;
                    stats.data_frames += 1;
                    stats.data_bytes += header.length;
                }
                // Start and length of a stop frame are reserved; ignored.
                FrameKind::Stop => break,
                FrameKind::Meta => {
                    return Err(StreamError::UnexpectedFrame("meta".to_string()));
                }
            }
        }

        client.flush()?;
        Ok(stats)
    }
}

/// Read and decode the leading meta frame.
fn read_meta<R: Read>(source: &mut R) -> Result<Meta> {
    let header = frame::read_header(source)?;
    if header.kind != FrameKind::Meta {
        return Err(StreamError::MissingMeta);
    }
    if header.length > MAX_META_SIZE {
        return Err(StreamError::MalformedFrame(format!(
            "meta frame of {} bytes exceeds limit of {MAX_META_SIZE}",
            header.length
        )));
    }
    let payload = frame::read_exact(source, header.length as usize)?;
    frame::expect_crlf(source)?;
    Meta::decode(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use crate::stream::frame::write_header;

    #[test]
    fn test_upload_requires_leading_meta() {
        let mut stream = Vec::new();
        write_header(&mut stream, FrameKind::Data, 0, 4).unwrap();
        stream.extend_from_slice(b"abcd\r\n");

        let mut client = MemoryClient::new(16);
        let err = Uploader::new()
            .run(&mut client, &mut stream.as_slice())
            .unwrap_err();
        assert!(matches!(err, StreamError::MissingMeta), "{err}");
        assert_eq!(client.flush_calls, 0);
    }

    #[test]
    fn test_upload_rejects_second_meta() {
        let mut stream = Vec::new();
        let payload = Meta::new(8, 0, false).encode().unwrap();
        for _ in 0..2 {
            write_header(&mut stream, FrameKind::Meta, 0, payload.len() as u64).unwrap();
            stream.extend_from_slice(&payload);
            stream.extend_from_slice(b"\r\n");
        }

        let mut client = MemoryClient::new(8);
        let err = Uploader::new()
            .run(&mut client, &mut stream.as_slice())
            .unwrap_err();
        assert!(matches!(err, StreamError::UnexpectedFrame(_)), "{err}");
    }

    #[test]
    fn test_upload_checks_size_before_any_write() {
        let mut stream = Vec::new();
        let payload = Meta::new(2 << 30, 0, false).encode().unwrap();
        write_header(&mut stream, FrameKind::Meta, 0, payload.len() as u64).unwrap();
        stream.extend_from_slice(&payload);
        stream.extend_from_slice(b"\r\n");
        write_header(&mut stream, FrameKind::Zero, 0, 4096).unwrap();

        let mut client = MemoryClient::new(1024);
        let err = Uploader::new()
            .run(&mut client, &mut stream.as_slice())
            .unwrap_err();
        assert!(
            matches!(
                err,
                StreamError::DestinationTooSmall {
                    image,
                    destination: 1024,
                } if image == 2 << 30
            ),
            "{err}"
        );
        assert!(client.zero_calls.is_empty());
        assert_eq!(client.flush_calls, 0);
    }
}
