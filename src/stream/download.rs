//! Download engine: image to sparse stream.
//!
//! Drives the client's extent enumeration and emits the framed stream:
//! one meta frame, a data or zero frame per extent in address order, then
//! stop. Data frame bodies are streamed from the service in lockstep, so
//! at most one chunk of image content is in memory at a time. A transport
//! failure mid-body leaves the stream truncated without a stop frame,
//! which is the reader's signal that the download failed.

use std::io::Write;

use tracing::debug;

use crate::client::{ExtentsContext, ImageioClient};
use crate::error::{Result, StreamError};
use crate::extent::Extent;
use crate::stream::frame::{self, FrameKind, Meta};
use crate::stream::TransferStats;

/// Download configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadConfig {
    /// Emit only extents changed since the previous checkpoint.
    pub incremental: bool,
}

/// Download engine.
pub struct Downloader {
    config: DownloadConfig,
}

impl Downloader {
    pub fn new(config: DownloadConfig) -> Self {
        Self { config }
    }

    /// Stream the image behind `client` into `sink`.
    pub fn run<C, W>(&self, client: &mut C, sink: &mut W) -> Result<TransferStats>
    where
        C: ImageioClient,
        W: Write,
    {
        let context = if self.config.incremental {
            ExtentsContext::Dirty
        } else {
            ExtentsContext::Zero
        };
        let extents = validated(client.extents(context)?)?;

        let virtual_size = extents.last().map(|e| e.end()).unwrap_or(0);
        let data_size = extents
            .iter()
            .filter(|e| e.is_data() && (!self.config.incremental || e.is_dirty()))
            .map(|e| e.length)
            .sum();
        debug!(virtual_size, data_size, count = extents.len(), "enumerated image");

        let meta = Meta::new(virtual_size, data_size, self.config.incremental);
        let payload = meta.encode()?;
        frame::write_header(sink, FrameKind::Meta, 0, payload.len() as u64)?;
        sink.write_all(&payload)?;
        frame::write_crlf(sink)?;

        let mut stats = TransferStats::default();
        for extent in &extents {
            if self.config.incremental && !extent.is_dirty() {
                continue;
            }
            if extent.is_zero() {
                frame::write_header(sink, FrameKind::Zero, extent.start, extent.length)?;
                stats.zero_frames += 1;
                stats.zero_bytes += extent.length;
            } else {
                frame::write_header(sink, FrameKind::Data, extent.start, extent.length)?;
                client.write_to(sink, extent.start, extent.length)?;
                frame::write_crlf(sink)?;
                stats.data_frames += 1;
                stats.data_bytes += extent.length;
            }
        }

        frame::write_header(sink, FrameKind::Stop, 0, 0)?;
        sink.flush()?;
        Ok(stats)
    }
}

/// Drop empty extents, then require a sorted, gap-free, overlap-free
/// cover starting at offset zero.
fn validated(extents: Vec<Extent>) -> Result<Vec<Extent>> {
    let mut offset = 0u64;
    let mut out = Vec::with_capacity(extents.len());
    for extent in extents {
        if extent.length == 0 {
            continue;
        }
        if extent.start < offset {
            return Err(StreamError::InvalidExtents(format!(
                "extent at {} overlaps previous extent ending at {offset}",
                extent.start
            )));
        }
        if extent.start > offset {
            return Err(StreamError::InvalidExtents(format!(
                "hole in enumeration between {offset} and {}",
                extent.start
            )));
        }
        offset = extent.start.checked_add(extent.length).ok_or_else(|| {
            StreamError::InvalidExtents(format!(
                "extent at {} with length {} overflows the address space",
                extent.start, extent.length
            ))
        })?;
        out.push(extent);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_accepts_contiguous_cover() {
        let extents = vec![
            Extent::data(0, 4096),
            Extent::zero(4096, 8192),
            Extent::data(12288, 4096),
        ];
        assert_eq!(validated(extents.clone()).unwrap(), extents);
    }

    #[test]
    fn test_validated_drops_empty_extents() {
        let extents = vec![
            Extent::data(0, 4096),
            Extent::zero(4096, 0),
            Extent::zero(4096, 4096),
        ];
        let out = validated(extents).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|e| e.length > 0));
    }

    #[test]
    fn test_validated_rejects_gap() {
        let err = validated(vec![Extent::data(0, 4096), Extent::data(8192, 4096)]).unwrap_err();
        assert!(matches!(err, StreamError::InvalidExtents(_)), "{err}");
    }

    #[test]
    fn test_validated_rejects_overlap() {
        let err = validated(vec![Extent::data(0, 4096), Extent::data(2048, 4096)]).unwrap_err();
        assert!(matches!(err, StreamError::InvalidExtents(_)), "{err}");
    }

    #[test]
    fn test_validated_rejects_enumeration_not_starting_at_zero() {
        let err = validated(vec![Extent::data(4096, 4096)]).unwrap_err();
        assert!(matches!(err, StreamError::InvalidExtents(_)), "{err}");
    }
}
