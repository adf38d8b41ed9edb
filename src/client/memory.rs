//! In-memory imageio client.
//!
//! Applies transfer operations to a plain byte buffer and records the
//! calls it receives. Stands in for a real service in tests and demos;
//! the engines cannot tell the difference.

use std::io::{self, Read, Write};

use crate::client::{ExtentsContext, ImageioClient, CHUNK_SIZE};
use crate::error::{Result, StreamError};
use crate::extent::Extent;

pub struct MemoryClient {
    data: Vec<u8>,
    extents: Vec<Extent>,
    dirty_supported: bool,

    /// Zero calls observed, in order.
    pub zero_calls: Vec<(u64, u64)>,

    /// Number of flush calls observed.
    pub flush_calls: u32,
}

impl MemoryClient {
    /// Client over an all-zero image of `size` bytes, enumerated as a
    /// single zero extent.
    pub fn new(size: u64) -> Self {
        let extents = if size > 0 {
            vec![Extent::zero(0, size)]
        } else {
            Vec::new()
        };
        Self::with_extents(vec![0; size as usize], extents)
    }

    /// Client over explicit image content and an explicit extent table.
    ///
    /// The table is returned verbatim from [`ImageioClient::extents`], so
    /// tests control exactly what an enumeration yields.
    pub fn with_extents(data: Vec<u8>, extents: Vec<Extent>) -> Self {
        Self {
            data,
            extents,
            dirty_supported: false,
            zero_calls: Vec::new(),
            flush_calls: 0,
        }
    }

    /// Allow enumeration in the dirty context.
    pub fn enable_dirty(mut self) -> Self {
        self.dirty_supported = true;
        self
    }

    /// Current image content.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Seed image content without going through a transfer, e.g. the base
    /// state an incremental stream is applied on top of.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn check_range(&self, offset: u64, length: u64) -> Result<()> {
        let end = offset.checked_add(length).ok_or_else(|| {
            StreamError::Transport(format!("range {offset}+{length} overflows"))
        })?;
        if end > self.data.len() as u64 {
            return Err(StreamError::Transport(format!(
                "range [{offset}, {end}) is outside image of {} bytes",
                self.data.len()
            )));
        }
        Ok(())
    }
}

impl ImageioClient for MemoryClient {
    fn size(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn extents(&mut self, context: ExtentsContext) -> Result<Vec<Extent>> {
        match context {
            ExtentsContext::Zero => Ok(self
                .extents
                .iter()
                .map(|e| Extent { dirty: false, ..*e })
                .collect()),
            ExtentsContext::Dirty => {
                if !self.dirty_supported {
                    return Err(StreamError::UnsupportedContext(
                        "dirty extents are not available for this transfer".to_string(),
                    ));
                }
                Ok(self.extents.clone())
            }
        }
    }

    fn write_to(&mut self, sink: &mut dyn Write, offset: u64, length: u64) -> Result<()> {
        self.check_range(offset, length)?;
        let range = &self.data[offset as usize..(offset + length) as usize];
        for chunk in range.chunks(CHUNK_SIZE) {
            sink.write_all(chunk)?;
        }
        Ok(())
    }

    fn read_from(&mut self, source: &mut dyn Read, offset: u64, length: u64) -> Result<()> {
        self.check_range(offset, length)?;
        let mut pos = offset as usize;
        let end = (offset + length) as usize;
        while pos < end {
            let count = CHUNK_SIZE.min(end - pos);
            source
                .read_exact(&mut self.data[pos..pos + count])
                .map_err(|err| {
                    if err.kind() == io::ErrorKind::UnexpectedEof {
                        StreamError::ShortIo(format!(
                            "stream ended inside a {length} byte data frame body"
                        ))
                    } else {
                        StreamError::Io(err)
                    }
                })?;
            pos += count;
        }
        Ok(())
    }

    fn zero(&mut self, offset: u64, length: u64) -> Result<()> {
        self.check_range(offset, length)?;
        self.data[offset as usize..(offset + length) as usize].fill(0);
        self.zero_calls.push((offset, length));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_calls += 1;
        Ok(())
    }
}
