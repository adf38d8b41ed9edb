//! Capabilities consumed from the imageio service.
//!
//! The streaming engines depend only on the [`ImageioClient`] trait.
//! [`HttpClient`] talks to a real service over HTTPS; [`MemoryClient`]
//! applies the same operations to an in-memory buffer and backs the test
//! suite.

pub mod http;
pub mod memory;

pub use http::HttpClient;
pub use memory::MemoryClient;

use std::fmt;
use std::io::{Read, Write};

use crate::error::Result;
use crate::extent::Extent;

/// Chunk size for ranged reads and writes. Transfers stream one chunk at
/// a time and never hold a full range in memory.
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Extent enumeration context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentsContext {
    /// Data/hole layout of the whole image.
    Zero,
    /// Same coverage, with each extent carrying a dirty bit relative to
    /// the previous checkpoint.
    Dirty,
}

impl ExtentsContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zero => "zero",
            Self::Dirty => "dirty",
        }
    }
}

impl fmt::Display for ExtentsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronous capability surface of one image transfer.
///
/// Implementations may run worker threads or an event loop internally,
/// but every call blocks until its effect is complete. Dropping the
/// client releases the transport; callers keep the client alive for the
/// whole engine pass and drop it on every exit path.
pub trait ImageioClient {
    /// Virtual size of the image in bytes.
    fn size(&mut self) -> Result<u64>;

    /// Enumerate extents covering `[0, size)` in address order.
    fn extents(&mut self, context: ExtentsContext) -> Result<Vec<Extent>>;

    /// Stream exactly `length` bytes starting at `offset` into `sink`.
    fn write_to(&mut self, sink: &mut dyn Write, offset: u64, length: u64) -> Result<()>;

    /// Consume exactly `length` bytes from `source` and write them to the
    /// image at `offset`.
    fn read_from(&mut self, source: &mut dyn Read, offset: u64, length: u64) -> Result<()>;

    /// Punch or record a zero range.
    fn zero(&mut self, offset: u64, length: u64) -> Result<()>;

    /// Durably commit pending writes.
    fn flush(&mut self) -> Result<()>;
}
