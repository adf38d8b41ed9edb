//! Sparse stream encoding and the transfer engines.
//!
//! A stream is a one-shot framed sequence: one meta frame, zero or more
//! data/zero frames, one stop frame. It is self-describing but not
//! seekable; meta comes first so a restorer can validate the destination
//! before any write.
//!
//! ```text
//! download:  service --extents/reads--> Downloader --frames--> byte sink
//! upload:    byte source --frames--> Uploader --zero/write/flush--> service
//! ```

pub mod download;
pub mod frame;
pub mod upload;

pub use download::{DownloadConfig, Downloader};
pub use frame::{read_header, write_header, FrameHeader, FrameKind, Meta, HEADER_SIZE};
pub use upload::Uploader;

/// Frame and byte counters for one download or upload pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    /// Data frames emitted or applied.
    pub data_frames: u64,

    /// Zero frames emitted or applied.
    pub zero_frames: u64,

    /// Bytes carried in data frame bodies.
    pub data_bytes: u64,

    /// Bytes covered by zero frames.
    pub zero_bytes: u64,
}

impl TransferStats {
    /// Data and zero frames combined, not counting meta and stop.
    pub fn frames(&self) -> u64 {
        self.data_frames + self.zero_frames
    }

    /// Image bytes covered by the transfer.
    pub fn bytes(&self) -> u64 {
        self.data_bytes + self.zero_bytes
    }
}
