//! Sparse image streaming between a local byte stream and an imageio
//! service.
//!
//! Disk images are mostly holes; moving them efficiently means never
//! shipping the zeros. This crate encodes an image as a framed sequence
//! of typed extents (the sparse stream), downloads an image into that
//! form by driving the service's extent enumeration, and restores a
//! stream by replaying its frames as ranged writes and zero calls. With
//! a dirty-context enumeration the same machinery produces incremental
//! backups that carry only the extents changed since a checkpoint.
//!
//! Everything streams: neither engine ever materializes more than one
//! chunk of image content in memory.

pub mod client;
pub mod error;
pub mod extent;
pub mod stream;

pub use client::{ExtentsContext, HttpClient, ImageioClient, MemoryClient};
pub use error::{Result, StreamError};
pub use extent::{Extent, ExtentKind};
pub use stream::{DownloadConfig, Downloader, Meta, TransferStats, Uploader};
