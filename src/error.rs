//! Error types for sparse stream transfers.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors raised while encoding, decoding or applying a sparse stream.
///
/// There is no local recovery: any error aborts the current engine pass and
/// propagates to the caller, which releases the transport by dropping the
/// client.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Frame header shape wrong, bad hex field, or missing CRLF terminator.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The first frame of an uploaded stream was not a meta frame.
    #[error("stream does not start with a meta frame")]
    MissingMeta,

    /// A frame kind that cannot appear at this point of the stream.
    #[error("unexpected {0} frame in stream")]
    UnexpectedFrame(String),

    /// The service returned an extent list that is not a sorted,
    /// contiguous cover of the image.
    #[error("invalid extents: {0}")]
    InvalidExtents(String),

    /// The stream describes an image larger than the destination.
    #[error("image size {image} exceeds destination size {destination}")]
    DestinationTooSmall { image: u64, destination: u64 },

    /// Failure in the underlying HTTP transport, surfaced unchanged.
    #[error("transport: {0}")]
    Transport(String),

    /// A source or sink ended in the middle of a frame.
    #[error("short i/o: {0}")]
    ShortIo(String),

    /// The requested extents context is not available for this transfer.
    #[error("unsupported extents context: {0}")]
    UnsupportedContext(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        StreamError::Transport(err.to_string())
    }
}
