//! # Error Types
//!
//! This module provides the error types used throughout the crate. It
//! defines a central error type `MuxError` that encapsulates every failure
//! mode the muxer can surface, matching the error-kind table in the
//! specification this crate implements.
//!
//! ## Example Usage
//!
//! ```rust
//! use isdbtb_mux::error::{Result, MuxError};
//!
//! fn check_pid(pid: u16) -> Result<()> {
//!     if pid > 0x1fff {
//!         return Err(MuxError::InvalidStreamId(pid));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Primary error type for the muxer.
#[derive(Error, Debug)]
pub enum MuxError {
    /// A PSI/SI section grew past the 1024-byte private-section limit.
    #[error("section too large: {0} bytes (max 1024)")]
    SectionTooLarge(usize),

    /// A PMT's elementary stream loop plus descriptors would overflow the
    /// section's 10-bit length field.
    #[error("PMT for service {0:#06x} overflows section length")]
    PmtOverflow(u16),

    /// A stream's id/PID could not be mapped to a valid 13-bit PID.
    #[error("invalid stream id/pid: {0:#x}")]
    InvalidStreamId(u16),

    /// Two streams were assigned the same TS PID.
    #[error("duplicate pid assigned: {0:#06x}")]
    DuplicatePid(u16),

    /// A packet arrived for a stream before its first PTS was seen, while
    /// `first_pts_check` is enabled.
    #[error("stream {0} produced a packet with no PTS before the first one was seen")]
    MissingFirstPts(usize),

    /// An H.264 access unit had no Annex-B start code and no prior frame to
    /// fall back on.
    #[error("h264 stream {0} first packet has no Annex-B start code")]
    InvalidH264(usize),

    /// An AAC access unit lacked ADTS sync and no sub-muxer was configured
    /// to reframe it.
    #[error("aac stream {0} packet has no ADTS sync and no sub-muxer is configured")]
    AacWithoutAdts(usize),

    /// A buffer allocation/resize failed or exceeded an internal bound.
    #[error("allocation failure: {0}")]
    Allocation(String),

    /// I/O errors from the underlying sink.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for muxer operations.
pub type Result<T> = std::result::Result<T, MuxError>;
